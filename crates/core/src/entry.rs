//! Leaf entries as handed over by personalities.

use std::sync::Arc;

use crate::{bundle, hash, IdentityHash, LeafHash, LeafIndex};

/// Produces the bundle slot for a leaf once its final index is known.
///
/// Must be pure with respect to the index argument: the driver may invoke it
/// again on retry and expects the same bytes back.
pub type Marshaller = Arc<dyn Fn(&[u8], LeafIndex) -> Vec<u8> + Send + Sync>;

/// An opaque leaf value plus its precomputed hashes.
///
/// The data is immutable once constructed; both hashes are deterministic
/// functions of it. Cloning is cheap, the payload is shared.
#[derive(Clone)]
pub struct Entry {
    data: Arc<Vec<u8>>,
    identity: IdentityHash,
    leaf_hash: LeafHash,
    marshaller: Marshaller,
}

impl Entry {
    /// Build an entry with the default tlog-tiles slot encoding.
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        let data = data.into();
        let identity = hash::identity_hash(&data);
        let leaf_hash = hash::leaf_hash(&data);

        Self {
            data: Arc::new(data),
            identity,
            leaf_hash,
            marshaller: Arc::new(|data, _| bundle::encode_slot(data)),
        }
    }

    /// Replace the slot marshaller. Personalities use this to inject metadata
    /// that depends on the assigned index.
    pub fn with_marshaller(mut self, marshaller: Marshaller) -> Self {
        self.marshaller = marshaller;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn identity(&self) -> &IdentityHash {
        &self.identity
    }

    pub fn leaf_hash(&self) -> &LeafHash {
        &self.leaf_hash
    }

    /// Bundle slot encoding for this entry at its final index.
    pub fn marshal_for_bundle(&self, index: LeafIndex) -> Vec<u8> {
        (self.marshaller)(&self.data, index)
    }
}

impl std::fmt::Debug for Entry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entry")
            .field("identity", &hex::encode(self.identity))
            .field("len", &self.data.len())
            .finish()
    }
}
