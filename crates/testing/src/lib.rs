//! Test helpers shared across the treeline crates: deterministic leaves,
//! scripted log readers and recording flush sinks.

use rand::Rng as _;

use treeline_core::{hash, CancelToken, IdentityHash};

pub mod sinks;
pub mod streams;

/// Deterministic leaf payload for the given ordinal.
pub fn leaf(n: u64) -> Vec<u8> {
    format!("leaf-{n}").into_bytes()
}

/// A run of deterministic leaves `0..count`.
pub fn leaves(count: u64) -> Vec<Vec<u8>> {
    (0..count).map(leaf).collect()
}

/// Identity hash of the deterministic leaf for the given ordinal.
pub fn leaf_identity(n: u64) -> IdentityHash {
    hash::identity_hash(&leaf(n))
}

/// A random leaf payload of the given length.
pub fn random_leaf(len: usize) -> Vec<u8> {
    let mut rng = rand::rng();
    (0..len).map(|_| rng.random()).collect()
}

/// A cancel token that never fires.
#[derive(Clone)]
pub struct NeverCancel;

impl CancelToken for NeverCancel {
    async fn cancelled(&self) {
        std::future::pending::<()>().await
    }
}
