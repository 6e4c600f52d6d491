//! Built-in in-memory antispam store.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::{AntispamError, AntispamStore, IdentityHash, LeafIndex};

#[derive(Default)]
struct AntispamState {
    entries: HashMap<IdentityHash, LeafIndex>,
    processed_entries: u64,
}

/// A basic in-memory identity index. Same insert-if-absent discipline as the
/// persistent store, no durability.
#[derive(Clone, Default)]
pub struct EphemeralAntispam {
    state: Arc<RwLock<AntispamState>>,
}

impl EphemeralAntispam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rewind the follower cursor, e.g. to exercise replays in tests.
    pub fn reset_cursor(&self, processed_entries: u64) {
        self.state.write().unwrap().processed_entries = processed_entries;
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AntispamStore for EphemeralAntispam {
    fn lookup(&self, identity: &IdentityHash) -> Result<Option<LeafIndex>, AntispamError> {
        let state = self.state.read().unwrap();
        Ok(state.entries.get(identity).copied())
    }

    fn processed_entries(&self) -> Result<u64, AntispamError> {
        let state = self.state.read().unwrap();
        Ok(state.processed_entries)
    }

    fn apply_batch(
        &self,
        rows: &[(IdentityHash, LeafIndex)],
        processed_entries: u64,
    ) -> Result<(), AntispamError> {
        let mut state = self.state.write().unwrap();

        for (identity, index) in rows {
            state.entries.entry(*identity).or_insert(*index);
        }

        state.processed_entries = processed_entries;

        Ok(())
    }
}
