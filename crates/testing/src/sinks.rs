//! Recording flush sinks for queue-level assertions.

use std::sync::{Arc, Mutex};

use treeline_core::{Entry, FlushSink, LeafIndex, StoreError};

#[derive(Default)]
struct SinkState {
    batches: Vec<Vec<Vec<u8>>>,
    next_index: u64,
    fail_next: bool,
    pushback: bool,
}

/// A sink that allocates indices in memory and remembers every batch it saw.
#[derive(Clone, Default)]
pub struct RecordingSink {
    state: Arc<Mutex<SinkState>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every flushed batch, in arrival order, as raw leaf payloads.
    pub fn batches(&self) -> Vec<Vec<Vec<u8>>> {
        self.state.lock().unwrap().batches.clone()
    }

    pub fn flush_count(&self) -> usize {
        self.state.lock().unwrap().batches.len()
    }

    pub fn total_entries(&self) -> u64 {
        self.state.lock().unwrap().next_index
    }

    /// Fail the next flush with a transient storage error.
    pub fn fail_next(&self) {
        self.state.lock().unwrap().fail_next = true;
    }

    /// Reject every flush with pushback from now on.
    pub fn pushback(&self, on: bool) {
        self.state.lock().unwrap().pushback = on;
    }
}

impl FlushSink for RecordingSink {
    async fn flush(&self, entries: &[Entry]) -> Result<LeafIndex, StoreError> {
        let mut state = self.state.lock().unwrap();

        if state.pushback {
            return Err(StoreError::Pushback);
        }

        if state.fail_next {
            state.fail_next = false;
            return Err(StoreError::internal("scripted flush failure"));
        }

        let base = state.next_index;
        state.next_index += entries.len() as u64;
        state
            .batches
            .push(entries.iter().map(|entry| entry.data().to_vec()).collect());

        Ok(base)
    }
}
