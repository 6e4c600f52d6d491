//! A scripted log reader for follower and terminator tests.

use std::sync::{Arc, Mutex};

use treeline_core::{
    bundle, hash, Checkpoint, LeafIndex, LogReader, RangeInfo, StoreError, TreeSize,
    ENTRY_BUNDLE_WIDTH,
};

#[derive(Default)]
struct ScriptState {
    leaves: Vec<Vec<u8>>,
    integrated: u64,
    checkpoint: Option<Vec<u8>>,
    fail_next_size: bool,
}

/// An in-memory integrated log whose contents, checkpoint and failures are
/// all driven explicitly by the test.
#[derive(Clone, Default)]
pub struct ScriptedLog {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append leaves and mark them integrated.
    pub fn extend(&self, leaves: impl IntoIterator<Item = Vec<u8>>) {
        let mut state = self.state.lock().unwrap();
        state.leaves.extend(leaves);
        state.integrated = state.leaves.len() as u64;
    }

    /// Publish a checkpoint of the given size, with the root computed over
    /// whatever leaves the script holds below it.
    pub fn publish(&self, size: TreeSize) {
        let mut state = self.state.lock().unwrap();

        let covered = (size as usize).min(state.leaves.len());
        let hashes: Vec<_> = state.leaves[..covered]
            .iter()
            .map(|leaf| hash::leaf_hash(leaf))
            .collect();

        let checkpoint = Checkpoint {
            origin: "test/log".to_string(),
            size,
            root_hash: hash::root_from_leaf_hashes(&hashes),
        };

        state.checkpoint = Some(checkpoint.to_text().into_bytes());
    }

    /// Publish raw checkpoint bytes, malformed ones included.
    pub fn publish_raw(&self, raw: Vec<u8>) {
        self.state.lock().unwrap().checkpoint = Some(raw);
    }

    /// Make the next `integrated_size` call fail once.
    pub fn fail_next_size(&self) {
        self.state.lock().unwrap().fail_next_size = true;
    }
}

impl LogReader for ScriptedLog {
    type EntryStream =
        tokio_stream::Iter<std::vec::IntoIter<Result<(RangeInfo, Vec<u8>), StoreError>>>;

    async fn read_checkpoint(&self) -> Result<Vec<u8>, StoreError> {
        self.state
            .lock()
            .unwrap()
            .checkpoint
            .clone()
            .ok_or(StoreError::NotFound)
    }

    async fn integrated_size(&self) -> Result<TreeSize, StoreError> {
        let mut state = self.state.lock().unwrap();

        if state.fail_next_size {
            state.fail_next_size = false;
            return Err(StoreError::internal("scripted size failure"));
        }

        Ok(state.integrated)
    }

    fn stream_entries(&self, from: LeafIndex) -> Self::EntryStream {
        let state = self.state.lock().unwrap();

        let mut items = Vec::new();
        let mut cursor = from;

        while cursor < state.integrated {
            let bundle_index = cursor / ENTRY_BUNDLE_WIDTH;
            let first_offset = (cursor % ENTRY_BUNDLE_WIDTH) as usize;
            let bundle_end = ((bundle_index + 1) * ENTRY_BUNDLE_WIDTH).min(state.integrated);

            let mut payload = Vec::new();
            for leaf in &state.leaves[cursor as usize..bundle_end as usize] {
                payload.extend(bundle::encode_slot(leaf));
            }

            items.push(Ok((
                RangeInfo {
                    bundle_index,
                    first_offset,
                    count: (bundle_end - cursor) as usize,
                },
                payload,
            )));

            cursor = bundle_end;
        }

        items.push(Err(StoreError::NotFound));
        tokio_stream::iter(items)
    }
}
