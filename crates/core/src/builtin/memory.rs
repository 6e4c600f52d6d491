//! Built-in in-memory log driver.
//!
//! Sequences batches straight into memory, integrates on demand or on an
//! interval, and publishes unsigned checkpoint bodies. The signing wrap is
//! the witness gateway's job and is out of scope for the built-in driver.

use std::sync::{Arc, RwLock};

use tracing::{debug, info};

use crate::{
    hash, CancelToken, Checkpoint, ConfigError, Driver, Entry, EphemeralLogConfig, FlushSink,
    LeafHash, LeafIndex, LogReader, RangeInfo, StoreError, TreeSize, ENTRY_BUNDLE_WIDTH,
};

#[derive(Default)]
struct LogState {
    // marshalled slots and leaf hashes, both indexed by sequence number
    slots: Vec<Vec<u8>>,
    leaf_hashes: Vec<LeafHash>,
    integrated: u64,
    checkpoint: Option<Vec<u8>>,
}

/// A basic in-memory log: sequencer, integrator and reader in one.
#[derive(Clone)]
pub struct EphemeralLog {
    state: Arc<RwLock<LogState>>,
    config: EphemeralLogConfig,
}

impl EphemeralLog {
    pub fn new(config: EphemeralLogConfig) -> Self {
        Self {
            state: Arc::new(RwLock::new(LogState::default())),
            config,
        }
    }

    /// Number of sequenced entries, integrated or not.
    pub fn sequenced_size(&self) -> TreeSize {
        self.state.read().unwrap().slots.len() as u64
    }

    /// Fold everything sequenced so far into the tree.
    pub fn integrate(&self) -> TreeSize {
        let mut state = self.state.write().unwrap();
        state.integrated = state.slots.len() as u64;
        state.integrated
    }

    /// Publish a checkpoint body for the current integrated tree.
    pub fn publish_checkpoint(&self) -> Checkpoint {
        let mut state = self.state.write().unwrap();

        let size = state.integrated;
        let root_hash = hash::root_from_leaf_hashes(&state.leaf_hashes[..size as usize]);

        let checkpoint = Checkpoint {
            origin: self.config.origin.clone(),
            size,
            root_hash,
        };

        state.checkpoint = Some(checkpoint.to_text().into_bytes());
        debug!(size, "checkpoint published");

        checkpoint
    }

    /// Background loop: integrate and publish on the configured interval.
    pub async fn run<C: CancelToken>(self, cancel: C) {
        info!("ephemeral log integrator started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.config.checkpoint_interval()) => {}
            }

            self.integrate();
            self.publish_checkpoint();
        }

        info!("ephemeral log integrator stopped");
    }
}

impl FlushSink for EphemeralLog {
    async fn flush(&self, entries: &[Entry]) -> Result<LeafIndex, StoreError> {
        let mut state = self.state.write().unwrap();

        let outstanding = state.slots.len() as u64 - state.integrated;
        if outstanding + entries.len() as u64 > self.config.pushback_max_outstanding {
            return Err(StoreError::Pushback);
        }

        let base = state.slots.len() as u64;

        for (offset, entry) in entries.iter().enumerate() {
            let slot = entry.marshal_for_bundle(base + offset as u64);
            state.slots.push(slot);
            state.leaf_hashes.push(*entry.leaf_hash());
        }

        debug!(base, count = entries.len(), "batch sequenced");

        Ok(base)
    }
}

impl LogReader for EphemeralLog {
    type EntryStream =
        tokio_stream::Iter<std::vec::IntoIter<Result<(RangeInfo, Vec<u8>), StoreError>>>;

    async fn read_checkpoint(&self) -> Result<Vec<u8>, StoreError> {
        self.state
            .read()
            .unwrap()
            .checkpoint
            .clone()
            .ok_or(StoreError::NotFound)
    }

    async fn integrated_size(&self) -> Result<TreeSize, StoreError> {
        Ok(self.state.read().unwrap().integrated)
    }

    fn stream_entries(&self, from: LeafIndex) -> Self::EntryStream {
        let state = self.state.read().unwrap();

        let mut items = Vec::new();
        let mut cursor = from;

        while cursor < state.integrated {
            let bundle_index = cursor / ENTRY_BUNDLE_WIDTH;
            let first_offset = (cursor % ENTRY_BUNDLE_WIDTH) as usize;
            let bundle_end = ((bundle_index + 1) * ENTRY_BUNDLE_WIDTH).min(state.integrated);

            let payload: Vec<u8> = state.slots[cursor as usize..bundle_end as usize].concat();
            let count = (bundle_end - cursor) as usize;

            items.push(Ok((
                RangeInfo {
                    bundle_index,
                    first_offset,
                    count,
                },
                payload,
            )));

            cursor = bundle_end;
        }

        items.push(Err(StoreError::NotFound));
        tokio_stream::iter(items)
    }
}

impl Driver for EphemeralLog {
    type Sink = EphemeralLog;
    type Reader = EphemeralLog;

    fn appender(&self) -> Result<(Self::Sink, Self::Reader), ConfigError> {
        Ok((self.clone(), self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use futures_util::StreamExt as _;

    use super::*;
    use crate::bundle;

    fn log() -> EphemeralLog {
        EphemeralLog::new(EphemeralLogConfig::default())
    }

    fn entries(leaves: &[&[u8]]) -> Vec<Entry> {
        leaves.iter().map(|l| Entry::new(l.to_vec())).collect()
    }

    #[tokio::test]
    async fn flush_allocates_contiguous_indices() {
        let log = log();

        let base = log.flush(&entries(&[b"a", b"b"])).await.unwrap();
        assert_eq!(base, 0);

        let base = log.flush(&entries(&[b"c"])).await.unwrap();
        assert_eq!(base, 2);

        assert_eq!(log.sequenced_size(), 3);
    }

    #[tokio::test]
    async fn flush_marshals_with_the_final_index() {
        let log = log();

        let entry = Entry::new(b"data".to_vec()).with_marshaller(Arc::new(|data, index| {
            let mut slot = bundle::encode_slot(data);
            slot.extend_from_slice(&index.to_be_bytes());
            slot
        }));

        log.flush(&entries(&[b"pad"])).await.unwrap();
        log.flush(&[entry]).await.unwrap();

        let state = log.state.read().unwrap();
        assert!(state.slots[1].ends_with(&1u64.to_be_bytes()));
    }

    #[tokio::test]
    async fn pushback_caps_outstanding_entries() {
        let log = EphemeralLog::new(EphemeralLogConfig {
            pushback_max_outstanding: 2,
            ..Default::default()
        });

        log.flush(&entries(&[b"a", b"b"])).await.unwrap();

        assert!(matches!(
            log.flush(&entries(&[b"c"])).await,
            Err(StoreError::Pushback)
        ));

        // integrating frees the window
        log.integrate();
        log.flush(&entries(&[b"c"])).await.unwrap();
    }

    #[tokio::test]
    async fn checkpoint_reflects_the_integrated_tree() {
        let log = log();

        assert!(matches!(
            log.read_checkpoint().await,
            Err(StoreError::NotFound)
        ));

        log.flush(&entries(&[b"a", b"b"])).await.unwrap();
        log.integrate();
        let published = log.publish_checkpoint();

        let parsed = Checkpoint::parse(&log.read_checkpoint().await.unwrap()).unwrap();
        assert_eq!(parsed, published);
        assert_eq!(parsed.size, 2);

        let expected = hash::root_from_leaf_hashes(&[
            hash::leaf_hash(b"a"),
            hash::leaf_hash(b"b"),
        ]);
        assert_eq!(parsed.root_hash, expected);
    }

    #[tokio::test]
    async fn streaming_starts_mid_bundle_and_ends_not_found() {
        let log = log();

        let leaves: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i]).collect();
        let refs: Vec<&[u8]> = leaves.iter().map(|l| l.as_slice()).collect();
        log.flush(&entries(&refs)).await.unwrap();
        log.integrate();

        let mut stream = log.stream_entries(4);

        let (range, payload) = stream.next().await.unwrap().unwrap();
        assert_eq!(range.bundle_index, 0);
        assert_eq!(range.first_offset, 4);
        assert_eq!(range.count, 6);

        let slots: Vec<Vec<u8>> = bundle::bundle_slots(&payload)
            .unwrap()
            .iter()
            .map(|s| s.to_vec())
            .collect();
        let expected: Vec<Vec<u8>> = (4..10u8).map(|i| vec![i]).collect();
        assert_eq!(slots, expected);

        assert!(matches!(
            stream.next().await.unwrap(),
            Err(StoreError::NotFound)
        ));
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn unintegrated_entries_are_not_streamed() {
        let log = log();

        log.flush(&entries(&[b"a"])).await.unwrap();
        log.integrate();
        log.flush(&entries(&[b"b"])).await.unwrap();

        let mut stream = log.stream_entries(0);
        let (range, _) = stream.next().await.unwrap().unwrap();
        assert_eq!(range.count, 1);
    }
}
