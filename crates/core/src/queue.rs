//! Sequencing queue: batches incoming entries, deduplicates identities
//! within the batch window and resolves per-entry index futures once the
//! storage driver reports the base index for a flushed batch.
//!
//! Accumulation and flushing are decoupled: batches travel to a single
//! worker task over a capacity-1 channel, so the next batch starts filling
//! while the previous one is still being sequenced.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    append::AddDelegate, AppendError, Assignment, CancelToken, Entry, FlushSink, IdentityHash,
    IndexFuture, IndexResolver, QueueConfig,
};

struct BatchItem {
    entry: Entry,
    resolver: IndexResolver,
}

#[derive(Default)]
struct Inner {
    in_flight: HashMap<IdentityHash, IndexFuture>,
    buffer: Vec<BatchItem>,
    batch_seq: u64,
}

fn take_batch(inner: &mut Inner) -> Vec<BatchItem> {
    inner.batch_seq += 1;
    std::mem::take(&mut inner.buffer)
}

#[derive(Clone)]
pub struct SequencerQueue {
    inner: Arc<Mutex<Inner>>,
    dispatch_tx: mpsc::Sender<Vec<BatchItem>>,
    config: QueueConfig,
}

impl SequencerQueue {
    /// Build the queue and spawn its flush worker around the given sink.
    pub fn start<F, C>(sink: F, config: &QueueConfig, cancel: C) -> Self
    where
        F: FlushSink,
        C: CancelToken,
    {
        let inner = Arc::new(Mutex::new(Inner::default()));
        let (dispatch_tx, rx) = mpsc::channel(1);

        tokio::spawn(run_worker(sink, rx, Arc::clone(&inner), cancel));

        Self {
            inner,
            dispatch_tx,
            config: config.clone(),
        }
    }

    /// Enqueue an entry for sequencing.
    ///
    /// Never touches network or disk; blocks only on the in-flight mutex and,
    /// when a batch boundary is crossed, on the dispatch channel. A duplicate
    /// identity within the current window returns the first record's future.
    pub async fn add(&self, entry: Entry) -> IndexFuture {
        let (future, batch, arm_timer) = {
            let mut inner = self.inner.lock().unwrap();

            if let Some(existing) = inner.in_flight.get(entry.identity()) {
                return existing.clone();
            }

            let (resolver, future) = IndexFuture::pending();
            inner.in_flight.insert(*entry.identity(), future.clone());
            inner.buffer.push(BatchItem { entry, resolver });

            let batch = (inner.buffer.len() >= self.config.max_size)
                .then(|| take_batch(&mut inner));

            // first entry of a fresh window starts the age clock
            let arm_timer =
                (batch.is_none() && inner.buffer.len() == 1).then_some(inner.batch_seq);

            (future, batch, arm_timer)
        };

        if let Some(guard_seq) = arm_timer {
            let queue = self.clone();
            tokio::spawn(async move {
                tokio::time::sleep(queue.config.max_age()).await;
                queue.flush_due(guard_seq).await;
            });
        }

        if let Some(batch) = batch {
            self.dispatch(batch).await;
        }

        future
    }

    /// Age-based flush: a no-op if the guarded window was already flushed by
    /// the size trigger.
    async fn flush_due(&self, guard_seq: u64) {
        let batch = {
            let mut inner = self.inner.lock().unwrap();

            if inner.batch_seq != guard_seq || inner.buffer.is_empty() {
                return;
            }

            take_batch(&mut inner)
        };

        self.dispatch(batch).await;
    }

    async fn dispatch(&self, batch: Vec<BatchItem>) {
        if let Err(rejected) = self.dispatch_tx.send(batch).await {
            warn!(count = rejected.0.len(), "sequencer worker unavailable");
            self.abort_batch(rejected.0, AppendError::Stopped);
        }
    }

    fn abort_batch(&self, batch: Vec<BatchItem>, err: AppendError) {
        {
            let mut inner = self.inner.lock().unwrap();
            for item in &batch {
                inner.in_flight.remove(item.entry.identity());
            }
        }

        for item in batch {
            item.resolver.resolve(Err(err.clone()));
        }
    }
}

#[async_trait::async_trait]
impl AddDelegate for SequencerQueue {
    async fn add(&self, entry: Entry) -> IndexFuture {
        SequencerQueue::add(self, entry).await
    }
}

async fn run_worker<F, C>(
    sink: F,
    mut rx: mpsc::Receiver<Vec<BatchItem>>,
    inner: Arc<Mutex<Inner>>,
    cancel: C,
) where
    F: FlushSink,
    C: CancelToken,
{
    loop {
        let batch = tokio::select! {
            _ = cancel.cancelled() => {
                debug!("sequencer worker stopped");
                return;
            }
            next = rx.recv() => match next {
                Some(batch) => batch,
                None => return,
            },
        };

        let entries: Vec<Entry> = batch.iter().map(|item| item.entry.clone()).collect();
        let result = sink.flush(&entries).await;

        {
            let mut inner = inner.lock().unwrap();
            for item in &batch {
                inner.in_flight.remove(item.entry.identity());
            }
        }

        match result {
            Ok(base) => {
                debug!(base, count = batch.len(), "batch sequenced");

                for (offset, item) in batch.into_iter().enumerate() {
                    item.resolver
                        .resolve(Ok(Assignment::new(base + offset as u64)));
                }
            }
            Err(err) => {
                warn!(%err, count = batch.len(), "batch flush failed");
                let err = AppendError::from(err);

                for item in batch {
                    item.resolver.resolve(Err(err.clone()));
                }
            }
        }
    }
}
