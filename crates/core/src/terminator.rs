//! Lifecycle terminator: gates the add chain once shutdown begins and holds
//! shutdown until a published checkpoint commits to the largest index that
//! was issued to a caller.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{
    append::{Add, AddDelegate},
    checkpoint::CheckpointError,
    AppendError, CancelToken, Checkpoint, Entry, IndexFuture, LogReader, StoreError,
};

const CHECKPOINT_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Error)]
pub enum ShutdownError {
    #[error("shutdown cancelled before the checkpoint caught up")]
    Cancelled,

    #[error("checkpoint parse error: {0}")]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct Terminator<R: LogReader> {
    delegate: Add,
    reader: R,
    stopped: RwLock<bool>,
    largest_issued: Arc<AtomicU64>,
}

impl<R: LogReader> Terminator<R> {
    pub fn new(delegate: Add, reader: R) -> Self {
        Self {
            delegate,
            reader,
            stopped: RwLock::new(false),
            largest_issued: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Stop accepting adds, then poll the latest checkpoint until its size
    /// exceeds the largest index observed by a caller.
    ///
    /// Checkpoint size is monotonic and commits to every index below it, so
    /// `size > largest` is the whole contract. Entries that were sequenced
    /// but whose futures were never awaited are not waited on.
    pub async fn shutdown<C: CancelToken>(&self, cancel: C) -> Result<(), ShutdownError> {
        {
            let mut stopped = self.stopped.write().await;
            *stopped = true;
        }

        let largest = self.largest_issued.load(Ordering::Acquire);

        if largest == 0 {
            debug!("no indices issued, shutdown complete");
            return Ok(());
        }

        loop {
            match self.reader.read_checkpoint().await {
                Ok(raw) => {
                    let checkpoint = Checkpoint::parse(&raw)?;

                    if checkpoint.size > largest {
                        info!(
                            size = checkpoint.size,
                            largest, "checkpoint covers every issued index"
                        );
                        return Ok(());
                    }

                    debug!(size = checkpoint.size, largest, "checkpoint still behind");
                }
                Err(StoreError::NotFound) => {
                    debug!("checkpoint not yet published");
                }
                Err(err) => return Err(err.into()),
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(ShutdownError::Cancelled),
                _ = tokio::time::sleep(CHECKPOINT_POLL_INTERVAL) => {}
            }
        }
    }
}

#[async_trait::async_trait]
impl<R: LogReader> AddDelegate for Terminator<R> {
    async fn add(&self, entry: Entry) -> IndexFuture {
        // holding the read lock across delegation means the shutdown write
        // lock never interleaves with an add that is mid-flight
        let stopped = self.stopped.read().await;

        if *stopped {
            return IndexFuture::failed(AppendError::Stopped);
        }

        let future = self.delegate.add(entry).await;
        drop(stopped);

        let largest = Arc::clone(&self.largest_issued);
        future.observed(move |assignment| {
            largest.fetch_max(assignment.index, Ordering::AcqRel);
        })
    }
}
