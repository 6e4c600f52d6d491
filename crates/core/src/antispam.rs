//! Append-side antispam: a persistent identity-to-index table derived from
//! the integrated log, plus a fast-path decorator that short-circuits
//! duplicate adds before they reach the queue.
//!
//! Deduplication here is best-effort spam control, not a correctness
//! guarantee: a stale follower just lets duplicates through.

use std::collections::HashSet;
use std::sync::Arc;

use futures_util::StreamExt as _;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
    append::{Add, AddDecorator, AddDelegate, FollowerTask},
    backoff::{Backoff, BackoffConfig},
    bundle::{self, BundleError},
    hash, Assignment, CancelToken, Entry, FollowerConfig, IdentityHash, IndexFuture, LeafIndex,
    LogReader, RangeInfo, StoreError,
};

#[derive(Debug, Error)]
pub enum AntispamError {
    #[error("antispam store error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AntispamError {
    pub fn internal<T>(value: T) -> Self
    where
        T: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        AntispamError::Internal(value.into())
    }
}

/// Persistent identity-to-index table plus the follower cursor.
///
/// Rows are insert-if-absent: once a key holds an index it is never
/// rewritten, which keeps the smallest observed index in place even under
/// replays or out-of-order streams.
pub trait AntispamStore: Clone + Send + Sync + 'static {
    fn lookup(&self, identity: &IdentityHash) -> Result<Option<LeafIndex>, AntispamError>;

    /// Follower position: every entry below this index has had a row
    /// insertion attempt.
    fn processed_entries(&self) -> Result<u64, AntispamError>;

    /// Insert the given rows where absent and advance the cursor, atomically.
    fn apply_batch(
        &self,
        rows: &[(IdentityHash, LeafIndex)],
        processed_entries: u64,
    ) -> Result<(), AntispamError>;
}

/// Computes the identity hash of a decoded bundle slot. Personalities that
/// override entry marshalling supply a matching hasher.
pub type BundleHasher = Arc<dyn Fn(&[u8]) -> IdentityHash + Send + Sync>;

/// Add decorator: a lookup hit resolves immediately to the stored index with
/// `is_dup` set, without consuming a sequence number. Misses and lookup
/// errors fall through to the inner add.
pub struct PersistentDedup<S: AntispamStore> {
    store: S,
    inner: Add,
}

impl<S: AntispamStore> PersistentDedup<S> {
    pub fn new(store: S, inner: Add) -> Self {
        Self { store, inner }
    }
}

#[async_trait::async_trait]
impl<S: AntispamStore> AddDelegate for PersistentDedup<S> {
    async fn add(&self, entry: Entry) -> IndexFuture {
        match self.store.lookup(entry.identity()) {
            Ok(Some(index)) => IndexFuture::resolved(Assignment { index, is_dup: true }),
            Ok(None) => self.inner.add(entry).await,
            Err(err) => {
                warn!(%err, "antispam lookup failed, letting entry through");
                self.inner.add(entry).await
            }
        }
    }
}

/// Decorator constructor for the assembly options.
pub fn decorator<S: AntispamStore>(store: S) -> AddDecorator {
    Box::new(move |inner| Arc::new(PersistentDedup::new(store, inner)))
}

/// Follower task constructor for the assembly options.
pub fn follower<S, R, C>(store: S, config: FollowerConfig) -> FollowerTask<R, C>
where
    S: AntispamStore,
    R: LogReader,
    C: CancelToken,
{
    Box::new(move |reader, cancel| {
        let follower = AntispamFollower::new(store, reader, config);
        Box::pin(follower.run(cancel))
    })
}

#[derive(Debug, Error)]
enum FollowError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Antispam(#[from] AntispamError),

    #[error(transparent)]
    Bundle(#[from] BundleError),
}

enum Progress {
    CaughtUp,
    Advanced,
}

/// Tails the integrated log and writes identity rows into the persistent
/// store, one transaction per bundle.
pub struct AntispamFollower<S, R> {
    store: S,
    reader: R,
    hasher: BundleHasher,
    config: FollowerConfig,
    backoff: BackoffConfig,
}

impl<S, R> AntispamFollower<S, R>
where
    S: AntispamStore,
    R: LogReader,
{
    pub fn new(store: S, reader: R, config: FollowerConfig) -> Self {
        Self {
            store,
            reader,
            hasher: Arc::new(hash::identity_hash),
            config,
            backoff: BackoffConfig::default(),
        }
    }

    pub fn with_hasher(mut self, hasher: BundleHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub async fn run<C: CancelToken>(self, cancel: C) {
        let mut backoff = Backoff::new(&self.backoff);

        info!("antispam follower started");

        loop {
            let step = tokio::select! {
                _ = cancel.cancelled() => break,
                step = self.tick() => step,
            };

            let delay = match step {
                Ok(Progress::Advanced) => {
                    backoff.reset();
                    continue;
                }
                Ok(Progress::CaughtUp) => {
                    backoff.reset();
                    self.config.poll_interval()
                }
                Err(err) => {
                    warn!(%err, "antispam follower error");
                    backoff.next()
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("antispam follower stopped");
    }

    /// One pass over whatever the integrated log has beyond our cursor.
    async fn tick(&self) -> Result<Progress, FollowError> {
        let size = self.reader.integrated_size().await?;
        let cursor = self.store.processed_entries()?;

        if cursor >= size {
            return Ok(Progress::CaughtUp);
        }

        debug!(cursor, size, "catching up with integrated entries");

        let mut stream = self.reader.stream_entries(cursor);
        let mut advanced = false;

        while let Some(item) = stream.next().await {
            let (range, payload) = match item {
                Ok(next) => next,
                Err(StoreError::NotFound) => break,
                Err(err) => return Err(err.into()),
            };

            self.ingest_bundle(&range, &payload)?;
            advanced = true;
        }

        Ok(if advanced {
            Progress::Advanced
        } else {
            Progress::CaughtUp
        })
    }

    fn ingest_bundle(&self, range: &RangeInfo, payload: &[u8]) -> Result<(), FollowError> {
        let slots = bundle::bundle_slots(payload)?;

        if slots.len() != range.count {
            warn!(
                expected = range.count,
                actual = slots.len(),
                bundle = range.bundle_index,
                "bundle slot count mismatch"
            );
        }

        let first = range.first_index();
        let mut rows: Vec<(IdentityHash, LeafIndex)> = Vec::with_capacity(slots.len());
        let mut seen: HashSet<IdentityHash> = HashSet::with_capacity(slots.len());

        for (offset, slot) in slots.iter().enumerate() {
            let identity = (self.hasher)(slot);

            // ascending order, so the first occurrence carries the smallest
            // index; the store skips keys that already have a row
            if seen.insert(identity) {
                rows.push((identity, first + offset as u64));
            }
        }

        let processed_entries = first + slots.len() as u64;
        self.store.apply_batch(&rows, processed_entries)?;

        debug!(
            rows = rows.len(),
            processed_entries, "antispam rows applied"
        );

        Ok(())
    }
}
