//! Traits and machinery that are common to all treeline crates.
//!
//! Glossary:
//!  - `leaf`/`entry`: an opaque byte string appended to the log.
//!  - `bundle`: up to 256 consecutive entries in tlog-tiles slot encoding.
//!  - `checkpoint`: a signed statement committing to the tree at some size.
//!  - `follower`: a background task deriving a secondary index by tailing
//!    the integrated log.
//!  - `decorator`: a layer wrapping the add operation of the append pipeline.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub mod antispam;
pub mod append;
pub mod backoff;
pub mod builtin;
pub mod bundle;
pub mod checkpoint;
pub mod dedup;
pub mod entry;
pub mod future;
pub mod hash;
pub mod queue;
pub mod terminator;

/// The sequence number assigned to a leaf
pub type LeafIndex = u64;

/// The number of leaves committed by a checkpoint
pub type TreeSize = u64;

/// SHA-256 of a leaf's data, used for deduplication
pub type IdentityHash = [u8; 32];

/// RFC 6962 leaf hash, used in the Merkle tree
pub type LeafHash = [u8; 32];

pub use antispam::{AntispamError, AntispamFollower, AntispamStore, BundleHasher, PersistentDedup};
pub use append::*;
pub use builtin::{EphemeralAntispam, EphemeralLog};
pub use checkpoint::Checkpoint;
pub use dedup::MemoryDedup;
pub use entry::*;
pub use future::*;
pub use queue::*;
pub use terminator::*;

/// Maximum number of entries in a single entry bundle, per tlog-tiles.
pub const ENTRY_BUNDLE_WIDTH: u64 = 256;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,

    #[error("pushback: too many outstanding entries")]
    Pushback,

    #[error("storage error: {0}")]
    Internal(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    pub fn internal<T>(value: T) -> Self
    where
        T: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        StoreError::Internal(value.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

/// Errors surfaced to add callers through their index futures.
///
/// Cloneable on purpose: one failure may resolve many readers of the same
/// shared future.
#[derive(Debug, Clone, Error)]
pub enum AppendError {
    #[error("appender has been shut down")]
    Stopped,

    #[error("pushback: too many outstanding entries")]
    Pushback,

    #[error("sequencing aborted before an index was assigned")]
    Abandoned,

    #[error("storage error: {0}")]
    Storage(std::sync::Arc<StoreError>),
}

impl From<StoreError> for AppendError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Pushback => AppendError::Pushback,
            other => AppendError::Storage(std::sync::Arc::new(other)),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration error: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(text: impl std::fmt::Display) -> Self {
        ConfigError::Invalid(text.to_string())
    }
}

/// Location of a run of entries within the bundle layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RangeInfo {
    /// Index of the bundle in the tile layout
    pub bundle_index: u64,

    /// Offset of the first returned entry within the bundle
    pub first_offset: usize,

    /// Number of entries covered by the bundle payload
    pub count: usize,
}

impl RangeInfo {
    /// Global index of the first entry covered by this range.
    pub fn first_index(&self) -> LeafIndex {
        self.bundle_index * ENTRY_BUNDLE_WIDTH + self.first_offset as u64
    }
}

/// Write side of the sequencing contract, implemented by storage drivers.
///
/// On success the batch durably occupies `[base, base + entries.len())` and
/// each entry was marshalled with its final index before being persisted.
#[trait_variant::make(Send)]
pub trait FlushSink: Send + Sync + 'static {
    async fn flush(&self, entries: &[Entry]) -> Result<LeafIndex, StoreError>;
}

/// Read side of the integrated log, implemented by storage drivers.
#[trait_variant::make(Send)]
pub trait LogReader: Clone + Send + Sync + 'static {
    type EntryStream: futures_core::Stream<Item = Result<(RangeInfo, Vec<u8>), StoreError>>
        + Unpin
        + Send;

    /// Raw bytes of the latest published checkpoint, `NotFound` until the
    /// first publication.
    async fn read_checkpoint(&self) -> Result<Vec<u8>, StoreError>;

    /// Number of entries integrated into the tree so far.
    async fn integrated_size(&self) -> Result<TreeSize, StoreError>;

    /// Stream entry bundles starting at the given global index. The stream
    /// ends with a `NotFound` item once the integrated log is exhausted.
    fn stream_entries(&self, from: LeafIndex) -> Self::EntryStream;
}

/// A storage backend that supports the append lifecycle.
pub trait Driver: Clone + Send + Sync + 'static {
    type Sink: FlushSink;
    type Reader: LogReader;

    fn appender(&self) -> Result<(Self::Sink, Self::Reader), ConfigError>;
}

#[trait_variant::make(Send)]
pub trait CancelToken: Send + Sync + 'static + Clone {
    async fn cancelled(&self);
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Flush the pending batch once it holds this many entries
    pub max_size: usize,

    /// Flush the pending batch once its oldest entry is this old (ms)
    pub max_age_ms: u64,
}

impl QueueConfig {
    pub fn max_age(&self) -> Duration {
        Duration::from_millis(self.max_age_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_size: 256,
            max_age_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// Capacity of the in-memory identity cache
    pub capacity: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FollowerConfig {
    /// How often to re-check the integrated size when caught up (ms)
    pub poll_interval_ms: u64,
}

impl FollowerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for FollowerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EphemeralLogConfig {
    /// Origin line written into published checkpoints
    pub origin: String,

    /// Maximum number of sequenced-but-unintegrated entries before flushes
    /// are rejected with pushback
    pub pushback_max_outstanding: u64,

    /// How often the background loop integrates and publishes (ms)
    pub checkpoint_interval_ms: u64,
}

impl EphemeralLogConfig {
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }
}

impl Default for EphemeralLogConfig {
    fn default() -> Self {
        Self {
            origin: "treeline-dev".to_string(),
            pushback_max_outstanding: 4096,
            checkpoint_interval_ms: 1000,
        }
    }
}
