//! Persistent antispam index on redb.
//!
//! Two tables: `entries` maps a 32-byte identity hash to the smallest index
//! ever observed for it, and `follower` holds the singleton cursor of the
//! follower task. Each batch writes its rows and the cursor advance inside a
//! single write transaction, so a crash never leaves the cursor ahead of the
//! rows it accounts for.

use std::sync::Arc;

use redb::{ReadableDatabase, ReadableTable, TableDefinition};
use thiserror::Error;
use tracing::{debug, warn};

use treeline_core::{AntispamError, AntispamStore, IdentityHash, LeafIndex};

// ── Error newtype ───────────────────────────────────────────────────────

#[derive(Debug, Error)]
#[error(transparent)]
struct RedbAntispamError(#[from] AntispamError);

impl From<redb::Error> for RedbAntispamError {
    fn from(value: redb::Error) -> Self {
        Self(AntispamError::internal(value))
    }
}

impl From<RedbAntispamError> for AntispamError {
    fn from(value: RedbAntispamError) -> Self {
        value.0
    }
}

impl From<redb::DatabaseError> for RedbAntispamError {
    fn from(value: redb::DatabaseError) -> Self {
        Self(AntispamError::internal(redb::Error::from(value)))
    }
}

impl From<redb::TableError> for RedbAntispamError {
    fn from(value: redb::TableError) -> Self {
        Self(AntispamError::internal(redb::Error::from(value)))
    }
}

impl From<redb::CommitError> for RedbAntispamError {
    fn from(value: redb::CommitError) -> Self {
        Self(AntispamError::internal(redb::Error::from(value)))
    }
}

impl From<redb::StorageError> for RedbAntispamError {
    fn from(value: redb::StorageError) -> Self {
        Self(AntispamError::internal(redb::Error::from(value)))
    }
}

impl From<redb::TransactionError> for RedbAntispamError {
    fn from(value: redb::TransactionError) -> Self {
        Self(AntispamError::internal(redb::Error::from(value)))
    }
}

const DEFAULT_CACHE_SIZE_MB: usize = 32;

// ── Layer 1: redb key/value types ───────────────────────────────────────

/// 32-byte identity hash key for the entries table.
#[derive(Debug)]
struct DbIdentity([u8; 32]);

impl DbIdentity {
    fn from_identity(identity: &IdentityHash) -> Self {
        Self(*identity)
    }
}

impl redb::Value for DbIdentity {
    type SelfType<'a>
        = Self
    where
        Self: 'a;
    type AsBytes<'a>
        = &'a [u8; 32]
    where
        Self: 'a;

    fn fixed_width() -> Option<usize> {
        Some(32)
    }

    fn from_bytes<'a>(data: &'a [u8]) -> Self::SelfType<'a>
    where
        Self: 'a,
    {
        let inner = <[u8; 32]>::try_from(data).unwrap();
        Self(inner)
    }

    fn as_bytes<'a, 'b: 'a>(value: &'a Self::SelfType<'b>) -> Self::AsBytes<'a>
    where
        Self: 'b,
    {
        &value.0
    }

    fn type_name() -> redb::TypeName {
        redb::TypeName::new("antispam_identity")
    }
}

impl redb::Key for DbIdentity {
    fn compare(data1: &[u8], data2: &[u8]) -> std::cmp::Ordering {
        data1.cmp(data2)
    }
}

// ── Layer 2: table wrapper structs ──────────────────────────────────────

struct EntriesTable;

impl EntriesTable {
    const DEF: TableDefinition<'static, DbIdentity, u64> = TableDefinition::new("entries");

    fn initialize(wx: &redb::WriteTransaction) -> Result<(), RedbAntispamError> {
        wx.open_table(Self::DEF)?;
        Ok(())
    }

    fn get(
        rx: &redb::ReadTransaction,
        identity: &IdentityHash,
    ) -> Result<Option<LeafIndex>, RedbAntispamError> {
        let table = rx.open_table(Self::DEF)?;
        let result = table
            .get(DbIdentity::from_identity(identity))?
            .map(|guard| guard.value());
        Ok(result)
    }

    fn insert_if_absent(
        wx: &redb::WriteTransaction,
        identity: &IdentityHash,
        index: LeafIndex,
    ) -> Result<bool, RedbAntispamError> {
        let mut table = wx.open_table(Self::DEF)?;

        if table.get(DbIdentity::from_identity(identity))?.is_some() {
            return Ok(false);
        }

        table.insert(DbIdentity::from_identity(identity), index)?;
        Ok(true)
    }
}

struct FollowerTable;

impl FollowerTable {
    const DEF: TableDefinition<'static, u8, u64> = TableDefinition::new("follower");
    const SINGLETON: u8 = 0;

    fn initialize(wx: &redb::WriteTransaction) -> Result<(), RedbAntispamError> {
        wx.open_table(Self::DEF)?;
        Ok(())
    }

    fn get(rx: &redb::ReadTransaction) -> Result<u64, RedbAntispamError> {
        let table = rx.open_table(Self::DEF)?;
        let result = table.get(Self::SINGLETON)?.map(|guard| guard.value());
        Ok(result.unwrap_or_default())
    }

    fn set(wx: &redb::WriteTransaction, processed_entries: u64) -> Result<(), RedbAntispamError> {
        let mut table = wx.open_table(Self::DEF)?;
        table.insert(Self::SINGLETON, processed_entries)?;
        Ok(())
    }
}

// ── Layer 3: RedbAntispam orchestration ─────────────────────────────────

#[derive(Clone)]
pub struct RedbAntispam {
    db: Arc<redb::Database>,
}

impl RedbAntispam {
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, AntispamError> {
        let db = redb::Database::builder()
            .set_repair_callback(|x| {
                warn!(progress = x.progress() * 100f64, "antispam db is repairing")
            })
            .set_cache_size(1024 * 1024 * DEFAULT_CACHE_SIZE_MB)
            .create(path)
            .map_err(AntispamError::internal)?;

        Self::from_db(db)
    }

    pub fn in_memory() -> Result<Self, AntispamError> {
        let db = redb::Database::builder()
            .create_with_backend(redb::backends::InMemoryBackend::new())
            .map_err(AntispamError::internal)?;

        Self::from_db(db)
    }

    fn from_db(db: redb::Database) -> Result<Self, AntispamError> {
        let out = Self { db: Arc::new(db) };
        out.ensure_initialized()?;
        Ok(out)
    }

    fn ensure_initialized(&self) -> Result<(), RedbAntispamError> {
        let wx = self.db.begin_write()?;
        EntriesTable::initialize(&wx)?;
        FollowerTable::initialize(&wx)?;
        wx.commit()?;
        Ok(())
    }

    fn apply_batch_inner(
        &self,
        rows: &[(IdentityHash, LeafIndex)],
        processed_entries: u64,
    ) -> Result<(), RedbAntispamError> {
        let wx = self.db.begin_write()?;

        let mut inserted = 0usize;
        for (identity, index) in rows {
            if EntriesTable::insert_if_absent(&wx, identity, *index)? {
                inserted += 1;
            }
        }

        FollowerTable::set(&wx, processed_entries)?;
        wx.commit()?;

        debug!(
            inserted,
            skipped = rows.len() - inserted,
            processed_entries,
            "antispam batch committed"
        );

        Ok(())
    }
}

impl AntispamStore for RedbAntispam {
    fn lookup(&self, identity: &IdentityHash) -> Result<Option<LeafIndex>, AntispamError> {
        let rx = self.db.begin_read().map_err(RedbAntispamError::from)?;
        let result = EntriesTable::get(&rx, identity)?;
        Ok(result)
    }

    fn processed_entries(&self) -> Result<u64, AntispamError> {
        let rx = self.db.begin_read().map_err(RedbAntispamError::from)?;
        let result = FollowerTable::get(&rx)?;
        Ok(result)
    }

    fn apply_batch(
        &self,
        rows: &[(IdentityHash, LeafIndex)],
        processed_entries: u64,
    ) -> Result<(), AntispamError> {
        self.apply_batch_inner(rows, processed_entries)?;
        Ok(())
    }
}
