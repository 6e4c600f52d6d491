use treeline_core::{
    builtin::EphemeralAntispam, AntispamError, AntispamStore, IdentityHash, LeafIndex,
};
use treeline_redb::RedbAntispam;

/// A store for the antispam identity index
#[derive(Clone)]
#[non_exhaustive]
pub enum AntispamStoreAdapter {
    Ephemeral(EphemeralAntispam),
    Redb(RedbAntispam),
}

impl AntispamStore for AntispamStoreAdapter {
    fn lookup(&self, identity: &IdentityHash) -> Result<Option<LeafIndex>, AntispamError> {
        let out = match self {
            AntispamStoreAdapter::Ephemeral(x) => x.lookup(identity)?,
            AntispamStoreAdapter::Redb(x) => x.lookup(identity)?,
        };

        Ok(out)
    }

    fn processed_entries(&self) -> Result<u64, AntispamError> {
        let out = match self {
            AntispamStoreAdapter::Ephemeral(x) => x.processed_entries()?,
            AntispamStoreAdapter::Redb(x) => x.processed_entries()?,
        };

        Ok(out)
    }

    fn apply_batch(
        &self,
        rows: &[(IdentityHash, LeafIndex)],
        processed_entries: u64,
    ) -> Result<(), AntispamError> {
        match self {
            AntispamStoreAdapter::Ephemeral(x) => x.apply_batch(rows, processed_entries)?,
            AntispamStoreAdapter::Redb(x) => x.apply_batch(rows, processed_entries)?,
        };

        Ok(())
    }
}

impl From<EphemeralAntispam> for AntispamStoreAdapter {
    fn from(value: EphemeralAntispam) -> Self {
        Self::Ephemeral(value)
    }
}

impl From<RedbAntispam> for AntispamStoreAdapter {
    fn from(value: RedbAntispam) -> Self {
        Self::Redb(value)
    }
}
