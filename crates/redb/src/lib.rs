//! Persistent stores backed by redb.

pub mod antispam;

pub use antispam::RedbAntispam;
