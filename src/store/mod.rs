//! Persistent fingerprint store.
//!
//! This module keeps everything a scan needs to survive interruption:
//! sessions, one record per discovered file with its fingerprint or error,
//! and the duplicate groups computed from them.
//!
//! # Architecture
//!
//! * [`database`]: SQLite connection, schema management, sessions and records.
//! * [`record`]: File record models and fingerprint encoding.
//! * [`snapshot`]: Lazy, restartable iteration over one family's records.
//! * [`groups`]: Group persistence and membership edits.
//!
//! # Invalidation
//!
//! Records are keyed by session and path and validated by size and
//! modification time. When either changes the fingerprint is discarded and
//! the record becomes pending again. Fingerprints are stored as JSON with a
//! SHA-256 checksum; a mismatch on read is reported as
//! [`StoreError::Corrupt`].

pub mod database;
pub mod groups;
pub mod record;
pub mod snapshot;

use std::path::PathBuf;

pub use database::FingerprintStore;
pub use record::{Enumerated, FileRecord, RecordError, RecordId, RecordStatus};
pub use snapshot::{FamilySnapshot, SnapshotIter};

/// Errors raised by the store.
#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    /// SQLite reported an error.
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Persisted state is unreadable or inconsistent.
    #[error("store is corrupt: {0}")]
    Corrupt(String),

    /// The database directory could not be created.
    #[error("cannot create database directory {path}: {source}")]
    Io {
        /// Directory that failed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A thread panicked while holding the connection.
    #[error("store connection lock poisoned")]
    Poisoned,
}

impl StoreError {
    /// Whether the error means persisted state cannot be trusted.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        match self {
            Self::Corrupt(_) => true,
            Self::Sqlite(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
            ),
            Self::Sqlite(rusqlite::Error::FromSqlConversionFailure(..))
            | Self::Sqlite(rusqlite::Error::InvalidColumnType(..)) => true,
            _ => false,
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corruption_classification() {
        assert!(StoreError::Corrupt("x".into()).is_corruption());
        assert!(!StoreError::Poisoned.is_corruption());
        assert!(!StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows).is_corruption());
    }

    #[test]
    fn test_garbage_file_is_not_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, vec![0x42u8; 4096]).unwrap();
        let err = FingerprintStore::open(&path).unwrap_err();
        assert!(err.is_corruption(), "{err}");
    }
}
