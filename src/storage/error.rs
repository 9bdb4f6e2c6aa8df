use std::io;

use rusqlite::ErrorCode;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),
    #[error("subject {0} not found")]
    SubjectNotFound(String),
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
}

impl StorageError {
    /// True exactly for the store's serialization-conflict signal: another
    /// writer held or invalidated our snapshot and the statement must be
    /// retried in a fresh transaction. SQLite reports this as BUSY or
    /// LOCKED; every other failure is a real fault and must not be retried.
    pub fn is_retryable_conflict(&self) -> bool {
        match self {
            StorageError::DatabaseError(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: i32) -> StorageError {
        StorageError::DatabaseError(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(code),
            None,
        ))
    }

    #[test]
    fn test_busy_and_locked_classify_as_retryable() {
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_BUSY).is_retryable_conflict());
        assert!(sqlite_failure(rusqlite::ffi::SQLITE_LOCKED).is_retryable_conflict());
    }

    #[test]
    fn test_other_failures_are_not_retryable() {
        assert!(!sqlite_failure(rusqlite::ffi::SQLITE_CONSTRAINT).is_retryable_conflict());
        assert!(!StorageError::SubjectNotFound("u1".into()).is_retryable_conflict());
        assert!(
            !StorageError::DatabaseError(rusqlite::Error::QueryReturnedNoRows)
                .is_retryable_conflict()
        );
    }
}
