use thiserror::Error;

use crate::lock::LockError;
use crate::storage::StorageError;

#[derive(Debug, Error)]
pub enum QuotaError {
    /// Business outcome, not a fault: the subject is already at its limit
    /// for this period. Never retried, never wrapped.
    #[error("quota exceeded for owner {owner_key} in period {period_key}: limit={limit}")]
    QuotaExceeded {
        owner_key: String,
        period_key: String,
        limit: u64,
    },
    /// The serializable-retry strategy exhausted its attempt budget. The
    /// caller may retry later; nothing was inserted.
    #[error("gave up after {attempts} serialization conflicts")]
    TooManyConflicts { attempts: u32 },
    #[error("lock error: {0}")]
    Lock(#[from] LockError),
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

impl QuotaError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, QuotaError::QuotaExceeded { .. })
    }
}
