use std::sync::Arc;
use std::thread;

use anyhow::Result;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::EnforcerConfig;
use crate::lock::{LockError, LockProvider, MutexHandle};
use crate::storage::{Record, RecordStore, StorageError};

use super::error::QuotaError;

enum Strategy {
    /// Serializable store transactions with bounded retry on conflict.
    Serializable,
    /// An external named mutex serializes all appends per owner key.
    Locked(Arc<dyn LockProvider>),
}

/// Enforces a per-owner, per-period insertion quota: a record is inserted
/// only if the owner's count for that period is still under the limit, and
/// the check-and-insert is atomic against concurrent enforcers.
pub struct QuotaEnforcer {
    store: Arc<RecordStore>,
    config: EnforcerConfig,
    strategy: Strategy,
}

impl QuotaEnforcer {
    pub fn new(store: Arc<RecordStore>, config: EnforcerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            strategy: Strategy::Serializable,
        })
    }

    /// Replace the retry policy. The active strategy is unchanged.
    pub fn configure(&mut self, config: EnforcerConfig) -> Result<()> {
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// One-time switch to the mutex-guarded strategy for all subsequent
    /// appends. There is no per-call override and no fallback to the
    /// transactional strategy on lock failure.
    pub fn attach_lock_provider(&mut self, provider: Arc<dyn LockProvider>) {
        info!("attaching lock provider, appends now serialize on external mutexes");
        self.strategy = Strategy::Locked(provider);
    }

    pub fn append(&self, record: &Record, limit: u64) -> Result<(), QuotaError> {
        match &self.strategy {
            Strategy::Serializable => self.append_serializable(record, limit),
            Strategy::Locked(provider) => self.append_locked(provider.as_ref(), record, limit),
        }
    }

    fn append_serializable(&self, record: &Record, limit: u64) -> Result<(), QuotaError> {
        for attempt in 1..=self.config.max_attempts {
            // Connection setup reads the store too, so a busy reported there
            // consumes an attempt like any other conflict.
            let outcome = match self.store.connect() {
                Ok(mut conn) => self.try_append_tx(&mut conn, record, limit),
                Err(err) => Err(QuotaError::Storage(err)),
            };
            match outcome {
                Ok(()) => {
                    debug!(owner_key = %record.owner_key, attempt, "record appended");
                    return Ok(());
                }
                Err(QuotaError::Storage(err)) if err.is_retryable_conflict() => {
                    debug!(
                        owner_key = %record.owner_key,
                        attempt,
                        error = %err,
                        "serialization conflict, backing off"
                    );
                    if attempt < self.config.max_attempts {
                        thread::sleep(self.config.backoff);
                    }
                }
                Err(other) => return Err(other),
            }
        }

        warn!(
            owner_key = %record.owner_key,
            attempts = self.config.max_attempts,
            "append gave up after repeated serialization conflicts"
        );
        Err(QuotaError::TooManyConflicts {
            attempts: self.config.max_attempts,
        })
    }

    /// One serializable attempt. Dropping the transaction on any early
    /// return rolls it back; only the full count-check-insert commits.
    fn try_append_tx(
        &self,
        conn: &mut Connection,
        record: &Record,
        limit: u64,
    ) -> Result<(), QuotaError> {
        let tx = conn.transaction().map_err(StorageError::from)?;

        let count = self
            .store
            .count_in_period(&tx, &record.owner_key, &record.period_key)?;
        if count >= limit {
            return Err(quota_exceeded(record, limit));
        }

        self.store.insert_record(&tx, record)?;
        tx.commit().map_err(StorageError::from)?;
        Ok(())
    }

    fn append_locked(
        &self,
        provider: &dyn LockProvider,
        record: &Record,
        limit: u64,
    ) -> Result<(), QuotaError> {
        let mut mutex = provider.new_mutex(&record.owner_key)?;
        mutex.lock()?;
        let mut held = HeldMutex {
            key: record.owner_key.clone(),
            handle: Some(mutex),
        };

        let outcome = self.locked_check_and_insert(record, limit);

        match held.release() {
            Ok(()) => outcome,
            Err(release_err) => match outcome {
                // The append itself succeeded, so the coordination failure
                // is the caller-visible result.
                Ok(()) => Err(release_err.into()),
                Err(err) => {
                    warn!(
                        owner_key = %record.owner_key,
                        error = %release_err,
                        "failed to release mutex after append error"
                    );
                    Err(err)
                }
            },
        }
    }

    fn locked_check_and_insert(&self, record: &Record, limit: u64) -> Result<(), QuotaError> {
        // The owner's mutex is already held, so any writer contention here
        // comes from other owners; wait it out instead of failing the
        // append with a spurious busy.
        let conn = self.store.connect_blocking()?;

        let count = self
            .store
            .count_in_period(&conn, &record.owner_key, &record.period_key)?;
        if count >= limit {
            return Err(quota_exceeded(record, limit));
        }

        self.store.insert_record(&conn, record)?;
        debug!(owner_key = %record.owner_key, "record appended under mutex");
        Ok(())
    }
}

fn quota_exceeded(record: &Record, limit: u64) -> QuotaError {
    debug!(
        owner_key = %record.owner_key,
        period_key = %record.period_key,
        limit,
        "quota exceeded"
    );
    QuotaError::QuotaExceeded {
        owner_key: record.owner_key.clone(),
        period_key: record.period_key.clone(),
        limit,
    }
}

/// Owns a locked handle for the span of one append. Explicit `release`
/// surfaces unlock failures; the drop impl is the backstop for unwinds so
/// the mutex is never left held.
struct HeldMutex {
    key: String,
    handle: Option<Box<dyn MutexHandle>>,
}

impl HeldMutex {
    fn release(&mut self) -> Result<(), LockError> {
        match self.handle.take() {
            Some(mut handle) => handle.unlock(),
            None => Ok(()),
        }
    }
}

impl Drop for HeldMutex {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            if let Err(err) = handle.unlock() {
                warn!(key = %self.key, error = %err, "failed to release mutex during unwind");
            }
        }
    }
}
