//! Per-key, per-period insertion quotas over a shared relational store.
//!
//! A [`QuotaEnforcer`] appends a [`Record`] only while its owner is under
//! the configured limit for the record's period, and the check-and-insert
//! stays atomic against concurrent appenders. Two interchangeable
//! strategies provide that atomicity:
//!
//! - the default strategy runs each append in a serializable store
//!   transaction and retries on detected conflicts, bounded by
//!   [`EnforcerConfig`];
//! - attaching a [`lock::LockProvider`] switches every subsequent append to
//!   serialize on an external per-owner mutex instead, for deployments
//!   spanning independent store connections.
//!
//! ```no_run
//! use std::sync::Arc;
//! use quota_ledger::{EnforcerConfig, QuotaEnforcer, Record, RecordStore};
//!
//! # fn main() -> anyhow::Result<()> {
//! let store = Arc::new(RecordStore::open("data/quota".into())?);
//! let enforcer = QuotaEnforcer::new(Arc::clone(&store), EnforcerConfig::default())?;
//!
//! let record = Record::new("write report", "u1", quota_ledger::utc_day_period());
//! enforcer.append(&record, store.subject_limit("u1")?)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod lock;
pub mod quota;
pub mod storage;

pub use config::EnforcerConfig;
pub use quota::{QuotaEnforcer, QuotaError};
pub use storage::{utc_day_period, QuotaSubject, Record, RecordStore, StorageError};
