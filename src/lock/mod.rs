//! Distributed-mutex seam for the pessimistic append strategy.
//!
//! The enforcer only sees the [`LockProvider`] / [`MutexHandle`] traits; the
//! actual coordination service (etcd, Redis, ...) is injected by the caller.
//! [`LocalLockProvider`] is an in-process implementation for single-node
//! deployments and tests.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    #[error("failed to acquire mutex for key {key}: {reason}")]
    AcquireFailed { key: String, reason: String },
    #[error("timed out after {timeout:?} acquiring mutex for key {key}")]
    AcquireTimeout { key: String, timeout: Duration },
    #[error("mutex for key {0} released without being held")]
    NotHeld(String),
    #[error("failed to release mutex for key {key}: {reason}")]
    ReleaseFailed { key: String, reason: String },
}

/// A named, ownership-bearing lock token. Held for the duration of one
/// append call and never retained beyond it.
pub trait MutexHandle: Send {
    fn lock(&mut self) -> Result<(), LockError>;
    fn unlock(&mut self) -> Result<(), LockError>;
}

pub trait LockProvider: Send + Sync {
    fn new_mutex(&self, key: &str) -> Result<Box<dyn MutexHandle>, LockError>;
}

struct NamedLock {
    held: Mutex<bool>,
    freed: Condvar,
}

/// In-process provider: one Mutex/Condvar pair per key, shared through a
/// concurrent registry. Acquisition is bounded by a timeout so a caller can
/// never block forever behind a stuck holder.
pub struct LocalLockProvider {
    locks: DashMap<String, Arc<NamedLock>>,
    acquire_timeout: Duration,
}

impl LocalLockProvider {
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(5))
    }

    pub fn with_timeout(acquire_timeout: Duration) -> Self {
        Self {
            locks: DashMap::new(),
            acquire_timeout,
        }
    }
}

impl Default for LocalLockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl LockProvider for LocalLockProvider {
    fn new_mutex(&self, key: &str) -> Result<Box<dyn MutexHandle>, LockError> {
        let lock = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| {
                Arc::new(NamedLock {
                    held: Mutex::new(false),
                    freed: Condvar::new(),
                })
            })
            .clone();

        Ok(Box::new(LocalMutex {
            key: key.to_string(),
            lock,
            acquire_timeout: self.acquire_timeout,
            holding: false,
        }))
    }
}

pub struct LocalMutex {
    key: String,
    lock: Arc<NamedLock>,
    acquire_timeout: Duration,
    holding: bool,
}

impl MutexHandle for LocalMutex {
    fn lock(&mut self) -> Result<(), LockError> {
        let deadline = Instant::now() + self.acquire_timeout;
        let mut held = self.lock.held.lock().map_err(|_| LockError::AcquireFailed {
            key: self.key.clone(),
            reason: "lock registry poisoned".to_string(),
        })?;

        while *held {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(LockError::AcquireTimeout {
                    key: self.key.clone(),
                    timeout: self.acquire_timeout,
                });
            }
            let (guard, wait) = self.lock.freed.wait_timeout(held, remaining).map_err(|_| {
                LockError::AcquireFailed {
                    key: self.key.clone(),
                    reason: "lock registry poisoned".to_string(),
                }
            })?;
            held = guard;
            if wait.timed_out() && *held {
                return Err(LockError::AcquireTimeout {
                    key: self.key.clone(),
                    timeout: self.acquire_timeout,
                });
            }
        }

        *held = true;
        self.holding = true;
        Ok(())
    }

    fn unlock(&mut self) -> Result<(), LockError> {
        if !self.holding {
            return Err(LockError::NotHeld(self.key.clone()));
        }

        let mut held = self.lock.held.lock().map_err(|_| LockError::ReleaseFailed {
            key: self.key.clone(),
            reason: "lock registry poisoned".to_string(),
        })?;
        *held = false;
        self.holding = false;
        self.lock.freed.notify_one();
        Ok(())
    }
}
