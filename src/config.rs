use std::env;
use std::time::Duration;

use anyhow::{Context, Result};

/// Retry policy for the serializable-transaction strategy.
#[derive(Debug, Clone)]
pub struct EnforcerConfig {
    /// Attempts before a conflicted append gives up. Must be at least 1.
    pub max_attempts: u32,
    /// Fixed sleep between attempts after a detected conflict.
    pub backoff: Duration,
}

impl Default for EnforcerConfig {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            backoff: Duration::from_millis(25),
        }
    }
}

impl EnforcerConfig {
    pub fn from_env() -> Result<Self> {
        let mut cfg = Self::default();

        if let Ok(attempts) = env::var("QUOTA_MAX_ATTEMPTS") {
            cfg.max_attempts = attempts
                .parse()
                .context("QUOTA_MAX_ATTEMPTS must be a positive integer")?;
        }
        if let Ok(millis) = env::var("QUOTA_BACKOFF_MS") {
            let millis: u64 = millis
                .parse()
                .context("QUOTA_BACKOFF_MS must be a non-negative integer")?;
            cfg.backoff = Duration::from_millis(millis);
        }

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts < 1 {
            anyhow::bail!("QUOTA_MAX_ATTEMPTS must be greater than zero");
        }
        Ok(())
    }
}
