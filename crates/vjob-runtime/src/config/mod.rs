//! Engine configuration
//!
//! Compile-time defaults with runtime environment overrides.
//!
//! # Configuration Priority (highest wins)
//!
//! 1. Builder calls
//! 2. Environment variables (`from_env`)
//! 3. Library defaults (`defaults`)
//!
//! # Example
//!
//! ```rust,ignore
//! use vjob_runtime::config::EngineConfig;
//!
//! // Defaults with env overrides
//! let config = EngineConfig::from_env();
//!
//! // Or customize programmatically
//! let config = EngineConfig::from_env()
//!     .concurrency_limit(4)
//!     .ack_timeout(Some(Duration::from_secs(5)));
//! ```

pub mod defaults;

use std::time::Duration;

use vjob_core::constants::MIN_CONCURRENCY_LIMIT;
use vjob_core::env::{env_get, env_get_millis, env_get_opt};
use vjob_core::{EngineError, EngineResult};

/// Engine configuration with builder pattern.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Jobs allowed between claim and completion at once
    pub concurrency_limit: usize,
    /// Outstanding-count poll interval while draining
    pub drain_poll_interval: Duration,
    /// Idle worker lifetime
    pub idle_timeout: Duration,
    /// Bound on ack waits (`None` = unbounded)
    pub ack_timeout: Option<Duration>,
    /// Default entries per batch / chunks per progress event
    pub default_batch_size: usize,
    /// Bytes per transfer round
    pub transfer_chunk_size: usize,
    /// Worker thread name prefix
    pub thread_name: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

fn millis_opt(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

impl EngineConfig {
    /// Create config from library defaults with environment overrides.
    ///
    /// Environment variables (all optional):
    /// - `VJOB_CONCURRENCY_LIMIT` - Concurrently executing jobs
    /// - `VJOB_DRAIN_POLL_MS` - Drain poll interval in milliseconds
    /// - `VJOB_IDLE_TIMEOUT_MS` - Idle worker lifetime in milliseconds
    /// - `VJOB_ACK_TIMEOUT_MS` - Ack wait bound in milliseconds (0 = unbounded)
    /// - `VJOB_BATCH_SIZE` - Default batch size
    /// - `VJOB_TRANSFER_CHUNK` - Transfer chunk size in bytes
    /// - `VJOB_THREAD_NAME` - Worker thread name prefix
    pub fn from_env() -> Self {
        Self {
            concurrency_limit: env_get("VJOB_CONCURRENCY_LIMIT", defaults::CONCURRENCY_LIMIT),
            drain_poll_interval: env_get_millis("VJOB_DRAIN_POLL_MS", defaults::DRAIN_POLL_MS),
            idle_timeout: env_get_millis("VJOB_IDLE_TIMEOUT_MS", defaults::IDLE_TIMEOUT_MS),
            ack_timeout: millis_opt(env_get("VJOB_ACK_TIMEOUT_MS", defaults::ACK_TIMEOUT_MS)),
            default_batch_size: env_get("VJOB_BATCH_SIZE", defaults::BATCH_SIZE),
            transfer_chunk_size: env_get("VJOB_TRANSFER_CHUNK", defaults::TRANSFER_CHUNK),
            thread_name: env_get_opt("VJOB_THREAD_NAME")
                .unwrap_or_else(|| defaults::THREAD_NAME.to_string()),
        }
    }

    /// Create config with library defaults only (no env override).
    pub fn new() -> Self {
        Self {
            concurrency_limit: defaults::CONCURRENCY_LIMIT,
            drain_poll_interval: Duration::from_millis(defaults::DRAIN_POLL_MS),
            idle_timeout: Duration::from_millis(defaults::IDLE_TIMEOUT_MS),
            ack_timeout: millis_opt(defaults::ACK_TIMEOUT_MS),
            default_batch_size: defaults::BATCH_SIZE,
            transfer_chunk_size: defaults::TRANSFER_CHUNK,
            thread_name: defaults::THREAD_NAME.to_string(),
        }
    }

    // Builder methods

    pub fn concurrency_limit(mut self, n: usize) -> Self {
        self.concurrency_limit = n;
        self
    }

    pub fn drain_poll_interval(mut self, d: Duration) -> Self {
        self.drain_poll_interval = d;
        self
    }

    pub fn idle_timeout(mut self, d: Duration) -> Self {
        self.idle_timeout = d;
        self
    }

    pub fn ack_timeout(mut self, d: Option<Duration>) -> Self {
        self.ack_timeout = d;
        self
    }

    pub fn default_batch_size(mut self, n: usize) -> Self {
        self.default_batch_size = n;
        self
    }

    pub fn transfer_chunk_size(mut self, n: usize) -> Self {
        self.transfer_chunk_size = n;
        self
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.concurrency_limit < MIN_CONCURRENCY_LIMIT {
            return Err(EngineError::LimitTooLow {
                requested: self.concurrency_limit,
                min: MIN_CONCURRENCY_LIMIT,
            });
        }
        if self.drain_poll_interval.is_zero() {
            return Err(EngineError::Config("drain_poll_interval must be > 0".into()));
        }
        if self.idle_timeout.is_zero() {
            return Err(EngineError::Config("idle_timeout must be > 0".into()));
        }
        if self.default_batch_size == 0 {
            return Err(EngineError::Config("default_batch_size must be > 0".into()));
        }
        if self.transfer_chunk_size == 0 {
            return Err(EngineError::Config("transfer_chunk_size must be > 0".into()));
        }
        Ok(())
    }
}
