//! Library defaults for `EngineConfig`.
//!
//! Every value here can be overridden at runtime through the matching
//! `VJOB_*` environment variable.

use vjob_core::constants;

/// Concurrently executing jobs.
pub const CONCURRENCY_LIMIT: usize = constants::DEFAULT_CONCURRENCY_LIMIT;

/// How often `shutdown()` re-checks the outstanding job count.
pub const DRAIN_POLL_MS: u64 = 10;

/// Idle worker lifetime before the thread exits.
pub const IDLE_TIMEOUT_MS: u64 = 30_000;

/// Bound on acknowledgement waits; 0 waits forever.
pub const ACK_TIMEOUT_MS: u64 = 0;

/// Entries per load-directory batch, chunks per transfer progress event.
pub const BATCH_SIZE: usize = constants::DEFAULT_BATCH_SIZE;

/// Bytes per transfer read/write round.
pub const TRANSFER_CHUNK: usize = constants::DEFAULT_TRANSFER_CHUNK;

/// Worker thread name prefix.
pub const THREAD_NAME: &str = "vjob-worker";
