//! # vjob-core
//!
//! Core types and traits for the vjob asynchronous VFS job engine.
//!
//! This crate is platform-agnostic and runs nothing on its own. The
//! registry, worker pool, completion delivery and lifecycle live in
//! `vjob-runtime`.
//!
//! ## Modules
//!
//! - `handle` - Job handle (generation-checked arena index)
//! - `state` - Job and engine state enums
//! - `op` - Request/Output sum types, one variant per operation
//! - `method` - Method/MethodFile/MethodResolver traits, FileHandle
//! - `types` - Payload types (open modes, file info, transfer counters)
//! - `listing` - Directory sort and filter helpers
//! - `target` - Target identifiers (scheme + path)
//! - `cancel` - Cancellation token for cooperative cancellation
//! - `notifier` - Completion wakeup trait
//! - `error` - Error types
//! - `env` - Environment variable utilities

pub mod handle;
pub mod state;
pub mod op;
pub mod method;
pub mod types;
pub mod listing;
pub mod target;
pub mod cancel;
pub mod notifier;
pub mod error;
pub mod env;

// Re-exports for convenience
pub use handle::JobHandle;
pub use state::{EngineState, JobState};
pub use op::{OpKind, Output, Request};
pub use method::{FileHandle, Method, MethodContext, MethodFile, MethodResolver, MethodTable};
pub use types::{
    DirFilter, FileInfo, FileType, InfoOptions, OpenMode, OverwriteMode, Progress,
    ProgressAction, SortKey, SortRule, TransferOptions, TransferPhase, TransferProgress,
};
pub use target::Target;
pub use cancel::CancellationToken;
pub use notifier::Notifier;
pub use error::{EngineError, EngineResult, VfsError, VfsResult};
pub use env::{env_get, env_get_bool, env_get_millis, env_get_opt};

/// Engine-wide constants
pub mod constants {
    /// Default number of concurrently executing jobs
    pub const DEFAULT_CONCURRENCY_LIMIT: usize = 10;

    /// Smallest concurrency limit the pool accepts
    pub const MIN_CONCURRENCY_LIMIT: usize = 2;

    /// Default entries per load-directory batch
    pub const DEFAULT_BATCH_SIZE: usize = 32;

    /// Default bytes per transfer read/write round
    pub const DEFAULT_TRANSFER_CHUNK: usize = 64 * 1024;
}
