//! # vjob - asynchronous VFS job engine
//!
//! Blocking filesystem backends ("methods") driven from a bounded worker
//! pool, with completions delivered back on the caller's own thread.
//!
//! ## Features
//!
//! - **Uniform API**: the same operations asynchronously (`Engine`) or
//!   synchronously (`SyncVfs`), over any registered method
//! - **Exactly once**: each job runs on one worker and completes through
//!   one callback, even under cancellation races
//! - **Cancellation**: cooperative tokens, safe at any point before retire
//! - **Bounded pool**: concurrency limit adjustable at runtime (minimum 2)
//! - **Orderly shutdown**: drains in-flight jobs before joining workers
//! - **Loop integration**: wakeup fd (eventfd/pipe) for external poll loops
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use vjob::{Engine, EngineConfig, MemoryMethod, MethodTable, OpenMode};
//!
//! let mem = Arc::new(MemoryMethod::new());
//! mem.insert_file("/hello.txt", b"hello world")?;
//! let engine = vjob::start(Arc::new(MethodTable::new().with("mem", mem)))?;
//!
//! engine.open("mem:/hello.txt", OpenMode::READ, |handle, res| {
//!     println!("{handle}: {:?}", res.map(|f| f.id()));
//! })?;
//!
//! // Callbacks run here, on the caller's thread
//! engine.completions().run_until(|| engine.outstanding() == 0)?;
//! engine.shutdown();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Caller thread                          │
//! │        submit(), cancel(), Completions::dispatch()          │
//! └─────────────────────────────────────────────────────────────┘
//!            │ register                        ▲ callback
//!            ▼                                 │
//! ┌──────────────────────┐          ┌──────────────────────────┐
//! │    Job Registry      │          │    Completion Port       │
//! │ handle → job, state  │          │ SegQueue + eventfd/pipe  │
//! └──────────────────────┘          └──────────────────────────┘
//!            │ claim                           ▲ post
//!            ▼                                 │
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       Worker Pool                           │
//! │      FIFO queue, busy ≤ limit, lazy spawn, idle exit        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ execute
//!                              ▼
//!    ┌─────────────────────────────────────────────────────────┐
//!    │        Methods (mem:, file:, anything implementing      │
//!    │        vjob::Method), blocking, cancellation-aware      │
//!    └─────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

// Re-export core types
pub use vjob_core::{
    CancellationToken, DirFilter, EngineError, EngineResult, EngineState, FileHandle, FileInfo,
    FileType, InfoOptions, JobHandle, JobState, Method, MethodContext, MethodFile,
    MethodResolver, MethodTable, Notifier, OpKind, OpenMode, Output, OverwriteMode, Progress,
    ProgressAction, Request, SortKey, SortRule, Target, TransferOptions, TransferPhase,
    TransferProgress, VfsError, VfsResult,
};
pub use vjob_core::constants;
pub use vjob_core::listing;

// Re-export env utilities
pub use vjob_core::{env_get, env_get_bool, env_get_millis, env_get_opt};

// Re-export runtime types
pub use vjob_runtime::{
    default_table, platform_notifier, Completions, Engine, EngineConfig, Executor, LocalMethod,
    MemoryMethod, NoProgress, PlatformNotifier, PoolStats, ProgressSink, SyncVfs,
};

/// Build an engine from the environment-driven config and start it.
///
/// The calling thread becomes the engine's owner thread.
pub fn start(resolver: Arc<dyn MethodResolver>) -> EngineResult<Engine> {
    start_with(EngineConfig::from_env(), resolver)
}

/// Build an engine from `config` and start it.
pub fn start_with(config: EngineConfig, resolver: Arc<dyn MethodResolver>) -> EngineResult<Engine> {
    let engine = Engine::new(config, resolver)?;
    engine.start()?;
    Ok(engine)
}

/// Synchronous access through `resolver` with the environment config.
pub fn sync(resolver: Arc<dyn MethodResolver>) -> SyncVfs {
    SyncVfs::new(resolver, &EngineConfig::from_env())
}
