//! # vjob-runtime
//!
//! Runtime for the vjob engine.
//!
//! This crate provides:
//! - Job registry (generation-checked handles, claim/cancel/retire)
//! - Worker pool with a runtime-adjustable concurrency limit
//! - Completion delivery (lock-free queue + eventfd/pipe wakeup)
//! - Engine lifecycle (start, drain, shutdown)
//! - Request executor shared by the async engine and `SyncVfs`
//! - Built-in `mem:` and `file:` methods

pub mod config;
pub mod job;
pub mod exec;
pub mod engine;
pub mod sync;
pub mod methods;
pub mod notify;
mod registry;
mod pool;

// Re-exports
pub use config::EngineConfig;
pub use engine::{Completions, Engine};
pub use exec::{Executor, NoProgress, ProgressSink};
pub use job::{CompletionFn, ProgressFn};
pub use methods::{default_table, LocalMethod, MemoryMethod};
pub use pool::PoolStats;
pub use sync::SyncVfs;

// Platform notifier
cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub use notify::eventfd::EventFdNotifier as PlatformNotifier;
    } else if #[cfg(unix)] {
        pub use notify::pipe::PipeNotifier as PlatformNotifier;
    } else {
        compile_error!("Unsupported platform");
    }
}

#[cfg(unix)]
pub use notify::pipe::PipeNotifier;

/// Create the default notifier for this platform.
pub fn platform_notifier() -> std::io::Result<Box<dyn vjob_core::Notifier>> {
    Ok(Box::new(PlatformNotifier::create()?))
}
