//! Error types for the vjob engine
//!
//! Two layers:
//! - [`EngineError`]: returned synchronously by the control surface
//!   (submit, cancel, limit changes, lifecycle calls).
//! - [`VfsError`]: the status of an individual job, delivered through its
//!   completion callback. Backend failures pass through unchanged; the
//!   engine only ever synthesizes `Cancelled` and `SchedulingFailed`.

use std::io;
use thiserror::Error;

use crate::handle::JobHandle;
use crate::state::EngineState;

/// Result type for control-surface operations
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for job outcomes and method calls
pub type VfsResult<T> = Result<T, VfsError>;

/// Errors surfaced synchronously by the engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// `submit` before `start`
    #[error("engine not started")]
    NotStarted,

    /// `start` called on an engine that already left `Uninitialized`
    #[error("engine already started (state: {0})")]
    AlreadyStarted(EngineState),

    /// Submission after `shutdown` began
    #[error("engine is shutting down")]
    ShuttingDown,

    /// Submission after the engine was released
    #[error("engine stopped")]
    Stopped,

    /// Handle does not refer to a live job
    #[error("job not found: {0}")]
    NotFound(JobHandle),

    /// Concurrency limit below the minimum
    #[error("concurrency limit {requested} below minimum {min}")]
    LimitTooLow { requested: usize, min: usize },

    /// Completion wakeup primitive could not be created or signalled
    #[error("completion notifier: {0}")]
    Notifier(#[from] io::Error),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether this error reports a caller-side contract violation
    /// rather than a runtime condition.
    pub fn is_programming_error(&self) -> bool {
        matches!(self, EngineError::NotStarted | EngineError::AlreadyStarted(_))
    }
}

/// Status of a job or method call
#[derive(Debug, Error)]
pub enum VfsError {
    /// Target does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Target already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Permission denied.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Expected a directory.
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// Expected a file.
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// File handle was closed or belongs to another method.
    #[error("invalid file handle")]
    InvalidHandle,

    /// The method does not implement this operation.
    #[error("operation not supported: {0}")]
    NotSupported(&'static str),

    /// No method is registered for the target's scheme.
    #[error("no method for scheme: {0}")]
    UnknownScheme(String),

    /// Malformed request.
    #[error("bad parameters: {0}")]
    BadParameters(String),

    /// The job was cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// The worker pool could not provide a thread for the job.
    #[error("scheduling failed: {0}")]
    SchedulingFailed(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

impl VfsError {
    /// Create a NotFound error.
    pub fn not_found(target: impl Into<String>) -> Self {
        Self::NotFound(target.into())
    }

    /// Create an AlreadyExists error.
    pub fn already_exists(target: impl Into<String>) -> Self {
        Self::AlreadyExists(target.into())
    }

    /// Create a PermissionDenied error.
    pub fn permission_denied(target: impl Into<String>) -> Self {
        Self::PermissionDenied(target.into())
    }

    /// Create a NotADirectory error.
    pub fn not_a_directory(target: impl Into<String>) -> Self {
        Self::NotADirectory(target.into())
    }

    /// Create an IsADirectory error.
    pub fn is_a_directory(target: impl Into<String>) -> Self {
        Self::IsADirectory(target.into())
    }

    /// Create a BadParameters error.
    pub fn bad_parameters(msg: impl Into<String>) -> Self {
        Self::BadParameters(msg.into())
    }

    /// Create an Other error.
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Map an I/O error against a named target, keeping the common kinds
    /// as their own variants.
    pub fn from_io(err: io::Error, target: impl Into<String>) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound(target.into()),
            io::ErrorKind::AlreadyExists => Self::AlreadyExists(target.into()),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(target.into()),
            io::ErrorKind::Interrupted => Self::Cancelled,
            _ => Self::Io(err),
        }
    }

    /// Whether this is the cancelled status
    #[inline]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, VfsError::Cancelled)
    }

    /// Duplicate the error for fan-out (e.g. one failure reported for
    /// several targets). `Io` keeps its kind and message.
    pub fn duplicate(&self) -> Self {
        match self {
            VfsError::NotFound(s) => VfsError::NotFound(s.clone()),
            VfsError::AlreadyExists(s) => VfsError::AlreadyExists(s.clone()),
            VfsError::PermissionDenied(s) => VfsError::PermissionDenied(s.clone()),
            VfsError::NotADirectory(s) => VfsError::NotADirectory(s.clone()),
            VfsError::IsADirectory(s) => VfsError::IsADirectory(s.clone()),
            VfsError::InvalidHandle => VfsError::InvalidHandle,
            VfsError::NotSupported(s) => VfsError::NotSupported(s),
            VfsError::UnknownScheme(s) => VfsError::UnknownScheme(s.clone()),
            VfsError::BadParameters(s) => VfsError::BadParameters(s.clone()),
            VfsError::Cancelled => VfsError::Cancelled,
            VfsError::SchedulingFailed(s) => VfsError::SchedulingFailed(s.clone()),
            VfsError::Io(e) => VfsError::Io(io::Error::new(e.kind(), e.to_string())),
            VfsError::Other(s) => VfsError::Other(s.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(VfsError::Cancelled.to_string(), "operation cancelled");
        assert_eq!(
            EngineError::LimitTooLow { requested: 1, min: 2 }.to_string(),
            "concurrency limit 1 below minimum 2"
        );
        assert_eq!(
            EngineError::NotFound(JobHandle::new(3, 1)).to_string(),
            "job not found: 3.1"
        );
    }

    #[test]
    fn test_from_io_maps_kinds() {
        let e = VfsError::from_io(io::Error::from(io::ErrorKind::NotFound), "mem:/x");
        assert!(matches!(e, VfsError::NotFound(ref t) if t == "mem:/x"));

        let e = VfsError::from_io(io::Error::other("disk on fire"), "file:/y");
        assert!(matches!(e, VfsError::Io(_)));
    }

    #[test]
    fn test_duplicate_keeps_variant() {
        let e = VfsError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        match e.duplicate() {
            VfsError::Io(copy) => assert_eq!(copy.kind(), io::ErrorKind::TimedOut),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_programming_errors() {
        assert!(EngineError::NotStarted.is_programming_error());
        assert!(EngineError::AlreadyStarted(EngineState::Running).is_programming_error());
        assert!(!EngineError::ShuttingDown.is_programming_error());
    }
}
