//! Job and engine state types

use core::fmt;

/// Lifecycle of a single job
///
/// `Queued → Executing → Completed → Retired`. A job cancelled before a
/// worker claims it goes straight from `Queued` to `Completed` without
/// ever executing. The cancel-requested flag is tracked separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum JobState {
    /// Registered and waiting in the pool queue
    Queued = 0,

    /// Claimed by exactly one worker, method call in progress
    Executing = 1,

    /// Result captured, completion posted to the caller's loop
    Completed = 2,

    /// Callback has run and the job left the registry
    Retired = 3,
}

impl JobState {
    /// Check if a worker may still claim this job
    #[inline]
    pub const fn is_claimable(&self) -> bool {
        matches!(self, JobState::Queued)
    }

    /// Check if the job has produced its result
    #[inline]
    pub const fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed | JobState::Retired)
    }
}

impl From<u8> for JobState {
    fn from(v: u8) -> Self {
        match v {
            0 => JobState::Queued,
            1 => JobState::Executing,
            2 => JobState::Completed,
            _ => JobState::Retired,
        }
    }
}

impl From<JobState> for u8 {
    fn from(state: JobState) -> u8 {
        state as u8
    }
}

/// Lifecycle of the engine itself
///
/// `Uninitialized → Running → Draining → Stopped`. No transition skips a
/// state, and only `Draining → Stopped` waits on an external condition
/// (the outstanding job count reaching zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum EngineState {
    /// Constructed, no worker pool yet
    Uninitialized = 0,

    /// Accepting submissions
    Running = 1,

    /// Rejecting submissions, waiting for in-flight jobs to retire
    Draining = 2,

    /// Pool and registry released
    Stopped = 3,
}

impl EngineState {
    /// Check if submissions are accepted in this state
    #[inline]
    pub const fn accepts_work(&self) -> bool {
        matches!(self, EngineState::Running)
    }

    /// The only state this one may move to, if any
    pub const fn next(&self) -> Option<EngineState> {
        match self {
            EngineState::Uninitialized => Some(EngineState::Running),
            EngineState::Running => Some(EngineState::Draining),
            EngineState::Draining => Some(EngineState::Stopped),
            EngineState::Stopped => None,
        }
    }
}

impl From<u8> for EngineState {
    fn from(v: u8) -> Self {
        match v {
            0 => EngineState::Uninitialized,
            1 => EngineState::Running,
            2 => EngineState::Draining,
            _ => EngineState::Stopped,
        }
    }
}

impl fmt::Display for EngineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineState::Uninitialized => write!(f, "uninitialized"),
            EngineState::Running => write!(f, "running"),
            EngineState::Draining => write!(f, "draining"),
            EngineState::Stopped => write!(f, "stopped"),
        }
    }
}
