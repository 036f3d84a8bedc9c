//! Job registry
//!
//! Maps live job handles to their job record, state and cancel flag.
//! Slots live in an arena addressed by handle index; freed slots are
//! reused LIFO and bump their generation, so a stale handle never
//! reaches a newer job.
//!
//! # Locking
//!
//! One registry-wide mutex guards the arena, each entry's state and
//! cancel flag, and the `accepting` flag. Work under it is O(1) map
//! bookkeeping only. It is taken before any per-job lock and never while
//! one is held, and no method or callback runs under it.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use vjob_core::{EngineError, EngineResult, JobHandle, JobState};

use crate::job::Job;

struct Entry {
    job: Arc<Job>,
    state: JobState,
    cancel_requested: bool,
}

struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

struct Inner {
    slots: Vec<Slot>,
    /// LIFO stack of free slot indices
    free: Vec<u32>,
    live: usize,
    accepting: bool,
}

impl Inner {
    fn entry_mut(&mut self, handle: JobHandle) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(handle.as_usize())?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.entry.as_mut()
    }
}

/// Outcome of a worker's claim attempt.
pub(crate) enum Claim {
    /// `Queued → Executing`; the caller now owns execution.
    Run(Arc<Job>),
    /// Cancel was requested before the claim; `Queued → Completed` and
    /// the method must not be entered.
    Cancelled(Arc<Job>),
    /// Already retired or not claimable.
    Gone,
}

pub(crate) struct Registry {
    inner: Mutex<Inner>,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                slots: Vec::new(),
                free: Vec::new(),
                live: 0,
                accepting: true,
            }),
        }
    }

    /// Register a job built by `make` for the issued handle.
    ///
    /// Fails with `ShuttingDown` once the registry is closed; nothing is
    /// registered in that case.
    pub(crate) fn insert_with(
        &self,
        make: impl FnOnce(JobHandle) -> Job,
    ) -> EngineResult<Arc<Job>> {
        let mut inner = self.inner.lock();
        if !inner.accepting {
            return Err(EngineError::ShuttingDown);
        }
        let index = match inner.free.pop() {
            Some(index) => index,
            None => {
                inner.slots.push(Slot { generation: 0, entry: None });
                (inner.slots.len() - 1) as u32
            }
        };
        let slot = &mut inner.slots[index as usize];
        let handle = JobHandle::new(index, slot.generation);
        let job = Arc::new(make(handle));
        slot.entry = Some(Entry {
            job: job.clone(),
            state: JobState::Queued,
            cancel_requested: false,
        });
        inner.live += 1;
        trace!(%handle, "registered");
        Ok(job)
    }

    pub(crate) fn lookup(&self, handle: JobHandle) -> EngineResult<Arc<Job>> {
        let mut inner = self.inner.lock();
        inner
            .entry_mut(handle)
            .map(|e| e.job.clone())
            .ok_or(EngineError::NotFound(handle))
    }

    /// Current state and cancel flag, `None` once retired.
    pub(crate) fn state(&self, handle: JobHandle) -> Option<(JobState, bool)> {
        let mut inner = self.inner.lock();
        inner.entry_mut(handle).map(|e| (e.state, e.cancel_requested))
    }

    /// Take the right to execute `handle`. At most one caller ever gets
    /// `Run` or `Cancelled` for a given job.
    pub(crate) fn claim(&self, handle: JobHandle) -> Claim {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.entry_mut(handle) else {
            return Claim::Gone;
        };
        if !entry.state.is_claimable() {
            return Claim::Gone;
        }
        if entry.cancel_requested {
            entry.state = JobState::Completed;
            Claim::Cancelled(entry.job.clone())
        } else {
            entry.state = JobState::Executing;
            Claim::Run(entry.job.clone())
        }
    }

    /// `Executing → Completed`. Returns false if the job was not executing.
    pub(crate) fn complete(&self, handle: JobHandle) -> bool {
        let mut inner = self.inner.lock();
        match inner.entry_mut(handle) {
            Some(entry) if entry.state == JobState::Executing => {
                entry.state = JobState::Completed;
                true
            }
            _ => false,
        }
    }

    /// Flag `handle` for cancellation and trip its token.
    ///
    /// Idempotent; `NotFound` once the job is retired.
    pub(crate) fn request_cancel(&self, handle: JobHandle) -> EngineResult<JobState> {
        let mut inner = self.inner.lock();
        let entry = inner.entry_mut(handle).ok_or(EngineError::NotFound(handle))?;
        entry.cancel_requested = true;
        entry.job.token().cancel();
        Ok(entry.state)
    }

    /// Remove `handle` and free its slot for reuse.
    pub(crate) fn retire(&self, handle: JobHandle) -> Option<Arc<Job>> {
        let mut inner = self.inner.lock();
        let slot = inner.slots.get_mut(handle.as_usize())?;
        if slot.generation != handle.generation() {
            return None;
        }
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        inner.free.push(handle.index());
        inner.live -= 1;
        trace!(%handle, "retired");
        Some(entry.job)
    }

    /// Stop accepting registrations. Returns the outstanding count.
    pub(crate) fn close(&self) -> usize {
        let mut inner = self.inner.lock();
        inner.accepting = false;
        inner.live
    }

    /// Outstanding (registered, not yet retired) jobs.
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().live
    }
}
