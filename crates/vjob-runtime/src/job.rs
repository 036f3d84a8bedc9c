//! Job record
//!
//! A job is created by `Engine::submit`, stored in the registry and shared
//! (`Arc`) with the worker that claims it and the loop thread that
//! delivers its completion. Mutable pieces are each taken exactly once:
//!
//! - `request`  - taken by the claiming worker
//! - `callback` - taken by the loop thread when the completion is dispatched
//! - `progress` - only ever called from the loop thread
//!
//! Job state and the cancel flag are not here; they belong to the
//! registry entry and change only under the registry lock.

use std::fmt;

use parking_lot::Mutex;

use vjob_core::{
    CancellationToken, JobHandle, OpKind, Output, Progress, ProgressAction, Request, VfsResult,
};

/// Completion callback, run exactly once on the loop thread.
pub type CompletionFn = Box<dyn FnOnce(JobHandle, VfsResult<Output>) + Send>;

/// Progress callback for directory batches and transfer progress.
pub type ProgressFn = Box<dyn FnMut(JobHandle, Progress) -> ProgressAction + Send>;

pub struct Job {
    handle: JobHandle,
    kind: OpKind,
    request: Mutex<Option<Request>>,
    callback: Mutex<Option<CompletionFn>>,
    progress: Mutex<Option<ProgressFn>>,
    wants_progress: bool,
    token: CancellationToken,
}

impl Job {
    pub(crate) fn new(
        handle: JobHandle,
        request: Request,
        callback: CompletionFn,
        progress: Option<ProgressFn>,
    ) -> Self {
        Self {
            handle,
            kind: request.kind(),
            request: Mutex::new(Some(request)),
            callback: Mutex::new(Some(callback)),
            wants_progress: progress.is_some(),
            progress: Mutex::new(progress),
            token: CancellationToken::new(),
        }
    }

    #[inline]
    pub fn handle(&self) -> JobHandle {
        self.handle
    }

    #[inline]
    pub fn kind(&self) -> OpKind {
        self.kind
    }

    #[inline]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn take_request(&self) -> Option<Request> {
        self.request.lock().take()
    }

    pub(crate) fn take_callback(&self) -> Option<CompletionFn> {
        self.callback.lock().take()
    }

    /// Whether a progress callback was supplied at submission.
    #[inline]
    pub(crate) fn has_progress(&self) -> bool {
        self.wants_progress
    }

    /// Run the progress callback; `Continue` when there is none.
    pub(crate) fn report(&self, progress: Progress) -> ProgressAction {
        match self.progress.lock().as_mut() {
            Some(cb) => cb(self.handle, progress),
            None => ProgressAction::Continue,
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}
