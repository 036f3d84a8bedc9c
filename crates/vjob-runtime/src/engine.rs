//! Engine - lifecycle, submission, cancellation and completion dispatch.
//!
//! # Flow
//!
//! ```text
//!  caller ── submit ──► Registry::insert ──► Pool::submit ──► worker
//!                                                               │ claim, execute
//!                                                               ▼
//!  caller loop ◄── Completions::dispatch ◄── CompletionPort ◄── post
//!      │ callback(handle, result)
//!      └──► Registry::retire
//! ```
//!
//! Callbacks always run on the thread that calls [`Completions::dispatch`]
//! (the caller's loop), never on a worker.
//!
//! # Lifecycle
//!
//! `Uninitialized → Running → Draining → Stopped`. `shutdown()` closes the
//! registry so new submissions fail, waits for the outstanding count to
//! reach zero and then joins the workers. When it runs on the thread that
//! created the engine it pumps completions itself while waiting; on any
//! other thread the owner's loop has to keep dispatching.

use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError};
use parking_lot::Mutex;
use tracing::{debug, error, info, trace, warn};

use vjob_core::{
    DirFilter, EngineError, EngineResult, EngineState, FileHandle, FileInfo, InfoOptions,
    JobHandle, JobState, MethodResolver, Notifier, OpKind, OpenMode, OverwriteMode, Output, Progress,
    ProgressAction, Request, SortRule, Target, TransferOptions, TransferProgress, VfsError,
    VfsResult,
};

use crate::config::EngineConfig;
use crate::exec::{Executor, ProgressSink};
use crate::job::{CompletionFn, Job, ProgressFn};
use crate::notify::{CompletionPort, Delivery};
use crate::pool::{Pool, PoolStats, Runner};
use crate::registry::{Claim, Registry};

thread_local! {
    /// Completion callbacks currently running on this thread.
    static CALLBACK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

fn in_callback() -> bool {
    CALLBACK_DEPTH.with(|d| d.get() > 0)
}

struct CallbackScope;

impl CallbackScope {
    fn enter() -> Self {
        CALLBACK_DEPTH.with(|d| d.set(d.get() + 1));
        CallbackScope
    }
}

impl Drop for CallbackScope {
    fn drop(&mut self) {
        CALLBACK_DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// State shared by the engine, its workers and the loop side.
struct EngineCore {
    registry: Registry,
    port: CompletionPort,
    executor: Executor,
    ack_timeout: Option<Duration>,
    poll_interval: Duration,
}

impl EngineCore {
    /// Wait for the loop's reply, honoring the configured bound.
    fn await_reply<T>(&self, rx: &Receiver<T>, handle: JobHandle, what: &str) -> Option<T> {
        match self.ack_timeout {
            None => rx.recv().ok(),
            Some(timeout) => match rx.recv_timeout(timeout) {
                Ok(v) => Some(v),
                Err(RecvTimeoutError::Timeout) => {
                    warn!(%handle, what, ?timeout, "acknowledgement timed out");
                    None
                }
                Err(RecvTimeoutError::Disconnected) => None,
            },
        }
    }

    /// Post the job's single completion; block for the ack if its
    /// operation requires one.
    fn finish(&self, job: Arc<Job>, result: VfsResult<Output>) {
        let handle = job.handle();
        trace!(%handle, ok = result.is_ok(), "posting completion");
        if job.kind().needs_completion_ack() {
            let (tx, rx) = bounded(1);
            self.port.post(Delivery::Completion { job, result, ack: Some(tx) });
            self.await_reply(&rx, handle, "completion");
        } else {
            self.post(job, result);
        }
    }

    /// Post the completion without waiting for the loop.
    fn post(&self, job: Arc<Job>, result: VfsResult<Output>) {
        self.port.post(Delivery::Completion { job, result, ack: None });
    }

    fn execute(&self, job: &Arc<Job>) -> VfsResult<Output> {
        let Some(request) = job.take_request() else {
            return Err(VfsError::other("request already taken"));
        };
        let mut sink = JobSink { core: self, job };
        let run = panic::catch_unwind(AssertUnwindSafe(|| {
            self.executor.execute(request, job.token(), &mut sink)
        }));
        run.unwrap_or_else(|_| {
            error!(handle = %job.handle(), kind = %job.kind(), "method panicked");
            Err(VfsError::other("method panicked"))
        })
    }
}

impl Runner for EngineCore {
    fn run(&self, handle: JobHandle) {
        let job = match self.registry.claim(handle) {
            Claim::Run(job) => job,
            Claim::Cancelled(job) => {
                debug!(%handle, kind = %job.kind(), "cancelled before execution");
                self.finish(job, Err(VfsError::Cancelled));
                return;
            }
            Claim::Gone => {
                trace!(%handle, "job gone before claim");
                return;
            }
        };
        trace!(%handle, kind = %job.kind(), "executing");
        let result = self.execute(&job);
        self.registry.complete(handle);
        self.finish(job, result);
    }

    /// Runs on the submitting thread, usually the loop itself, so it never
    /// waits for an ack. No worker holds a buffer for the job.
    fn fail(&self, handle: JobHandle, err: VfsError) {
        match self.registry.claim(handle) {
            Claim::Run(job) => {
                self.registry.complete(handle);
                self.post(job, Err(err));
            }
            Claim::Cancelled(job) => self.post(job, Err(VfsError::Cancelled)),
            Claim::Gone => {}
        }
    }
}

/// Routes executor progress to the job's progress callback.
struct JobSink<'a> {
    core: &'a EngineCore,
    job: &'a Arc<Job>,
}

impl ProgressSink for JobSink<'_> {
    fn emit(&mut self, progress: Progress) -> ProgressAction {
        if !self.job.has_progress() {
            return ProgressAction::Continue;
        }
        if self.job.kind().needs_progress_ack() {
            let (tx, rx) = bounded(1);
            self.core.port.post(Delivery::Progress {
                job: self.job.clone(),
                progress,
                reply: Some(tx),
            });
            self.core
                .await_reply(&rx, self.job.handle(), "progress")
                .unwrap_or_default()
        } else {
            self.core.port.post(Delivery::Progress {
                job: self.job.clone(),
                progress,
                reply: None,
            });
            ProgressAction::Continue
        }
    }
}

/// Loop side of the engine: drains deliveries and runs callbacks on the
/// calling thread.
///
/// Cheap to clone. Integrate [`Completions::raw_fd`] into an existing
/// poll loop, or block in [`Completions::wait`].
#[derive(Clone)]
pub struct Completions {
    core: Arc<EngineCore>,
}

impl Completions {
    /// Run every pending callback. Returns the number of deliveries handled.
    pub fn dispatch(&self) -> usize {
        self.core.port.reset();
        let mut handled = 0;
        while let Some(delivery) = self.core.port.pop() {
            self.deliver(delivery);
            handled += 1;
        }
        handled
    }

    fn deliver(&self, delivery: Delivery) {
        match delivery {
            Delivery::Completion { job, result, ack } => {
                let handle = job.handle();
                let outcome = match job.take_callback() {
                    Some(callback) => {
                        let _scope = CallbackScope::enter();
                        panic::catch_unwind(AssertUnwindSafe(|| callback(handle, result)))
                    }
                    None => {
                        warn!(%handle, "completion delivered twice");
                        Ok(())
                    }
                };
                self.core.registry.retire(handle);
                if let Some(ack) = ack {
                    let _ = ack.send(());
                }
                if let Err(payload) = outcome {
                    panic::resume_unwind(payload);
                }
            }
            Delivery::Progress { job, progress, reply } => {
                let action = if job.token().is_cancelled() {
                    ProgressAction::Abort
                } else {
                    let _scope = CallbackScope::enter();
                    job.report(progress)
                };
                if let Some(reply) = reply {
                    let _ = reply.send(action);
                }
            }
        }
    }

    /// Block until deliveries are pending or `timeout` elapses
    /// (`None` = forever). Returns `true` if woken.
    pub fn wait(&self, timeout: Option<Duration>) -> EngineResult<bool> {
        Ok(self.core.port.wait(timeout)?)
    }

    /// Dispatch, then wait if nothing was pending.
    pub fn poll(&self, timeout: Option<Duration>) -> EngineResult<usize> {
        let handled = self.dispatch();
        if handled > 0 {
            return Ok(handled);
        }
        self.wait(timeout)?;
        Ok(self.dispatch())
    }

    /// Dispatch until `done()` holds, sleeping on the wakeup fd in between.
    pub fn run_until(&self, mut done: impl FnMut() -> bool) -> EngineResult<()> {
        loop {
            self.dispatch();
            if done() {
                return Ok(());
            }
            self.wait(Some(self.core.poll_interval))?;
        }
    }

    /// Deliveries waiting to be dispatched.
    pub fn pending(&self) -> usize {
        self.core.port.pending()
    }

    /// Descriptor that becomes readable when deliveries are pending.
    pub fn raw_fd(&self) -> std::os::fd::RawFd {
        self.core.port.raw_fd()
    }
}

struct Lifecycle {
    state: EngineState,
    pool: Option<Pool>,
    limit: usize,
    /// A `shutdown()` call is currently waiting for the drain.
    draining: bool,
}

/// Clears the `draining` mark when a callback panics out of the drain, so
/// a later `shutdown()` or drop can finish the job.
struct DrainGuard<'a> {
    lifecycle: &'a Mutex<Lifecycle>,
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            self.lifecycle.lock().draining = false;
        }
    }
}

/// Asynchronous VFS job engine.
///
/// Not `Clone`; share it behind an `Arc` when other threads submit or
/// shut down. Dropping a running engine shuts it down.
pub struct Engine {
    core: Arc<EngineCore>,
    lifecycle: Mutex<Lifecycle>,
    config: EngineConfig,
    owner: ThreadId,
}

impl Engine {
    /// Create an engine with the platform notifier. The calling thread
    /// becomes the owner thread.
    pub fn new(config: EngineConfig, resolver: Arc<dyn MethodResolver>) -> EngineResult<Self> {
        let notifier = crate::platform_notifier()?;
        Self::with_notifier(config, resolver, notifier)
    }

    /// Create an engine with a caller-supplied notifier.
    pub fn with_notifier(
        config: EngineConfig,
        resolver: Arc<dyn MethodResolver>,
        notifier: Box<dyn Notifier>,
    ) -> EngineResult<Self> {
        config.validate()?;
        let executor = Executor::new(resolver, config.default_batch_size, config.transfer_chunk_size);
        Ok(Self {
            core: Arc::new(EngineCore {
                registry: Registry::new(),
                port: CompletionPort::new(notifier),
                executor,
                ack_timeout: config.ack_timeout,
                poll_interval: config.drain_poll_interval,
            }),
            lifecycle: Mutex::new(Lifecycle {
                state: EngineState::Uninitialized,
                pool: None,
                limit: config.concurrency_limit,
                draining: false,
            }),
            config,
            owner: thread::current().id(),
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn state(&self) -> EngineState {
        self.lifecycle.lock().state
    }

    /// `Uninitialized → Running`. Any later call fails.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn start(&self) -> EngineResult<()> {
        let mut lc = self.lifecycle.lock();
        if lc.state != EngineState::Uninitialized {
            error!(state = %lc.state, "engine started twice");
            return Err(EngineError::AlreadyStarted(lc.state));
        }
        let runner: Arc<dyn Runner> = self.core.clone();
        let pool = Pool::new(
            lc.limit,
            self.config.idle_timeout,
            self.config.thread_name.clone(),
            runner,
        )?;
        lc.pool = Some(pool);
        lc.state = EngineState::Running;
        info!(limit = lc.limit, "engine started");
        Ok(())
    }

    /// Loop-side handle for dispatching completions.
    pub fn completions(&self) -> Completions {
        Completions { core: self.core.clone() }
    }

    /// Shorthand for `completions().dispatch()`.
    pub fn dispatch(&self) -> usize {
        self.completions().dispatch()
    }

    /// Submit `request`; `callback` runs exactly once on the loop thread.
    pub fn submit(
        &self,
        request: Request,
        callback: impl FnOnce(JobHandle, VfsResult<Output>) + Send + 'static,
    ) -> EngineResult<JobHandle> {
        self.submit_job(request, None, Box::new(callback))
    }

    /// Submit `request` with a progress callback for directory batches or
    /// transfer progress.
    pub fn submit_with_progress(
        &self,
        request: Request,
        progress: impl FnMut(JobHandle, Progress) -> ProgressAction + Send + 'static,
        callback: impl FnOnce(JobHandle, VfsResult<Output>) + Send + 'static,
    ) -> EngineResult<JobHandle> {
        self.submit_job(request, Some(Box::new(progress)), Box::new(callback))
    }

    fn submit_job(
        &self,
        request: Request,
        progress: Option<ProgressFn>,
        callback: CompletionFn,
    ) -> EngineResult<JobHandle> {
        let pool = {
            let lc = self.lifecycle.lock();
            match lc.state {
                EngineState::Uninitialized => return Err(EngineError::NotStarted),
                EngineState::Draining => return Err(EngineError::ShuttingDown),
                EngineState::Stopped => return Err(EngineError::Stopped),
                EngineState::Running => lc.pool.clone().ok_or(EngineError::NotStarted)?,
            }
        };
        let kind = request.kind();
        let job = self
            .core
            .registry
            .insert_with(|handle| Job::new(handle, request, callback, progress))?;
        let handle = job.handle();
        drop(job);
        if let Err(e) = pool.submit(handle) {
            self.core.registry.retire(handle);
            return Err(e);
        }
        debug!(%handle, %kind, "submitted");
        Ok(handle)
    }

    /// Request cancellation of `handle`. Returns immediately.
    ///
    /// A job not yet claimed completes with `Cancelled` without running;
    /// a running job sees its token tripped. Repeated calls are harmless.
    /// `NotFound` once the job is retired.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn cancel(&self, handle: JobHandle) -> EngineResult<()> {
        let state = self.core.registry.request_cancel(handle)?;
        debug!(%handle, ?state, "cancel requested");
        Ok(())
    }

    /// Change the concurrency limit (minimum 2). Applies at start when
    /// the engine is not running yet.
    pub fn set_concurrency_limit(&self, limit: usize) -> EngineResult<()> {
        let mut lc = self.lifecycle.lock();
        match &lc.pool {
            Some(pool) => pool.set_limit(limit)?,
            None => EngineConfig::new().concurrency_limit(limit).validate()?,
        }
        lc.limit = limit;
        Ok(())
    }

    pub fn concurrency_limit(&self) -> usize {
        let lc = self.lifecycle.lock();
        lc.pool.as_ref().map_or(lc.limit, Pool::limit)
    }

    /// Operation of a live job.
    pub fn kind_of(&self, handle: JobHandle) -> EngineResult<OpKind> {
        Ok(self.core.registry.lookup(handle)?.kind())
    }

    /// State and cancel flag of a live job; `NotFound` once retired.
    pub fn job_state(&self, handle: JobHandle) -> EngineResult<(JobState, bool)> {
        self.core
            .registry
            .state(handle)
            .ok_or(EngineError::NotFound(handle))
    }

    /// Registered jobs not yet retired.
    pub fn outstanding(&self) -> usize {
        self.core.registry.len()
    }

    pub fn pool_stats(&self) -> Option<PoolStats> {
        self.lifecycle.lock().pool.as_ref().map(Pool::stats)
    }

    /// Drain in-flight jobs and stop. Returns the resulting state.
    ///
    /// A no-op on an engine that never started or already stopped. Called
    /// from inside a completion callback it only stops accepting work and
    /// returns `Draining`; a later call (or drop) finishes the drain.
    #[tracing::instrument(level = "debug", skip(self))]
    pub fn shutdown(&self) -> EngineState {
        {
            let mut lc = self.lifecycle.lock();
            match lc.state {
                EngineState::Running => {
                    lc.state = EngineState::Draining;
                    let outstanding = self.core.registry.close();
                    info!(outstanding, "engine draining");
                }
                EngineState::Draining if !lc.draining => {}
                state => return state,
            }
            if in_callback() {
                warn!("shutdown called from a completion callback; drain deferred");
                return EngineState::Draining;
            }
            lc.draining = true;
        }

        {
            let _unwind = DrainGuard { lifecycle: &self.lifecycle };
            self.drain();
        }

        let pool = self.lifecycle.lock().pool.take();
        if let Some(pool) = pool {
            pool.close();
        }
        let mut lc = self.lifecycle.lock();
        lc.state = EngineState::Stopped;
        lc.draining = false;
        info!("engine stopped");
        lc.state
    }

    fn drain(&self) {
        let pump = thread::current().id() == self.owner;
        let completions = self.completions();
        let poll = self.config.drain_poll_interval;
        loop {
            if pump {
                completions.dispatch();
            }
            let outstanding = self.core.registry.len();
            if outstanding == 0 {
                break;
            }
            trace!(outstanding, "waiting for in-flight jobs");
            if pump {
                if let Err(e) = completions.wait(Some(poll)) {
                    warn!(error = %e, "completion wait failed");
                    thread::sleep(poll);
                }
            } else {
                thread::sleep(poll);
            }
        }
    }

    // Typed helpers. Each maps the job's `Output` to the operation's own
    // result type before calling the caller's callback.

    pub fn open(
        &self,
        target: impl Into<Target>,
        mode: OpenMode,
        callback: impl FnOnce(JobHandle, VfsResult<FileHandle>) + Send + 'static,
    ) -> EngineResult<JobHandle> {
        self.submit(Request::open(target, mode), move |h, res| {
            callback(h, res.and_then(into_file))
        })
    }

    pub fn create(
        &self,
        target: impl Into<Target>,
        mode: OpenMode,
        exclusive: bool,
        perm: u32,
        callback: impl FnOnce(JobHandle, VfsResult<FileHandle>) + Send + 'static,
    ) -> EngineResult<JobHandle> {
        let request = Request::Create { target: target.into(), mode, exclusive, perm };
        self.submit(request, move |h, res| callback(h, res.and_then(into_file)))
    }

    pub fn close(
        &self,
        file: &FileHandle,
        callback: impl FnOnce(JobHandle, VfsResult<()>) + Send + 'static,
    ) -> EngineResult<JobHandle> {
        self.submit(Request::close(file), move |h, res| {
            callback(h, res.and_then(|out| match out {
                Output::Closed => Ok(()),
                other => Err(unexpected(other)),
            }))
        })
    }

    /// Read up to `len` bytes. The worker holds until the callback ran.
    pub fn read(
        &self,
        file: &FileHandle,
        len: usize,
        callback: impl FnOnce(JobHandle, VfsResult<Vec<u8>>) + Send + 'static,
    ) -> EngineResult<JobHandle> {
        self.submit(Request::read(file, len), move |h, res| {
            callback(h, res.and_then(|out| match out {
                Output::Read(data) => Ok(data),
                other => Err(unexpected(other)),
            }))
        })
    }

    pub fn write(
        &self,
        file: &FileHandle,
        data: impl Into<Vec<u8>>,
        callback: impl FnOnce(JobHandle, VfsResult<usize>) + Send + 'static,
    ) -> EngineResult<JobHandle> {
        self.submit(Request::write(file, data), move |h, res| {
            callback(h, res.and_then(|out| match out {
                Output::Written(n) => Ok(n),
                other => Err(unexpected(other)),
            }))
        })
    }

    pub fn get_file_info(
        &self,
        targets: Vec<Target>,
        options: InfoOptions,
        keys: Vec<String>,
        callback: impl FnOnce(JobHandle, VfsResult<Vec<(Target, VfsResult<FileInfo>)>>)
            + Send
            + 'static,
    ) -> EngineResult<JobHandle> {
        let request = Request::GetFileInfo { targets, options, keys };
        self.submit(request, move |h, res| {
            callback(h, res.and_then(|out| match out {
                Output::FileInfo(infos) => Ok(infos),
                other => Err(unexpected(other)),
            }))
        })
    }

    /// List `target`; `on_batch` receives filtered, sorted entries in
    /// batches of `batch_size` (0 for the configured default), then
    /// `callback` gets the total.
    #[allow(clippy::too_many_arguments)]
    pub fn load_directory(
        &self,
        target: impl Into<Target>,
        options: InfoOptions,
        sort: Vec<SortRule>,
        filter: Option<DirFilter>,
        batch_size: usize,
        mut on_batch: impl FnMut(JobHandle, Vec<FileInfo>) + Send + 'static,
        callback: impl FnOnce(JobHandle, VfsResult<usize>) + Send + 'static,
    ) -> EngineResult<JobHandle> {
        let request = Request::LoadDirectory {
            target: target.into(),
            options,
            sort,
            filter,
            batch_size,
        };
        self.submit_with_progress(
            request,
            move |h, progress| {
                if let Progress::Entries(entries) = progress {
                    on_batch(h, entries);
                }
                ProgressAction::Continue
            },
            move |h, res| {
                callback(h, res.and_then(|out| match out {
                    Output::Directory { entries_read } => Ok(entries_read),
                    other => Err(unexpected(other)),
                }))
            },
        )
    }

    /// Copy (or move, with `options.remove_source`) `sources[i]` to
    /// `targets[i]`. `on_progress` steers the transfer and hears from it
    /// every `batch_size` copied chunks (0 for the configured default).
    #[allow(clippy::too_many_arguments)]
    pub fn transfer(
        &self,
        sources: Vec<Target>,
        targets: Vec<Target>,
        options: TransferOptions,
        overwrite: OverwriteMode,
        batch_size: usize,
        mut on_progress: impl FnMut(JobHandle, &TransferProgress) -> ProgressAction + Send + 'static,
        callback: impl FnOnce(JobHandle, VfsResult<TransferProgress>) + Send + 'static,
    ) -> EngineResult<JobHandle> {
        let request = Request::Transfer { sources, targets, options, overwrite, batch_size };
        self.submit_with_progress(
            request,
            move |h, progress| match progress {
                Progress::Transfer(p) => on_progress(h, &p),
                Progress::Entries(_) => ProgressAction::Continue,
            },
            move |h, res| {
                callback(h, res.and_then(|out| match out {
                    Output::Transferred(p) => Ok(p),
                    other => Err(unexpected(other)),
                }))
            },
        )
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let state = self.lifecycle.get_mut().state;
        if matches!(state, EngineState::Running | EngineState::Draining) {
            self.shutdown();
        }
    }
}

fn into_file(out: Output) -> VfsResult<FileHandle> {
    match out {
        Output::Opened(f) | Output::Created(f) => Ok(f),
        other => Err(unexpected(other)),
    }
}

fn unexpected(out: Output) -> VfsError {
    VfsError::other(format!("unexpected output {out:?}"))
}
