//! Worker pool
//!
//! Long-lived OS threads pulling job handles from one FIFO queue. Threads
//! are spawned lazily, one per waiting job that no idle worker can take,
//! up to the concurrency limit. At most `limit` jobs are between claim
//! and completion at any moment.
//!
//! ```text
//!   submit ──► VecDeque<JobHandle> ──► worker: busy < limit? pop ──► Runner::run
//!                  ▲                        │
//!                  └── Condvar wake ────────┘ idle past timeout / surplus → exit
//! ```
//!
//! Lowering the limit never touches running jobs: workers above the new
//! limit exit once they go idle, and no worker claims while `busy >= limit`.

use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, trace, warn};

use vjob_core::constants::MIN_CONCURRENCY_LIMIT;
use vjob_core::{EngineError, EngineResult, JobHandle, VfsError};

/// What a worker does with a dequeued handle.
pub(crate) trait Runner: Send + Sync + 'static {
    /// Claim and execute `handle`, then post its completion.
    fn run(&self, handle: JobHandle);

    /// Complete `handle` with `err` without executing it.
    fn fail(&self, handle: JobHandle, err: VfsError);
}

struct PoolState {
    queue: VecDeque<JobHandle>,
    limit: usize,
    /// Live worker threads
    threads: usize,
    /// Workers blocked waiting for work
    idle: usize,
    /// Jobs between dequeue and completion
    busy: usize,
    closed: bool,
    next_id: usize,
    joins: Vec<JoinHandle<()>>,
}

struct PoolShared {
    state: Mutex<PoolState>,
    work: Condvar,
    idle_timeout: Duration,
    thread_name: String,
    runner: Arc<dyn Runner>,
}

/// Pool statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub limit: usize,
    pub threads: usize,
    pub idle: usize,
    pub busy: usize,
    pub queued: usize,
}

#[derive(Clone)]
pub(crate) struct Pool {
    shared: Arc<PoolShared>,
}

impl Pool {
    pub(crate) fn new(
        limit: usize,
        idle_timeout: Duration,
        thread_name: impl Into<String>,
        runner: Arc<dyn Runner>,
    ) -> EngineResult<Self> {
        check_limit(limit)?;
        Ok(Self {
            shared: Arc::new(PoolShared {
                state: Mutex::new(PoolState {
                    queue: VecDeque::new(),
                    limit,
                    threads: 0,
                    idle: 0,
                    busy: 0,
                    closed: false,
                    next_id: 0,
                    joins: Vec::new(),
                }),
                work: Condvar::new(),
                idle_timeout,
                thread_name: thread_name.into(),
                runner,
            }),
        })
    }

    /// Queue `handle` for execution.
    ///
    /// Rejected with `Stopped` once the pool is closed. If no worker is
    /// alive and none can be spawned, the job is failed with
    /// `SchedulingFailed` through the runner instead.
    pub(crate) fn submit(&self, handle: JobHandle) -> EngineResult<()> {
        let mut st = self.shared.state.lock();
        if st.closed {
            return Err(EngineError::Stopped);
        }
        st.queue.push_back(handle);
        if st.idle > 0 {
            self.shared.work.notify_one();
        }
        if st.queue.len() > st.idle && st.threads < st.limit && st.busy < st.limit {
            if let Err(e) = self.spawn_locked(&mut st) {
                if st.threads == 0 {
                    st.queue.retain(|h| *h != handle);
                    drop(st);
                    error!(%handle, error = %e, "no worker available");
                    self.shared
                        .runner
                        .fail(handle, VfsError::SchedulingFailed(e.to_string()));
                    return Ok(());
                }
                warn!(error = %e, "worker spawn failed; job stays queued");
            }
        }
        Ok(())
    }

    /// Change the concurrency limit.
    pub(crate) fn set_limit(&self, limit: usize) -> EngineResult<()> {
        check_limit(limit)?;
        let mut st = self.shared.state.lock();
        let old = std::mem::replace(&mut st.limit, limit);
        info!(old, new = limit, "concurrency limit changed");
        while !st.closed && st.threads < st.limit && st.queue.len() > st.idle {
            if let Err(e) = self.spawn_locked(&mut st) {
                warn!(error = %e, "worker spawn failed");
                break;
            }
        }
        // Waiting workers re-check busy < limit; surplus idle ones exit.
        self.shared.work.notify_all();
        Ok(())
    }

    pub(crate) fn limit(&self) -> usize {
        self.shared.state.lock().limit
    }

    pub(crate) fn stats(&self) -> PoolStats {
        let st = self.shared.state.lock();
        PoolStats {
            limit: st.limit,
            threads: st.threads,
            idle: st.idle,
            busy: st.busy,
            queued: st.queue.len(),
        }
    }

    /// Stop the pool and join every worker.
    ///
    /// Queued handles are still run before workers exit.
    pub(crate) fn close(&self) {
        let joins = {
            let mut st = self.shared.state.lock();
            st.closed = true;
            self.shared.work.notify_all();
            std::mem::take(&mut st.joins)
        };
        let me = thread::current().id();
        for join in joins {
            if join.thread().id() == me {
                continue;
            }
            if join.join().is_err() {
                warn!("worker thread panicked");
            }
        }
        debug!("worker pool closed");
    }

    fn spawn_locked(&self, st: &mut PoolState) -> std::io::Result<()> {
        st.joins.retain(|j| !j.is_finished());
        let id = st.next_id;
        let shared = self.shared.clone();
        let join = thread::Builder::new()
            .name(format!("{}-{}", self.shared.thread_name, id))
            .spawn(move || worker_loop(shared, id))?;
        st.next_id += 1;
        st.threads += 1;
        st.joins.push(join);
        trace!(worker = id, threads = st.threads, "worker spawned");
        Ok(())
    }
}

fn check_limit(limit: usize) -> EngineResult<()> {
    if limit < MIN_CONCURRENCY_LIMIT {
        return Err(EngineError::LimitTooLow {
            requested: limit,
            min: MIN_CONCURRENCY_LIMIT,
        });
    }
    Ok(())
}

fn next_job(shared: &PoolShared, id: usize) -> Option<JobHandle> {
    let mut st = shared.state.lock();
    loop {
        if st.closed && st.queue.is_empty() {
            break;
        }
        if st.threads > st.limit {
            trace!(worker = id, "surplus worker exiting");
            break;
        }
        if st.busy < st.limit {
            if let Some(handle) = st.queue.pop_front() {
                st.busy += 1;
                return Some(handle);
            }
        }
        st.idle += 1;
        let timed_out = shared.work.wait_for(&mut st, shared.idle_timeout).timed_out();
        st.idle -= 1;
        if timed_out && st.queue.is_empty() && !st.closed {
            trace!(worker = id, "idle worker exiting");
            break;
        }
    }
    st.threads -= 1;
    None
}

fn worker_loop(shared: Arc<PoolShared>, id: usize) {
    trace!(worker = id, "worker started");
    while let Some(handle) = next_job(&shared, id) {
        let runner = &shared.runner;
        if panic::catch_unwind(AssertUnwindSafe(|| runner.run(handle))).is_err() {
            error!(worker = id, %handle, "job runner panicked");
        }
        let mut st = shared.state.lock();
        st.busy -= 1;
        if !st.queue.is_empty() && st.idle > 0 {
            shared.work.notify_one();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Instant;

    /// Runs each job for `hold`, tracking the peak number of concurrent runs.
    struct Probe {
        hold: Duration,
        running: AtomicUsize,
        peak: AtomicUsize,
        done: AtomicUsize,
        failed: AtomicUsize,
    }

    impl Probe {
        fn new(hold: Duration) -> Arc<Self> {
            Arc::new(Self {
                hold,
                running: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                done: AtomicUsize::new(0),
                failed: AtomicUsize::new(0),
            })
        }
    }

    impl Runner for Probe {
        fn run(&self, _handle: JobHandle) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(self.hold);
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.done.fetch_add(1, Ordering::SeqCst);
        }

        fn fail(&self, _handle: JobHandle, _err: VfsError) {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn wait_done(probe: &Probe, n: usize) {
        let deadline = Instant::now() + Duration::from_secs(10);
        while probe.done.load(Ordering::SeqCst) < n {
            assert!(Instant::now() < deadline, "jobs did not finish");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_limit_bounds_concurrency() {
        let probe = Probe::new(Duration::from_millis(20));
        let pool = Pool::new(3, Duration::from_secs(5), "t", probe.clone()).unwrap();
        for i in 0..12 {
            pool.submit(JobHandle::new(i, 0)).unwrap();
        }
        wait_done(&probe, 12);
        assert!(probe.peak.load(Ordering::SeqCst) <= 3);
        assert!(pool.stats().threads <= 3);
        assert_eq!(probe.failed.load(Ordering::SeqCst), 0);
        pool.close();
    }

    #[test]
    fn test_limit_too_low() {
        let probe = Probe::new(Duration::ZERO);
        assert!(matches!(
            Pool::new(1, Duration::from_secs(1), "t", probe.clone()),
            Err(EngineError::LimitTooLow { requested: 1, min: 2 })
        ));
        let pool = Pool::new(2, Duration::from_secs(1), "t", probe).unwrap();
        assert!(pool.set_limit(0).is_err());
        assert_eq!(pool.limit(), 2);
        pool.close();
    }

    #[test]
    fn test_raise_limit_starts_waiting_jobs() {
        let probe = Probe::new(Duration::from_millis(50));
        let pool = Pool::new(2, Duration::from_secs(5), "t", probe.clone()).unwrap();
        for i in 0..4 {
            pool.submit(JobHandle::new(i, 0)).unwrap();
        }
        thread::sleep(Duration::from_millis(10));
        pool.set_limit(4).unwrap();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(probe.running.load(Ordering::SeqCst), 4);
        wait_done(&probe, 4);
        pool.close();
    }

    #[test]
    fn test_idle_workers_exit() {
        let probe = Probe::new(Duration::ZERO);
        let pool = Pool::new(4, Duration::from_millis(20), "t", probe.clone()).unwrap();
        pool.submit(JobHandle::new(0, 0)).unwrap();
        wait_done(&probe, 1);
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.stats().threads > 0 {
            assert!(Instant::now() < deadline, "idle worker never exited");
            thread::sleep(Duration::from_millis(5));
        }
        // respawned on demand
        pool.submit(JobHandle::new(1, 0)).unwrap();
        wait_done(&probe, 2);
        pool.close();
    }

    #[test]
    fn test_closed_pool_rejects() {
        let probe = Probe::new(Duration::ZERO);
        let pool = Pool::new(2, Duration::from_secs(1), "t", probe).unwrap();
        pool.close();
        assert!(matches!(pool.submit(JobHandle::new(0, 0)), Err(EngineError::Stopped)));
    }
}
