//! Completion delivery
//!
//! Workers push deliveries onto a lock-free queue and signal a
//! [`Notifier`]; the caller's loop drains the queue from its own thread
//! (see `engine::Completions`).
//!
//! ```text
//!  worker ──push──► SegQueue<Delivery> ──pop──► loop thread ──► callback
//!     └──notify──► eventfd / pipe ──poll────────┘
//! ```
//!
//! A delivery either completes a job (exactly one per job) or carries an
//! intermediate progress event. Both may hold a reply channel; the worker
//! blocks on it until the loop has run the callback.

#[cfg(target_os = "linux")]
pub mod eventfd;
#[cfg(unix)]
pub mod pipe;

use std::io;
use std::os::fd::BorrowedFd;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::Sender;
use crossbeam_queue::SegQueue;
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::warn;

use vjob_core::{Notifier, Output, Progress, ProgressAction, VfsResult};

use crate::job::Job;

/// Block until `fd` is readable or `timeout` elapses.
///
/// Timeouts beyond `u16::MAX` milliseconds are clamped; callers loop.
/// An interrupted poll reports a timeout.
pub(crate) fn wait_readable(fd: BorrowedFd<'_>, timeout: Option<Duration>) -> io::Result<bool> {
    let timeout = match timeout {
        None => PollTimeout::NONE,
        Some(d) => PollTimeout::from(d.as_millis().min(u16::MAX as u128) as u16),
    };
    let mut fds = [PollFd::new(fd, PollFlags::POLLIN)];
    match poll(&mut fds, timeout) {
        Ok(n) => Ok(n > 0),
        Err(Errno::EINTR) => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Something the loop thread has to act on.
pub(crate) enum Delivery {
    /// Final result; retires the job once the callback has run.
    Completion {
        job: Arc<Job>,
        result: VfsResult<Output>,
        ack: Option<Sender<()>>,
    },
    /// Directory batch or transfer progress.
    Progress {
        job: Arc<Job>,
        progress: Progress,
        reply: Option<Sender<ProgressAction>>,
    },
}

/// Worker-to-loop channel: delivery queue plus wakeup.
pub(crate) struct CompletionPort {
    queue: SegQueue<Delivery>,
    notifier: Box<dyn Notifier>,
}

impl CompletionPort {
    pub(crate) fn new(notifier: Box<dyn Notifier>) -> Self {
        Self {
            queue: SegQueue::new(),
            notifier,
        }
    }

    /// Queue a delivery and wake the loop. Never blocks.
    pub(crate) fn post(&self, delivery: Delivery) {
        self.queue.push(delivery);
        if let Err(e) = self.notifier.notify() {
            // The delivery is queued; the next dispatch still sees it.
            warn!(error = %e, "completion wakeup failed");
        }
    }

    /// Consume pending wakeups. Call before draining the queue so a
    /// post racing with the drain leaves the fd readable.
    pub(crate) fn reset(&self) {
        if let Err(e) = self.notifier.drain() {
            warn!(error = %e, "completion wakeup drain failed");
        }
    }

    pub(crate) fn pop(&self) -> Option<Delivery> {
        self.queue.pop()
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }

    pub(crate) fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        if !self.queue.is_empty() {
            return Ok(true);
        }
        self.notifier.wait(timeout)
    }

    pub(crate) fn raw_fd(&self) -> std::os::fd::RawFd {
        self.notifier.raw_fd()
    }
}
