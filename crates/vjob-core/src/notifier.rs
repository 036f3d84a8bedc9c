//! Completion wakeup abstraction.
//!
//! A `Notifier` wakes the caller's event loop when new completions are
//! waiting in the delivery queue.
//!
//! # Implementors
//!
//! - `EventFdNotifier` (Linux): writes 1 to an eventfd. The loop polls or
//!   reads the eventfd. Works with epoll, poll or select.
//!
//! - `PipeNotifier` (other unix): writes a byte to a non-blocking
//!   self-pipe. Same contract, one extra fd.

use std::io;
use std::time::Duration;

/// Wakes the completion loop when deliveries are ready.
///
/// **Contract:**
/// - `notify()` must NEVER block.
/// - Multiple calls before the loop wakes are coalesced
///   (eventfd semantics: counter increments, one read drains).
/// - `wait()` and `drain()` are only called from the loop side.
pub trait Notifier: Send + Sync {
    /// Signal that new deliveries are available.
    fn notify(&self) -> io::Result<()>;

    /// Consume pending wakeups so the next `wait()` blocks again.
    fn drain(&self) -> io::Result<()>;

    /// Block until a wakeup arrives or `timeout` elapses (`None` = forever).
    ///
    /// Returns `true` if woken, `false` on timeout.
    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool>;

    /// Descriptor a host event loop can poll for readability.
    #[cfg(unix)]
    fn raw_fd(&self) -> std::os::unix::io::RawFd;
}
