//! `PipeNotifier` - self-pipe `Notifier` for unix targets without eventfd.
//!
//! Each `notify()` writes one byte; `drain()` empties the pipe. A full
//! pipe already guarantees a pending wakeup, so `EAGAIN` on write is fine.

use std::io;
use std::os::fd::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::Duration;

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::unistd;

use vjob_core::notifier::Notifier;

use super::wait_readable;

pub struct PipeNotifier {
    read: OwnedFd,
    write: OwnedFd,
}

fn configure(fd: &OwnedFd) -> io::Result<()> {
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK))?;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
    Ok(())
}

impl PipeNotifier {
    /// Create a non-blocking, close-on-exec pipe pair.
    pub fn create() -> io::Result<Self> {
        let (read, write) = unistd::pipe()?;
        configure(&read)?;
        configure(&write)?;
        Ok(Self { read, write })
    }
}

impl Notifier for PipeNotifier {
    fn notify(&self) -> io::Result<()> {
        match unistd::write(&self.write, &[1u8]) {
            Ok(_) | Err(Errno::EAGAIN) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn drain(&self) -> io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match unistd::read(self.read.as_raw_fd(), &mut buf) {
                Ok(0) | Err(Errno::EAGAIN) => return Ok(()),
                Ok(_) => continue,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    fn wait(&self, timeout: Option<Duration>) -> io::Result<bool> {
        wait_readable(self.read.as_fd(), timeout)
    }

    fn raw_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}
