//! Coalesced readiness signalling to the host.
//!
//! Workers call [`Notify::signal`] after publishing an event; an `armed`
//! compare-and-swap guarantees at most one descriptor write between drains,
//! however large the burst. The drain either re-notifies (events left
//! behind) or disarms (all rings empty), after which the next worker may
//! signal again.
//!
//! On Linux the descriptor is an `eventfd`; elsewhere a non-blocking pipe
//! provides the same edge-triggered readability. The host reads the
//! descriptor until `EAGAIN` before draining.

use std::os::fd::{AsFd, AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};

use tapline_common::Result;

pub(crate) struct Notify {
    armed: AtomicBool,
    wake: WakeFd,
}

impl Notify {
    pub fn new() -> Result<Self> {
        Ok(Self {
            armed: AtomicBool::new(false),
            wake: WakeFd::new()?,
        })
    }

    /// The descriptor the host polls for readability.
    pub fn fd(&self) -> RawFd {
        self.wake.fd()
    }

    /// Worker side: make the descriptor readable, at most once per drain
    /// cycle.
    pub fn signal(&self) {
        if self
            .armed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.wake.write_one();
        }
    }

    /// Drain side: events remain, make the descriptor readable again while
    /// staying armed.
    pub fn renotify(&self) {
        self.wake.write_one();
    }

    /// Drain side: all rings empty, allow the next worker signal.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }
}

#[cfg(target_os = "linux")]
struct WakeFd {
    efd: nix::sys::eventfd::EventFd,
}

#[cfg(target_os = "linux")]
impl WakeFd {
    fn new() -> Result<Self> {
        use nix::sys::eventfd::{EfdFlags, EventFd};
        let efd = EventFd::from_value_and_flags(
            0,
            EfdFlags::EFD_NONBLOCK | EfdFlags::EFD_CLOEXEC,
        )
        .map_err(std::io::Error::from)?;
        Ok(Self { efd })
    }

    fn fd(&self) -> RawFd {
        self.efd.as_fd().as_raw_fd()
    }

    fn write_one(&self) {
        // Best effort; EAGAIN means the counter is already non-zero.
        let _ = self.efd.write(1);
    }
}

#[cfg(not(target_os = "linux"))]
struct WakeFd {
    read: std::os::fd::OwnedFd,
    write: std::os::fd::OwnedFd,
}

#[cfg(not(target_os = "linux"))]
impl WakeFd {
    fn new() -> Result<Self> {
        use nix::fcntl::OFlag;
        let (read, write) = nix::unistd::pipe2(OFlag::O_NONBLOCK | OFlag::O_CLOEXEC)
            .map_err(std::io::Error::from)?;
        Ok(Self { read, write })
    }

    fn fd(&self) -> RawFd {
        self.read.as_fd().as_raw_fd()
    }

    fn write_one(&self) {
        let _ = nix::unistd::write(&self.write, &1u64.to_ne_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Read and reset the descriptor's counter, as a host would on wakeup.
    fn drain_fd(fd: RawFd) -> u64 {
        let mut total = 0u64;
        loop {
            let mut buf = [0u8; 8];
            let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
            if n <= 0 {
                return total;
            }
            total += u64::from_ne_bytes(buf);
        }
    }

    #[test]
    fn test_signal_coalesces_until_disarm() {
        let notify = Notify::new().unwrap();

        notify.signal();
        notify.signal();
        notify.signal();
        assert_eq!(drain_fd(notify.fd()), 1);

        // Still armed: no further writes happen.
        notify.signal();
        assert_eq!(drain_fd(notify.fd()), 0);

        notify.disarm();
        notify.signal();
        assert_eq!(drain_fd(notify.fd()), 1);
    }

    #[test]
    fn test_renotify_writes_while_armed() {
        let notify = Notify::new().unwrap();
        notify.signal();
        assert_eq!(drain_fd(notify.fd()), 1);
        notify.renotify();
        assert_eq!(drain_fd(notify.fd()), 1);
    }

    #[test]
    fn test_fd_is_nonblocking() {
        let notify = Notify::new().unwrap();
        // Reading the empty descriptor must fail immediately, not block.
        assert_eq!(drain_fd(notify.fd()), 0);
    }
}
