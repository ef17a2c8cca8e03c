//! Completion fences
//!
//! On hardware a fence is an Android `sync_file` descriptor that becomes
//! readable once the GPU or display engine is done with a buffer. The virtual
//! composer uses a software [`Timeline`] instead, modelled on `sw_sync`: a
//! fence is a point on the timeline and signals once the timeline counter
//! reaches it.

use crate::Result;
use std::fmt;
use std::os::fd::{AsRawFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};

/// A completion signal handed between producer and consumer of a buffer.
///
/// A fence is owned by exactly one side at a time; handing it over moves it.
pub struct Fence(Inner);

enum Inner {
    Signaled,
    SyncFile(OwnedFd),
    Timeline(TimelinePoint),
}

impl Fence {
    /// A fence that is already signaled (HAL code `-1`).
    pub fn signaled() -> Self {
        Fence(Inner::Signaled)
    }

    /// Take ownership of a sync_file descriptor. Negative values mean
    /// "no fence" and produce an already signaled fence.
    ///
    /// # Safety
    ///
    /// `fd` must be an open descriptor owned by the caller, or negative.
    pub unsafe fn from_raw_fd(fd: RawFd) -> Self {
        if fd < 0 {
            Fence::signaled()
        } else {
            Fence(Inner::SyncFile(OwnedFd::from_raw_fd(fd)))
        }
    }

    pub fn from_owned_fd(fd: OwnedFd) -> Self {
        Fence(Inner::SyncFile(fd))
    }

    /// Give up ownership of the underlying descriptor.
    ///
    /// Returns `-1` for fences without a kernel object; a software timeline
    /// fence is waited on first, since its completion cannot be expressed as
    /// a descriptor.
    pub fn into_raw_fd(self) -> RawFd {
        match self.0 {
            Inner::Signaled => -1,
            Inner::SyncFile(fd) => fd.into_raw_fd(),
            Inner::Timeline(point) => {
                point.wait_until(None);
                -1
            }
        }
    }

    /// Descriptor without giving up ownership, `-1` when there is none.
    pub fn as_raw_fd(&self) -> RawFd {
        match &self.0 {
            Inner::SyncFile(fd) => fd.as_raw_fd(),
            _ => -1,
        }
    }

    /// Non-blocking check.
    pub fn is_signaled(&self) -> bool {
        self.wait(Duration::ZERO).unwrap_or(false)
    }

    /// Block for at most `timeout`. Returns `Ok(true)` once signaled and
    /// `Ok(false)` on timeout.
    pub fn wait(&self, timeout: Duration) -> Result<bool> {
        match &self.0 {
            Inner::Signaled => Ok(true),
            Inner::SyncFile(fd) => poll_readable(fd.as_raw_fd(), timeout),
            Inner::Timeline(point) => Ok(point.wait_until(Some(Instant::now() + timeout))),
        }
    }
}

impl fmt::Debug for Fence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Inner::Signaled => f.write_str("Fence(signaled)"),
            Inner::SyncFile(fd) => write!(f, "Fence(fd {})", fd.as_raw_fd()),
            Inner::Timeline(point) => write!(f, "Fence(timeline point {})", point.value),
        }
    }
}

fn poll_readable(fd: RawFd, timeout: Duration) -> Result<bool> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let timeout_ms = remaining.as_millis().min(i32::MAX as u128) as i32;
        let mut pfd = libc::pollfd {
            fd,
            events: libc::POLLIN,
            revents: 0,
        };
        let ret = unsafe { libc::poll(&mut pfd, 1, timeout_ms) };
        if ret < 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if ret == 0 {
            return Ok(false);
        }
        if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            return Err(std::io::Error::from_raw_os_error(libc::EINVAL).into());
        }
        return Ok(pfd.revents & libc::POLLIN != 0);
    }
}

/// Monotonic software sync timeline.
#[derive(Clone, Default)]
pub struct Timeline {
    shared: Arc<TimelineShared>,
}

#[derive(Default)]
struct TimelineShared {
    value: Mutex<u64>,
    cond: Condvar,
}

struct TimelinePoint {
    shared: Arc<TimelineShared>,
    value: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fence that signals once the timeline reaches `value`.
    pub fn fence(&self, value: u64) -> Fence {
        Fence(Inner::Timeline(TimelinePoint {
            shared: Arc::clone(&self.shared),
            value,
        }))
    }

    /// Advance the counter to `value`. Never moves backwards.
    pub fn signal(&self, value: u64) {
        let mut current = self
            .shared
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if value > *current {
            *current = value;
            self.shared.cond.notify_all();
        }
    }

    pub fn current(&self) -> u64 {
        *self
            .shared
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl TimelinePoint {
    fn wait_until(&self, deadline: Option<Instant>) -> bool {
        let mut current = self
            .shared
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while *current < self.value {
            match deadline {
                None => {
                    current = self
                        .shared
                        .cond
                        .wait(current)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    if remaining.is_zero() {
                        return false;
                    }
                    current = self
                        .shared
                        .cond
                        .wait_timeout(current, remaining)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pipe() -> (OwnedFd, OwnedFd) {
        let mut fds = [0; 2];
        assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
        unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) }
    }

    #[test]
    fn test_negative_fd_is_signaled() {
        let fence = unsafe { Fence::from_raw_fd(-1) };
        assert!(fence.is_signaled());
        assert_eq!(fence.into_raw_fd(), -1);
    }

    #[test]
    fn test_fd_fence_signals_when_readable() {
        let (read, write) = pipe();
        let fence = Fence::from_owned_fd(read);
        assert!(!fence.is_signaled());
        assert!(!fence.wait(Duration::from_millis(5)).unwrap());

        let byte = [1u8];
        let written = unsafe { libc::write(write.as_raw_fd(), byte.as_ptr().cast(), 1) };
        assert_eq!(written, 1);
        assert!(fence.is_signaled());
    }

    #[test]
    fn test_timeline_fence() {
        let timeline = Timeline::new();
        let first = timeline.fence(1);
        let second = timeline.fence(2);
        assert!(!first.is_signaled());

        timeline.signal(1);
        assert!(first.is_signaled());
        assert!(!second.is_signaled());

        // Counter never goes backwards.
        timeline.signal(0);
        assert_eq!(timeline.current(), 1);
    }

    #[test]
    fn test_timeline_wait_wakes_on_signal() {
        let timeline = Timeline::new();
        let fence = timeline.fence(3);
        let signaler = timeline.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            signaler.signal(3);
        });
        assert!(fence.wait(Duration::from_secs(5)).unwrap());
        handle.join().unwrap();
    }
}
