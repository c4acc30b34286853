//! Readiness polling
//!
//! The crawler registers every session descriptor with its desired events
//! and waits for one bounded call to return the ready subset. [`SysPoller`]
//! does this with `poll(2)`.

use crate::error::{CrawlError, CrawlResult};
use crate::nfs::transport::Events;
use std::io;
use std::os::unix::io::RawFd;
use std::time::Duration;

/// A descriptor and the events to wait for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interest {
    pub fd: RawFd,
    pub events: Events,
}

impl Interest {
    pub fn new(fd: RawFd, events: Events) -> Self {
        Self { fd, events }
    }
}

/// One ready registration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    /// Index into the interest slice passed to [`Poller::poll`]
    pub index: usize,

    /// Events reported for that descriptor
    pub revents: Events,
}

/// Waits for readiness on a set of descriptors
pub trait Poller {
    /// Wait up to `timeout` for any interest to become ready
    ///
    /// Returns an empty vector on timeout.
    fn poll(&mut self, interests: &[Interest], timeout: Duration) -> CrawlResult<Vec<Readiness>>;
}

/// `poll(2)` based poller
#[derive(Debug, Default)]
pub struct SysPoller {
    fds: Vec<libc::pollfd>,
}

impl SysPoller {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Poller for SysPoller {
    fn poll(&mut self, interests: &[Interest], timeout: Duration) -> CrawlResult<Vec<Readiness>> {
        self.fds.clear();
        self.fds.extend(interests.iter().map(|interest| libc::pollfd {
            fd: interest.fd,
            events: interest.events.bits(),
            revents: 0,
        }));

        let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as libc::c_int;

        let ret = loop {
            let ret = unsafe {
                libc::poll(
                    self.fds.as_mut_ptr(),
                    self.fds.len() as libc::nfds_t,
                    timeout_ms,
                )
            };

            if ret >= 0 {
                break ret;
            }

            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::Interrupted {
                return Err(CrawlError::MalformedReadiness {
                    reason: format!("poll() failed: {}", err),
                });
            }
        };

        if ret == 0 {
            return Ok(Vec::new());
        }

        let mut ready = Vec::with_capacity(ret as usize);
        for (index, pfd) in self.fds.iter().enumerate() {
            if pfd.revents == 0 {
                continue;
            }

            let revents = Events::from_bits(pfd.revents);
            if revents.contains(Events::INVALID) {
                return Err(CrawlError::MalformedReadiness {
                    reason: format!("descriptor {} is not open", pfd.fd),
                });
            }

            ready.push(Readiness { index, revents });
        }

        Ok(ready)
    }
}
