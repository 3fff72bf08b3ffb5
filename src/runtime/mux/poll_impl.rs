//! poll(2)-backed multiplexer.
//!
//! Keeps its own list of tracked descriptors and hands the whole list to
//! the kernel on every wait, so each wait costs O(tracked) regardless of
//! how many are ready. Level-triggered: a still-writable socket is reported
//! again on the next wait without re-arming.

use super::{Multiplexer, Readiness};
use crate::error::ServerError;
use crate::runtime::token::Tag;
use mio::event::Source;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::time::Duration;

struct Tracked {
    fd: RawFd,
    tag: Tag,
    events: libc::c_short,
}

pub struct PollMultiplexer {
    tracked: Vec<Tracked>,
    /// Scratch array rebuilt from `tracked` before each wait.
    pollfds: Vec<libc::pollfd>,
    capacity: usize,
}

impl PollMultiplexer {
    /// Create a multiplexer tracking at most `capacity` descriptors.
    pub fn new(capacity: usize) -> Self {
        Self {
            tracked: Vec::with_capacity(capacity),
            pollfds: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Number of descriptors currently tracked.
    pub fn len(&self) -> usize {
        self.tracked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }
}

fn poll_events(tag: Tag) -> libc::c_short {
    match tag {
        Tag::Listener | Tag::Shutdown => libc::POLLIN,
        Tag::Slot(_) => libc::POLLOUT,
    }
}

fn timeout_ms(timeout: Option<Duration>) -> libc::c_int {
    match timeout {
        None => -1,
        Some(d) => d.as_millis().min(libc::c_int::MAX as u128) as libc::c_int,
    }
}

impl Multiplexer for PollMultiplexer {
    fn register<S>(&mut self, source: &mut S, tag: Tag) -> Result<(), ServerError>
    where
        S: Source + AsRawFd + ?Sized,
    {
        let fd = source.as_raw_fd();

        if self.tracked.iter().any(|t| t.fd == fd || t.tag == tag) {
            return Err(ServerError::Registration(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("descriptor {} or tag {:?} already registered", fd, tag),
            )));
        }
        if self.tracked.len() >= self.capacity {
            return Err(ServerError::Registration(io::Error::new(
                io::ErrorKind::OutOfMemory,
                format!("poll set full ({} descriptors)", self.capacity),
            )));
        }

        self.tracked.push(Tracked {
            fd,
            tag,
            events: poll_events(tag),
        });
        Ok(())
    }

    fn rearm<S>(&mut self, source: &mut S, tag: Tag) -> Result<(), ServerError>
    where
        S: Source + AsRawFd + ?Sized,
    {
        let fd = source.as_raw_fd();
        if self.tracked.iter().any(|t| t.fd == fd && t.tag == tag) {
            Ok(())
        } else {
            Err(ServerError::Registration(io::Error::new(
                io::ErrorKind::NotFound,
                format!("descriptor {} not registered as {:?}", fd, tag),
            )))
        }
    }

    fn deregister<S>(&mut self, source: &mut S) -> Result<(), ServerError>
    where
        S: Source + AsRawFd + ?Sized,
    {
        let fd = source.as_raw_fd();
        self.tracked.retain(|t| t.fd != fd);
        Ok(())
    }

    fn wait(
        &mut self,
        ready: &mut Vec<Readiness>,
        timeout: Option<Duration>,
    ) -> Result<(), ServerError> {
        ready.clear();

        self.pollfds.clear();
        self.pollfds.extend(self.tracked.iter().map(|t| libc::pollfd {
            fd: t.fd,
            events: t.events,
            revents: 0,
        }));

        // SAFETY: `pollfds` is a valid, initialized array of `len()` entries
        // that outlives the call.
        let rc = unsafe {
            libc::poll(
                self.pollfds.as_mut_ptr(),
                self.pollfds.len() as libc::nfds_t,
                timeout_ms(timeout),
            )
        };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(());
            }
            return Err(ServerError::Wait(err));
        }

        for (pfd, tracked) in self.pollfds.iter().zip(&self.tracked) {
            let revents = pfd.revents;
            if revents == 0 {
                continue;
            }
            ready.push(Readiness {
                tag: tracked.tag,
                readable: revents & libc::POLLIN != 0,
                writable: revents & libc::POLLOUT != 0,
                hangup: revents & (libc::POLLHUP | libc::POLLERR | libc::POLLNVAL) != 0,
            });
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "poll"
    }
}
