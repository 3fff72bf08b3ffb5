//! mio-backed multiplexer.
//!
//! One batched wait call returns every ready token, bounded by the event
//! capacity. mio registers edge-triggered, so sources that are serviced
//! without hitting `WouldBlock` are re-armed with `reregister`, which makes
//! the kernel re-evaluate their readiness.

use super::{already_gone, Multiplexer, Readiness};
use crate::error::ServerError;
use crate::runtime::token::Tag;
use mio::event::Source;
use mio::{Events, Interest, Poll};
use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

pub struct MioMultiplexer {
    poll: Poll,
    events: Events,
}

impl MioMultiplexer {
    /// Create a multiplexer returning at most `capacity` events per wait.
    pub fn new(capacity: usize) -> Result<Self, ServerError> {
        let poll = Poll::new().map_err(|e| ServerError::Setup("create readiness poller", e))?;
        Ok(Self {
            poll,
            events: Events::with_capacity(capacity.max(1)),
        })
    }
}

fn interest(tag: Tag) -> Interest {
    match tag {
        Tag::Listener | Tag::Shutdown => Interest::READABLE,
        Tag::Slot(_) => Interest::WRITABLE,
    }
}

impl Multiplexer for MioMultiplexer {
    fn register<S>(&mut self, source: &mut S, tag: Tag) -> Result<(), ServerError>
    where
        S: Source + AsRawFd + ?Sized,
    {
        self.poll
            .registry()
            .register(source, tag.token(), interest(tag))
            .map_err(ServerError::Registration)
    }

    fn rearm<S>(&mut self, source: &mut S, tag: Tag) -> Result<(), ServerError>
    where
        S: Source + AsRawFd + ?Sized,
    {
        self.poll
            .registry()
            .reregister(source, tag.token(), interest(tag))
            .map_err(ServerError::Registration)
    }

    fn deregister<S>(&mut self, source: &mut S) -> Result<(), ServerError>
    where
        S: Source + AsRawFd + ?Sized,
    {
        match self.poll.registry().deregister(source) {
            Ok(()) => Ok(()),
            Err(ref e) if already_gone(e) => Ok(()),
            Err(e) => Err(ServerError::Registration(e)),
        }
    }

    fn wait(
        &mut self,
        ready: &mut Vec<Readiness>,
        timeout: Option<Duration>,
    ) -> Result<(), ServerError> {
        ready.clear();

        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(ServerError::Wait(e)),
        }

        ready.extend(self.events.iter().map(|event| Readiness {
            tag: Tag::from_token(event.token()),
            readable: event.is_readable(),
            writable: event.is_writable(),
            hangup: event.is_write_closed() || event.is_error(),
        }));
        Ok(())
    }

    fn name(&self) -> &'static str {
        "mio"
    }
}
