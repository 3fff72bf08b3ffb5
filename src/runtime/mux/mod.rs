//! Readiness multiplexing.
//!
//! Two interchangeable backends behind one trait:
//! - [`MioMultiplexer`]: batched kernel readiness (epoll on Linux, kqueue
//!   on macOS), edge-triggered.
//! - [`PollMultiplexer`]: `poll(2)` over every tracked descriptor on each
//!   wait, level-triggered.
//!
//! The listening socket and the shutdown wake-up socket are registered for
//! readability, connection sockets for writability. Hangup and error conditions are always
//! reported. Registration failures are fatal; deregistering a descriptor
//! the kernel already dropped is tolerated.

mod mio_impl;
mod poll_impl;

pub use mio_impl::MioMultiplexer;
pub use poll_impl::PollMultiplexer;

use crate::error::ServerError;
use crate::runtime::token::Tag;
use mio::event::Source;
use std::io;
use std::os::unix::io::AsRawFd;
use std::time::Duration;

/// One ready socket reported by a wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub tag: Tag,
    pub readable: bool,
    pub writable: bool,
    /// Peer hung up or the socket is in an error state.
    pub hangup: bool,
}

/// Kernel readiness facility owned by the event loop.
pub trait Multiplexer {
    /// Arm readiness interest for `source` under `tag`.
    fn register<S>(&mut self, source: &mut S, tag: Tag) -> Result<(), ServerError>
    where
        S: Source + AsRawFd + ?Sized;

    /// Re-arm an already registered source after servicing it.
    ///
    /// Edge-triggered backends report the source again if it is still
    /// ready; level-triggered backends need nothing.
    fn rearm<S>(&mut self, source: &mut S, tag: Tag) -> Result<(), ServerError>
    where
        S: Source + AsRawFd + ?Sized;

    /// Disarm readiness interest for `source`.
    fn deregister<S>(&mut self, source: &mut S) -> Result<(), ServerError>
    where
        S: Source + AsRawFd + ?Sized;

    /// Block until at least one registered source is ready and replace the
    /// contents of `ready` with every ready tag.
    ///
    /// A wait interrupted by a signal yields an empty batch.
    fn wait(&mut self, ready: &mut Vec<Readiness>, timeout: Option<Duration>)
        -> Result<(), ServerError>;

    /// Backend name for logging.
    fn name(&self) -> &'static str;
}

/// Whether a deregistration error only means the descriptor is already gone.
fn already_gone(e: &io::Error) -> bool {
    e.kind() == io::ErrorKind::NotFound || e.raw_os_error() == Some(libc::EBADF)
}
