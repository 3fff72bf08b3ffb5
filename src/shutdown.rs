//! Cooperative shutdown flag.
//!
//! Set at most once, from a signal handler or a test, and never cleared
//! within a run. Once raised, no new clients are admitted, while clients
//! already connected drain to completion.
//!
//! Raising the flag also writes a byte to a socket pair. The event loop
//! watches the other end, so a request made while it is blocked in a
//! readiness wait (or just about to enter one) wakes it up.

use signal_hook::consts::{SIGINT, SIGTERM};
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct ShutdownFlag {
    requested: Arc<AtomicBool>,
    wake: Arc<WakePair>,
}

#[derive(Debug)]
struct WakePair {
    sender: UnixStream,
    receiver: UnixStream,
}

impl ShutdownFlag {
    pub fn new() -> io::Result<Self> {
        let (sender, receiver) = UnixStream::pair()?;
        sender.set_nonblocking(true)?;
        receiver.set_nonblocking(true)?;

        Ok(Self {
            requested: Arc::new(AtomicBool::new(false)),
            wake: Arc::new(WakePair { sender, receiver }),
        })
    }

    /// Raise the flag and wake the event loop.
    pub fn request(&self) {
        self.mark_requested();
        // A full buffer already holds a pending wake-up.
        let _ = (&self.wake.sender).write(&[1]);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Raise the flag without writing a wake-up byte.
    pub(crate) fn mark_requested(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    /// Readable end of the wake-up socket pair, for registration with a
    /// multiplexer.
    pub fn waker(&self) -> io::Result<mio::net::UnixStream> {
        let receiver = self.wake.receiver.try_clone()?;
        Ok(mio::net::UnixStream::from_std(receiver))
    }

    /// Raise the flag on SIGINT or SIGTERM.
    ///
    /// Each signal also writes to the wake-up socket pair from inside the
    /// handler, so the loop never sleeps through a signal that lands between
    /// its flag check and its wait.
    pub fn install_signal_handlers(&self) -> io::Result<()> {
        for signal in [SIGINT, SIGTERM] {
            signal_hook::flag::register(signal, Arc::clone(&self.requested))?;
            signal_hook::low_level::pipe::register(signal, self.wake.sender.try_clone()?)?;
        }
        Ok(())
    }
}

/// Consume every pending wake-up byte.
///
/// Returns the number of bytes read. Stops at `WouldBlock` or end of stream.
pub(crate) fn drain_wakeups<R: Read + ?Sized>(receiver: &mut R) -> io::Result<usize> {
    let mut buf = [0u8; 64];
    let mut total = 0;
    loop {
        match receiver.read(&mut buf) {
            Ok(0) => return Ok(total),
            Ok(n) => total += n,
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(total),
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}
