//! Connection table.
//!
//! A fixed number of slots, one per client the server will ever admit.
//! Slots are handed out in order and never reused within a run, so a slot
//! index identifies exactly one connection for the lifetime of the process.
//! The event loop and the multiplexer refer to connections only by slot
//! index; the socket itself is owned by its slot.

use crate::error::ServerError;
use crate::runtime::protocol::{BlockSource, Progress, Transfer, TransferError, TransferState};
use std::io::{self, Write};
use std::net::SocketAddr;

/// A single client connection.
#[derive(Debug)]
pub struct Connection<S> {
    /// Socket; `None` before admission and after close.
    stream: Option<S>,
    /// Remote address, kept for logging.
    peer: Option<SocketAddr>,
    /// Protocol progress.
    transfer: Transfer,
    /// Block buffer, allocated on admission and released on close.
    block: Box<[u8]>,
}

impl<S> Connection<S> {
    fn empty() -> Self {
        Self {
            stream: None,
            peer: None,
            transfer: Transfer::idle(),
            block: Box::default(),
        }
    }

    pub fn state(&self) -> TransferState {
        self.transfer.state()
    }

    pub fn offset(&self) -> u64 {
        self.transfer.offset()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

/// Result of advancing one connection.
#[derive(Debug)]
pub enum Outcome {
    /// The connection stays registered and continues on the next event.
    Alive(Progress),
    /// The whole file was delivered.
    Finished,
    /// The connection failed and must be closed; other clients are unaffected.
    Failed(io::Error),
}

/// Fixed-capacity table of connection slots.
pub struct ConnectionTable<S> {
    slots: Vec<Connection<S>>,
    block_size: usize,
    /// Connections ever admitted; bounds further admission.
    admitted: usize,
    /// Connections admitted and not yet closed.
    active: usize,
}

impl<S: Write> ConnectionTable<S> {
    /// Create a table with `capacity` slots. Each admitted connection gets
    /// its own `block_size`-byte buffer.
    pub fn new(capacity: usize, block_size: usize) -> Self {
        Self {
            slots: (0..capacity).map(|_| Connection::empty()).collect(),
            block_size,
            admitted: 0,
            active: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn admitted(&self) -> usize {
        self.admitted
    }

    pub fn active(&self) -> usize {
        self.active
    }

    /// Whether another connection may still be admitted.
    pub fn can_admit(&self) -> bool {
        self.admitted < self.slots.len()
    }

    /// Install a newly accepted socket in the next unused slot.
    ///
    /// Returns the slot index, which doubles as the readiness tag.
    pub fn admit(&mut self, stream: S, peer: SocketAddr) -> Result<usize, ServerError> {
        let capacity = self.capacity();
        if !self.can_admit() {
            return Err(ServerError::TableFull { capacity });
        }

        let slot = self.admitted;
        let conn = &mut self.slots[slot];
        if conn.state() != TransferState::Idle {
            return Err(ServerError::InvalidState {
                slot,
                state: conn.state(),
            });
        }

        *conn = Connection {
            stream: Some(stream),
            peer: Some(peer),
            transfer: Transfer::start(),
            block: vec![0; self.block_size].into_boxed_slice(),
        };

        self.admitted += 1;
        self.active += 1;
        Ok(slot)
    }

    /// Get a connection record.
    pub fn get(&self, slot: usize) -> Result<&Connection<S>, ServerError> {
        self.slots.get(slot).ok_or(ServerError::UnknownSlot(slot))
    }

    /// Borrow the socket of an open slot.
    pub fn stream_mut(&mut self, slot: usize) -> Result<&mut S, ServerError> {
        let conn = self
            .slots
            .get_mut(slot)
            .ok_or(ServerError::UnknownSlot(slot))?;
        let state = conn.state();
        conn.stream
            .as_mut()
            .ok_or(ServerError::InvalidState { slot, state })
    }

    /// Whether the slot's client has received every byte of the file.
    pub fn is_delivered(&self, slot: usize, file_size: u64) -> Result<bool, ServerError> {
        Ok(self.get(slot)?.transfer.is_delivered(file_size))
    }

    /// Run one protocol step for a writable slot.
    ///
    /// Per-connection I/O failures are reported as [`Outcome::Failed`];
    /// advancing a slot that holds no live transfer is a fatal bookkeeping
    /// error.
    pub fn advance<B>(
        &mut self,
        slot: usize,
        source: &B,
        file_size: u64,
    ) -> Result<Outcome, ServerError>
    where
        B: BlockSource + ?Sized,
    {
        let conn = self
            .slots
            .get_mut(slot)
            .ok_or(ServerError::UnknownSlot(slot))?;

        let state = conn.state();
        let Some(stream) = conn.stream.as_mut() else {
            return Err(ServerError::InvalidState { slot, state });
        };

        match conn.transfer.advance(stream, source, file_size, &mut conn.block) {
            Ok(Progress::Complete) => Ok(Outcome::Finished),
            Ok(progress) => Ok(Outcome::Alive(progress)),
            Err(TransferError::Io(e)) => Ok(Outcome::Failed(e)),
            Err(TransferError::InvalidState(state)) => {
                Err(ServerError::InvalidState { slot, state })
            }
        }
    }

    /// Close the slot's socket and mark the slot finished.
    ///
    /// Works for completed transfers and for forced aborts of live ones.
    /// Closing a slot without an open socket means the bookkeeping has
    /// desynchronized and is fatal.
    ///
    /// Returns the number of file bytes the client was sent.
    pub fn close(&mut self, slot: usize) -> Result<u64, ServerError> {
        let conn = self
            .slots
            .get_mut(slot)
            .ok_or(ServerError::UnknownSlot(slot))?;

        let Some(stream) = conn.stream.take() else {
            return Err(ServerError::InvalidState {
                slot,
                state: conn.state(),
            });
        };
        drop(stream);

        conn.block = Box::default();
        conn.transfer.finish();
        self.active -= 1;

        Ok(conn.offset())
    }

    /// Iterate over all slots in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Connection<S>)> {
        self.slots.iter().enumerate()
    }
}
