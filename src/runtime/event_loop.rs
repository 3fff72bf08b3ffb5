//! Readiness-driven event loop.
//!
//! Single-threaded: the loop owns the connection table and the
//! multiplexer, blocks only in the multiplexer's wait call, and services
//! every ready tag of a batch before waiting again. Socket writes and file
//! reads never block; a would-block result just leaves the connection
//! armed for the next event.
//!
//! Per-connection failures close that connection and are logged. Errors
//! returned from [`EventLoop::run`] are fatal for the whole server.
//!
//! The shutdown flag's wake-up socket is registered next to the listener,
//! so a shutdown request always ends the current wait.

use crate::error::ServerError;
use crate::runtime::connection::{ConnectionTable, Outcome};
use crate::runtime::mux::{Multiplexer, Readiness};
use crate::runtime::protocol::{BlockSource, TransferState};
use crate::runtime::token::Tag;
use crate::shutdown::{drain_wakeups, ShutdownFlag};
use mio::net::{TcpListener, TcpStream, UnixStream};
use std::io;
use tracing::{debug, info, trace, warn};

/// Totals reported once the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSummary {
    /// Clients admitted into the table.
    pub admitted: usize,
    /// Clients that received the whole file.
    pub completed: usize,
    /// Clients closed after a write, read or hangup failure.
    pub failed: usize,
    /// File bytes written across all clients.
    pub bytes_sent: u64,
}

pub struct EventLoop<'a, M, B: ?Sized> {
    mux: M,
    listener: &'a mut TcpListener,
    source: &'a B,
    file_size: u64,
    table: ConnectionTable<TcpStream>,
    shutdown: ShutdownFlag,
    /// Shutdown wake-up socket while registered.
    waker: Option<UnixStream>,
    /// Ready tags of the current batch.
    ready: Vec<Readiness>,
    /// Whether the listener is registered with the multiplexer.
    listening: bool,
    summary: TransferSummary,
}

impl<'a, M, B> EventLoop<'a, M, B>
where
    M: Multiplexer,
    B: BlockSource + ?Sized,
{
    /// Prepare a loop that will admit at most `max_clients` connections.
    pub fn new(
        mux: M,
        listener: &'a mut TcpListener,
        source: &'a B,
        max_clients: usize,
        block_size: usize,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            mux,
            listener,
            file_size: source.size(),
            source,
            table: ConnectionTable::new(max_clients, block_size),
            shutdown,
            waker: None,
            ready: Vec::with_capacity(max_clients + 2),
            listening: false,
            summary: TransferSummary::default(),
        }
    }

    /// Serve clients until every slot has been used (or shutdown was
    /// requested) and every admitted client has finished.
    pub fn run(mut self) -> Result<TransferSummary, ServerError> {
        info!(
            backend = self.mux.name(),
            max_clients = self.table.capacity(),
            file_size = self.file_size,
            "Waiting for clients"
        );

        if self.table.can_admit() && !self.shutdown.is_requested() {
            let mut waker = self
                .shutdown
                .waker()
                .map_err(|e| ServerError::Setup("create shutdown wake-up socket", e))?;
            self.mux.register(&mut waker, Tag::Shutdown)?;
            self.waker = Some(waker);

            self.mux.register(&mut *self.listener, Tag::Listener)?;
            self.listening = true;
        }

        loop {
            let accept_new = self.table.can_admit() && !self.shutdown.is_requested();

            if self.table.active() == 0 && !accept_new {
                break;
            }

            if self.listening && !accept_new {
                self.stop_listening()?;
            }

            self.mux.wait(&mut self.ready, None)?;

            let ready = std::mem::take(&mut self.ready);
            for readiness in &ready {
                self.dispatch(*readiness)?;
            }
            self.ready = ready;
        }

        if self.listening {
            self.stop_listening()?;
        }
        if let Some(mut waker) = self.waker.take() {
            self.mux.deregister(&mut waker)?;
        }

        self.summary.admitted = self.table.admitted();
        info!(
            completed = self.summary.completed,
            failed = self.summary.failed,
            bytes_sent = self.summary.bytes_sent,
            "Transfer finished"
        );
        Ok(self.summary)
    }

    fn stop_listening(&mut self) -> Result<(), ServerError> {
        self.mux.deregister(&mut *self.listener)?;
        self.listening = false;
        info!(
            admitted = self.table.admitted(),
            shutdown = self.shutdown.is_requested(),
            "No longer accepting clients"
        );
        Ok(())
    }

    fn dispatch(&mut self, readiness: Readiness) -> Result<(), ServerError> {
        match readiness.tag {
            Tag::Listener if self.listening => self.accept(),
            Tag::Listener => {
                trace!("Listener event after admissions closed");
                Ok(())
            }
            Tag::Shutdown => self.wake(),
            Tag::Slot(slot) => self.service(slot, readiness),
        }
    }

    /// Consume shutdown wake-ups; any pending byte means shutdown.
    fn wake(&mut self) -> Result<(), ServerError> {
        let Some(waker) = self.waker.as_mut() else {
            return Ok(());
        };

        let pending = drain_wakeups(waker).map_err(ServerError::Wait)?;
        if pending > 0 {
            self.shutdown.mark_requested();
            debug!(pending, "Shutdown requested");
        }
        self.mux.rearm(waker, Tag::Shutdown)
    }

    /// Admit one pending connection.
    fn accept(&mut self) -> Result<(), ServerError> {
        if !self.table.can_admit() || self.shutdown.is_requested() {
            return Ok(());
        }

        match self.listener.accept() {
            Ok((stream, peer)) => {
                if let Err(e) = stream.set_nodelay(true) {
                    debug!(peer = %peer, error = %e, "Unable to set TCP_NODELAY");
                }

                let slot = self.table.admit(stream, peer)?;
                self.mux
                    .register(self.table.stream_mut(slot)?, Tag::Slot(slot))?;

                info!(slot, peer = %peer, "Client connected");
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                trace!("No pending connection");
            }
            Err(ref e)
                if e.kind() == io::ErrorKind::ConnectionAborted
                    || e.kind() == io::ErrorKind::Interrupted =>
            {
                debug!(error = %e, "Connection vanished before accept");
            }
            Err(e) => return Err(ServerError::Accept(e)),
        }

        // Further pending connections are reported on the next wait.
        self.mux.rearm(&mut *self.listener, Tag::Listener)
    }

    /// Advance or retire one connection slot.
    fn service(&mut self, slot: usize, readiness: Readiness) -> Result<(), ServerError> {
        match self.table.get(slot)?.state() {
            TransferState::Finished => {
                trace!(slot, "Event for finished connection");
                return Ok(());
            }
            TransferState::Idle => {
                return Err(ServerError::InvalidState {
                    slot,
                    state: TransferState::Idle,
                })
            }
            TransferState::SendingSize | TransferState::SendingData => {}
        }

        if readiness.hangup {
            return if self.table.is_delivered(slot, self.file_size)? {
                self.retire(slot, None)
            } else {
                let e = io::Error::new(io::ErrorKind::ConnectionReset, "peer hung up");
                self.retire(slot, Some(e))
            };
        }

        if !readiness.writable {
            trace!(slot, ?readiness, "Event without writability");
            return Ok(());
        }

        match self.table.advance(slot, self.source, self.file_size)? {
            Outcome::Alive(progress) => {
                trace!(
                    slot,
                    ?progress,
                    offset = self.table.get(slot)?.offset(),
                    "Advanced"
                );
                self.mux
                    .rearm(self.table.stream_mut(slot)?, Tag::Slot(slot))
            }
            Outcome::Finished => self.retire(slot, None),
            Outcome::Failed(e) => self.retire(slot, Some(e)),
        }
    }

    /// Deregister and close a slot, recording how it ended.
    fn retire(&mut self, slot: usize, failure: Option<io::Error>) -> Result<(), ServerError> {
        self.mux.deregister(self.table.stream_mut(slot)?)?;
        let peer = self.table.get(slot)?.peer();
        let sent = self.table.close(slot)?;
        self.summary.bytes_sent += sent;

        match failure {
            None => {
                self.summary.completed += 1;
                info!(slot, peer = ?peer, bytes = sent, "Client finished");
            }
            Some(e) => {
                self.summary.failed += 1;
                warn!(slot, peer = ?peer, bytes = sent, error = %e, "Client transfer failed");
            }
        }
        Ok(())
    }
}
