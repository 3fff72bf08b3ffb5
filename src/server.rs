//! Server descriptor.
//!
//! Owns the source file and the listening socket for the lifetime of one
//! run and hands them to the event loop with the configured backend.

use crate::config::{Backend, Config};
use crate::error::ServerError;
use crate::runtime::{EventLoop, MioMultiplexer, PollMultiplexer, TransferSummary};
use crate::shutdown::ShutdownFlag;
use crate::source::SourceFile;
use mio::net::TcpListener;
use std::net::SocketAddr;
use tracing::info;

/// Server instance
pub struct Server {
    config: Config,
    source: SourceFile,
    listener: TcpListener,
}

impl Server {
    /// Open the source file and start listening.
    ///
    /// Any failure here is an environment problem and aborts startup.
    pub fn bind(config: Config) -> Result<Self, ServerError> {
        let source = SourceFile::open(&config.source)?;
        let listener = create_listener(config.listen, config.backlog)
            .map_err(|e| ServerError::Setup("create listening socket", e))?;

        let server = Server {
            config,
            source,
            listener,
        };
        info!(
            address = %server.local_addr()?,
            source = %server.source.path().display(),
            file_size = server.source.len(),
            "Server listening"
        );
        Ok(server)
    }

    /// Address actually bound, useful when listening on port 0.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener
            .local_addr()
            .map_err(|e| ServerError::Setup("query listening address", e))
    }

    /// Serve clients until the run is over.
    pub fn run(mut self, shutdown: ShutdownFlag) -> Result<TransferSummary, ServerError> {
        let max_clients = self.config.max_clients;
        let block_size = self.config.block_size;

        match self.config.backend {
            Backend::Mio => {
                // Listener, shutdown wake-up and one socket per slot.
                let mux = MioMultiplexer::new(max_clients + 2)?;
                EventLoop::new(
                    mux,
                    &mut self.listener,
                    &self.source,
                    max_clients,
                    block_size,
                    shutdown,
                )
                .run()
            }
            Backend::Poll => {
                let mux = PollMultiplexer::new(2 * max_clients + 2);
                EventLoop::new(
                    mux,
                    &mut self.listener,
                    &self.source,
                    max_clients,
                    block_size,
                    shutdown,
                )
                .run()
            }
        }
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr, backlog: i32) -> std::io::Result<TcpListener> {
    let socket = socket2::Socket::new(
        socket2::Domain::for_address(addr),
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(TcpListener::from_std(socket.into()))
}
