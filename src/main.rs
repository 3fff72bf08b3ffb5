//! fileshare-server: distribute one file to a fixed number of clients
//!
//! Usage: `fileshare-server <SOURCE> <MAX_CLIENTS> [OPTIONS]`
//!
//! The server exits once `MAX_CLIENTS` clients have been served, or after
//! Ctrl+C once every connected client has finished.

use fileshare::config::Config;
use fileshare::{Server, ShutdownFlag};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        source = %config.source.display(),
        max_clients = config.max_clients,
        listen = %config.listen,
        backend = ?config.backend,
        block_size = config.block_size,
        "Starting fileshare server"
    );

    let shutdown = ShutdownFlag::new()?;
    shutdown.install_signal_handlers()?;

    let server = Server::bind(config)?;
    server.run(shutdown)?;
    Ok(())
}
