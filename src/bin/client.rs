//! fileshare-client: download the file served by fileshare-server
//!
//! Waits for the server to come up, then receives the file into the given
//! destination. A transfer cut short by the server is restarted from the
//! beginning on a fresh connection.

use clap::Parser;
use fileshare::client;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::net::{SocketAddr, TcpStream};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fileshare-client")]
#[command(version = "0.1.0")]
#[command(about = "Receives a file from a fileshare server", long_about = None)]
struct Args {
    /// Where to write the received file
    destination: PathBuf,

    /// Server address
    #[arg(short, long, default_value = "127.0.0.1:1337")]
    server: SocketAddr,

    /// Seconds between connection attempts while the server is down
    #[arg(long, default_value_t = 1)]
    retry_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let retry = Duration::from_secs(args.retry_interval);

    loop {
        let mut stream = connect(args.server, retry);

        match receive(&mut stream, &args.destination) {
            Ok(size) => {
                info!(bytes = size, destination = %args.destination.display(), "Received file");
                return Ok(());
            }
            // Local disk problems will not go away by reconnecting.
            Err(Failure::Disk(e)) => return Err(e.into()),
            Err(Failure::Network(e)) => {
                warn!(error = %e, "Transfer interrupted, reconnecting");
            }
        }
    }
}

enum Failure {
    Network(io::Error),
    Disk(io::Error),
}

/// Connect, retrying while the server refuses connections.
fn connect(addr: SocketAddr, retry: Duration) -> TcpStream {
    loop {
        match TcpStream::connect(addr) {
            Ok(stream) => return stream,
            Err(e) => {
                info!(server = %addr, error = %e, "Wait for server to start");
                thread::sleep(retry);
            }
        }
    }
}

fn receive(stream: &mut TcpStream, destination: &Path) -> Result<u64, Failure> {
    let file = File::create(destination).map_err(Failure::Disk)?;
    let mut out = BufWriter::new(file);

    let size = client::fetch(stream, &mut TrackedWriter(&mut out)).map_err(|e| {
        if e.get_ref().is_some_and(|inner| inner.is::<DiskError>()) {
            Failure::Disk(e)
        } else {
            Failure::Network(e)
        }
    })?;

    let file = out.into_inner().map_err(|e| Failure::Disk(e.into_error()))?;
    file.sync_all().map_err(Failure::Disk)?;
    Ok(size)
}

/// Marker wrapping write errors from the destination file so they can be
/// told apart from socket errors after `fetch` returns.
#[derive(Debug)]
struct DiskError(io::Error);

impl std::fmt::Display for DiskError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "destination write failed: {}", self.0)
    }
}

impl std::error::Error for DiskError {}

struct TrackedWriter<'a, W>(&'a mut W);

impl<W: Write> Write for TrackedWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0
            .write(buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, DiskError(e)))
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0
            .flush()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, DiskError(e)))
    }
}
