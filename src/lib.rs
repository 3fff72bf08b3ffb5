//! fileshare: stream one file to many TCP clients at once
//!
//! Every client receives the file length as a big-endian `u64` followed by
//! the file contents. The server is a single-threaded readiness loop:
//! - A fixed table of connection slots, one per client it will admit
//! - One block read and one socket write per readiness event
//! - Slow or stalled clients never hold up the others
//! - SIGINT stops admissions; connected clients still finish

pub mod client;
pub mod config;
pub mod error;
pub mod runtime;
pub mod server;
pub mod shutdown;
pub mod source;

pub use error::ServerError;
pub use server::Server;
pub use shutdown::ShutdownFlag;
