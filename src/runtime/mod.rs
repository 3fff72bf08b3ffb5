//! Readiness-driven transfer runtime.
//!
//! Layered bottom-up:
//! - `protocol`: per-connection transfer state machine and wire header
//! - `connection`: fixed-capacity slot table with per-slot block buffers
//! - `token`: tags routing readiness events back to slots
//! - `mux`: readiness multiplexer trait with mio and poll(2) backends
//! - `event_loop`: the single-threaded loop tying them together

mod connection;
mod event_loop;
pub mod mux;
pub mod protocol;
mod token;

pub use connection::{Connection, ConnectionTable, Outcome};
pub use event_loop::{EventLoop, TransferSummary};
pub use mux::{MioMultiplexer, Multiplexer, PollMultiplexer, Readiness};
pub use protocol::{BlockSource, Progress, Transfer, TransferState};
pub use token::Tag;
