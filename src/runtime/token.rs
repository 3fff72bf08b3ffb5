//! Readiness tags.
//!
//! Every registered socket carries a tag naming what it is: the listening
//! socket, the shutdown wake-up socket or one connection slot. Events are
//! routed back to the table by tag only, never by descriptor, so a closed
//! slot cannot alias a newer socket that reuses the same descriptor number.

use mio::Token;

/// Token reserved for the listening socket.
pub const LISTENER_TOKEN: Token = Token(usize::MAX);

/// Token reserved for the shutdown wake-up socket.
pub const SHUTDOWN_TOKEN: Token = Token(usize::MAX - 1);

/// Identity of a registered socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// The listening socket; ready means a connection can be accepted.
    Listener,
    /// Shutdown wake-up; readable once a shutdown has been requested.
    Shutdown,
    /// Connection slot `k`; ready means its socket can be written.
    Slot(usize),
}

impl Tag {
    /// Encode as a mio token.
    pub fn token(self) -> Token {
        match self {
            Tag::Listener => LISTENER_TOKEN,
            Tag::Shutdown => SHUTDOWN_TOKEN,
            Tag::Slot(slot) => Token(slot),
        }
    }

    /// Decode a mio token produced by [`Tag::token`].
    pub fn from_token(token: Token) -> Self {
        match token {
            LISTENER_TOKEN => Tag::Listener,
            SHUTDOWN_TOKEN => Tag::Shutdown,
            Token(slot) => Tag::Slot(slot),
        }
    }
}
