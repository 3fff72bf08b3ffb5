//! Fatal server errors.
//!
//! Anything represented here terminates the process. Failures that only
//! affect one client are plain `io::Error`s and are absorbed by the event
//! loop instead.

use crate::runtime::protocol::TransferState;
use std::io;

/// Unrecoverable environment or bookkeeping failure.
#[derive(Debug)]
pub enum ServerError {
    /// Opening the source file or creating the listening socket failed.
    Setup(&'static str, io::Error),
    /// Arming or disarming readiness interest failed.
    Registration(io::Error),
    /// The multiplexer wait call failed.
    Wait(io::Error),
    /// Accepting from the listening socket failed.
    Accept(io::Error),
    /// A slot was driven through a transition its state does not allow.
    InvalidState { slot: usize, state: TransferState },
    /// Admission was attempted with every slot already used.
    TableFull { capacity: usize },
    /// A readiness tag named a slot outside the table.
    UnknownSlot(usize),
}

impl std::fmt::Display for ServerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ServerError::Setup(what, e) => write!(f, "Unable to {}: {}", what, e),
            ServerError::Registration(e) => {
                write!(f, "Unable to update readiness registration: {}", e)
            }
            ServerError::Wait(e) => write!(f, "Unable to wait for readiness: {}", e),
            ServerError::Accept(e) => write!(f, "Unable to accept connection: {}", e),
            ServerError::InvalidState { slot, state } => {
                write!(f, "Unexpected state {:?} for slot {}", state, slot)
            }
            ServerError::TableFull { capacity } => {
                write!(f, "Connection table full ({} slots)", capacity)
            }
            ServerError::UnknownSlot(slot) => write!(f, "No connection slot {}", slot),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ServerError::Setup(_, e)
            | ServerError::Registration(e)
            | ServerError::Wait(e)
            | ServerError::Accept(e) => Some(e),
            _ => None,
        }
    }
}
