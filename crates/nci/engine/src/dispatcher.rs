//! Command backlog and the single in-flight slot
//!
//! NCI allows one outstanding command at a time. Accepted commands wait in a
//! FIFO backlog; the engine moves the head into the in-flight slot when the
//! slot is free and the transport is open, and takes it back out when the
//! response arrives or the watchdog fires.

use std::collections::VecDeque;
use std::fmt;

use bytes::Bytes;
use nexum_nci_core::{Command, Opcode, Response};

use crate::Result;

/// Callback receiving the response to a caller-issued command
///
/// A response carrying a non-OK status is still `Ok`; the callback inspects
/// [`Response::status`]. `Err` means no usable response arrived.
pub type ResponseCallback = Box<dyn FnOnce(Result<Response>)>;

/// Engine component waiting for an internally issued command
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Owner {
    /// RF discovery state machine
    Rf,
    /// Mode switch of an NFCEE
    Nfcee(u8),
    /// Running operation
    Sequencer,
}

/// Where the outcome of a command goes
pub(crate) enum Completion {
    Caller(ResponseCallback),
    Internal(Owner),
    None,
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Caller(_) => f.write_str("Caller"),
            Self::Internal(owner) => f.debug_tuple("Internal").field(owner).finish(),
            Self::None => f.write_str("None"),
        }
    }
}

/// An accepted command and its pre-encoded payload
#[derive(Debug)]
pub(crate) struct PendingCommand {
    pub(crate) command: Command,
    pub(crate) payload: Bytes,
    pub(crate) completion: Completion,
}

impl PendingCommand {
    pub(crate) const fn opcode(&self) -> Opcode {
        self.command.opcode()
    }

    #[cfg(test)]
    pub(crate) const fn owner(&self) -> Option<Owner> {
        match self.completion {
            Completion::Internal(owner) => Some(owner),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Dispatcher {
    backlog: VecDeque<PendingCommand>,
    in_flight: Option<PendingCommand>,
}

impl Dispatcher {
    /// Accept a command, encoding its payload up front
    pub(crate) fn enqueue(&mut self, command: Command, completion: Completion) -> Result<()> {
        let payload = command.encode_payload()?;
        self.backlog.push_back(PendingCommand {
            command,
            payload,
            completion,
        });
        Ok(())
    }

    /// Move the backlog head into the free in-flight slot
    pub(crate) fn start_next(&mut self) -> Option<&PendingCommand> {
        if self.in_flight.is_some() {
            return None;
        }
        self.in_flight = self.backlog.pop_front();
        self.in_flight.as_ref()
    }

    pub(crate) fn in_flight(&self) -> Option<&PendingCommand> {
        self.in_flight.as_ref()
    }

    pub(crate) fn take_in_flight(&mut self) -> Option<PendingCommand> {
        self.in_flight.take()
    }

    pub(crate) const fn is_pending(&self) -> bool {
        self.in_flight.is_some()
    }

    pub(crate) fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Remove every command, in-flight first
    pub(crate) fn drain(&mut self) -> Vec<PendingCommand> {
        self.in_flight.take().into_iter().chain(self.backlog.drain(..)).collect()
    }
}
