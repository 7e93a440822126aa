//! Error types for the NCI engine
//!
//! Maps the engine's failure taxonomy onto a single enum. Success is
//! `Ok(..)`, and an accepted asynchronous request is `Ok(())` from the
//! submitting call with the outcome delivered to its callback later.

use nexum_nci_core::{Opcode, Status, TransportError};

/// Result type for engine operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Engine error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Request is structurally disallowed in the current state
    #[error("Rejected: {0}")]
    Rejected(&'static str),

    /// The controller answered with a non-OK status
    #[error("Command {opcode} failed with {status}")]
    Failed {
        /// Opcode of the failed command
        opcode: Opcode,
        /// Status reported by the controller
        status: Status,
    },

    /// The command watchdog fired before a response arrived
    #[error("No response to command {opcode} before the watchdog fired")]
    CommandTimeout {
        /// Opcode of the abandoned command
        opcode: Opcode,
    },

    /// A send was discarded because its connection was closed or reopened
    #[error("Send discarded: connection generation changed")]
    Flushed,

    /// A reassembled message exceeded the configured size limit
    #[error("Message exceeds the {limit} byte reassembly limit")]
    MemoryExhausted {
        /// Configured limit in bytes
        limit: usize,
    },

    /// A message violated the wire format
    #[error("Malformed message: {0}")]
    Malformed(nexum_nci_core::Error),

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The engine is not attached to an open transport
    #[error("Transport is closed")]
    Closed,

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// I/O failure while reading an operation input
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A command script line could not be parsed
    #[error("Invalid script line {line}: {reason}")]
    InvalidScript {
        /// One-based line number
        line: usize,
        /// What was wrong with it
        reason: String,
    },

    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl From<nexum_nci_core::Error> for Error {
    fn from(error: nexum_nci_core::Error) -> Self {
        match error.root() {
            nexum_nci_core::Error::MessageTooLarge { limit } => Self::MemoryExhausted { limit: *limit },
            nexum_nci_core::Error::Transport(e) => Self::Transport(e.clone()),
            _ => Self::Malformed(error),
        }
    }
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config(message.into())
    }

    /// Create an error from a non-OK status
    pub const fn failed(opcode: Opcode, status: Status) -> Self {
        Self::Failed { opcode, status }
    }

    /// Strip any context wrappers and return the innermost error
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }

    /// Status reported by the controller, if this is a controller failure
    pub fn status(&self) -> Option<Status> {
        match self.root() {
            Self::Failed { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Extension trait for Result with engine errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for std::result::Result<T, E> {
    fn context<S: Into<String>>(self, context: S) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}
