//! Core error type for all NCI codec operations
//!
//! Decoding never truncates silently: every field read is checked against the
//! remaining wire length, and leftover bytes after the last field are an error.

use crate::packet::Opcode;
use crate::transport::TransportError;

/// Result type for NCI codec operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Core error type that encompasses all possible codec errors in the crate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    //
    // Decoding errors
    //
    /// A field extends past the end of the message
    #[error("Truncated message: field {field} needs {needed} bytes, {remaining} remaining")]
    Truncated {
        /// Name of the field being decoded
        field: &'static str,
        /// Bytes required by the field
        needed: usize,
        /// Bytes left in the message
        remaining: usize,
    },

    /// The message carries bytes after its last field
    #[error("Message {opcode} has {extra} trailing bytes")]
    TrailingBytes {
        /// Opcode of the decoded message
        opcode: Opcode,
        /// Number of unread bytes
        extra: usize,
    },

    /// Packet header could not be parsed
    #[error("Invalid packet header: {0}")]
    InvalidHeader(&'static str),

    /// Group identifier outside of any known group
    #[error("Unknown group identifier {0:#03x}")]
    UnknownGroup(u8),

    /// Opcode not known within a recognized group
    #[error("Unknown opcode {0}")]
    UnknownOpcode(Opcode),

    /// A field carries a value that cannot be interpreted
    #[error("Invalid value {value:#04x} for field {field}")]
    InvalidValue {
        /// Name of the field
        field: &'static str,
        /// Offending value
        value: u8,
    },

    //
    // Encoding errors
    //
    /// A variable-length field does not fit its one-byte length prefix
    #[error("Field {field} is {len} bytes long, at most {max} allowed")]
    FieldTooLong {
        /// Name of the field
        field: &'static str,
        /// Actual length
        len: usize,
        /// Maximum encodable length
        max: usize,
    },

    /// Fragmentation was requested with a zero MTU
    #[error("Invalid maximum packet payload size: {0}")]
    InvalidMtu(usize),

    //
    // Reassembly errors
    //
    /// A reassembled message exceeds the configured size cap
    #[error("Reassembled message exceeds {limit} bytes")]
    MessageTooLarge {
        /// Configured cap in bytes
        limit: usize,
    },

    //
    // Transport errors
    //
    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    //
    // General errors
    //
    /// Context error with message and source error
    #[error("{context}: {source}")]
    Context {
        /// Contextual message
        context: String,
        /// Source error
        source: Box<Self>,
    },
}

impl Error {
    /// Create a new error with context information
    pub fn with_context<S: Into<String>>(self, context: S) -> Self {
        Self::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Create a new truncation error
    pub const fn truncated(field: &'static str, needed: usize, remaining: usize) -> Self {
        Self::Truncated {
            field,
            needed,
            remaining,
        }
    }

    /// Create a new invalid value error
    pub const fn invalid(field: &'static str, value: u8) -> Self {
        Self::InvalidValue { field, value }
    }

    /// Returns true if the error is a wire-length contract violation
    pub const fn is_length_violation(&self) -> bool {
        matches!(self, Self::Truncated { .. } | Self::TrailingBytes { .. })
    }

    /// Strip any context wrappers and return the innermost error
    pub fn root(&self) -> &Self {
        match self {
            Self::Context { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Extension trait for Result with NCI Errors
pub trait ResultExt<T> {
    /// Add context to an error
    fn context<S: Into<String>>(self, context: S) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn context<S: Into<String>>(self, context: S) -> Self {
        self.map_err(|e| e.with_context(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_root() {
        let err = Error::truncated("status", 1, 0).with_context("CORE_RESET_RSP");
        assert!(err.root().is_length_violation());
        assert_eq!(
            err.to_string(),
            "CORE_RESET_RSP: Truncated message: field status needs 1 bytes, 0 remaining"
        );
    }
}
