//! Core traits and types for NCI (NFC Controller Interface) operations
//!
//! This crate provides the foundational types for talking to an NFC controller
//! (NFCC) over a byte-oriented transport, following NCI 1.0.
//!
//! ## Overview
//!
//! NCI is the command/response/notification/data protocol spoken between a
//! device host and an NFC controller chip. This crate provides:
//!
//! - Encoding and decoding of the 3-byte control and data packet headers
//! - Segmentation of oversized messages and reassembly of incoming segments
//! - Typed commands, responses and notifications with strict length checking
//! - The transport abstraction the protocol engine writes packets through
//!
//! Sequencing, correlation, flow control and the discovery state machines
//! live in `nexum-nci-engine`.
#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![forbid(unsafe_code)]
#![warn(missing_docs, rustdoc::missing_crate_level_docs)]

// Re-export bytes for convenience
pub use bytes::{Bytes, BytesMut};

// Main modules
pub mod codec;
pub mod command;
pub mod constants;
pub mod notification;
pub mod packet;
pub mod response;
pub mod transport;
pub mod types;

// Core error types
mod error;
pub use error::{Error, Result, ResultExt};

// Re-exports for common types
pub use command::Command;
pub use notification::{Notification, NotificationKind};
pub use packet::fragment::{Reassembled, Reassembler, Reassembly, Segment, fragment};
pub use packet::{
    ControlHeader, DataHeader, MessageType, Opcode, Packet, PacketBoundary, PacketHeader,
};
pub use response::Response;
pub use transport::{NciTransport, TransportError};
pub use types::Status;

/// Prelude module containing commonly used traits and types
pub mod prelude {
    pub use crate::{
        Bytes, BytesMut, Command, Error, Notification, NotificationKind, Opcode, Response, Result,
        ResultExt, Status,
        packet::{MessageType, PacketBoundary, PacketHeader},
        transport::NciTransport,
        types::{
            CardProtocols, DeactivationType, ReaderProtocols, RfInterface, RfProtocol,
            RfTechMode, Technology,
        },
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    // Test the basic types are re-exported correctly
    #[test]
    fn test_reexports() {
        let cmd = Command::CoreReset { reset_config: true };
        assert_eq!(cmd.opcode(), Opcode::new(0x0, 0x00));
        assert_eq!(cmd.encode_payload().unwrap().as_ref(), &[0x01]);

        let header = ControlHeader::new(MessageType::Command, PacketBoundary::Complete, cmd.opcode(), 1);
        assert_eq!(header.to_bytes(), [0x20, 0x00, 0x01]);
        assert_eq!(Status::from(0x00), Status::Ok);
    }
}
