//! NCI packet headers and packet-level framing
//!
//! Every NCI packet starts with a 3-byte header. Control packets carry the
//! message type, packet boundary flag and opcode; data packets carry the
//! packet boundary flag and the logical connection id.
//!
//! ```text
//!  control:  | MT(3) PBF(1) GID(4) | RFU(2) OID(6) | L |
//!  data:     | MT=0  PBF(1) CID(4) |      RFU      | L |
//! ```

pub mod fragment;

use bytes::{BufMut, Bytes, BytesMut};
use derive_more::Display;

use crate::constants::HEADER_SIZE;
use crate::{Error, Result};

/// Message type field of the packet header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// Data packet
    Data = 0,
    /// Control command
    Command = 1,
    /// Control response
    Response = 2,
    /// Control notification
    Notification = 3,
}

impl TryFrom<u8> for MessageType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(Self::Data),
            1 => Ok(Self::Command),
            2 => Ok(Self::Response),
            3 => Ok(Self::Notification),
            _ => Err(Error::InvalidHeader("reserved message type")),
        }
    }
}

/// Packet boundary flag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketBoundary {
    /// Last (or only) packet of a message
    Complete = 0,
    /// More packets of this message follow
    Incomplete = 1,
}

impl PacketBoundary {
    /// Returns true for the last packet of a message
    pub const fn is_last(self) -> bool {
        matches!(self, Self::Complete)
    }

    const fn from_bit(bit: u8) -> Self {
        if bit & 0x01 == 0 {
            Self::Complete
        } else {
            Self::Incomplete
        }
    }
}

/// Opcode of a control message: group identifier plus opcode identifier
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[display("{gid:#x}/{oid:#04x}")]
pub struct Opcode {
    /// Group identifier (4 bits)
    pub gid: u8,
    /// Opcode identifier (6 bits)
    pub oid: u8,
}

impl Opcode {
    /// Create an opcode, masking both fields to their wire width
    pub const fn new(gid: u8, oid: u8) -> Self {
        Self {
            gid: gid & 0x0F,
            oid: oid & 0x3F,
        }
    }

    /// The 16-bit `GID << 8 | OID` form
    pub const fn as_u16(self) -> u16 {
        ((self.gid as u16) << 8) | self.oid as u16
    }

    /// Inverse of [`Opcode::as_u16`]
    pub const fn from_u16(value: u16) -> Self {
        Self::new((value >> 8) as u8, value as u8)
    }
}

/// Header of a control packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlHeader {
    /// Command, response or notification
    pub message_type: MessageType,
    /// Packet boundary flag
    pub boundary: PacketBoundary,
    /// Opcode of the message
    pub opcode: Opcode,
    /// Payload length of this packet
    pub payload_len: u8,
}

impl ControlHeader {
    /// Create a new control header
    pub const fn new(
        message_type: MessageType,
        boundary: PacketBoundary,
        opcode: Opcode,
        payload_len: u8,
    ) -> Self {
        Self {
            message_type,
            boundary,
            opcode,
            payload_len,
        }
    }

    /// Serialize the header
    pub const fn to_bytes(self) -> [u8; HEADER_SIZE] {
        [
            ((self.message_type as u8) << 5) | ((self.boundary as u8) << 4) | self.opcode.gid,
            self.opcode.oid,
            self.payload_len,
        ]
    }
}

/// Header of a data packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataHeader {
    /// Packet boundary flag
    pub boundary: PacketBoundary,
    /// Logical connection id (4 bits)
    pub conn_id: u8,
    /// Payload length of this packet
    pub payload_len: u8,
}

impl DataHeader {
    /// Create a new data header
    pub const fn new(boundary: PacketBoundary, conn_id: u8, payload_len: u8) -> Self {
        Self {
            boundary,
            conn_id: conn_id & 0x0F,
            payload_len,
        }
    }

    /// Serialize the header
    pub const fn to_bytes(self) -> [u8; HEADER_SIZE] {
        [((self.boundary as u8) << 4) | self.conn_id, 0x00, self.payload_len]
    }
}

/// Header of any NCI packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketHeader {
    /// Command, response or notification packet
    Control(ControlHeader),
    /// Data packet
    Data(DataHeader),
}

impl PacketHeader {
    /// Parse the header at the start of `bytes`
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let [b0, b1, len] = match bytes {
            [b0, b1, len, ..] => [*b0, *b1, *len],
            _ => return Err(Error::truncated("header", HEADER_SIZE, bytes.len())),
        };
        let boundary = PacketBoundary::from_bit(b0 >> 4);
        match MessageType::try_from(b0 >> 5)? {
            MessageType::Data => Ok(Self::Data(DataHeader::new(boundary, b0 & 0x0F, len))),
            message_type => Ok(Self::Control(ControlHeader::new(
                message_type,
                boundary,
                Opcode::new(b0 & 0x0F, b1 & 0x3F),
                len,
            ))),
        }
    }

    /// Packet boundary flag of either header kind
    pub const fn boundary(&self) -> PacketBoundary {
        match self {
            Self::Control(header) => header.boundary,
            Self::Data(header) => header.boundary,
        }
    }

    /// Payload length declared by the header
    pub const fn payload_len(&self) -> usize {
        match self {
            Self::Control(header) => header.payload_len as usize,
            Self::Data(header) => header.payload_len as usize,
        }
    }

    /// Serialize the header
    pub const fn to_bytes(self) -> [u8; HEADER_SIZE] {
        match self {
            Self::Control(header) => header.to_bytes(),
            Self::Data(header) => header.to_bytes(),
        }
    }
}

/// A single packet as read from the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Parsed header
    pub header: PacketHeader,
    /// Payload of this packet only
    pub payload: Bytes,
}

impl Packet {
    /// Parse one complete packet
    ///
    /// The buffer must hold exactly the header plus the declared payload.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let header = PacketHeader::parse(bytes)?;
        let body = &bytes[HEADER_SIZE..];
        let declared = header.payload_len();
        if body.len() < declared {
            return Err(Error::truncated("payload", declared, body.len()));
        }
        if body.len() > declared {
            return Err(Error::InvalidHeader("packet longer than declared length"));
        }
        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(body),
        })
    }
}

/// Frame a control message into packets of at most `mtu` payload bytes each
///
/// An empty payload yields a single header-only packet.
pub fn encode_control(
    message_type: MessageType,
    opcode: Opcode,
    payload: &Bytes,
    mtu: usize,
) -> Result<Vec<Bytes>> {
    fragment::fragment(payload, mtu)?
        .into_iter()
        .map(|segment| {
            let header =
                ControlHeader::new(message_type, segment.boundary, opcode, segment.len_u8());
            Ok(frame(header.to_bytes(), &segment.bytes))
        })
        .collect()
}

/// Frame a single data packet
pub fn encode_data(conn_id: u8, boundary: PacketBoundary, payload: &[u8]) -> Result<Bytes> {
    let len = u8::try_from(payload.len()).map_err(|_| Error::FieldTooLong {
        field: "data payload",
        len: payload.len(),
        max: usize::from(u8::MAX),
    })?;
    Ok(frame(DataHeader::new(boundary, conn_id, len).to_bytes(), payload))
}

fn frame(header: [u8; HEADER_SIZE], payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_slice(&header);
    buf.put_slice(payload);
    buf.freeze()
}
