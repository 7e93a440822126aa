//! Bounds-checked primitives for reading and writing NCI message payloads

use bytes::{BufMut, Bytes, BytesMut};

use crate::{Error, Opcode, Result};

/// Cursor over a message payload
///
/// Every read is checked against the remaining length. [`WireReader::finish`]
/// fails if any bytes were left unread.
#[derive(Debug, Clone)]
pub struct WireReader {
    buf: Bytes,
    pos: usize,
}

impl WireReader {
    /// Create a reader over the payload
    pub fn new(buf: impl Into<Bytes>) -> Self {
        Self {
            buf: buf.into(),
            pos: 0,
        }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Returns true if every byte has been consumed
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Read a single byte
    pub fn u8(&mut self, field: &'static str) -> Result<u8> {
        let byte = *self
            .buf
            .get(self.pos)
            .ok_or_else(|| Error::truncated(field, 1, self.remaining()))?;
        self.pos += 1;
        Ok(byte)
    }

    /// Read a little-endian u16
    pub fn u16_le(&mut self, field: &'static str) -> Result<u16> {
        let bytes = self.take(field, 2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    /// Read a fixed-size array
    pub fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N]> {
        let bytes = self.take(field, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Read `len` bytes
    pub fn take(&mut self, field: &'static str, len: usize) -> Result<Bytes> {
        if self.remaining() < len {
            return Err(Error::truncated(field, len, self.remaining()));
        }
        let out = self.buf.slice(self.pos..self.pos + len);
        self.pos += len;
        Ok(out)
    }

    /// Read a one-byte length followed by that many bytes
    pub fn length_prefixed(&mut self, field: &'static str) -> Result<Bytes> {
        let len = self.u8(field)?;
        self.take(field, usize::from(len))
    }

    /// Read everything left
    pub fn rest(&mut self) -> Bytes {
        let out = self.buf.slice(self.pos..);
        self.pos = self.buf.len();
        out
    }

    /// Fail with [`Error::TrailingBytes`] if unread bytes remain
    pub fn finish(self, opcode: Opcode) -> Result<()> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(Error::TrailingBytes { opcode, extra }),
        }
    }
}

/// Builder for message payloads
#[derive(Debug, Default)]
pub struct WireWriter {
    buf: BytesMut,
}

impl WireWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a writer with the given capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: BytesMut::with_capacity(capacity),
        }
    }

    /// Append a byte
    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.buf.put_u8(value);
        self
    }

    /// Append a little-endian u16
    pub fn u16_le(&mut self, value: u16) -> &mut Self {
        self.buf.put_u16_le(value);
        self
    }

    /// Append raw bytes
    pub fn bytes(&mut self, value: &[u8]) -> &mut Self {
        self.buf.put_slice(value);
        self
    }

    /// Append a one-byte count, failing if `count` does not fit
    pub fn count(&mut self, field: &'static str, count: usize) -> Result<&mut Self> {
        let value = encodable_len(field, count)?;
        Ok(self.u8(value))
    }

    /// Append a one-byte length followed by the bytes
    pub fn length_prefixed(&mut self, field: &'static str, value: &[u8]) -> Result<&mut Self> {
        let len = encodable_len(field, value.len())?;
        self.buf.put_u8(len);
        self.buf.put_slice(value);
        Ok(self)
    }

    /// Append a type-length-value triplet
    pub fn tlv(&mut self, field: &'static str, tag: u8, value: &[u8]) -> Result<&mut Self> {
        self.buf.put_u8(tag);
        self.length_prefixed(field, value)
    }

    /// Current length of the payload
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if nothing has been written
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Finish and return the payload
    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

fn encodable_len(field: &'static str, len: usize) -> Result<u8> {
    u8::try_from(len).map_err(|_| Error::FieldTooLong {
        field,
        len,
        max: usize::from(u8::MAX),
    })
}

/// Copy of `bytes` in reverse order
///
/// NFCID and similar identifiers are sometimes presented most significant
/// byte first by the controller and least significant first by the host.
pub fn reversed(bytes: &[u8]) -> Bytes {
    bytes.iter().rev().copied().collect::<Vec<_>>().into()
}
