//! Segmentation of messages into packets and reassembly of incoming packets

use std::collections::BTreeMap;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::constants::MAX_PACKET_PAYLOAD;
use crate::{Error, PacketBoundary, Result};

/// One packet-sized piece of a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// `Incomplete` on all but the last segment
    pub boundary: PacketBoundary,
    /// Payload bytes of this segment
    pub bytes: Bytes,
}

impl Segment {
    /// Payload length as the header's length byte
    ///
    /// Segments never exceed [`MAX_PACKET_PAYLOAD`].
    pub fn len_u8(&self) -> u8 {
        u8::try_from(self.bytes.len()).unwrap_or(u8::MAX)
    }
}

/// Split `payload` into segments of at most `mtu` bytes
///
/// A zero-length payload yields one empty segment so it is still framed.
pub fn fragment(payload: &Bytes, mtu: usize) -> Result<Vec<Segment>> {
    if mtu == 0 || mtu > MAX_PACKET_PAYLOAD {
        return Err(Error::InvalidMtu(mtu));
    }
    if payload.is_empty() {
        return Ok(vec![Segment {
            boundary: PacketBoundary::Complete,
            bytes: Bytes::new(),
        }]);
    }

    let count = payload.len().div_ceil(mtu);
    let segments = (0..count)
        .map(|index| {
            let start = index * mtu;
            let end = (start + mtu).min(payload.len());
            Segment {
                boundary: if index + 1 == count {
                    PacketBoundary::Complete
                } else {
                    PacketBoundary::Incomplete
                },
                bytes: payload.slice(start..end),
            }
        })
        .collect();
    Ok(segments)
}

/// Outcome of pushing a packet into a [`Reassembly`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reassembled {
    /// The last packet arrived; the whole message
    Complete(Bytes),
    /// More packets are expected
    Pending,
}

/// Accumulator for a single logical channel
///
/// The accumulator owns the pending bytes until the last packet hands them
/// out, at which point it is empty again.
#[derive(Debug, Clone)]
pub struct Reassembly {
    buf: BytesMut,
    limit: usize,
}

impl Reassembly {
    /// Create an accumulator that refuses messages larger than `limit`
    pub fn new(limit: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            limit,
        }
    }

    /// Append one packet payload
    ///
    /// Exceeding the size limit discards everything accumulated so far.
    pub fn push(&mut self, boundary: PacketBoundary, payload: &[u8]) -> Result<Reassembled> {
        if self.buf.len() + payload.len() > self.limit {
            self.buf.clear();
            return Err(Error::MessageTooLarge { limit: self.limit });
        }
        self.buf.extend_from_slice(payload);

        if boundary.is_last() {
            Ok(Reassembled::Complete(self.buf.split().freeze()))
        } else {
            trace!(accumulated = self.buf.len(), "Awaiting further packets");
            Ok(Reassembled::Pending)
        }
    }

    /// Bytes accumulated so far
    pub fn pending_len(&self) -> usize {
        self.buf.len()
    }

    /// Returns true if a message is partially accumulated
    pub fn is_pending(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Drop any partially accumulated message
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}

/// Keyed set of reassembly accumulators
#[derive(Debug, Clone)]
pub struct Reassembler<K: Ord> {
    channels: BTreeMap<K, Reassembly>,
    limit: usize,
}

impl<K: Ord> Reassembler<K> {
    /// Create a reassembler with a per-message size limit
    pub const fn new(limit: usize) -> Self {
        Self {
            channels: BTreeMap::new(),
            limit,
        }
    }

    /// Append one packet to the channel identified by `key`
    pub fn push(&mut self, key: K, boundary: PacketBoundary, payload: &[u8]) -> Result<Reassembled> {
        let limit = self.limit;
        let result = self
            .channels
            .entry(key)
            .or_insert_with(|| Reassembly::new(limit))
            .push(boundary, payload);
        self.channels.retain(|_, channel| channel.is_pending());
        result
    }

    /// Drop the partial message of one channel
    pub fn reset(&mut self, key: &K) {
        self.channels.remove(key);
    }

    /// Drop every partial message
    pub fn clear(&mut self) {
        self.channels.clear();
    }

    /// Returns true if the channel has a partial message
    pub fn is_pending(&self, key: &K) -> bool {
        self.channels.contains_key(key)
    }
}
