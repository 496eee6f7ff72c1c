//! Streaming packet-boundary detection.
//!
//! The transport hands the engine arbitrary byte runs; these helpers answer
//! "do I have a whole packet yet?" without interpreting anything beyond the
//! length prefix. [`FrameBuffer`] accumulates the runs and splits off whole
//! packets for the session state machines.

use bytes::{Bytes, BytesMut};

use crate::codec::packet::PACKET_PREFIX_LEN;

/// The declared packet length at byte offset 1, or 0 when fewer than three
/// bytes are available.
pub fn packet_length(buf: &[u8]) -> u16 {
    if buf.len() < PACKET_PREFIX_LEN {
        0
    } else {
        u16::from_be_bytes([buf[1], buf[2]])
    }
}

/// True iff at least three bytes are present and the buffer covers the
/// declared packet length.
pub fn packet_complete(buf: &[u8]) -> bool {
    buf.len() >= PACKET_PREFIX_LEN && buf.len() >= packet_length(buf) as usize
}

/// Accumulates transport bytes and yields whole packets.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: BytesMut,
}

impl FrameBuffer {
    /// Create an empty buffer.
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Append newly received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Whether a whole packet is buffered.
    pub fn has_packet(&self) -> bool {
        packet_complete(&self.buf)
    }

    /// Split off the frontmost whole packet, leaving any trailing bytes
    /// buffered. Returns `None` until a packet is complete.
    ///
    /// A declared length below the three-byte prefix is handed through at
    /// prefix size so the packet decoder can report the inconsistency.
    pub fn take_packet(&mut self) -> Option<Bytes> {
        if !self.has_packet() {
            return None;
        }
        let len = (packet_length(&self.buf) as usize).max(PACKET_PREFIX_LEN);
        Some(self.buf.split_to(len).freeze())
    }

    /// Drop all buffered bytes.
    pub fn clear(&mut self) {
        self.buf.clear();
    }
}
