//! OBEX wire codec: headers, packets, and streaming frame detection.
//!
//! All multi-byte wire fields are big-endian. The codec layers build on each
//! other:
//!
//! - [`header`]: one typed header (id + value), layout selected by the upper
//!   2 bits of the id.
//! - [`packet`]: whole packets (opcode/status + length + fixed fields +
//!   headers) with stream-aware decoding.
//! - [`framing`]: packet-boundary detection over an incrementally fed byte
//!   stream.
//! - [`unicode`]: the explicit UTF-16BE text conversion used by unicode
//!   headers.
//!
//! Decoding never interprets a field before verifying the buffer covers the
//! declared packet length; a short buffer is reported as
//! [`Decoded::Incomplete`], not as an error and not as partial data.

pub mod framing;
pub mod header;
pub mod packet;
pub mod unicode;

pub use framing::{packet_complete, packet_length, FrameBuffer};
pub use header::{Header, HeaderEncoding, HeaderId, HeaderValue, HEADER_PREFIX_LEN};
pub use packet::{
    ConnectFields, Decoded, ObexVersion, OpCode, RequestFields, RequestPacket, ResponseCode,
    ResponsePacket, SetPathFlags, StatusCategory, CONNECT_FIELDS_LEN, FINAL_BIT,
    PACKET_PREFIX_LEN, SETPATH_FIELDS_LEN,
};
pub use unicode::{from_unicode_be, to_unicode_be};
