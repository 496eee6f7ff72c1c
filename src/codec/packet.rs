//! OBEX packet assembly and parsing.
//!
//! Every packet opens with a one-byte opcode (requests) or response code
//! (responses) followed by a two-byte big-endian length covering the whole
//! packet. CONNECT and SETPATH carry opcode-specific fixed fields between
//! the length and the headers; everything else goes straight to headers.
//!
//! Decoding is stream-aware: fewer bytes than the declared length is
//! reported as [`Decoded::Incomplete`], never as an error and never as
//! partial data.

use tracing::trace;

use crate::codec::header::Header;
use crate::error::{ObexError, Result};

/// Opcode/status byte plus the two-byte length field.
pub const PACKET_PREFIX_LEN: usize = 3;

/// High bit of the opcode/status byte: marks the last fragment of a
/// multi-packet request.
pub const FINAL_BIT: u8 = 0x80;

/// Fixed fields of a CONNECT request or response: version, flags, max length.
pub const CONNECT_FIELDS_LEN: usize = 4;

/// Fixed fields of a SETPATH request: flags, constants.
pub const SETPATH_FIELDS_LEN: usize = 2;

/// Outcome of a stream-aware decode.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded<T> {
    /// A whole packet was present and parsed.
    Packet(T),
    /// Fewer bytes than the declared packet length; read more and retry.
    Incomplete,
}

/// OBEX protocol version packed into one byte (major nibble, minor nibble).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObexVersion {
    /// Major version number.
    pub major: u8,
    /// Minor version number.
    pub minor: u8,
}

impl ObexVersion {
    /// Version 1.0 (`0x10`), the version this engine speaks.
    pub const V1_0: ObexVersion = ObexVersion { major: 1, minor: 0 };

    /// Unpack from the wire byte.
    pub fn from_byte(b: u8) -> Self {
        Self { major: b >> 4, minor: b & 0x0F }
    }

    /// Pack to the wire byte.
    pub fn as_byte(&self) -> u8 {
        (self.major << 4) | (self.minor & 0x0F)
    }
}

/// OBEX operation codes (final bit stripped).
///
/// CONNECT, DISCONNECT, ABORT, SETPATH, and SESSION are single-packet-only
/// in both directions; PUT and GET support multi-packet bodies via the
/// Continue response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Establish the OBEX connection, negotiate the max packet length.
    Connect = 0x00,
    /// Tear down the OBEX connection.
    Disconnect = 0x01,
    /// Send an object to the peer.
    Put = 0x02,
    /// Retrieve an object from the peer.
    Get = 0x03,
    /// Change the current folder on the peer.
    SetPath = 0x05,
    /// Manage a reliable OBEX session.
    Session = 0x07,
    /// Cancel the outstanding multi-packet operation.
    Abort = 0x7F,
}

impl OpCode {
    /// Parse from the wire byte, ignoring the final bit.
    pub fn from_byte(b: u8) -> Result<Self> {
        match b & !FINAL_BIT {
            0x00 => Ok(OpCode::Connect),
            0x01 => Ok(OpCode::Disconnect),
            0x02 => Ok(OpCode::Put),
            0x03 => Ok(OpCode::Get),
            0x05 => Ok(OpCode::SetPath),
            0x07 => Ok(OpCode::Session),
            0x7F => Ok(OpCode::Abort),
            other => Err(ObexError::Protocol(format!("Unknown opcode 0x{other:02x}"))),
        }
    }

    /// The wire byte without the final bit.
    pub fn as_byte(&self) -> u8 {
        *self as u8
    }

    /// Whether request and response are both restricted to a single packet.
    pub fn is_single_packet(&self) -> bool {
        !matches!(self, OpCode::Put | OpCode::Get)
    }

    /// Operation name for logs.
    pub fn name(&self) -> &'static str {
        match self {
            OpCode::Connect => "connect",
            OpCode::Disconnect => "disconnect",
            OpCode::Put => "put",
            OpCode::Get => "get",
            OpCode::SetPath => "setpath",
            OpCode::Session => "session",
            OpCode::Abort => "abort",
        }
    }
}

/// Category of a response code, partitioned over the low 7 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    /// Below `0x10`: not a legal response code.
    Protocol,
    /// `0x10`-`0x1F`: informational, including Continue.
    Informational,
    /// `0x20`-`0x2F`: success.
    Success,
    /// `0x30`-`0x3F`: redirection.
    Redirect,
    /// `0x40`-`0x4F`: client error.
    ClientError,
    /// `0x50`-`0x5F`: server error.
    ServerError,
    /// `0x60` and above: outside the assigned ranges.
    Unknown,
}

impl StatusCategory {
    /// Categorize a raw response code (final bit ignored).
    pub fn from_code(code: u8) -> Self {
        match code & !FINAL_BIT {
            0x00..=0x0F => StatusCategory::Protocol,
            0x10..=0x1F => StatusCategory::Informational,
            0x20..=0x2F => StatusCategory::Success,
            0x30..=0x3F => StatusCategory::Redirect,
            0x40..=0x4F => StatusCategory::ClientError,
            0x50..=0x5F => StatusCategory::ServerError,
            _ => StatusCategory::Unknown,
        }
    }
}

/// A response code byte as it appears on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseCode(u8);

impl ResponseCode {
    /// Send or receive the next packet of the operation.
    pub const CONTINUE: ResponseCode = ResponseCode(0x90);
    /// Operation completed.
    pub const SUCCESS: ResponseCode = ResponseCode(0xA0);
    /// Request could not be understood.
    pub const BAD_REQUEST: ResponseCode = ResponseCode(0xC0);
    /// Request requires authentication.
    pub const UNAUTHORIZED: ResponseCode = ResponseCode(0xC1);
    /// Request understood but refused.
    pub const FORBIDDEN: ResponseCode = ResponseCode(0xC3);
    /// Requested object was not found.
    pub const NOT_FOUND: ResponseCode = ResponseCode(0xC4);
    /// Server hit an unexpected condition.
    pub const INTERNAL_SERVER_ERROR: ResponseCode = ResponseCode(0xD0);
    /// Operation is not supported by the server.
    pub const NOT_IMPLEMENTED: ResponseCode = ResponseCode(0xD1);
    /// Server is temporarily unable to handle the request.
    pub const SERVICE_UNAVAILABLE: ResponseCode = ResponseCode(0xD3);

    /// Wrap a raw wire byte.
    pub fn from_byte(b: u8) -> Self {
        Self(b)
    }

    /// The raw wire byte.
    pub fn code(&self) -> u8 {
        self.0
    }

    /// The category of this code.
    pub fn category(&self) -> StatusCategory {
        StatusCategory::from_code(self.0)
    }

    /// Whether this is the Continue code.
    pub fn is_continue(&self) -> bool {
        *self == Self::CONTINUE
    }

    /// Whether this code is in the success range.
    pub fn is_success(&self) -> bool {
        self.category() == StatusCategory::Success
    }

    /// Any response other than Continue terminates the exchange.
    pub fn is_final(&self) -> bool {
        !self.is_continue()
    }

    /// Short description of the recognized codes.
    pub fn description(&self) -> Option<&'static str> {
        match *self {
            Self::CONTINUE => Some("Continue"),
            Self::SUCCESS => Some("OK"),
            Self::BAD_REQUEST => Some("Bad Request"),
            Self::UNAUTHORIZED => Some("Unauthorized"),
            Self::FORBIDDEN => Some("Forbidden"),
            Self::NOT_FOUND => Some("Not Found"),
            Self::INTERNAL_SERVER_ERROR => Some("Internal Server Error"),
            Self::NOT_IMPLEMENTED => Some("Not Implemented"),
            Self::SERVICE_UNAVAILABLE => Some("Service Unavailable"),
            _ => None,
        }
    }
}

/// SETPATH request flags. The companion constants byte is always zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SetPathFlags(u8);

impl SetPathFlags {
    /// Apply the path change at the parent folder first (bit 0).
    pub const BACKUP: u8 = 1 << 0;
    /// Do not create the folder if it does not exist (bit 1).
    pub const DONT_CREATE: u8 = 1 << 1;

    /// Create new empty flags
    pub fn new() -> Self {
        Self(0)
    }

    /// Create from raw bits
    pub fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Get raw bits
    pub fn bits(&self) -> u8 {
        self.0
    }

    /// Set a flag
    pub fn set(&mut self, flag: u8) {
        self.0 |= flag;
    }

    /// Check if flag is set
    pub fn has(&self, flag: u8) -> bool {
        self.0 & flag != 0
    }
}

/// Fixed fields carried by a CONNECT request or response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectFields {
    /// Protocol version of the sender.
    pub version: ObexVersion,
    /// Connect flags; always zero in this engine.
    pub flags: u8,
    /// Proposed (request) or negotiated (response) max packet length.
    pub max_packet_len: u16,
}

/// Opcode-specific fixed fields of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestFields {
    /// No fixed fields for this opcode.
    None,
    /// CONNECT: version, flags, proposed max packet length.
    Connect(ConnectFields),
    /// SETPATH: navigation flags plus the always-zero constants byte.
    SetPath {
        /// Navigation flags.
        flags: SetPathFlags,
        /// Reserved constants byte.
        constants: u8,
    },
}

impl RequestFields {
    fn encoded_len(&self) -> usize {
        match self {
            RequestFields::None => 0,
            RequestFields::Connect(_) => CONNECT_FIELDS_LEN,
            RequestFields::SetPath { .. } => SETPATH_FIELDS_LEN,
        }
    }
}

/// A request packet: opcode, final bit, fixed fields, headers.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestPacket {
    /// The operation.
    pub opcode: OpCode,
    /// Whether this is the last fragment of the request.
    pub is_final: bool,
    /// Opcode-specific fixed fields.
    pub fields: RequestFields,
    /// Headers in wire order.
    pub headers: Vec<Header>,
}

impl RequestPacket {
    /// Build a request packet, deriving the fixed-field shape from the
    /// opcode where none are supplied.
    pub fn new(opcode: OpCode, is_final: bool, fields: RequestFields, headers: Vec<Header>) -> Self {
        Self { opcode, is_final, fields, headers }
    }

    /// Total encoded size of this packet.
    pub fn encoded_len(&self) -> usize {
        PACKET_PREFIX_LEN
            + self.fields.encoded_len()
            + self.headers.iter().map(Header::encoded_len).sum::<usize>()
    }

    /// Encode to wire bytes. The length field always equals the packet's
    /// true encoded byte length.
    pub fn to_bytes(&self) -> Vec<u8> {
        let total = self.encoded_len();
        let mut buf = Vec::with_capacity(total);
        let mut code = self.opcode.as_byte();
        if self.is_final {
            code |= FINAL_BIT;
        }
        buf.push(code);
        buf.extend_from_slice(&(total as u16).to_be_bytes());
        match self.fields {
            RequestFields::None => {}
            RequestFields::Connect(fields) => {
                buf.push(fields.version.as_byte());
                buf.push(fields.flags);
                buf.extend_from_slice(&fields.max_packet_len.to_be_bytes());
            }
            RequestFields::SetPath { flags, constants } => {
                buf.push(flags.bits());
                buf.push(constants);
            }
        }
        for header in &self.headers {
            header.encode_into(&mut buf);
        }
        buf
    }

    /// Decode a request packet from the front of `buf`.
    ///
    /// Returns [`Decoded::Incomplete`] until the buffer holds at least the
    /// declared packet length.
    pub fn decode(buf: &[u8]) -> Result<Decoded<Self>> {
        let total = match whole_packet(buf)? {
            Some(total) => total,
            None => return Ok(Decoded::Incomplete),
        };
        let packet = &buf[..total];

        let opcode = OpCode::from_byte(packet[0])?;
        let is_final = packet[0] & FINAL_BIT != 0;

        let (fields, header_start) = match opcode {
            OpCode::Connect => {
                let fields = decode_connect_fields(packet)?;
                (RequestFields::Connect(fields), PACKET_PREFIX_LEN + CONNECT_FIELDS_LEN)
            }
            OpCode::SetPath => {
                if total < PACKET_PREFIX_LEN + SETPATH_FIELDS_LEN {
                    return Err(ObexError::Protocol(format!(
                        "SETPATH request of {total} bytes cannot hold its fixed fields"
                    )));
                }
                let fields = RequestFields::SetPath {
                    flags: SetPathFlags::from_bits(packet[3]),
                    constants: packet[4],
                };
                (fields, PACKET_PREFIX_LEN + SETPATH_FIELDS_LEN)
            }
            _ => (RequestFields::None, PACKET_PREFIX_LEN),
        };

        let headers = Header::decode_all(packet, header_start)?;
        trace!(opcode = opcode.name(), is_final, total, "Decoded request packet");
        Ok(Decoded::Packet(Self { opcode, is_final, fields, headers }))
    }
}

/// A response packet: response code, optional CONNECT fields, headers.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponsePacket {
    /// The response code.
    pub status: ResponseCode,
    /// Fixed fields, present only on CONNECT responses.
    pub connect: Option<ConnectFields>,
    /// Headers in wire order.
    pub headers: Vec<Header>,
}

impl ResponsePacket {
    /// Build a plain response packet.
    pub fn new(status: ResponseCode, headers: Vec<Header>) -> Self {
        Self { status, connect: None, headers }
    }

    /// Build a CONNECT response packet.
    pub fn connect(status: ResponseCode, fields: ConnectFields, headers: Vec<Header>) -> Self {
        Self { status, connect: Some(fields), headers }
    }

    /// Total encoded size of this packet.
    pub fn encoded_len(&self) -> usize {
        PACKET_PREFIX_LEN
            + if self.connect.is_some() { CONNECT_FIELDS_LEN } else { 0 }
            + self.headers.iter().map(Header::encoded_len).sum::<usize>()
    }

    /// Encode to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let total = self.encoded_len();
        let mut buf = Vec::with_capacity(total);
        buf.push(self.status.code());
        buf.extend_from_slice(&(total as u16).to_be_bytes());
        if let Some(fields) = self.connect {
            buf.push(fields.version.as_byte());
            buf.push(fields.flags);
            buf.extend_from_slice(&fields.max_packet_len.to_be_bytes());
        }
        for header in &self.headers {
            header.encode_into(&mut buf);
        }
        buf
    }

    /// Decode a response packet from the front of `buf`.
    ///
    /// `for_connect` selects the CONNECT response shape, whose fixed fields
    /// sit between the length and the headers. Returns
    /// [`Decoded::Incomplete`] until a whole packet is buffered.
    pub fn decode(buf: &[u8], for_connect: bool) -> Result<Decoded<Self>> {
        let total = match whole_packet(buf)? {
            Some(total) => total,
            None => return Ok(Decoded::Incomplete),
        };
        let packet = &buf[..total];

        let status = ResponseCode::from_byte(packet[0]);
        let (connect, header_start) = if for_connect {
            let fields = decode_connect_fields(packet)?;
            (Some(fields), PACKET_PREFIX_LEN + CONNECT_FIELDS_LEN)
        } else {
            (None, PACKET_PREFIX_LEN)
        };

        let headers = Header::decode_all(packet, header_start)?;
        trace!(status = status.code(), total, "Decoded response packet");
        Ok(Decoded::Packet(Self { status, connect, headers }))
    }
}

/// Validate the length prefix: `Ok(Some(total))` when a whole packet is
/// buffered, `Ok(None)` when more bytes are needed.
fn whole_packet(buf: &[u8]) -> Result<Option<usize>> {
    if buf.len() < PACKET_PREFIX_LEN {
        return Ok(None);
    }
    let total = u16::from_be_bytes([buf[1], buf[2]]) as usize;
    if total < PACKET_PREFIX_LEN {
        return Err(ObexError::Protocol(format!(
            "Declared packet length {total} below the {PACKET_PREFIX_LEN}-byte prefix"
        )));
    }
    if buf.len() < total {
        return Ok(None);
    }
    Ok(Some(total))
}

fn decode_connect_fields(packet: &[u8]) -> Result<ConnectFields> {
    if packet.len() < PACKET_PREFIX_LEN + CONNECT_FIELDS_LEN {
        return Err(ObexError::Protocol(format!(
            "CONNECT packet of {} bytes cannot hold its fixed fields",
            packet.len()
        )));
    }
    Ok(ConnectFields {
        version: ObexVersion::from_byte(packet[3]),
        flags: packet[4],
        max_packet_len: u16::from_be_bytes([packet[5], packet[6]]),
    })
}
