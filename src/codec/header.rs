//! OBEX header encoding and decoding.
//!
//! A header is a typed `(id, value)` pair. The top 2 bits of the one-byte id
//! select the wire layout of the value; the lower 6 bits name the header.
//! Unicode text and byte-sequence headers carry a two-byte length prefix that
//! counts the full encoded header (id + length + payload); one-byte and
//! four-byte headers have a fixed size and no length field.

use tracing::trace;

use crate::codec::unicode::{from_unicode_be, to_unicode_be};
use crate::error::{ObexError, Result};

/// Payload layout selected by the upper 2 bits of a header id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HeaderEncoding {
    /// Null-terminated UTF-16BE text with a two-byte length prefix.
    Text = 0x00,
    /// Raw byte sequence with a two-byte length prefix.
    Bytes = 0x40,
    /// A single unsigned byte; fixed 2-byte total.
    OneByte = 0x80,
    /// A four-byte big-endian unsigned integer; fixed 5-byte total.
    FourBytes = 0xC0,
}

impl HeaderEncoding {
    /// Extract the encoding from a raw header id.
    pub fn from_id(id: u8) -> Self {
        match id & 0xC0 {
            0x00 => HeaderEncoding::Text,
            0x40 => HeaderEncoding::Bytes,
            0x80 => HeaderEncoding::OneByte,
            _ => HeaderEncoding::FourBytes,
        }
    }
}

/// Recognized OBEX header ids.
///
/// The full Bluetooth-assigned table is reference data, not protocol logic;
/// ids outside the recognized subset round-trip through [`HeaderId::Other`]
/// with their layout still dictated by the encoding bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderId {
    /// Number of objects.
    Count,
    /// Name of the object, typically a file name.
    Name,
    /// Type of the object (e.g. `text/plain`).
    Type,
    /// Object length in bytes.
    Length,
    /// Date/time stamp, ISO 8601 bytes.
    Timestamp,
    /// Text description of the object.
    Description,
    /// Service the operation is targeting.
    Target,
    /// A chunk of the object body.
    Body,
    /// The final chunk of the object body.
    EndOfBody,
    /// Identifies the responding service.
    Who,
    /// Token for connection multiplexing, issued at CONNECT.
    ConnectionId,
    /// Any other assigned or user-defined id.
    Other(u8),
}

impl HeaderId {
    /// Parse from the wire byte. Never fails; unrecognized ids are `Other`.
    pub fn from_byte(b: u8) -> Self {
        match b {
            0xC0 => HeaderId::Count,
            0x01 => HeaderId::Name,
            0x42 => HeaderId::Type,
            0xC3 => HeaderId::Length,
            0x44 => HeaderId::Timestamp,
            0x05 => HeaderId::Description,
            0x46 => HeaderId::Target,
            0x48 => HeaderId::Body,
            0x49 => HeaderId::EndOfBody,
            0x4A => HeaderId::Who,
            0xCB => HeaderId::ConnectionId,
            other => HeaderId::Other(other),
        }
    }

    /// The wire byte for this id.
    pub fn as_byte(&self) -> u8 {
        match self {
            HeaderId::Count => 0xC0,
            HeaderId::Name => 0x01,
            HeaderId::Type => 0x42,
            HeaderId::Length => 0xC3,
            HeaderId::Timestamp => 0x44,
            HeaderId::Description => 0x05,
            HeaderId::Target => 0x46,
            HeaderId::Body => 0x48,
            HeaderId::EndOfBody => 0x49,
            HeaderId::Who => 0x4A,
            HeaderId::ConnectionId => 0xCB,
            HeaderId::Other(b) => *b,
        }
    }

    /// The payload layout dictated by this id's upper 2 bits.
    pub fn encoding(&self) -> HeaderEncoding {
        HeaderEncoding::from_id(self.as_byte())
    }
}

/// A header value. The variant must agree with the id's encoding bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HeaderValue {
    /// Unicode text, transmitted as null-terminated UTF-16BE.
    Text(String),
    /// Raw byte sequence.
    Bytes(Vec<u8>),
    /// A single unsigned byte.
    Byte(u8),
    /// A 32-bit big-endian unsigned integer.
    Quad(u32),
}

impl HeaderValue {
    fn encoding(&self) -> HeaderEncoding {
        match self {
            HeaderValue::Text(_) => HeaderEncoding::Text,
            HeaderValue::Bytes(_) => HeaderEncoding::Bytes,
            HeaderValue::Byte(_) => HeaderEncoding::OneByte,
            HeaderValue::Quad(_) => HeaderEncoding::FourBytes,
        }
    }
}

/// One typed OBEX header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    id: HeaderId,
    value: HeaderValue,
}

/// Prefix of a length-delimited (text or byte sequence) header: id + length.
pub const HEADER_PREFIX_LEN: usize = 3;

impl Header {
    /// Create a header, checking that the value shape matches the id's
    /// encoding bits.
    pub fn new(id: HeaderId, value: HeaderValue) -> Result<Self> {
        if id.encoding() != value.encoding() {
            return Err(ObexError::MalformedHeader(format!(
                "Value shape {:?} does not match encoding of id 0x{:02x}",
                value.encoding(),
                id.as_byte()
            )));
        }
        Ok(Self { id, value })
    }

    /// `Count` header.
    pub fn count(n: u32) -> Self {
        Self { id: HeaderId::Count, value: HeaderValue::Quad(n) }
    }

    /// `Name` header.
    pub fn name(name: impl Into<String>) -> Self {
        Self { id: HeaderId::Name, value: HeaderValue::Text(name.into()) }
    }

    /// `Type` header.
    pub fn object_type(mime: impl Into<Vec<u8>>) -> Self {
        Self { id: HeaderId::Type, value: HeaderValue::Bytes(mime.into()) }
    }

    /// `Length` header.
    pub fn length(len: u32) -> Self {
        Self { id: HeaderId::Length, value: HeaderValue::Quad(len) }
    }

    /// `Timestamp` header (ISO 8601 bytes).
    pub fn timestamp(stamp: impl Into<Vec<u8>>) -> Self {
        Self { id: HeaderId::Timestamp, value: HeaderValue::Bytes(stamp.into()) }
    }

    /// `Description` header.
    pub fn description(text: impl Into<String>) -> Self {
        Self { id: HeaderId::Description, value: HeaderValue::Text(text.into()) }
    }

    /// `Target` header.
    pub fn target(service: impl Into<Vec<u8>>) -> Self {
        Self { id: HeaderId::Target, value: HeaderValue::Bytes(service.into()) }
    }

    /// `Body` header carrying one content chunk.
    pub fn body(chunk: impl Into<Vec<u8>>) -> Self {
        Self { id: HeaderId::Body, value: HeaderValue::Bytes(chunk.into()) }
    }

    /// `EndOfBody` header carrying the final content chunk.
    pub fn end_of_body(chunk: impl Into<Vec<u8>>) -> Self {
        Self { id: HeaderId::EndOfBody, value: HeaderValue::Bytes(chunk.into()) }
    }

    /// `Who` header.
    pub fn who(id: impl Into<Vec<u8>>) -> Self {
        Self { id: HeaderId::Who, value: HeaderValue::Bytes(id.into()) }
    }

    /// `ConnectionId` header.
    pub fn connection_id(id: u32) -> Self {
        Self { id: HeaderId::ConnectionId, value: HeaderValue::Quad(id) }
    }

    /// The header id.
    pub fn id(&self) -> HeaderId {
        self.id
    }

    /// The header value.
    pub fn value(&self) -> &HeaderValue {
        &self.value
    }

    /// Consume the header, returning the value.
    pub fn into_value(self) -> HeaderValue {
        self.value
    }

    /// The text payload, if this is a unicode header.
    pub fn as_text(&self) -> Option<&str> {
        match &self.value {
            HeaderValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The byte-sequence payload, if this is a byte-sequence header.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.value {
            HeaderValue::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The one-byte payload, if present.
    pub fn as_byte(&self) -> Option<u8> {
        match self.value {
            HeaderValue::Byte(b) => Some(b),
            _ => None,
        }
    }

    /// The four-byte payload, if present.
    pub fn as_quad(&self) -> Option<u32> {
        match self.value {
            HeaderValue::Quad(q) => Some(q),
            _ => None,
        }
    }

    /// Total encoded size of this header on the wire.
    pub fn encoded_len(&self) -> usize {
        match &self.value {
            // Prefix + UTF-16 payload + trailing 0x0000.
            HeaderValue::Text(s) => {
                HEADER_PREFIX_LEN + s.encode_utf16().count() * 2 + 2
            }
            HeaderValue::Bytes(b) => HEADER_PREFIX_LEN + b.len(),
            HeaderValue::Byte(_) => 2,
            HeaderValue::Quad(_) => 5,
        }
    }

    /// Append the wire encoding of this header to `buf`.
    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        buf.push(self.id.as_byte());
        match &self.value {
            HeaderValue::Text(s) => {
                let payload = to_unicode_be(s);
                let total = (HEADER_PREFIX_LEN + payload.len()) as u16;
                buf.extend_from_slice(&total.to_be_bytes());
                buf.extend_from_slice(&payload);
            }
            HeaderValue::Bytes(b) => {
                let total = (HEADER_PREFIX_LEN + b.len()) as u16;
                buf.extend_from_slice(&total.to_be_bytes());
                buf.extend_from_slice(b);
            }
            HeaderValue::Byte(b) => buf.push(*b),
            HeaderValue::Quad(q) => buf.extend_from_slice(&q.to_be_bytes()),
        }
    }

    /// Encode to a fresh buffer.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf
    }

    /// Decode one header starting at `offset`, returning the header and the
    /// offset of the next one.
    pub fn decode_at(buf: &[u8], offset: usize) -> Result<(Self, usize)> {
        let remaining = &buf[offset.min(buf.len())..];
        if remaining.is_empty() {
            return Err(ObexError::MalformedHeader(
                "Empty buffer where a header id was expected".to_string(),
            ));
        }

        let id = HeaderId::from_byte(remaining[0]);
        let encoding = id.encoding();
        let (value, consumed) = match encoding {
            HeaderEncoding::Text | HeaderEncoding::Bytes => {
                if remaining.len() < HEADER_PREFIX_LEN {
                    return Err(ObexError::MalformedHeader(format!(
                        "Truncated length prefix for header 0x{:02x}",
                        id.as_byte()
                    )));
                }
                let total = u16::from_be_bytes([remaining[1], remaining[2]]) as usize;
                let payload_len = total.checked_sub(HEADER_PREFIX_LEN).ok_or_else(|| {
                    ObexError::MalformedHeader(format!(
                        "Declared length {total} below minimum {HEADER_PREFIX_LEN}"
                    ))
                })?;
                if remaining.len() < total {
                    return Err(ObexError::MalformedHeader(format!(
                        "Declared length {} exceeds remaining {} bytes",
                        total,
                        remaining.len()
                    )));
                }
                let payload = &remaining[HEADER_PREFIX_LEN..total];
                let value = match encoding {
                    HeaderEncoding::Text => HeaderValue::Text(from_unicode_be(payload)?),
                    _ => HeaderValue::Bytes(payload.to_vec()),
                };
                (value, total)
            }
            HeaderEncoding::OneByte => {
                if remaining.len() < 2 {
                    return Err(ObexError::MalformedHeader(format!(
                        "Truncated one-byte header 0x{:02x}",
                        id.as_byte()
                    )));
                }
                (HeaderValue::Byte(remaining[1]), 2)
            }
            HeaderEncoding::FourBytes => {
                if remaining.len() < 5 {
                    return Err(ObexError::MalformedHeader(format!(
                        "Truncated four-byte header 0x{:02x}",
                        id.as_byte()
                    )));
                }
                let quad =
                    u32::from_be_bytes([remaining[1], remaining[2], remaining[3], remaining[4]]);
                (HeaderValue::Quad(quad), 5)
            }
        };

        trace!(id = ?id, consumed, "Decoded OBEX header");
        Ok((Self { id, value }, offset + consumed))
    }

    /// Decode every header in `buf` starting at `offset`.
    pub fn decode_all(buf: &[u8], mut offset: usize) -> Result<Vec<Self>> {
        let mut headers = Vec::new();
        while offset < buf.len() {
            let (header, next) = Self::decode_at(buf, offset)?;
            headers.push(header);
            offset = next;
        }
        Ok(headers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;

    #[test]
    fn test_header_id_roundtrip() {
        for raw in 0x00..=0xffu8 {
            assert_eq!(HeaderId::from_byte(raw).as_byte(), raw);
        }
    }

    #[test]
    fn test_encoding_from_id_bits() {
        assert_eq!(HeaderId::Name.encoding(), HeaderEncoding::Text);
        assert_eq!(HeaderId::Body.encoding(), HeaderEncoding::Bytes);
        assert_eq!(HeaderId::Other(0x90).encoding(), HeaderEncoding::OneByte);
        assert_eq!(HeaderId::ConnectionId.encoding(), HeaderEncoding::FourBytes);
    }

    #[test]
    fn test_new_rejects_shape_mismatch() {
        let result = Header::new(HeaderId::ConnectionId, HeaderValue::Byte(1));
        assert_matches!(result, Err(ObexError::MalformedHeader(_)));

        let result = Header::new(HeaderId::Name, HeaderValue::Text("a".to_string()));
        assert!(result.is_ok());
    }

    #[test]
    fn test_text_header_layout() {
        let header = Header::name("A");
        // id + 2-byte length + one UTF-16 unit + terminator
        assert_eq!(header.to_bytes(), vec![0x01, 0x00, 0x07, 0x00, 0x41, 0x00, 0x00]);
        assert_eq!(header.encoded_len(), 7);
    }

    #[test]
    fn test_empty_text_header_layout() {
        let header = Header::name("");
        // Payload is just the terminator.
        assert_eq!(header.to_bytes(), vec![0x01, 0x00, 0x05, 0x00, 0x00]);
    }

    #[test]
    fn test_byte_seq_header_layout() {
        let header = Header::body(vec![0xde, 0xad]);
        assert_eq!(header.to_bytes(), vec![0x48, 0x00, 0x05, 0xde, 0xad]);
    }

    #[test]
    fn test_fixed_size_header_layout() {
        let header = Header::connection_id(0x1234);
        assert_eq!(header.to_bytes(), vec![0xcb, 0x00, 0x00, 0x12, 0x34]);
        assert_eq!(header.encoded_len(), 5);

        let header = Header::new(HeaderId::Other(0x97), HeaderValue::Byte(0x05)).unwrap();
        assert_eq!(header.to_bytes(), vec![0x97, 0x05]);
        assert_eq!(header.encoded_len(), 2);
    }

    #[test]
    fn test_decode_roundtrip_boundaries() {
        let cases = vec![
            Header::count(0),
            Header::count(u32::MAX),
            Header::name(""),
            Header::name("VERY-LONG-NAME-".repeat(40)),
            Header::body(vec![]),
            Header::body(vec![0xff; 4096]),
            Header::new(HeaderId::Other(0x90), HeaderValue::Byte(0)).unwrap(),
            Header::new(HeaderId::Other(0x90), HeaderValue::Byte(u8::MAX)).unwrap(),
            Header::connection_id(1),
        ];
        for original in cases {
            let bytes = original.to_bytes();
            let (decoded, next) = Header::decode_at(&bytes, 0).unwrap();
            assert_eq!(decoded, original);
            assert_eq!(next, bytes.len());
        }
    }

    #[test]
    fn test_decode_at_offset() {
        let mut buf = Header::count(7).to_bytes();
        let second = Header::name("x");
        buf.extend_from_slice(&second.to_bytes());

        let (first, next) = Header::decode_at(&buf, 0).unwrap();
        assert_eq!(first, Header::count(7));
        let (decoded, end) = Header::decode_at(&buf, next).unwrap();
        assert_eq!(decoded, second);
        assert_eq!(end, buf.len());
    }

    #[test]
    fn test_decode_all() {
        let mut buf = Vec::new();
        Header::connection_id(9).encode_into(&mut buf);
        Header::name("f").encode_into(&mut buf);
        Header::end_of_body(vec![1, 2, 3]).encode_into(&mut buf);

        let headers = Header::decode_all(&buf, 0).unwrap();
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0].id(), HeaderId::ConnectionId);
        assert_eq!(headers[2].as_bytes(), Some(&[1u8, 2, 3][..]));
    }

    #[test]
    fn test_decode_underlength_is_error() {
        // Declared total below the 3-byte minimum.
        let buf = [0x48, 0x00, 0x02];
        assert_matches!(
            Header::decode_at(&buf, 0),
            Err(ObexError::MalformedHeader(_))
        );
    }

    #[test]
    fn test_decode_overlength_is_error() {
        // Declared total exceeds the remaining buffer.
        let buf = [0x48, 0x00, 0x0a, 0x01, 0x02];
        assert_matches!(
            Header::decode_at(&buf, 0),
            Err(ObexError::MalformedHeader(_))
        );
    }

    #[test]
    fn test_decode_truncated_fixed_is_error() {
        assert_matches!(
            Header::decode_at(&[0xcb, 0x00, 0x00], 0),
            Err(ObexError::MalformedHeader(_))
        );
        assert_matches!(
            Header::decode_at(&[0x90], 0),
            Err(ObexError::MalformedHeader(_))
        );
    }

    proptest! {
        #[test]
        fn prop_quad_header_roundtrip(n in any::<u32>()) {
            let header = Header::count(n);
            let bytes = header.to_bytes();
            let (decoded, next) = Header::decode_at(&bytes, 0).unwrap();
            prop_assert_eq!(decoded, header);
            prop_assert_eq!(next, bytes.len());
        }

        #[test]
        fn prop_text_header_roundtrip(s in "\\PC{0,64}") {
            let header = Header::name(s);
            let bytes = header.to_bytes();
            let (decoded, _) = Header::decode_at(&bytes, 0).unwrap();
            prop_assert_eq!(decoded, header);
        }

        #[test]
        fn prop_byte_seq_header_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let header = Header::body(data);
            let bytes = header.to_bytes();
            let (decoded, _) = Header::decode_at(&bytes, 0).unwrap();
            prop_assert_eq!(decoded, header);
        }
    }
}
