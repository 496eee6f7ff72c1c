//! UTF-16 big-endian text conversion for OBEX unicode headers.
//!
//! OBEX text headers are always transmitted as null-terminated UTF-16 in
//! network (big-endian) byte order, regardless of the host platform. The
//! conversions here are explicit per-unit operations, so no branch on host
//! endianness is needed.

use crate::error::{ObexError, Result};

/// Encode `text` as UTF-16BE with a trailing `0x0000` terminator.
pub fn to_unicode_be(text: &str) -> Vec<u8> {
    let mut buf = Vec::with_capacity(text.len() * 2 + 2);
    for unit in text.encode_utf16() {
        buf.extend_from_slice(&unit.to_be_bytes());
    }
    buf.extend_from_slice(&[0x00, 0x00]);
    buf
}

/// Decode a null-terminated UTF-16BE payload.
///
/// An empty payload decodes to the empty string. A non-empty payload must
/// carry even length, valid UTF-16, and the `0x0000` terminator, which is
/// stripped from the result.
pub fn from_unicode_be(buf: &[u8]) -> Result<String> {
    if buf.is_empty() {
        return Ok(String::new());
    }
    if buf.len() % 2 != 0 {
        return Err(ObexError::MalformedHeader(format!(
            "Unicode payload has odd length {}",
            buf.len()
        )));
    }

    let units: Vec<u16> = buf
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    let mut text = String::from_utf16(&units)
        .map_err(|e| ObexError::MalformedHeader(format!("Invalid UTF-16: {e}")))?;

    if !text.ends_with('\0') {
        return Err(ObexError::MalformedHeader(
            "Unicode text missing null terminator".to_string(),
        ));
    }
    let _ = text.pop();
    Ok(text)
}
