//! Header budgeting and content fragmentation, shared by both session roles.
//!
//! A packet may spend at most `max_packet_len` bytes. After the prefix and
//! any fixed fields, the remaining budget is filled from the front of the
//! pending-header queue in original order; the active Connection Id header
//! is always placed first and is never deferred to a continuation packet.

use std::collections::VecDeque;

use crate::codec::header::{Header, HeaderId, HEADER_PREFIX_LEN};
use crate::codec::packet::PACKET_PREFIX_LEN;
use crate::error::{ObexError, Result};

/// Encoded size of a Connection Id header (id + 4-byte value).
pub const CONNECTION_ID_HEADER_LEN: usize = 5;

/// Byte budget left for headers once the packet prefix and `fixed_len`
/// bytes of fixed fields are accounted for.
pub fn header_budget(max_packet_len: u16, fixed_len: usize) -> usize {
    (max_packet_len as usize).saturating_sub(PACKET_PREFIX_LEN + fixed_len)
}

/// Pop headers from the front of `pending` until the next one would not fit
/// `budget`, prepending the active Connection Id header.
///
/// Fatal overflows, which must move the session to its error state:
/// - the Connection Id header alone does not fit;
/// - the first user header of this packet does not fit (a single header must
///   never exceed the negotiated packet size);
/// - `single_packet` is set and the queue is not drained by this pass.
pub fn take_fitting(
    pending: &mut VecDeque<Header>,
    budget: usize,
    connection_id: Option<u32>,
    single_packet: bool,
) -> Result<Vec<Header>> {
    let mut taken = Vec::new();
    let mut used = 0usize;

    if let Some(id) = connection_id {
        let header = Header::connection_id(id);
        used += header.encoded_len();
        if used > budget {
            return Err(ObexError::EncodingOverflow(
                "Connection id header alone exceeds the packet budget".to_string(),
            ));
        }
        taken.push(header);
    }
    let reserved = taken.len();

    while let Some(next) = pending.front() {
        let len = next.encoded_len();
        if used + len > budget {
            break;
        }
        used += len;
        let header = pending.pop_front().expect("front checked");
        taken.push(header);
    }

    if taken.len() == reserved && !pending.is_empty() {
        return Err(ObexError::EncodingOverflow(format!(
            "Header 0x{:02x} of {} bytes exceeds the {}-byte packet budget",
            pending.front().expect("non-empty").id().as_byte(),
            pending.front().expect("non-empty").encoded_len(),
            budget
        )));
    }
    if single_packet && !pending.is_empty() {
        return Err(ObexError::EncodingOverflow(format!(
            "{} header(s) left over for a single-packet operation",
            pending.len()
        )));
    }
    Ok(taken)
}

/// Split `content` into successive `Body` chunks sized to the per-packet
/// budget, closing with an `EndOfBody` chunk that marks completion.
///
/// The per-chunk budget is the negotiated max packet length minus the packet
/// prefix, the Connection Id header when one is active, and the chunk's own
/// header overhead. Empty content yields a single empty `EndOfBody`.
pub fn split_content(
    content: &[u8],
    max_packet_len: u16,
    connection_id_active: bool,
) -> Result<Vec<Header>> {
    let overhead = PACKET_PREFIX_LEN
        + if connection_id_active { CONNECTION_ID_HEADER_LEN } else { 0 }
        + HEADER_PREFIX_LEN;
    let chunk_len = (max_packet_len as usize).saturating_sub(overhead);
    if chunk_len == 0 {
        return Err(ObexError::EncodingOverflow(format!(
            "Max packet length {max_packet_len} leaves no room for content"
        )));
    }

    if content.is_empty() {
        return Ok(vec![Header::end_of_body(Vec::new())]);
    }

    let mut chunks = content.chunks(chunk_len).peekable();
    let mut headers = Vec::with_capacity((content.len() + chunk_len - 1) / chunk_len);
    while let Some(chunk) = chunks.next() {
        if chunks.peek().is_some() {
            headers.push(Header::body(chunk.to_vec()));
        } else {
            headers.push(Header::end_of_body(chunk.to_vec()));
        }
    }
    Ok(headers)
}

/// Concatenate the payloads of all `Body` chunks plus the final `EndOfBody`
/// chunk, in order, reproducing the transferred content.
pub fn assemble_body(headers: &[Header]) -> Vec<u8> {
    headers
        .iter()
        .filter(|h| matches!(h.id(), HeaderId::Body | HeaderId::EndOfBody))
        .flat_map(|h| h.as_bytes().unwrap_or(&[]).iter().copied())
        .collect()
}
