//! OBEX protocol error types.
//!
//! Note that an incomplete packet is *not* an error: stream-based decoding
//! reports "need more bytes" through [`Decoded::Incomplete`], and the
//! session `input` entry points return a `Continue` event. The variants here
//! cover conditions that are terminal to the current decode or request.
//!
//! [`Decoded::Incomplete`]: crate::codec::Decoded::Incomplete

use thiserror::Error;

/// OBEX protocol errors.
#[derive(Error, Debug)]
pub enum ObexError {
    /// A header's declared length is below the type's minimum or exceeds the
    /// remaining buffer.
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// A decoded structure is internally inconsistent (size mismatch,
    /// malformed fixed fields, unexpected opcode).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A session operation was invoked outside its required state.
    #[error("Illegal state: {0}")]
    IllegalState(String),

    /// Required headers (including an active Connection Id) cannot fit a
    /// single mandatory packet. The session transitions to its error state
    /// and must be `reset()` before further use.
    #[error("Encoding overflow: {0}")]
    EncodingOverflow(String),

    /// The server's connection-id space would wrap past the 32-bit range.
    #[error("Connection id space exhausted")]
    ConnectionIdExhausted,
}

/// Result type alias for OBEX operations
pub type Result<T> = std::result::Result<T, ObexError>;
