//! # OBEX Core - Object Exchange Protocol Engine
//!
//! Transport-agnostic implementation of OBEX (Object Exchange), the compact
//! binary request/response protocol for transferring objects over a
//! reliable, ordered byte stream (historically Bluetooth RFCOMM).
//!
//! ## Features
//!
//! - **Bit-exact codec**: typed headers, opcode-specific fixed fields,
//!   big-endian wire layout, explicit UTF-16BE text conversion
//! - **Streaming decode**: incremental frame detection reports `Incomplete`
//!   instead of erroring on short reads
//! - **Fragmentation**: multi-packet PUT/GET bodies split to the negotiated
//!   max packet length, Connection Id always carried first
//! - **Session discipline**: strict single-outstanding-request state
//!   machines for both roles, with explicit error/recovery states
//!
//! ## Protocol Overview
//!
//! Every packet opens with a one-byte opcode (requests) or response code
//! (responses) and a two-byte big-endian length covering the whole packet.
//! The high bit of the opcode marks the final fragment of a request; for
//! responses, any code other than `0x90` Continue is implicitly final.
//! Headers are typed `(id, value)` pairs whose wire layout is selected by
//! the upper 2 bits of the id:
//!
//! | Encoding bits | Layout                                    | Example        |
//! |---------------|-------------------------------------------|----------------|
//! | `00`          | UTF-16BE text, length-prefixed, NUL-ended | `Name` (0x01)  |
//! | `01`          | Byte sequence, length-prefixed            | `Body` (0x48)  |
//! | `10`          | Single byte, fixed 2-byte total           | user-defined   |
//! | `11`          | u32 big-endian, fixed 5-byte total        | `Length` (0xC3)|
//!
//! A CONNECT exchange negotiates the max packet length (`min` of the two
//! sides) and issues a 32-bit Connection Id that rides every subsequent
//! packet until DISCONNECT reverts the session to the 255-byte default.
//!
//! ## Quick Start
//!
//! ### Client
//!
//! ```rust,ignore
//! use obex::{ClientEvent, ClientSession, Header};
//!
//! let mut client = ClientSession::new();
//!
//! // Issue CONNECT; write the returned bytes to the transport.
//! let packet = client.connect(vec![])?;
//! transport.write_all(&packet)?;
//!
//! // Drive the exchange with received bytes.
//! loop {
//!     let received = transport.read(&mut buf)?;
//!     match client.input(&buf[..received])? {
//!         ClientEvent::Continue { packet: Some(next) } => transport.write_all(&next)?,
//!         ClientEvent::Continue { packet: None } => continue,
//!         ClientEvent::Done => break,
//!         ClientEvent::Failed => return Err(/* client.last_status() */),
//!     }
//! }
//!
//! // Transfer an object, fragmented automatically.
//! let packet = client.put(b"hello, obex", vec![Header::name("hello.txt")])?;
//! ```
//!
//! ### Server
//!
//! ```rust,ignore
//! use obex::{OpCode, ResponseCode, ServerEvent, ServerSession};
//!
//! let mut server = ServerSession::new();
//!
//! match server.input(&received)? {
//!     ServerEvent::Request(OpCode::Connect) => {
//!         let reply = server.respond(ResponseCode::SUCCESS, vec![])?;
//!         transport.write_all(&reply)?;
//!     }
//!     ServerEvent::Request(OpCode::Get) => {
//!         let reply = server.respond_content(&object, vec![])?;
//!         transport.write_all(&reply)?;
//!     }
//!     ServerEvent::Continue { packet: Some(ack) } => transport.write_all(&ack)?,
//!     _ => {}
//! }
//! ```
//!
//! ## Concurrency Model
//!
//! The engine performs no I/O and never blocks: it is driven synchronously
//! by the embedding application, which owns the transport and any timeout
//! policy. Sessions share no mutable state; run one session per logical
//! connection. The transport must deliver bytes exactly once, in order
//! (RFCOMM and TCP both qualify).
//!
//! ## Modules
//!
//! - [`codec`]: header/packet wire codec and streaming frame detection
//! - [`protocol`]: client and server session state machines
//! - [`error`]: error types and result alias

pub mod codec;
pub mod error;
pub mod protocol;

// Re-exports for convenience
pub use codec::{
    packet_complete, packet_length, ConnectFields, Decoded, FrameBuffer, Header, HeaderEncoding,
    HeaderId, HeaderValue, ObexVersion, OpCode, RequestPacket, ResponseCode, ResponsePacket,
    SetPathFlags, StatusCategory,
};
pub use error::{ObexError, Result};
pub use protocol::{
    assemble_body, ClientEvent, ClientSession, ClientState, ConnectionIdCounter,
    ConnectionIdSource, ServerEvent, ServerSession, ServerState, DEFAULT_MAX_PACKET_LEN,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// OBEX protocol version spoken by this engine, as the packed wire byte.
pub const PROTOCOL_VERSION: u8 = 0x10;
