//! OBEX session state machines and exchange lifecycle.
//!
//! A session is a pure, I/O-free state machine for one logical OBEX
//! connection: the embedding application owns the transport, calls `input`
//! with newly received bytes, and writes any returned packet back to the
//! wire. Exactly one request is outstanding per session at any time.
//!
//! # Exchange Flow
//!
//! ```text
//! Client                               Server
//!    |                                    |
//!    |----- CONNECT (proposed MTU) ----->|  Issue Connection Id,
//!    |<---- 0xA0 (negotiated MTU, id) ---|  negotiate min(client, server)
//!    |                                    |
//!    |----- PUT fragment (final=0) ----->|  Accumulate headers,
//!    |<---- 0x90 Continue ---------------|  auto-acknowledge
//!    |----- PUT fragment (final=1) ----->|  Hand request to application
//!    |<---- 0xA0 Success ----------------|
//!    |                                    |
//!    |----- DISCONNECT ----------------->|  Clear id, revert MTU
//!    |<---- 0xA0 Success ----------------|
//! ```
//!
//! # State Machines
//!
//! | Client state | Meaning                          | Transitions          |
//! |--------------|----------------------------------|----------------------|
//! | `Idle`       | Operations may be issued         | → Busy               |
//! | `Busy`       | One request outstanding          | → Idle, Error        |
//! | `Error`      | Terminal until `reset()`         | → Idle (reset)       |
//!
//! | Server state | Meaning                          | Transitions          |
//! |--------------|----------------------------------|----------------------|
//! | `Idle`       | No request in flight             | → Request            |
//! | `Request`    | Accumulating request fragments   | → Respond, Error     |
//! | `Respond`    | Application reply pending        | → Idle, Error        |
//! | `Error`      | Terminal until `reset()`         | → Idle (reset)       |
//!
//! CONNECT, DISCONNECT, ABORT, and SETPATH are single-packet-only in both
//! directions; PUT and GET continue across packets under the `0x90` status
//! until the final bit (requests) or a final status (responses) ends the
//! exchange.

pub mod assemble;
mod client;
mod server;

pub use assemble::{assemble_body, split_content, CONNECTION_ID_HEADER_LEN};
pub use client::{ClientEvent, ClientSession, ClientState};
pub use server::{
    ConnectionIdCounter, ConnectionIdSource, ServerEvent, ServerSession, ServerState,
};

/// The protocol's safe default max packet length, in effect until CONNECT
/// negotiates a larger one and again after DISCONNECT.
pub const DEFAULT_MAX_PACKET_LEN: u16 = 255;

/// Max packet length proposed (client) or offered (server) at CONNECT by
/// default.
pub const DEFAULT_PROPOSED_MAX_LEN: u16 = 8192;
