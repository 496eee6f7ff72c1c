//! OBEX server session state machine.
//!
//! The server mirrors the client: it accumulates one request at a time
//! (auto-acknowledging non-final fragments with a Continue status), hands
//! the completed request to the application, and encodes the application's
//! reply, issuing Connection Ids and negotiating the packet length on
//! CONNECT.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::codec::framing::FrameBuffer;
use crate::codec::header::Header;
use crate::codec::packet::{
    ConnectFields, Decoded, ObexVersion, OpCode, RequestFields, RequestPacket, ResponseCode,
    ResponsePacket, SetPathFlags, CONNECT_FIELDS_LEN,
};
use crate::error::{ObexError, Result};
use crate::protocol::assemble::{self, header_budget};
use crate::protocol::{DEFAULT_MAX_PACKET_LEN, DEFAULT_PROPOSED_MAX_LEN};

/// Server session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerState {
    /// No request in flight.
    Idle,
    /// Accumulating the fragments of a request.
    Request,
    /// A complete request awaits the application's reply.
    Respond,
    /// A fatal condition occurred; `reset` is required.
    Error,
}

/// Outcome of feeding received bytes to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// The exchange continues. When `packet` is set (a Continue
    /// acknowledgement or a queued reply fragment), write it to the
    /// transport before reading more bytes.
    Continue {
        /// Next outbound packet, if one is due.
        packet: Option<Vec<u8>>,
    },
    /// A complete request is ready; inspect the accumulated headers and
    /// call [`respond`](ServerSession::respond) or
    /// [`respond_content`](ServerSession::respond_content).
    Request(OpCode),
    /// The peer aborted the outstanding exchange. When `packet` is set it
    /// acknowledges the abort; the session requires `reset`.
    Failed {
        /// Abort acknowledgement to write, if any.
        packet: Option<Vec<u8>>,
    },
}

/// Source of Connection Ids handed out on successful CONNECT.
///
/// Injected at construction so tests can pin the sequence. `None` means the
/// id space is exhausted, which is fatal to the session.
pub trait ConnectionIdSource: std::fmt::Debug {
    /// Produce the next id, or `None` when the space would wrap.
    fn next_id(&mut self) -> Option<u32>;
}

/// Default monotonic Connection Id counter.
#[derive(Debug)]
pub struct ConnectionIdCounter {
    next: u64,
}

impl ConnectionIdCounter {
    /// Start counting from 1.
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Start counting from `first`.
    pub fn starting_at(first: u32) -> Self {
        Self { next: u64::from(first) }
    }
}

impl Default for ConnectionIdCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionIdSource for ConnectionIdCounter {
    fn next_id(&mut self) -> Option<u32> {
        if self.next > u64::from(u32::MAX) {
            return None;
        }
        let id = self.next as u32;
        self.next += 1;
        Some(id)
    }
}

/// The responding side of an OBEX exchange.
#[derive(Debug)]
pub struct ServerSession {
    state: ServerState,
    max_packet_len: u16,
    capability_max_len: u16,
    connection_id: Option<u32>,
    ids: Box<dyn ConnectionIdSource>,
    current_op: Option<OpCode>,
    client_proposed: Option<u16>,
    peer_version: Option<ObexVersion>,
    setpath_flags: Option<SetPathFlags>,
    in_headers: Vec<Header>,
    out_headers: VecDeque<Header>,
    framing: FrameBuffer,
}

impl Default for ServerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerSession {
    /// Create an idle session with the default id counter.
    pub fn new() -> Self {
        Self::with_id_source(ConnectionIdCounter::new())
    }

    /// Create an idle session drawing Connection Ids from `ids`.
    pub fn with_id_source(ids: impl ConnectionIdSource + 'static) -> Self {
        Self {
            state: ServerState::Idle,
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
            capability_max_len: DEFAULT_PROPOSED_MAX_LEN,
            connection_id: None,
            ids: Box::new(ids),
            current_op: None,
            client_proposed: None,
            peer_version: None,
            setpath_flags: None,
            in_headers: Vec::new(),
            out_headers: VecDeque::new(),
            framing: FrameBuffer::new(),
        }
    }

    /// Override the max packet length this server is willing to negotiate.
    pub fn with_capability_max_len(mut self, len: u16) -> Self {
        self.capability_max_len = len;
        self
    }

    /// Current state.
    pub fn state(&self) -> ServerState {
        self.state
    }

    /// The negotiated max packet length.
    pub fn max_packet_len(&self) -> u16 {
        self.max_packet_len
    }

    /// The Connection Id issued at CONNECT, while active.
    pub fn connection_id(&self) -> Option<u32> {
        self.connection_id
    }

    /// The operation awaiting a reply, while in `Respond`.
    pub fn current_operation(&self) -> Option<OpCode> {
        self.current_op
    }

    /// The client's OBEX version, learned from the CONNECT request.
    pub fn peer_version(&self) -> Option<ObexVersion> {
        self.peer_version
    }

    /// Navigation flags of the pending SETPATH request.
    pub fn setpath_flags(&self) -> Option<SetPathFlags> {
        self.setpath_flags
    }

    /// Headers accumulated from the current request, across all fragments.
    pub fn request_headers(&self) -> &[Header] {
        &self.in_headers
    }

    /// Drain the accumulated request headers.
    pub fn take_request_headers(&mut self) -> Vec<Header> {
        std::mem::take(&mut self.in_headers)
    }

    /// Content carried by accumulated `Body`/`EndOfBody` headers, typically
    /// the object transferred by a PUT.
    pub fn received_content(&self) -> Vec<u8> {
        assemble::assemble_body(&self.in_headers)
    }

    /// Restore an idle session, clearing all per-connection state.
    pub fn reset(&mut self) {
        debug!("Server session reset");
        self.state = ServerState::Idle;
        self.max_packet_len = DEFAULT_MAX_PACKET_LEN;
        self.connection_id = None;
        self.current_op = None;
        self.client_proposed = None;
        self.peer_version = None;
        self.setpath_flags = None;
        self.in_headers.clear();
        self.out_headers.clear();
        self.framing.clear();
    }

    /// Feed bytes received from the transport.
    ///
    /// While receiving, non-final request fragments are acknowledged with a
    /// Continue packet automatically. A final fragment surfaces
    /// [`ServerEvent::Request`] so the application can reply. While a queued
    /// multi-packet reply is draining, each further request packet of the
    /// same operation pulls the next fragment.
    pub fn input(&mut self, bytes: &[u8]) -> Result<ServerEvent> {
        if self.state == ServerState::Error {
            return Err(ObexError::IllegalState(
                "Session is in the error state and requires reset".to_string(),
            ));
        }

        self.framing.feed(bytes);
        let packet = match self.framing.take_packet() {
            Some(packet) => packet,
            None => return Ok(ServerEvent::Continue { packet: None }),
        };

        let request = match RequestPacket::decode(&packet) {
            Ok(Decoded::Packet(request)) => request,
            Ok(Decoded::Incomplete) => return Ok(ServerEvent::Continue { packet: None }),
            Err(e) => return Err(self.raise(e)),
        };
        trace!(
            operation = request.opcode.name(),
            is_final = request.is_final,
            headers = request.headers.len(),
            "Server received request packet"
        );

        match self.state {
            ServerState::Idle | ServerState::Request => self.receive_fragment(request),
            ServerState::Respond => self.drive_response(request),
            ServerState::Error => unreachable!("rejected above"),
        }
    }

    /// Reply to the pending request with `status` and `headers`.
    ///
    /// Single-packet only: headers that do not fit the negotiated length are
    /// a fatal overflow. CONNECT and DISCONNECT successes additionally
    /// manage the Connection Id and the negotiated length.
    pub fn respond(&mut self, status: ResponseCode, headers: Vec<Header>) -> Result<Vec<u8>> {
        let op = self.expect_respond("respond")?;
        self.in_headers.clear();

        if op == OpCode::Connect {
            return self.respond_connect(status, headers);
        }

        self.out_headers = headers.into();
        let budget = header_budget(self.max_packet_len, 0);
        let taken = self.take(budget, self.connection_id, true)?;
        let packet = ResponsePacket::new(status, taken).to_bytes();

        if op == OpCode::Disconnect && status.is_success() {
            // The disconnect response is the last packet of this connection.
            debug!(connection_id = ?self.connection_id, "Server disconnected");
            self.connection_id = None;
            self.max_packet_len = DEFAULT_MAX_PACKET_LEN;
        }
        self.complete();
        Ok(packet)
    }

    /// Reply to the pending request with `content`, fragmented into
    /// `Body`/`EndOfBody` chunks across as many packets as needed.
    ///
    /// Returns the first reply packet; subsequent request packets of the
    /// same operation (fed through [`input`](ServerSession::input)) pull the
    /// remaining fragments.
    pub fn respond_content(&mut self, content: &[u8], headers: Vec<Header>) -> Result<Vec<u8>> {
        let op = self.expect_respond("respond_content")?;
        if op.is_single_packet() {
            return Err(self.raise(ObexError::Protocol(format!(
                "{} responses cannot carry continued content",
                op.name()
            ))));
        }
        self.in_headers.clear();

        let chunks =
            match assemble::split_content(content, self.max_packet_len, self.connection_id.is_some())
            {
                Ok(chunks) => chunks,
                Err(e) => return Err(self.raise(e)),
            };
        self.out_headers = headers.into_iter().chain(chunks).collect();
        self.next_response_packet()
    }

    fn receive_fragment(&mut self, request: RequestPacket) -> Result<ServerEvent> {
        if self.state == ServerState::Idle {
            // First fragment of a new request: clear the per-request
            // accumulators.
            self.state = ServerState::Request;
            self.current_op = Some(request.opcode);
            self.in_headers.clear();
            self.setpath_flags = None;
        } else if self.current_op != Some(request.opcode) {
            return Err(self.raise(ObexError::Protocol(format!(
                "Fragment opcode {} does not match the {} in progress",
                request.opcode.name(),
                self.current_op.map_or("none", |op| op.name())
            ))));
        }

        match request.fields {
            RequestFields::Connect(fields) => {
                self.client_proposed = Some(fields.max_packet_len);
                self.peer_version = Some(fields.version);
            }
            RequestFields::SetPath { flags, .. } => self.setpath_flags = Some(flags),
            RequestFields::None => {}
        }
        self.note_connection_id(&request.headers);
        self.in_headers.extend(request.headers);

        if request.is_final {
            self.state = ServerState::Respond;
            trace!(operation = request.opcode.name(), "Request complete, awaiting reply");
            return Ok(ServerEvent::Request(request.opcode));
        }

        // Multipart request: acknowledge the fragment and keep receiving.
        let ack = self.continue_ack()?;
        Ok(ServerEvent::Continue { packet: Some(ack) })
    }

    fn drive_response(&mut self, request: RequestPacket) -> Result<ServerEvent> {
        if request.opcode == OpCode::Abort {
            debug!("Peer aborted the exchange");
            let ack = ResponsePacket::new(ResponseCode::SUCCESS, vec![]).to_bytes();
            self.state = ServerState::Error;
            return Ok(ServerEvent::Failed { packet: Some(ack) });
        }
        if Some(request.opcode) != self.current_op {
            return Err(self.raise(ObexError::Protocol(format!(
                "Expected {} to continue, got {}",
                self.current_op.map_or("none", |op| op.name()),
                request.opcode.name()
            ))));
        }
        if self.out_headers.is_empty() {
            return Err(self.raise(ObexError::Protocol(
                "Peer continued an exchange with no reply queued".to_string(),
            )));
        }
        let packet = self.next_response_packet()?;
        Ok(ServerEvent::Continue { packet: Some(packet) })
    }

    fn respond_connect(&mut self, status: ResponseCode, headers: Vec<Header>) -> Result<Vec<u8>> {
        let mut negotiated = self.max_packet_len;
        if status.is_success() {
            let id = match self.ids.next_id() {
                Some(id) => id,
                None => return Err(self.raise(ObexError::ConnectionIdExhausted)),
            };
            negotiated = self
                .client_proposed
                .unwrap_or(DEFAULT_MAX_PACKET_LEN)
                .min(self.capability_max_len);
            self.connection_id = Some(id);
            self.max_packet_len = negotiated;
            debug!(connection_id = id, max_packet_len = negotiated, "Server connected");
        }

        self.out_headers = headers.into();
        let budget = header_budget(negotiated, CONNECT_FIELDS_LEN);
        let taken = self.take(budget, self.connection_id, true)?;
        let packet = ResponsePacket::connect(
            status,
            ConnectFields { version: ObexVersion::V1_0, flags: 0, max_packet_len: negotiated },
            taken,
        )
        .to_bytes();
        self.complete();
        Ok(packet)
    }

    /// Assemble the next reply fragment from the queued headers.
    fn next_response_packet(&mut self) -> Result<Vec<u8>> {
        let budget = header_budget(self.max_packet_len, 0);
        let taken = self.take(budget, self.connection_id, false)?;
        if self.out_headers.is_empty() {
            let packet = ResponsePacket::new(ResponseCode::SUCCESS, taken).to_bytes();
            self.complete();
            Ok(packet)
        } else {
            Ok(ResponsePacket::new(ResponseCode::CONTINUE, taken).to_bytes())
        }
    }

    fn continue_ack(&mut self) -> Result<Vec<u8>> {
        let mut empty = VecDeque::new();
        let budget = header_budget(self.max_packet_len, 0);
        let taken =
            match assemble::take_fitting(&mut empty, budget, self.connection_id, true) {
                Ok(taken) => taken,
                Err(e) => return Err(self.raise(e)),
            };
        Ok(ResponsePacket::new(ResponseCode::CONTINUE, taken).to_bytes())
    }

    fn note_connection_id(&mut self, headers: &[Header]) {
        if let Some(active) = self.connection_id {
            let incoming = headers
                .iter()
                .find(|h| h.id() == crate::codec::HeaderId::ConnectionId)
                .and_then(Header::as_quad);
            if let Some(incoming) = incoming {
                if incoming != active {
                    // Mismatches are tolerated; make them visible in traces.
                    debug!(incoming, active, "Connection id mismatch ignored");
                }
            }
        }
    }

    fn expect_respond(&mut self, what: &str) -> Result<OpCode> {
        if self.state != ServerState::Respond {
            return Err(ObexError::IllegalState(format!(
                "{} requires a pending request, state is {:?}",
                what, self.state
            )));
        }
        Ok(self.current_op.expect("respond state has an operation"))
    }

    fn take(
        &mut self,
        budget: usize,
        connection_id: Option<u32>,
        single_packet: bool,
    ) -> Result<Vec<Header>> {
        match assemble::take_fitting(&mut self.out_headers, budget, connection_id, single_packet) {
            Ok(taken) => Ok(taken),
            Err(e) => Err(self.raise(e)),
        }
    }

    fn complete(&mut self) {
        self.state = ServerState::Idle;
        self.current_op = None;
    }

    fn raise(&mut self, err: ObexError) -> ObexError {
        debug!(error = %err, "Server session error");
        self.state = ServerState::Error;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::HeaderId;
    use assert_matches::assert_matches;

    fn connect_request(max_len: u16) -> Vec<u8> {
        RequestPacket::new(
            OpCode::Connect,
            true,
            RequestFields::Connect(ConnectFields {
                version: ObexVersion::V1_0,
                flags: 0,
                max_packet_len: max_len,
            }),
            vec![],
        )
        .to_bytes()
    }

    fn connected_server() -> ServerSession {
        let mut server = ServerSession::new();
        let event = server.input(&connect_request(2048)).unwrap();
        assert_eq!(event, ServerEvent::Request(OpCode::Connect));
        let _ = server.respond(ResponseCode::SUCCESS, vec![]).unwrap();
        assert_eq!(server.state(), ServerState::Idle);
        server
    }

    #[test]
    fn test_connect_issues_id_and_negotiates_min() {
        let mut server = ServerSession::new().with_capability_max_len(4096);
        let event = server.input(&connect_request(2048)).unwrap();
        assert_eq!(event, ServerEvent::Request(OpCode::Connect));
        assert_eq!(server.peer_version(), Some(ObexVersion::V1_0));

        let packet = server.respond(ResponseCode::SUCCESS, vec![]).unwrap();
        assert_eq!(server.connection_id(), Some(1));
        assert_eq!(server.max_packet_len(), 2048);

        // The response carries the fixed fields and the issued id.
        let decoded = ResponsePacket::decode(&packet, true).unwrap();
        let response = match decoded {
            Decoded::Packet(p) => p,
            Decoded::Incomplete => panic!("whole packet expected"),
        };
        assert_eq!(response.connect.unwrap().max_packet_len, 2048);
        assert_eq!(response.headers[0], Header::connection_id(1));
    }

    #[test]
    fn test_connect_failure_issues_no_id() {
        let mut server = ServerSession::new();
        let _ = server.input(&connect_request(2048)).unwrap();
        let packet = server.respond(ResponseCode::FORBIDDEN, vec![]).unwrap();
        assert_eq!(server.connection_id(), None);
        assert_eq!(server.max_packet_len(), DEFAULT_MAX_PACKET_LEN);
        assert_eq!(packet[0], 0xC3);
    }

    #[test]
    fn test_id_exhaustion_is_fatal() {
        #[derive(Debug)]
        struct Exhausted;
        impl ConnectionIdSource for Exhausted {
            fn next_id(&mut self) -> Option<u32> {
                None
            }
        }
        let mut server = ServerSession::with_id_source(Exhausted);
        let _ = server.input(&connect_request(512)).unwrap();
        assert_matches!(
            server.respond(ResponseCode::SUCCESS, vec![]),
            Err(ObexError::ConnectionIdExhausted)
        );
        assert_eq!(server.state(), ServerState::Error);
    }

    #[test]
    fn test_counter_stops_at_u32_range() {
        let mut counter = ConnectionIdCounter::starting_at(u32::MAX);
        assert_eq!(counter.next_id(), Some(u32::MAX));
        assert_eq!(counter.next_id(), None);
    }

    #[test]
    fn test_respond_requires_pending_request() {
        let mut server = ServerSession::new();
        assert_matches!(
            server.respond(ResponseCode::SUCCESS, vec![]),
            Err(ObexError::IllegalState(_))
        );
        assert_matches!(
            server.respond_content(b"x", vec![]),
            Err(ObexError::IllegalState(_))
        );
    }

    #[test]
    fn test_two_fragment_put_accumulates_headers() {
        let mut server = connected_server();

        let first = RequestPacket::new(
            OpCode::Put,
            false,
            RequestFields::None,
            vec![Header::name("notes.txt"), Header::body(vec![1, 2, 3])],
        );
        let event = server.input(&first.to_bytes()).unwrap();
        let ack = match event {
            ServerEvent::Continue { packet: Some(ack) } => ack,
            other => panic!("expected continue ack, got {other:?}"),
        };
        assert_eq!(ack[0], 0x90);
        assert_eq!(server.state(), ServerState::Request);

        let second = RequestPacket::new(
            OpCode::Put,
            true,
            RequestFields::None,
            vec![Header::end_of_body(vec![4, 5])],
        );
        let event = server.input(&second.to_bytes()).unwrap();
        assert_eq!(event, ServerEvent::Request(OpCode::Put));
        assert_eq!(server.state(), ServerState::Respond);
        assert_eq!(server.received_content(), vec![1, 2, 3, 4, 5]);
        assert_eq!(server.request_headers()[0].id(), HeaderId::Name);

        let reply = server.respond(ResponseCode::SUCCESS, vec![]).unwrap();
        assert_eq!(reply[0], 0xA0);
        assert_eq!(server.state(), ServerState::Idle);
    }

    #[test]
    fn test_fragment_opcode_mismatch_is_protocol_error() {
        let mut server = connected_server();
        let first = RequestPacket::new(
            OpCode::Put,
            false,
            RequestFields::None,
            vec![Header::body(vec![0])],
        );
        let _ = server.input(&first.to_bytes()).unwrap();

        let stray = RequestPacket::new(OpCode::Get, true, RequestFields::None, vec![]);
        assert_matches!(server.input(&stray.to_bytes()), Err(ObexError::Protocol(_)));
        assert_eq!(server.state(), ServerState::Error);
    }

    #[test]
    fn test_respond_content_streams_fragments() {
        let mut server = connected_server();
        assert_eq!(server.max_packet_len(), 2048);

        let get = RequestPacket::new(OpCode::Get, true, RequestFields::None, vec![]);
        let event = server.input(&get.to_bytes()).unwrap();
        assert_eq!(event, ServerEvent::Request(OpCode::Get));

        let content = vec![0x42u8; 5000];
        let mut collected = Vec::new();
        let mut reply = server.respond_content(&content, vec![]).unwrap();
        loop {
            let decoded = ResponsePacket::decode(&reply, false).unwrap();
            let packet = match decoded {
                Decoded::Packet(p) => p,
                Decoded::Incomplete => panic!("whole packet expected"),
            };
            assert!(reply.len() <= server.max_packet_len() as usize);
            collected.extend(assemble::assemble_body(&packet.headers));
            if packet.status == ResponseCode::SUCCESS {
                break;
            }
            assert_eq!(packet.status, ResponseCode::CONTINUE);
            // The client polls with another GET to pull the next fragment.
            let poll = RequestPacket::new(OpCode::Get, true, RequestFields::None, vec![]);
            reply = match server.input(&poll.to_bytes()).unwrap() {
                ServerEvent::Continue { packet: Some(packet) } => packet,
                other => panic!("expected reply fragment, got {other:?}"),
            };
        }
        assert_eq!(collected, content);
        assert_eq!(server.state(), ServerState::Idle);
    }

    #[test]
    fn test_abort_during_response_fails_session() {
        let mut server = connected_server();
        let get = RequestPacket::new(OpCode::Get, true, RequestFields::None, vec![]);
        let _ = server.input(&get.to_bytes()).unwrap();
        let _ = server.respond_content(&vec![0u8; 10_000], vec![]).unwrap();

        let abort = RequestPacket::new(OpCode::Abort, true, RequestFields::None, vec![]);
        let event = server.input(&abort.to_bytes()).unwrap();
        let ack = match event {
            ServerEvent::Failed { packet: Some(ack) } => ack,
            other => panic!("expected failure with ack, got {other:?}"),
        };
        assert_eq!(ack[0], 0xA0);
        assert_eq!(server.state(), ServerState::Error);

        server.reset();
        assert_eq!(server.state(), ServerState::Idle);
        assert_eq!(server.connection_id(), None);
    }

    #[test]
    fn test_disconnect_reverts_packet_length() {
        let mut server = connected_server();
        let disconnect = RequestPacket::new(
            OpCode::Disconnect,
            true,
            RequestFields::None,
            vec![Header::connection_id(1)],
        );
        let event = server.input(&disconnect.to_bytes()).unwrap();
        assert_eq!(event, ServerEvent::Request(OpCode::Disconnect));

        let reply = server.respond(ResponseCode::SUCCESS, vec![]).unwrap();
        // The response still carries the id that was active.
        let decoded = ResponsePacket::decode(&reply, false).unwrap();
        let packet = match decoded {
            Decoded::Packet(p) => p,
            Decoded::Incomplete => panic!("whole packet expected"),
        };
        assert_eq!(packet.headers[0], Header::connection_id(1));
        assert_eq!(server.connection_id(), None);
        assert_eq!(server.max_packet_len(), DEFAULT_MAX_PACKET_LEN);
    }

    #[test]
    fn test_oversized_single_packet_reply_is_fatal() {
        let mut server = connected_server();
        let setpath = RequestPacket::new(
            OpCode::SetPath,
            true,
            RequestFields::SetPath { flags: SetPathFlags::new(), constants: 0 },
            vec![],
        );
        let event = server.input(&setpath.to_bytes()).unwrap();
        assert_eq!(event, ServerEvent::Request(OpCode::SetPath));
        assert_eq!(server.setpath_flags(), Some(SetPathFlags::new()));

        let oversized = vec![Header::description("x".repeat(4096))];
        assert_matches!(
            server.respond(ResponseCode::SUCCESS, oversized),
            Err(ObexError::EncodingOverflow(_))
        );
        assert_eq!(server.state(), ServerState::Error);
    }
}
