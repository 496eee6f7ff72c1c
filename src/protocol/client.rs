//! OBEX client session state machine.
//!
//! The client issues one request at a time. Each operation requires an idle
//! session, returns the first outbound packet, and moves the session to
//! `Busy`; from there the embedding application feeds received bytes through
//! [`ClientSession::input`] and writes any returned packet back to the
//! transport until the exchange reports `Done` or `Failed`.

use std::collections::VecDeque;

use tracing::{debug, trace};

use crate::codec::framing::FrameBuffer;
use crate::codec::header::{Header, HeaderId};
use crate::codec::packet::{
    ConnectFields, Decoded, ObexVersion, OpCode, RequestFields, RequestPacket, ResponseCode,
    ResponsePacket, SetPathFlags, CONNECT_FIELDS_LEN, SETPATH_FIELDS_LEN,
};
use crate::error::{ObexError, Result};
use crate::protocol::assemble::{self, header_budget};
use crate::protocol::{DEFAULT_MAX_PACKET_LEN, DEFAULT_PROPOSED_MAX_LEN};

/// Client session states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    /// No request outstanding; operations may be issued.
    Idle,
    /// A request is outstanding; only `input` is legal.
    Busy,
    /// A fatal condition occurred; `reset` is required.
    Error,
}

/// Outcome of feeding received bytes to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// The exchange continues. When `packet` is set, write it to the
    /// transport before reading more bytes.
    Continue {
        /// Next outbound fragment, if one is due.
        packet: Option<Vec<u8>>,
    },
    /// The request completed successfully.
    Done,
    /// The peer reported failure; detail via
    /// [`last_status`](ClientSession::last_status).
    Failed,
}

/// The initiating side of an OBEX exchange.
#[derive(Debug)]
pub struct ClientSession {
    state: ClientState,
    max_packet_len: u16,
    proposed_max_len: u16,
    connection_id: Option<u32>,
    pending: Option<OpCode>,
    out_headers: VecDeque<Header>,
    in_headers: Vec<Header>,
    framing: FrameBuffer,
    last_status: Option<ResponseCode>,
    peer_version: Option<ObexVersion>,
}

impl Default for ClientSession {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientSession {
    /// Create an idle session with the 255-byte safe default packet length.
    pub fn new() -> Self {
        Self {
            state: ClientState::Idle,
            max_packet_len: DEFAULT_MAX_PACKET_LEN,
            proposed_max_len: DEFAULT_PROPOSED_MAX_LEN,
            connection_id: None,
            pending: None,
            out_headers: VecDeque::new(),
            in_headers: Vec::new(),
            framing: FrameBuffer::new(),
            last_status: None,
            peer_version: None,
        }
    }

    /// Override the max packet length this client proposes at CONNECT.
    pub fn with_proposed_max_len(mut self, len: u16) -> Self {
        self.proposed_max_len = len;
        self
    }

    /// Current state.
    pub fn state(&self) -> ClientState {
        self.state
    }

    /// The negotiated max packet length.
    pub fn max_packet_len(&self) -> u16 {
        self.max_packet_len
    }

    /// The Connection Id issued by the server, once connected.
    pub fn connection_id(&self) -> Option<u32> {
        self.connection_id
    }

    /// The status of the most recent response.
    pub fn last_status(&self) -> Option<ResponseCode> {
        self.last_status
    }

    /// The peer's OBEX version, learned from the CONNECT response.
    pub fn peer_version(&self) -> Option<ObexVersion> {
        self.peer_version
    }

    /// Headers accumulated from the current (or just-finished) response.
    pub fn response_headers(&self) -> &[Header] {
        &self.in_headers
    }

    /// Drain the accumulated response headers.
    pub fn take_response_headers(&mut self) -> Vec<Header> {
        std::mem::take(&mut self.in_headers)
    }

    /// Content carried by accumulated `Body`/`EndOfBody` headers, typically
    /// the object retrieved by a GET.
    pub fn received_content(&self) -> Vec<u8> {
        assemble::assemble_body(&self.in_headers)
    }

    /// Restore an idle session, clearing all per-connection state.
    pub fn reset(&mut self) {
        debug!("Client session reset");
        self.state = ClientState::Idle;
        self.max_packet_len = DEFAULT_MAX_PACKET_LEN;
        self.connection_id = None;
        self.pending = None;
        self.out_headers.clear();
        self.in_headers.clear();
        self.framing.clear();
        self.last_status = None;
        self.peer_version = None;
    }

    /// Issue a CONNECT request proposing this client's max packet length.
    pub fn connect(&mut self, headers: Vec<Header>) -> Result<Vec<u8>> {
        self.begin(OpCode::Connect, headers)?;
        let budget = header_budget(self.max_packet_len, CONNECT_FIELDS_LEN);
        // No Connection Id exists before CONNECT completes.
        let taken = self.take(budget, None, true)?;
        let packet = RequestPacket::new(
            OpCode::Connect,
            true,
            RequestFields::Connect(ConnectFields {
                version: ObexVersion::V1_0,
                flags: 0,
                max_packet_len: self.proposed_max_len,
            }),
            taken,
        );
        Ok(packet.to_bytes())
    }

    /// Issue a DISCONNECT request.
    pub fn disconnect(&mut self, headers: Vec<Header>) -> Result<Vec<u8>> {
        self.begin(OpCode::Disconnect, headers)?;
        self.next_request_packet()
    }

    /// Issue a PUT transferring `content`, fragmented to the negotiated
    /// packet length.
    pub fn put(&mut self, content: &[u8], headers: Vec<Header>) -> Result<Vec<u8>> {
        self.begin(OpCode::Put, headers)?;
        let chunks =
            match assemble::split_content(content, self.max_packet_len, self.connection_id.is_some())
            {
                Ok(chunks) => chunks,
                Err(e) => return Err(self.raise(e)),
            };
        self.out_headers.extend(chunks);
        self.next_request_packet()
    }

    /// Issue a PUT with no body at all, which requests deletion of the
    /// object named by `headers`.
    pub fn put_delete(&mut self, headers: Vec<Header>) -> Result<Vec<u8>> {
        self.begin(OpCode::Put, headers)?;
        self.next_request_packet()
    }

    /// Issue a GET for the object named by `headers`.
    pub fn get(&mut self, headers: Vec<Header>) -> Result<Vec<u8>> {
        self.begin(OpCode::Get, headers)?;
        self.next_request_packet()
    }

    /// Issue an ABORT request. The abort is itself a regular single-packet
    /// exchange and obeys the one-outstanding-request rule.
    pub fn abort(&mut self, headers: Vec<Header>) -> Result<Vec<u8>> {
        self.begin(OpCode::Abort, headers)?;
        self.next_request_packet()
    }

    /// Issue a SETPATH request changing the current folder on the server.
    pub fn setpath(&mut self, flags: SetPathFlags, headers: Vec<Header>) -> Result<Vec<u8>> {
        self.begin(OpCode::SetPath, headers)?;
        let budget = header_budget(self.max_packet_len, SETPATH_FIELDS_LEN);
        let taken = self.take(budget, self.connection_id, true)?;
        let packet = RequestPacket::new(
            OpCode::SetPath,
            true,
            RequestFields::SetPath { flags, constants: 0 },
            taken,
        );
        Ok(packet.to_bytes())
    }

    /// Feed bytes received from the transport.
    ///
    /// The single driving entry point while a request is outstanding. Any
    /// packet carried by the returned event must be written back to the
    /// transport before reading further.
    pub fn input(&mut self, bytes: &[u8]) -> Result<ClientEvent> {
        if self.state != ClientState::Busy {
            return Err(ObexError::IllegalState(format!(
                "Input requires an outstanding request, state is {:?}",
                self.state
            )));
        }

        self.framing.feed(bytes);
        let packet = match self.framing.take_packet() {
            Some(packet) => packet,
            None => return Ok(ClientEvent::Continue { packet: None }),
        };

        let op = self.pending.expect("busy session has a pending operation");
        let response = match ResponsePacket::decode(&packet, op == OpCode::Connect) {
            Ok(Decoded::Packet(response)) => response,
            Ok(Decoded::Incomplete) => return Ok(ClientEvent::Continue { packet: None }),
            Err(e) => return Err(self.raise(e)),
        };
        trace!(
            operation = op.name(),
            status = response.status.code(),
            headers = response.headers.len(),
            "Client received response packet"
        );

        let status = response.status;
        self.last_status = Some(status);
        self.in_headers.extend(response.headers);

        match op {
            OpCode::Connect => self.finish_connect(status, response.connect),
            OpCode::Put | OpCode::Get => self.continue_transfer(op, status),
            // DISCONNECT, ABORT, SETPATH, SESSION: single-packet only, no
            // continuation is legal.
            _ => {
                if status.is_success() {
                    if op == OpCode::Disconnect {
                        self.connection_id = None;
                        self.max_packet_len = DEFAULT_MAX_PACKET_LEN;
                    }
                    self.complete();
                    Ok(ClientEvent::Done)
                } else {
                    Ok(self.fail(op, status))
                }
            }
        }
    }

    fn finish_connect(
        &mut self,
        status: ResponseCode,
        fields: Option<ConnectFields>,
    ) -> Result<ClientEvent> {
        if !status.is_success() {
            return Ok(self.fail(OpCode::Connect, status));
        }
        if let Some(fields) = fields {
            self.peer_version = Some(fields.version);
            // Adopt the server's length only when it beats the current one;
            // never shrink below the protocol default.
            if fields.max_packet_len > self.max_packet_len {
                self.max_packet_len = fields.max_packet_len;
            }
        }
        self.connection_id = self
            .in_headers
            .iter()
            .find(|h| h.id() == HeaderId::ConnectionId)
            .and_then(Header::as_quad);
        debug!(
            connection_id = ?self.connection_id,
            max_packet_len = self.max_packet_len,
            "Client connected"
        );
        self.complete();
        Ok(ClientEvent::Done)
    }

    fn continue_transfer(&mut self, op: OpCode, status: ResponseCode) -> Result<ClientEvent> {
        if status.is_continue() {
            let packet = self.next_request_packet()?;
            return Ok(ClientEvent::Continue { packet: Some(packet) });
        }
        if status.is_success() {
            if op == OpCode::Put && !self.out_headers.is_empty() {
                return Err(self.raise(ObexError::Protocol(
                    "Peer reported success before the full body was sent".to_string(),
                )));
            }
            self.complete();
            return Ok(ClientEvent::Done);
        }
        Ok(self.fail(op, status))
    }

    /// Assemble the next request fragment from the pending header queue.
    fn next_request_packet(&mut self) -> Result<Vec<u8>> {
        let op = self.pending.expect("busy session has a pending operation");
        let budget = header_budget(self.max_packet_len, 0);
        let taken = self.take(budget, self.connection_id, op.is_single_packet())?;
        let is_final = self.out_headers.is_empty();
        Ok(RequestPacket::new(op, is_final, RequestFields::None, taken).to_bytes())
    }

    fn begin(&mut self, op: OpCode, headers: Vec<Header>) -> Result<()> {
        if self.state != ClientState::Idle {
            return Err(ObexError::IllegalState(format!(
                "{} requires an idle session, state is {:?}",
                op.name(),
                self.state
            )));
        }
        trace!(operation = op.name(), "Client begins request");
        self.state = ClientState::Busy;
        self.pending = Some(op);
        self.out_headers = headers.into();
        self.in_headers.clear();
        self.last_status = None;
        Ok(())
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
        self.state = ClientState::Idle;
        self.pending = None;
        self.out_headers.clear();
    }

    fn fail(&mut self, op: OpCode, status: ResponseCode) -> ClientEvent {
        debug!(
            operation = op.name(),
            status = status.code(),
            detail = status.description().unwrap_or("unrecognized"),
            "Request failed"
        );
        self.state = ClientState::Error;
        ClientEvent::Failed
    }

    fn raise(&mut self, err: ObexError) -> ObexError {
        debug!(error = %err, "Client session error");
        self.state = ClientState::Error;
        err
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn connect_success_bytes(connection_id: Option<u32>, max_len: u16) -> Vec<u8> {
        let headers = connection_id.map(Header::connection_id).into_iter().collect();
        ResponsePacket::connect(
            ResponseCode::SUCCESS,
            ConnectFields { version: ObexVersion::V1_0, flags: 0, max_packet_len: max_len },
            headers,
        )
        .to_bytes()
    }

    fn connected_client() -> ClientSession {
        let mut client = ClientSession::new();
        let _ = client.connect(vec![]).unwrap();
        let event = client.input(&connect_success_bytes(Some(7), 4096)).unwrap();
        assert_eq!(event, ClientEvent::Done);
        client
    }

    #[test]
    fn test_operations_require_idle() {
        let mut client = ClientSession::new();
        let _ = client.connect(vec![]).unwrap();
        assert_eq!(client.state(), ClientState::Busy);
        assert_matches!(client.connect(vec![]), Err(ObexError::IllegalState(_)));
        assert_matches!(client.get(vec![]), Err(ObexError::IllegalState(_)));
        assert_matches!(
            client.put(b"x", vec![]),
            Err(ObexError::IllegalState(_))
        );
    }

    #[test]
    fn test_input_requires_outstanding_request() {
        let mut client = ClientSession::new();
        assert_matches!(client.input(&[]), Err(ObexError::IllegalState(_)));
    }

    #[test]
    fn test_connect_adopts_larger_max_len_and_id() {
        let client = connected_client();
        assert_eq!(client.state(), ClientState::Idle);
        assert_eq!(client.connection_id(), Some(7));
        assert_eq!(client.max_packet_len(), 4096);
        assert_eq!(client.peer_version(), Some(ObexVersion::V1_0));
    }

    #[test]
    fn test_connect_keeps_default_when_server_proposes_less() {
        let mut client = ClientSession::new();
        let _ = client.connect(vec![]).unwrap();
        let event = client.input(&connect_success_bytes(None, 128)).unwrap();
        assert_eq!(event, ClientEvent::Done);
        assert_eq!(client.max_packet_len(), DEFAULT_MAX_PACKET_LEN);
        assert_eq!(client.connection_id(), None);
    }

    #[test]
    fn test_connect_failure_is_failed_and_error_state() {
        let mut client = ClientSession::new();
        let _ = client.connect(vec![]).unwrap();
        let response = ResponsePacket::connect(
            ResponseCode::FORBIDDEN,
            ConnectFields { version: ObexVersion::V1_0, flags: 0, max_packet_len: 255 },
            vec![],
        );
        let event = client.input(&response.to_bytes()).unwrap();
        assert_eq!(event, ClientEvent::Failed);
        assert_eq!(client.state(), ClientState::Error);
        assert_eq!(client.last_status(), Some(ResponseCode::FORBIDDEN));
        // Error is terminal until reset.
        assert_matches!(client.get(vec![]), Err(ObexError::IllegalState(_)));
        client.reset();
        assert_eq!(client.state(), ClientState::Idle);
    }

    #[test]
    fn test_partial_response_bytes_continue() {
        let mut client = ClientSession::new();
        let _ = client.connect(vec![]).unwrap();
        let response = connect_success_bytes(None, 255);
        let (left, right) = response.split_at(3);
        assert_eq!(
            client.input(left).unwrap(),
            ClientEvent::Continue { packet: None }
        );
        assert_eq!(client.input(right).unwrap(), ClientEvent::Done);
    }

    #[test]
    fn test_put_fragments_and_completes() {
        let mut client = connected_client();
        let content = vec![0x5Au8; 10_000];
        let first = client.put(&content, vec![Header::name("obj")]).unwrap();
        // Not final: more fragments pending.
        assert_eq!(first[0] & 0x80, 0);

        let continue_bytes = ResponsePacket::new(ResponseCode::CONTINUE, vec![]).to_bytes();
        let mut packets = vec![first];
        loop {
            match client.input(&continue_bytes).unwrap() {
                ClientEvent::Continue { packet: Some(packet) } => {
                    let done = packet[0] & 0x80 != 0;
                    packets.push(packet);
                    if done {
                        break;
                    }
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        let success = ResponsePacket::new(ResponseCode::SUCCESS, vec![]).to_bytes();
        assert_eq!(client.input(&success).unwrap(), ClientEvent::Done);
        assert_eq!(client.state(), ClientState::Idle);

        // Every fragment obeys the negotiated length and carries the id.
        for packet in &packets {
            assert!(packet.len() <= client.max_packet_len() as usize);
        }
    }

    #[test]
    fn test_premature_put_success_is_protocol_error() {
        let mut client = connected_client();
        let content = vec![0u8; 100_000];
        let _ = client.put(&content, vec![]).unwrap();
        let success = ResponsePacket::new(ResponseCode::SUCCESS, vec![]).to_bytes();
        assert_matches!(client.input(&success), Err(ObexError::Protocol(_)));
        assert_eq!(client.state(), ClientState::Error);
    }

    #[test]
    fn test_get_accumulates_multi_packet_body() {
        let mut client = connected_client();
        let _ = client.get(vec![Header::name("file")]).unwrap();

        let part1 =
            ResponsePacket::new(ResponseCode::CONTINUE, vec![Header::body(vec![1, 2, 3])]);
        let event = client.input(&part1.to_bytes()).unwrap();
        assert_matches!(event, ClientEvent::Continue { packet: Some(_) });

        let part2 =
            ResponsePacket::new(ResponseCode::SUCCESS, vec![Header::end_of_body(vec![4, 5])]);
        assert_eq!(client.input(&part2.to_bytes()).unwrap(), ClientEvent::Done);
        assert_eq!(client.received_content(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_setpath_continue_status_is_failure() {
        let mut client = connected_client();
        let _ = client.setpath(SetPathFlags::new(), vec![]).unwrap();
        let response = ResponsePacket::new(ResponseCode::CONTINUE, vec![]).to_bytes();
        assert_eq!(client.input(&response).unwrap(), ClientEvent::Failed);
        assert_eq!(client.state(), ClientState::Error);
    }

    #[test]
    fn test_disconnect_clears_connection_state() {
        let mut client = connected_client();
        let packet = client.disconnect(vec![]).unwrap();
        // The disconnect request still carries the connection id.
        assert!(packet.len() > 3);
        let success = ResponsePacket::new(ResponseCode::SUCCESS, vec![]).to_bytes();
        assert_eq!(client.input(&success).unwrap(), ClientEvent::Done);
        assert_eq!(client.connection_id(), None);
        assert_eq!(client.max_packet_len(), DEFAULT_MAX_PACKET_LEN);
    }
}
