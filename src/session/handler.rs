//! Per-connection session driver.
//!
//! # Responsibilities
//! - Own the session state machine for one connection
//! - Server role: receive, dispatch and answer requests until close, EOF or shutdown
//! - Client role: send a request and await the reply with the same message id
//! - Apply the poll, response and handshake timeouts

use std::net::SocketAddr;
use std::time::Duration;

use crate::codec::{Codec, MessageCodec};
use crate::config::SessionConfig;
use crate::dispatch::Dispatcher;
use crate::lifecycle::ShutdownToken;
use crate::net::{SessionId, Transport, TransportError};
use crate::observability::metrics::{self, Direction};
use crate::protocol::{Envelope, ErrorCode, Kind, MessageId, Payload, TransportKind};
use crate::session::{Credentials, Role, SessionError, SessionProvider, SessionState};

/// Drives one session over a frame transport.
#[derive(Debug)]
pub struct SessionHandler<T> {
    id: SessionId,
    transport: T,
    codec: Codec,
    peer_addr: Option<SocketAddr>,
    credentials: Credentials,
    state: SessionState,
    last_sent_message_id: Option<MessageId>,
    next_message_id: MessageId,
    poll_interval: Duration,
    response_timeout: Duration,
    handshake_timeout: Duration,
}

impl<T: Transport> SessionHandler<T> {
    pub fn new(transport: T, kind: TransportKind, config: &SessionConfig) -> Self {
        Self {
            id: SessionId::new(),
            transport,
            codec: Codec::for_transport(kind),
            peer_addr: None,
            credentials: Credentials::default(),
            state: SessionState::Connecting,
            last_sent_message_id: None,
            next_message_id: MessageId(1),
            poll_interval: config.poll_interval(),
            response_timeout: config.response_timeout(),
            handshake_timeout: config.handshake_timeout(),
        }
    }

    pub fn with_id(mut self, id: SessionId) -> Self {
        self.id = id;
        self
    }

    pub fn with_peer_addr(mut self, peer_addr: SocketAddr) -> Self {
        self.peer_addr = Some(peer_addr);
        self
    }

    /// Credentials handed to the provider at `establish`.
    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn transport_kind(&self) -> TransportKind {
        self.codec.transport_kind()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Id of the request whose reply is awaited or was last received.
    pub fn last_sent_message_id(&self) -> Option<MessageId> {
        self.last_sent_message_id
    }

    /// Allocate the next client message id.
    pub fn next_message_id(&mut self) -> MessageId {
        let id = self.next_message_id;
        self.next_message_id = id.next();
        id
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        tracing::trace!(session_id = %self.id, from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    fn fail(&mut self) {
        if !self.state.is_terminal() {
            tracing::debug!(session_id = %self.id, from = %self.state, "Session failed");
            self.state = SessionState::Failed;
        }
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.state.is_terminal() {
            Err(SessionError::SessionClosed)
        } else {
            Ok(())
        }
    }

    async fn write_envelope(&mut self, envelope: &Envelope) -> Result<(), TransportError> {
        let frame = self.codec.encode(envelope);
        self.transport.send(&frame).await?;
        metrics::record_envelope(&envelope.kind, Direction::Outbound);
        tracing::debug!(
            session_id = %self.id,
            message_id = %envelope.message_id,
            kind = envelope.kind.label(),
            bytes = frame.len(),
            "Envelope sent"
        );
        Ok(())
    }

    async fn send_envelope(&mut self, envelope: &Envelope) -> Result<(), SessionError> {
        self.ensure_open()?;
        if let Err(e) = self.write_envelope(envelope).await {
            self.fail();
            return Err(e.into());
        }
        Ok(())
    }

    async fn finish_close(&mut self) {
        if self.transition(SessionState::Closing).is_err() {
            return;
        }
        if let Err(e) = self.transport.shutdown().await {
            tracing::debug!(session_id = %self.id, error = %e, "Transport shutdown failed");
        }
        self.state = SessionState::Closed;
        tracing::info!(session_id = %self.id, "Session closed");
    }

    /// Run the provider's handshake within the handshake timeout.
    pub async fn establish(
        &mut self,
        provider: &dyn SessionProvider,
        role: Role,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.state != SessionState::Connecting {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::Established,
            });
        }

        let handshake = provider.establish(&mut self.transport, self.codec, role, &self.credentials);
        let result = match tokio::time::timeout(self.handshake_timeout, handshake).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::establishment(format!(
                "no handshake within {:?}",
                self.handshake_timeout
            ))),
        };

        match result {
            Ok(()) => {
                self.transition(SessionState::Established)?;
                tracing::info!(
                    session_id = %self.id,
                    peer_addr = ?self.peer_addr,
                    transport = %self.transport_kind(),
                    provider = provider.name(),
                    authenticated = provider.authenticates(),
                    "Session established"
                );
                Ok(())
            }
            Err(e) => {
                tracing::warn!(session_id = %self.id, error = %e, "Session establishment failed");
                self.fail();
                Err(e)
            }
        }
    }

    /// Answer requests until the peer closes, the transport fails or
    /// shutdown is observed.
    pub async fn serve(
        &mut self,
        dispatcher: &Dispatcher,
        shutdown: ShutdownToken,
    ) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.transition(SessionState::AwaitingRequest)?;

        loop {
            if shutdown.is_triggered() {
                tracing::info!(session_id = %self.id, "Shutdown observed, closing session");
                self.finish_close().await;
                return Ok(());
            }

            let frame = match tokio::time::timeout(self.poll_interval, self.transport.recv()).await {
                Err(_) => continue,
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    tracing::debug!(session_id = %self.id, "Peer closed the stream");
                    self.finish_close().await;
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::warn!(session_id = %self.id, error = %e, "Transport failure");
                    self.fail();
                    return Err(e.into());
                }
            };

            let request = match self.codec.decode(&frame) {
                Ok(request) => request,
                Err(e) => {
                    let message_id = self.codec.peek_message_id(&frame).unwrap_or_default();
                    metrics::record_decode_failure(e.reason());
                    tracing::warn!(
                        session_id = %self.id,
                        message_id = %message_id,
                        field = e.field(),
                        error = %e,
                        "Undecodable request"
                    );
                    let reply = Envelope::error_reply(message_id, ErrorCode::MalformedMessage).stamped();
                    self.send_envelope(&reply).await?;
                    continue;
                }
            };

            metrics::record_envelope(&request.kind, Direction::Inbound);
            self.transition(SessionState::Processing)?;
            tracing::debug!(
                session_id = %self.id,
                message_id = %request.message_id,
                kind = request.kind.label(),
                trace_id = ?request.payload.trace().map(|ctx| ctx.trace_id()),
                "Request received"
            );

            if request.kind == Kind::Close {
                let ok = Envelope::reply_to(&request, Payload::Empty).stamped();
                self.send_envelope(&ok).await?;
                self.finish_close().await;
                return Ok(());
            }

            let response = dispatcher.dispatch(&request);
            self.send_envelope(&response).await?;
            self.transition(SessionState::AwaitingRequest)?;
        }
    }

    /// Send `request` and wait for its correlated reply.
    pub async fn call(&mut self, request: Envelope) -> Result<Envelope, SessionError> {
        self.ensure_open()?;
        if self.state != SessionState::Established {
            return Err(SessionError::InvalidTransition {
                from: self.state,
                to: SessionState::AwaitingResponse,
            });
        }

        self.send_envelope(&request).await?;
        self.last_sent_message_id = Some(request.message_id);
        self.transition(SessionState::AwaitingResponse)?;
        if let Some(ctx) = request.payload.trace() {
            tracing::info!(
                session_id = %self.id,
                message_id = %request.message_id,
                trace_id = %ctx.trace_id(),
                span_id = %ctx.span_id(),
                "Request sent"
            );
        }

        self.await_reply().await
    }

    /// Wait for the reply to the outstanding request.
    ///
    /// On timeout or a mismatched id the request stays outstanding.
    pub async fn await_reply(&mut self) -> Result<Envelope, SessionError> {
        self.ensure_open()?;
        let expected = match (self.state, self.last_sent_message_id) {
            (SessionState::AwaitingResponse, Some(id)) => id,
            (state, _) => {
                return Err(SessionError::InvalidTransition {
                    from: state,
                    to: SessionState::Established,
                })
            }
        };

        let frame = match tokio::time::timeout(self.response_timeout, self.transport.recv()).await {
            Err(_) => {
                tracing::warn!(
                    session_id = %self.id,
                    message_id = %expected,
                    timeout = ?self.response_timeout,
                    "No reply in time"
                );
                return Err(SessionError::Timeout(self.response_timeout));
            }
            Ok(Ok(Some(frame))) => frame,
            Ok(Ok(None)) => {
                tracing::warn!(session_id = %self.id, message_id = %expected, "Peer closed before replying");
                self.finish_close().await;
                return Err(SessionError::SessionClosed);
            }
            Ok(Err(e)) => {
                self.fail();
                return Err(e.into());
            }
        };

        let reply = self.codec.decode(&frame).map_err(|e| {
            metrics::record_decode_failure(e.reason());
            SessionError::Malformed(e)
        })?;
        metrics::record_envelope(&reply.kind, Direction::Inbound);

        if reply.message_id != expected {
            tracing::warn!(
                session_id = %self.id,
                expected = %expected,
                received = %reply.message_id,
                "Reply does not correlate with the outstanding request"
            );
            return Err(SessionError::CorrelationMismatch {
                expected,
                received: reply.message_id,
            });
        }
        if !reply.is_response() {
            return Err(SessionError::UnexpectedMessage {
                kind: reply.kind.label(),
            });
        }

        self.transition(SessionState::Established)?;
        Ok(reply)
    }

    /// Close the session, announcing it to the peer when idle.
    ///
    /// The close exchange is best-effort; the session ends `Closed` either way.
    pub async fn close(&mut self) -> Result<(), SessionError> {
        self.ensure_open()?;

        if self.state == SessionState::Established {
            let close = Envelope::close(self.next_message_id()).stamped();
            match self.write_envelope(&close).await {
                Ok(()) => {
                    self.last_sent_message_id = Some(close.message_id);
                    self.transition(SessionState::AwaitingResponse)?;
                    match self.await_reply().await {
                        Ok(reply) => tracing::debug!(
                            session_id = %self.id,
                            acknowledged = reply.kind == Kind::Reply,
                            "Close exchanged"
                        ),
                        Err(e) => {
                            tracing::debug!(session_id = %self.id, error = %e, "Close not acknowledged")
                        }
                    }
                }
                Err(e) => tracing::debug!(session_id = %self.id, error = %e, "Close not delivered"),
            }
        }

        if !self.state.is_terminal() {
            self.finish_close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::Shutdown;
    use crate::net::FramedTransport;
    use crate::protocol::Operation;
    use crate::session::{HelloHandshake, PlainStream};
    use crate::trace::TraceContext;
    use tokio::io::{duplex, DuplexStream};

    type Framed = FramedTransport<DuplexStream>;

    fn config() -> SessionConfig {
        SessionConfig {
            poll_interval_ms: 20,
            response_timeout_ms: 200,
            handshake_timeout_ms: 100,
            ..SessionConfig::default()
        }
    }

    fn ctx() -> TraceContext {
        TraceContext::parse("4bf92f3577b34da6a3ce929d0e0e4736", "00f067aa0ba902b7").unwrap()
    }

    /// A handler plus the raw transport of its peer.
    fn pair(kind: TransportKind) -> (SessionHandler<Framed>, Framed) {
        let (a, b) = duplex(8192);
        (
            SessionHandler::new(FramedTransport::new(a, kind), kind, &config()),
            FramedTransport::new(b, kind),
        )
    }

    async fn established(kind: TransportKind) -> (SessionHandler<Framed>, Framed) {
        let (mut handler, peer) = pair(kind);
        handler.establish(&PlainStream, Role::Client).await.unwrap();
        (handler, peer)
    }

    async fn peer_recv(peer: &mut Framed, kind: TransportKind) -> Envelope {
        let frame = peer.recv().await.unwrap().unwrap();
        Codec::for_transport(kind).decode(&frame).unwrap()
    }

    async fn peer_send(peer: &mut Framed, kind: TransportKind, envelope: &Envelope) {
        peer.send(&Codec::for_transport(kind).encode(envelope)).await.unwrap();
    }

    #[tokio::test]
    async fn mismatched_reply_leaves_request_outstanding() {
        let kind = TransportKind::FlatText;
        let (mut client, mut peer) = established(kind).await;
        let request = Envelope::request(MessageId(1), Operation::Get, Payload::Trace(ctx()));

        let (result, ()) = tokio::join!(client.call(request), async {
            let _ = peer_recv(&mut peer, kind).await;
            peer_send(&mut peer, kind, &Envelope::new(MessageId(2), Kind::Reply, Payload::Empty)).await;
        });

        assert!(matches!(
            result,
            Err(SessionError::CorrelationMismatch {
                expected: MessageId(1),
                received: MessageId(2)
            })
        ));
        assert_eq!(client.state(), SessionState::AwaitingResponse);
        assert_eq!(client.last_sent_message_id(), Some(MessageId(1)));

        peer_send(&mut peer, kind, &Envelope::new(MessageId(1), Kind::Reply, Payload::Trace(ctx()))).await;
        let reply = client.await_reply().await.unwrap();
        assert_eq!(reply.payload, Payload::Trace(ctx()));
        assert_eq!(client.state(), SessionState::Established);
    }

    #[tokio::test]
    async fn timeout_keeps_awaiting_response() {
        let (mut client, _peer) = established(TransportKind::StructuredRpc).await;
        let request = Envelope::request(MessageId(5), Operation::Get, Payload::Trace(ctx()));

        assert!(matches!(client.call(request).await, Err(SessionError::Timeout(_))));
        assert_eq!(client.state(), SessionState::AwaitingResponse);
        assert_eq!(client.last_sent_message_id(), Some(MessageId(5)));
    }

    #[tokio::test]
    async fn error_reply_with_matching_id_is_returned() {
        let kind = TransportKind::StructuredRpc;
        let (mut client, mut peer) = established(kind).await;
        let request = Envelope::request(MessageId(3), Operation::Edit, Payload::Empty);

        let (result, ()) = tokio::join!(client.call(request), async {
            let _ = peer_recv(&mut peer, kind).await;
            peer_send(&mut peer, kind, &Envelope::error_reply(MessageId(3), ErrorCode::InvalidValue)).await;
        });

        assert_eq!(result.unwrap().kind, Kind::ErrorReply(ErrorCode::InvalidValue));
        assert_eq!(client.state(), SessionState::Established);
    }

    #[tokio::test]
    async fn call_requires_established_session() {
        let (mut client, _peer) = pair(TransportKind::FlatText);
        let request = Envelope::request(MessageId(1), Operation::Get, Payload::Trace(ctx()));

        assert!(matches!(
            client.call(request).await,
            Err(SessionError::InvalidTransition {
                from: SessionState::Connecting,
                to: SessionState::AwaitingResponse
            })
        ));
    }

    #[tokio::test]
    async fn closed_session_refuses_io() {
        let (mut client, peer) = established(TransportKind::FlatText).await;
        drop(peer);

        client.close().await.unwrap();
        assert_eq!(client.state(), SessionState::Closed);

        let request = Envelope::request(MessageId(9), Operation::Get, Payload::Trace(ctx()));
        assert!(matches!(client.call(request).await, Err(SessionError::SessionClosed)));
        assert!(matches!(client.await_reply().await, Err(SessionError::SessionClosed)));
        assert!(matches!(client.close().await, Err(SessionError::SessionClosed)));
    }

    #[tokio::test]
    async fn handshake_timeout_fails_session() {
        let (mut client, _peer) = pair(TransportKind::StructuredRpc);

        let err = client.establish(&HelloHandshake, Role::Client).await.unwrap_err();

        assert!(matches!(err, SessionError::SessionEstablishmentFailed { .. }));
        assert_eq!(client.state(), SessionState::Failed);
    }

    #[tokio::test]
    async fn server_recovers_from_malformed_request_then_closes() {
        let kind = TransportKind::FlatText;
        let (mut server, mut peer) = established(kind).await;
        let dispatcher = Dispatcher::default();
        let shutdown = Shutdown::new();

        let script = async {
            peer.send(br#"{"type":"tracing_data","message_id":4,"traceid":"xyz","spanid":"1"}"#)
                .await
                .unwrap();
            let error = peer_recv(&mut peer, kind).await;
            assert_eq!(error.message_id, MessageId(4));
            assert_eq!(error.kind, Kind::ErrorReply(ErrorCode::MalformedMessage));

            peer_send(&mut peer, kind, &Envelope::request(MessageId(5), Operation::Get, Payload::Trace(ctx()))).await;
            let reply = peer_recv(&mut peer, kind).await;
            assert_eq!(reply.message_id, MessageId(5));
            assert_eq!(reply.payload, Payload::Trace(ctx()));

            peer_send(&mut peer, kind, &Envelope::close(MessageId(6))).await;
            let ok = peer_recv(&mut peer, kind).await;
            assert_eq!((ok.message_id, ok.kind), (MessageId(6), Kind::Reply));
        };

        let (result, ()) = tokio::join!(server.serve(&dispatcher, shutdown.token()), script);

        result.unwrap();
        assert_eq!(server.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn server_closes_on_peer_eof() {
        let (mut server, peer) = established(TransportKind::StructuredRpc).await;
        drop(peer);

        server.serve(&Dispatcher::default(), Shutdown::new().token()).await.unwrap();
        assert_eq!(server.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn server_observes_shutdown_between_polls() {
        let (mut server, _peer) = established(TransportKind::FlatText).await;
        let dispatcher = Dispatcher::default();
        let shutdown = Shutdown::new();
        let token = shutdown.token();

        let trigger = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            shutdown.trigger();
        };
        let (result, ()) = tokio::join!(
            tokio::time::timeout(Duration::from_secs(2), server.serve(&dispatcher, token)),
            trigger
        );

        result.unwrap().unwrap();
        assert_eq!(server.state(), SessionState::Closed);
    }

    #[test]
    fn message_ids_increase() {
        let (a, _b) = duplex(64);
        let kind = TransportKind::StructuredRpc;
        let mut handler = SessionHandler::new(FramedTransport::new(a, kind), kind, &config());
        assert_eq!(handler.next_message_id(), MessageId(1));
        assert_eq!(handler.next_message_id(), MessageId(2));
    }

    /// Records what it was given and claims to authenticate.
    #[derive(Default)]
    struct RecordingProvider {
        seen: std::sync::Mutex<Option<Credentials>>,
    }

    #[async_trait::async_trait]
    impl SessionProvider for RecordingProvider {
        async fn establish(
            &self,
            _transport: &mut dyn Transport,
            _codec: Codec,
            _role: Role,
            credentials: &Credentials,
        ) -> Result<(), SessionError> {
            *self.seen.lock().unwrap() = Some(credentials.clone());
            Ok(())
        }

        fn name(&self) -> &'static str {
            "recording"
        }

        fn authenticates(&self) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn establish_hands_credentials_to_provider() {
        let credentials = Credentials {
            username: "ops".into(),
            password: Some("pw".into()),
            private_key: None,
        };
        let (client, _peer) = pair(TransportKind::StructuredRpc);
        let mut client = client.with_credentials(credentials.clone());
        let provider = RecordingProvider::default();

        client.establish(&provider, Role::Client).await.unwrap();

        assert_eq!(client.state(), SessionState::Established);
        assert_eq!(*provider.seen.lock().unwrap(), Some(credentials));
    }
}
