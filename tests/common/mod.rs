//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

use tracelink::codec::{Codec, MessageCodec};
use tracelink::config::TracelinkConfig;
use tracelink::net::{FramedTransport, Transport};
use tracelink::server::ServerError;
use tracelink::{Dispatcher, Envelope, Server, Shutdown, TraceContext, TransportKind};

pub const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
pub const SPAN: &str = "00f067aa0ba902b7";

pub fn ctx() -> TraceContext {
    TraceContext::parse(TRACE, SPAN).unwrap()
}

/// Defaults with short timers so tests finish quickly.
pub fn test_config() -> TracelinkConfig {
    let mut config = TracelinkConfig::default();
    config.listener.bind_address = "127.0.0.1:0".to_string();
    config.client.host = "127.0.0.1".to_string();
    config.session.poll_interval_ms = 50;
    config.session.response_timeout_ms = 2_000;
    config.session.handshake_timeout_ms = 2_000;
    config
}

/// A running server on an ephemeral loopback port.
pub struct TestServer {
    pub addr: SocketAddr,
    pub shutdown: Shutdown,
    pub dispatcher: Dispatcher,
    pub handle: JoinHandle<Result<(), ServerError>>,
}

impl TestServer {
    /// Client config pointing at this server.
    pub fn client_config(&self) -> TracelinkConfig {
        let mut config = test_config();
        config.client.port = self.addr.port();
        config
    }

    /// Trigger shutdown and wait for the accept loop to drain.
    pub async fn stop(self) {
        self.shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(5), self.handle)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap();
    }
}

pub async fn start_server(kind: TransportKind) -> TestServer {
    let dispatcher = Dispatcher::default();
    let server = Server::new(test_config(), kind).with_dispatcher(dispatcher.clone());
    let listener = server.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();

    let shutdown = Shutdown::new();
    let token = shutdown.token();
    let handle = tokio::spawn(async move { server.run(listener, token).await });

    TestServer {
        addr,
        shutdown,
        dispatcher,
        handle,
    }
}

/// A raw framed connection that speaks the wire format directly.
pub struct RawPeer {
    pub transport: FramedTransport<TcpStream>,
    pub codec: Codec,
}

impl RawPeer {
    pub async fn connect(addr: SocketAddr, kind: TransportKind) -> Self {
        let stream = TcpStream::connect(addr).await.unwrap();
        Self {
            transport: FramedTransport::new(stream, kind),
            codec: Codec::for_transport(kind),
        }
    }

    pub fn accepted(stream: TcpStream, kind: TransportKind) -> Self {
        Self {
            transport: FramedTransport::new(stream, kind),
            codec: Codec::for_transport(kind),
        }
    }

    pub async fn send_raw(&mut self, frame: &[u8]) {
        self.transport.send(frame).await.unwrap();
    }

    pub async fn send(&mut self, envelope: &Envelope) {
        let frame = self.codec.encode(envelope);
        self.send_raw(&frame).await;
    }

    pub async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        tokio::time::timeout(Duration::from_secs(5), self.transport.recv())
            .await
            .expect("no frame in time")
            .unwrap()
    }

    pub async fn recv(&mut self) -> Envelope {
        let frame = self.recv_raw().await.expect("peer closed");
        self.codec.decode(&frame).unwrap()
    }

    /// Discard frames until the other side closes.
    pub async fn drain(&mut self) {
        while let Ok(Some(_)) = self.transport.recv().await {}
    }
}

/// Accept one connection on an ephemeral port and hand it to `script`.
pub async fn start_scripted_peer<F, Fut>(kind: TransportKind, script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(RawPeer) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        script(RawPeer::accepted(stream, kind)).await;
    });
    (addr, handle)
}
