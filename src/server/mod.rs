//! Session server.
//!
//! # Data Flow
//! ```text
//! Listener::accept (bounded by max_connections)
//!     → SessionTracker::track (session id, active count)
//!     → spawned task: FramedTransport → SessionProvider::establish → SessionHandler::serve
//!
//! On shutdown:
//!     accept loop exits → sessions close at their next poll → drain (bounded) → return
//! ```
//!
//! # Design Decisions
//! - One task per session; the accept loop never waits on a session
//! - All sessions share one Dispatcher and its InterfaceStore
//! - Accept errors are logged and the loop continues

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tracing::Instrument;

use crate::config::TracelinkConfig;
use crate::dispatch::Dispatcher;
use crate::lifecycle::ShutdownToken;
use crate::net::{FramedTransport, Listener, ListenerError, SessionPermit, SessionTracker};
use crate::observability::metrics;
use crate::protocol::TransportKind;
use crate::session::{HelloHandshake, PlainStream, Role, SessionHandler, SessionProvider};

const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error(transparent)]
    Listener(#[from] ListenerError),
}

/// The provider a transport uses when none is configured.
pub fn default_provider(kind: TransportKind) -> Arc<dyn SessionProvider> {
    match kind {
        TransportKind::StructuredRpc => Arc::new(HelloHandshake),
        TransportKind::FlatText => Arc::new(PlainStream),
    }
}

/// Accepts connections of one transport kind and serves each as a session.
pub struct Server {
    config: Arc<TracelinkConfig>,
    kind: TransportKind,
    dispatcher: Dispatcher,
    provider: Arc<dyn SessionProvider>,
    tracker: SessionTracker,
}

impl Server {
    pub fn new(config: TracelinkConfig, kind: TransportKind) -> Self {
        Self {
            config: Arc::new(config),
            kind,
            dispatcher: Dispatcher::default(),
            provider: default_provider(kind),
            tracker: SessionTracker::new(),
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Dispatcher) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn tracker(&self) -> &SessionTracker {
        &self.tracker
    }

    pub async fn bind(&self) -> Result<Listener, ServerError> {
        Ok(Listener::bind(&self.config.listener).await?)
    }

    /// Accept and serve sessions until `shutdown` fires, then drain.
    pub async fn run(&self, listener: Listener, mut shutdown: ShutdownToken) -> Result<(), ServerError> {
        tracing::info!(
            transport = %self.kind,
            provider = self.provider.name(),
            "Accepting sessions"
        );

        loop {
            let accepted = tokio::select! {
                _ = shutdown.triggered() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer_addr, permit)) => {
                    self.spawn_session(stream, peer_addr, permit, shutdown.clone());
                }
                Err(ListenerError::Accept(e)) => {
                    tracing::warn!(error = %e, "Accept failed");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let active = self.tracker.active_count();
        tracing::info!(active_sessions = active, "Stopped accepting, draining sessions");
        if !self.tracker.wait_for_drain(DRAIN_TIMEOUT).await {
            tracing::warn!(
                active_sessions = self.tracker.active_count(),
                "Drain deadline passed with sessions still open"
            );
        }
        Ok(())
    }

    fn spawn_session(
        &self,
        stream: TcpStream,
        peer_addr: std::net::SocketAddr,
        permit: SessionPermit,
        shutdown: ShutdownToken,
    ) {
        let guard = self.tracker.track();
        let kind = self.kind;
        let config = Arc::clone(&self.config);
        let dispatcher = self.dispatcher.clone();
        let provider = Arc::clone(&self.provider);
        let span = tracing::info_span!(
            "session",
            session_id = %guard.id(),
            peer_addr = %peer_addr,
            transport = %kind
        );

        tokio::spawn(
            async move {
                let _permit = permit;
                if let Err(e) = stream.set_nodelay(true) {
                    tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
                }

                let transport = FramedTransport::new(stream, kind)
                    .with_max_frame_bytes(config.session.max_frame_bytes)
                    .with_continuation_grace(config.session.continuation_grace());
                let mut session = SessionHandler::new(transport, kind, &config.session)
                    .with_id(guard.id())
                    .with_peer_addr(peer_addr);

                tracing::info!("Client connected");
                let result = match session.establish(provider.as_ref(), Role::Server).await {
                    Ok(()) => session.serve(&dispatcher, shutdown).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = &result {
                    tracing::warn!(error = %e, state = %session.state(), "Session ended with error");
                }

                metrics::session_finished(kind, session.state().as_str());
                drop(guard);
            }
            .instrument(span),
        );
    }
}
