//! Initiator flows.
//!
//! # Data Flow
//! ```text
//! IdentifierGenerator::generate → TraceContext
//!     → connect (TCP) → FramedTransport → SessionProvider::establish
//!     → SessionHandler::call (request, correlated reply)
//!     → SessionHandler::close
//! ```
//!
//! # Design Decisions
//! - Each flow is one-shot: connect, exchange, close
//! - An error reply from the peer fails the flow with its error code
//! - The structured-RPC flow hands the configured credentials to its provider
//!   and reports whether the provider actually authenticated
//! - A configured private key that does not exist is provisioned before
//!   connecting; without a provisioner the flow fails instead of going on

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::net::TcpStream;

use crate::config::TracelinkConfig;
use crate::net::FramedTransport;
use crate::protocol::{
    Envelope, ErrorCode, InterfaceRecord, InterfaceStatus, Kind, Operation, Payload, TransportKind,
};
use crate::provisioning::{CredentialProvisioner, ProvisionError, Unprovisioned};
use crate::server::default_provider;
use crate::session::{Credentials, Role, SessionError, SessionHandler, SessionProvider};
use crate::trace::{IdentifierGenerator, RandomSourceUnavailable, TraceContext};

/// Interface managed by the structured-RPC flow.
pub const DEFAULT_INTERFACE: &str = "eth0";

pub type ClientSession = SessionHandler<FramedTransport<TcpStream>>;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    RandomSource(#[from] RandomSourceUnavailable),

    #[error("credential provisioning failed: {0}")]
    Provision(#[from] ProvisionError),

    #[error("peer rejected the request: {0}")]
    Rejected(ErrorCode),

    #[error("reply did not echo the trace context that was sent")]
    EchoMismatch,
}

/// Outcome of the flat-text exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FlatExchange {
    pub sent: TraceContext,
    pub reply: Envelope,
}

/// Outcome of the structured-RPC exchange.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcExchange {
    pub sent: TraceContext,
    /// Whether the session provider authenticated with the credentials.
    pub authenticated: bool,
    pub get_reply: Envelope,
    pub edit_reply: Envelope,
}

/// Credentials for the configured peer, provisioning a missing private key.
pub fn resolve_credentials(
    config: &TracelinkConfig,
    provisioner: &dyn CredentialProvisioner,
) -> Result<Credentials, ClientError> {
    let mut credentials = Credentials::from_client_config(&config.client);
    if let Some(key) = &credentials.private_key {
        if !key.exists() {
            let dir = key
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .unwrap_or_else(|| Path::new("."));
            tracing::info!(private_key = %key.display(), "Private key missing, provisioning");
            let files = provisioner.generate_ssh_key(dir)?;
            credentials.private_key = Some(files.private_key);
        }
    }
    Ok(credentials)
}

/// Open and establish a client session to the configured peer.
pub async fn connect(
    config: &TracelinkConfig,
    kind: TransportKind,
    provider: &dyn SessionProvider,
    credentials: Credentials,
) -> Result<ClientSession, ClientError> {
    let address = format!("{}:{}", config.client.host, config.client.port);
    let stream = TcpStream::connect(&address)
        .await
        .map_err(|source| ClientError::Connect {
            address: address.clone(),
            source,
        })?;
    let peer_addr = stream.peer_addr().ok();
    if let Err(e) = stream.set_nodelay(true) {
        tracing::debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let transport = FramedTransport::new(stream, kind)
        .with_max_frame_bytes(config.session.max_frame_bytes)
        .with_continuation_grace(config.session.continuation_grace());
    let mut session = SessionHandler::new(transport, kind, &config.session).with_credentials(credentials);
    if let Some(addr) = peer_addr {
        session = session.with_peer_addr(addr);
    }

    tracing::info!(
        session_id = %session.id(),
        address = %address,
        transport = %kind,
        provider = provider.name(),
        "Connecting"
    );
    session.establish(provider, Role::Client).await?;
    Ok(session)
}

fn accept(reply: Envelope) -> Result<Envelope, ClientError> {
    match reply.kind {
        Kind::ErrorReply(code) => {
            tracing::warn!(message_id = %reply.message_id, code = %code, "Peer returned an error");
            Err(ClientError::Rejected(code))
        }
        _ => Ok(reply),
    }
}

/// Send one generated trace context over flat text and check the echo.
pub async fn run_flat_exchange(config: &TracelinkConfig) -> Result<FlatExchange, ClientError> {
    let ctx = IdentifierGenerator::new().generate()?;
    tracing::info!(trace_id = %ctx.trace_id(), span_id = %ctx.span_id(), "Generated trace context");

    let provider = default_provider(TransportKind::FlatText);
    let mut session =
        connect(config, TransportKind::FlatText, provider.as_ref(), Credentials::default()).await?;

    let request = Envelope::request(session.next_message_id(), Operation::Get, Payload::Trace(ctx))
        .stamped();
    let reply = accept(session.call(request).await?)?;
    session.close().await?;

    if reply.payload.trace() != Some(&ctx) {
        return Err(ClientError::EchoMismatch);
    }
    tracing::info!(
        message_id = %reply.message_id,
        trace_id = %ctx.trace_id(),
        "Peer acknowledged tracing data"
    );
    Ok(FlatExchange { sent: ctx, reply })
}

/// Read then set the managed interface over structured RPC.
pub async fn run_rpc_exchange(config: &TracelinkConfig) -> Result<RpcExchange, ClientError> {
    run_rpc_exchange_with(config, default_provider(TransportKind::StructuredRpc)).await
}

/// [`run_rpc_exchange`] over a caller-chosen session provider.
pub async fn run_rpc_exchange_with(
    config: &TracelinkConfig,
    provider: Arc<dyn SessionProvider>,
) -> Result<RpcExchange, ClientError> {
    let credentials = resolve_credentials(config, &Unprovisioned)?;
    let ctx = IdentifierGenerator::new().generate()?;
    tracing::info!(
        trace_id = %ctx.trace_id(),
        span_id = %ctx.span_id(),
        interface = DEFAULT_INTERFACE,
        "Generated interface data"
    );

    let authenticated = provider.authenticates();
    let mut session =
        connect(config, TransportKind::StructuredRpc, provider.as_ref(), credentials).await?;
    if !authenticated {
        tracing::warn!(provider = provider.name(), "Structured-RPC session is not authenticated");
    }

    let get = Envelope::request(
        session.next_message_id(),
        Operation::Get,
        Payload::Interface(InterfaceRecord::get(DEFAULT_INTERFACE, ctx)),
    )
    .stamped();
    let get_reply = accept(session.call(get).await?)?;
    if let Payload::Interface(record) = &get_reply.payload {
        tracing::info!(interface = %record.name, status = %record.status, "get-config answered");
    }

    let edit = Envelope::request(
        session.next_message_id(),
        Operation::Edit,
        Payload::Interface(InterfaceRecord::set(DEFAULT_INTERFACE, InterfaceStatus::Up, ctx)),
    )
    .stamped();
    let edit_reply = accept(session.call(edit).await?)?;
    tracing::info!(message_id = %edit_reply.message_id, "edit-config acknowledged");

    session.close().await?;
    Ok(RpcExchange {
        sent: ctx,
        authenticated,
        get_reply,
        edit_reply,
    })
}
