//! Session establishment seam.
//!
//! # Responsibilities
//! - Turn a connected frame transport into an established session
//! - Keep secure-channel setup (key exchange, authentication) behind a trait
//!
//! # Design Decisions
//! - The built-in providers work over plain streams and do not authenticate;
//!   credentials handed to them are reported unused, never silently accepted
//! - A secure provider implements the same trait and consumes the credentials

use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;

use crate::codec::{Codec, MessageCodec};
use crate::config::ClientConfig;
use crate::net::Transport;
use crate::protocol::{Envelope, Kind, MessageId};
use crate::session::SessionError;

/// Which side of the session the local peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Client,
    Server,
}

/// Login material for providers that authenticate the session.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: Option<String>,
    pub private_key: Option<PathBuf>,
}

impl Credentials {
    pub fn from_client_config(config: &ClientConfig) -> Self {
        Self {
            username: config.username.clone(),
            password: Some(config.password.clone()).filter(|p| !p.is_empty()),
            private_key: config.private_key_path.as_ref().map(PathBuf::from),
        }
    }

    /// Whether there is a secret to authenticate with.
    pub fn is_empty(&self) -> bool {
        self.password.is_none() && self.private_key.is_none()
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key)
            .finish()
    }
}

/// Establishes a session over a connected transport.
#[async_trait]
pub trait SessionProvider: Send + Sync {
    /// Run the handshake. Any error fails the session.
    async fn establish(
        &self,
        transport: &mut dyn Transport,
        codec: Codec,
        role: Role,
        credentials: &Credentials,
    ) -> Result<(), SessionError>;

    fn name(&self) -> &'static str;

    /// Whether `establish` authenticates with the credentials it is given.
    fn authenticates(&self) -> bool {
        false
    }
}

fn warn_unused_credentials(provider: &'static str, credentials: &Credentials) {
    if !credentials.is_empty() {
        tracing::warn!(
            provider,
            username = %credentials.username,
            "Credentials configured but this provider does not authenticate; session is unauthenticated"
        );
    }
}

/// No handshake: the session is established once the stream is connected.
///
/// Used by flat-text sessions.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainStream;

#[async_trait]
impl SessionProvider for PlainStream {
    async fn establish(
        &self,
        _transport: &mut dyn Transport,
        _codec: Codec,
        _role: Role,
        credentials: &Credentials,
    ) -> Result<(), SessionError> {
        warn_unused_credentials(self.name(), credentials);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "plain"
    }
}

/// Capability exchange: both peers send `hello` and expect one back.
#[derive(Debug, Clone, Copy, Default)]
pub struct HelloHandshake;

#[async_trait]
impl SessionProvider for HelloHandshake {
    async fn establish(
        &self,
        transport: &mut dyn Transport,
        codec: Codec,
        role: Role,
        credentials: &Credentials,
    ) -> Result<(), SessionError> {
        warn_unused_credentials(self.name(), credentials);
        let hello = Envelope::hello(MessageId(0)).stamped();
        transport
            .send(&codec.encode(&hello))
            .await
            .map_err(|e| SessionError::establishment(format!("sending hello: {e}")))?;

        let frame = transport
            .recv()
            .await
            .map_err(|e| SessionError::establishment(format!("receiving hello: {e}")))?
            .ok_or_else(|| SessionError::establishment("peer closed before hello"))?;

        let peer = codec
            .decode(&frame)
            .map_err(|e| SessionError::establishment(format!("peer hello: {e}")))?;

        if peer.kind != Kind::Hello {
            return Err(SessionError::establishment(format!(
                "expected hello, received {}",
                peer.kind.label()
            )));
        }

        tracing::debug!(role = ?role, "Capabilities exchanged");
        Ok(())
    }

    fn name(&self) -> &'static str {
        "hello"
    }
}
