//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::net::transport::{DEFAULT_CONTINUATION_GRACE, DEFAULT_MAX_FRAME_BYTES};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct TracelinkConfig {
    /// Server-side listener.
    pub listener: ListenerConfig,

    /// Client-side peer and credentials.
    pub client: ClientConfig,

    /// Session timing and framing limits.
    pub session: SessionConfig,

    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8443").
    pub bind_address: String,

    /// Maximum concurrent sessions (backpressure).
    pub max_connections: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8443".to_string(),
            max_connections: 1_024,
        }
    }
}

/// Client configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,

    /// Management-session credentials, handed to the session provider.
    pub username: String,
    pub password: String,

    /// Private key for key-based session providers.
    pub private_key_path: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8443,
            username: "admin".to_string(),
            password: "admin123".to_string(),
            private_key_path: None,
        }
    }
}

/// Session timing configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Upper bound on one server-side receive wait before re-checking shutdown.
    pub poll_interval_ms: u64,

    /// How long a client waits for a correlated reply.
    pub response_timeout_ms: u64,

    /// How long session establishment may take.
    pub handshake_timeout_ms: u64,

    pub max_frame_bytes: usize,

    /// How long a flat-text line that leaves an object open waits for the
    /// next line before it is handed to the codec as-is.
    pub continuation_grace_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            response_timeout_ms: 5_000,
            handshake_timeout_ms: 5_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            continuation_grace_ms: DEFAULT_CONTINUATION_GRACE.as_millis() as u64,
        }
    }
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn continuation_grace(&self) -> Duration {
        Duration::from_millis(self.continuation_grace_ms)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,

    /// Enable the Prometheus endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_filter: "tracelink=info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
