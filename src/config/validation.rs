//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just the first

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::TracelinkConfig;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &TracelinkConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("{:?} is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_connections == 0 {
        errors.push(ValidationError::new("listener.max_connections", "must be at least 1"));
    }

    if config.client.host.trim().is_empty() {
        errors.push(ValidationError::new("client.host", "must not be empty"));
    }

    let session = &config.session;
    for (field, value) in [
        ("session.poll_interval_ms", session.poll_interval_ms),
        ("session.response_timeout_ms", session.response_timeout_ms),
        ("session.handshake_timeout_ms", session.handshake_timeout_ms),
        ("session.continuation_grace_ms", session.continuation_grace_ms),
    ] {
        if value == 0 {
            errors.push(ValidationError::new(field, "must be greater than 0"));
        }
    }
    if session.max_frame_bytes < 256 {
        errors.push(ValidationError::new("session.max_frame_bytes", "must be at least 256"));
    }

    let observability = &config.observability;
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("{:?} is not a socket address", observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
