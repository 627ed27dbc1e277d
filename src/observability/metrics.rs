//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tracelink_envelopes_total` (counter): envelopes sent or received, by `kind` and `direction`
//! - `tracelink_decode_failures_total` (counter): undecodable frames, by `reason`
//! - `tracelink_sessions_total` (counter): finished sessions, by `transport` and `outcome`
//! - `tracelink_active_sessions` (gauge): sessions currently open

use std::net::SocketAddr;

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::protocol::{Kind, TransportKind};

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

pub fn record_envelope(kind: &Kind, direction: Direction) {
    counter!(
        "tracelink_envelopes_total",
        "kind" => kind.label(),
        "direction" => direction.as_str()
    )
    .increment(1);
}

pub fn record_decode_failure(reason: &'static str) {
    counter!("tracelink_decode_failures_total", "reason" => reason).increment(1);
}

pub fn session_opened() {
    gauge!("tracelink_active_sessions").increment(1.0);
}

pub fn session_released() {
    gauge!("tracelink_active_sessions").decrement(1.0);
}

/// Record the end of a session. `outcome` is the terminal state label.
pub fn session_finished(transport: TransportKind, outcome: &'static str) {
    counter!(
        "tracelink_sessions_total",
        "transport" => transport.as_str(),
        "outcome" => outcome
    )
    .increment(1);
}
