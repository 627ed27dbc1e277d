//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! codec / dispatch / session produce:
//!     → logging.rs (structured log events via `tracing`)
//!     → metrics.rs (counters and gauges via `metrics`)
//!
//! Consumers:
//!     → stdout (fmt layer, filtered by RUST_LOG or config)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Every log event carries structured fields (`session_id`, `peer_addr`, `message_id`, `trace_id`)
//! - Metric updates are no-ops until an exporter is installed

pub mod logging;
pub mod metrics;
