//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//!
//! Shutdown (shutdown.rs):
//!     trigger → every ShutdownToken observes it
//!     → accept loop stops → session loops close at their next poll → drain → exit
//! ```
//!
//! # Design Decisions
//! - Cancellation is an explicit token passed into every long-running loop
//! - Shutdown has a drain deadline: remaining sessions are abandoned after it

pub mod shutdown;
pub mod signals;

pub use shutdown::{Shutdown, ShutdownToken};
