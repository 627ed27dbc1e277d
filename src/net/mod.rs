//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, connection limits)
//!     → connection.rs (session id, active session tracking)
//!     → transport.rs (frame splitting per transport kind)
//!     → Hand off to the session layer
//! ```
//!
//! # Design Decisions
//! - Bounded accept queue prevents resource exhaustion
//! - Each session is tracked for graceful shutdown
//! - Framing is independent of the envelope codec

pub mod connection;
pub mod listener;
pub mod transport;

pub use connection::{SessionGuard, SessionId, SessionTracker};
pub use listener::{Listener, ListenerError, SessionPermit};
pub use transport::{FramedTransport, Transport, TransportError};
