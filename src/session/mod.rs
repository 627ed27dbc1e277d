//! Session subsystem.
//!
//! # Data Flow
//! ```text
//! connected stream
//!     → FramedTransport (net::transport)
//!     → SessionProvider::establish (handshake)
//!     → SessionHandler
//!         server: recv → decode → Dispatcher → encode → send   (loop until Close / EOF / shutdown)
//!         client: send request → await reply with the same message_id
//! ```
//!
//! # Design Decisions
//! - One handler owns one connection; state is private and changes only through the state machine
//! - Strict request/reply alternation, no pipelining
//! - Receives are bounded by the poll interval so shutdown is observed promptly
//! - A correlation mismatch is reported without consuming the pending request

use std::time::Duration;

use thiserror::Error;

use crate::codec::MalformedMessage;
use crate::net::TransportError;
use crate::protocol::MessageId;

pub mod handler;
pub mod provider;
pub mod state;

pub use handler::SessionHandler;
pub use provider::{Credentials, HelloHandshake, PlainStream, Role, SessionProvider};
pub use state::SessionState;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("reply carries message id {received}, expected {expected}")]
    CorrelationMismatch {
        expected: MessageId,
        received: MessageId,
    },

    #[error("no reply within {0:?}")]
    Timeout(Duration),

    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("session establishment failed: {reason}")]
    SessionEstablishmentFailed { reason: String },

    #[error("session is closed")]
    SessionClosed,

    #[error("illegal state transition {from} -> {to}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("undecodable reply: {0}")]
    Malformed(#[from] MalformedMessage),

    /// The peer answered with something that is not a reply.
    #[error("expected a reply, received {kind}")]
    UnexpectedMessage { kind: &'static str },
}

impl SessionError {
    pub(crate) fn establishment(reason: impl Into<String>) -> Self {
        Self::SessionEstablishmentFailed {
            reason: reason.into(),
        }
    }
}
