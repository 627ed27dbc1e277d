//! Session state machine.
//!
//! ```text
//! Connecting → Established → AwaitingRequest ⇄ Processing        (server)
//!              Established ⇄ AwaitingResponse                     (client)
//! any non-terminal → Closing → Closed
//! any non-terminal → Failed
//! ```

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transport connected, session not yet established.
    Connecting,
    /// Handshake complete, idle.
    Established,
    /// Server: waiting for the next request.
    AwaitingRequest,
    /// Server: a request is being dispatched and answered.
    Processing,
    /// Client: a request was sent, its reply has not arrived.
    AwaitingResponse,
    Closing,
    Closed,
    Failed,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Closed | Self::Failed)
    }

    /// Whether the machine permits `self → next`.
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;

        if self.is_terminal() {
            return false;
        }
        match (self, next) {
            (_, Failed) => true,
            (Closing, Closed) => true,
            (Closing, _) => false,
            (_, Closing) => true,
            (Connecting, Established) => true,
            (Established, AwaitingRequest | AwaitingResponse) => true,
            (AwaitingRequest, Processing) => true,
            (Processing, AwaitingRequest) => true,
            (AwaitingResponse, Established) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Established => "established",
            Self::AwaitingRequest => "awaiting_request",
            Self::Processing => "processing",
            Self::AwaitingResponse => "awaiting_response",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
