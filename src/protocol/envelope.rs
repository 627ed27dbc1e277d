//! Envelope: correlation id, kind and payload.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::protocol::interface::InterfaceRecord;
use crate::trace::TraceContext;

/// Wire binding a session runs over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// Structured-markup RPC envelope over a management session.
    StructuredRpc,
    /// Flat text object over a raw stream socket.
    FlatText,
}

impl TransportKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StructuredRpc => "structured_rpc",
            Self::FlatText => "flat_text",
        }
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-assigned correlation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const fn next(&self) -> Self {
        Self(self.0.wrapping_add(1))
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation named by a request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Read state (`get-config` / `tracing_data`).
    Get,
    /// Modify state (`edit-config` / `edit_config`).
    Edit,
    /// Any other operation seen on the wire. Routed to an error reply.
    ///
    /// The name is a bare identifier (`[A-Za-z0-9_-]+`) that no codec
    /// reserves; build it through [`Operation::other`].
    Other(String),
}

/// Operation and kind names that the codecs reserve.
const RESERVED_NAMES: &[&str] = &[
    "get-config",
    "edit-config",
    "close-session",
    "tracing_data",
    "edit_config",
    "hello",
    "close",
];

impl Operation {
    /// Validate an operation name that is not one of the known operations.
    pub fn other(name: &str) -> Option<Self> {
        if is_identifier(name) && !RESERVED_NAMES.contains(&name) {
            Some(Self::Other(name.to_string()))
        } else {
            None
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Get => "get",
            Self::Edit => "edit",
            Self::Other(name) => name,
        }
    }
}

pub(crate) fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Error condition carried by an error reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The request could not be decoded.
    MalformedMessage,
    /// The request named an operation this peer does not serve.
    UnsupportedOperation,
    /// The request decoded but its payload cannot be acted on.
    InvalidValue,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 3] = [
        Self::MalformedMessage,
        Self::UnsupportedOperation,
        Self::InvalidValue,
    ];

    /// Tag used on the wire by both codecs.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::MalformedMessage => "malformed-message",
            Self::UnsupportedOperation => "operation-not-supported",
            Self::InvalidValue => "invalid-value",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|code| code.tag() == tag)
    }

    /// Operator-facing text sent alongside the tag.
    pub fn message(&self) -> &'static str {
        match self {
            Self::MalformedMessage => "Failed to parse tracing data",
            Self::UnsupportedOperation => "Operation not supported",
            Self::InvalidValue => "Request payload is missing or invalid",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// What an envelope is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Kind {
    Hello,
    Request(Operation),
    Reply,
    ErrorReply(ErrorCode),
    Close,
}

impl Kind {
    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Hello => "hello",
            Self::Request(Operation::Get) => "request_get",
            Self::Request(Operation::Edit) => "request_edit",
            Self::Request(Operation::Other(_)) => "request_other",
            Self::Reply => "reply",
            Self::ErrorReply(_) => "error_reply",
            Self::Close => "close",
        }
    }
}

/// Envelope body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Payload {
    #[default]
    Empty,
    Trace(TraceContext),
    Interface(InterfaceRecord),
}

impl Payload {
    /// The trace context carried by this payload, if any.
    pub fn trace(&self) -> Option<&TraceContext> {
        match self {
            Self::Empty => None,
            Self::Trace(ctx) => Some(ctx),
            Self::Interface(record) => Some(&record.trace),
        }
    }
}

/// The outer message exchanged by peers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: MessageId,
    pub kind: Kind,
    #[serde(default)]
    pub payload: Payload,
    /// Unix seconds at which the sender built the envelope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

impl Envelope {
    pub fn new(message_id: MessageId, kind: Kind, payload: Payload) -> Self {
        Self {
            message_id,
            kind,
            payload,
            timestamp: None,
        }
    }

    pub fn hello(message_id: MessageId) -> Self {
        Self::new(message_id, Kind::Hello, Payload::Empty)
    }

    pub fn request(message_id: MessageId, operation: Operation, payload: Payload) -> Self {
        Self::new(message_id, Kind::Request(operation), payload)
    }

    pub fn close(message_id: MessageId) -> Self {
        Self::new(message_id, Kind::Close, Payload::Empty)
    }

    /// A reply correlated with `request`.
    pub fn reply_to(request: &Envelope, payload: Payload) -> Self {
        Self::new(request.message_id, Kind::Reply, payload)
    }

    /// An error reply correlated with `message_id`.
    pub fn error_reply(message_id: MessageId, code: ErrorCode) -> Self {
        Self::new(message_id, Kind::ErrorReply(code), Payload::Empty)
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Stamp with the current wall-clock time.
    pub fn stamped(self) -> Self {
        self.with_timestamp(unix_now())
    }

    pub fn is_response(&self) -> bool {
        matches!(self.kind, Kind::Reply | Kind::ErrorReply(_))
    }
}

/// Current Unix time in seconds; zero if the clock is before the epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
