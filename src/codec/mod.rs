//! Envelope codecs.
//!
//! # Data Flow
//! ```text
//! Envelope
//!     → MessageCodec::encode (fixed template per kind)
//!     → bytes (one frame)
//!
//! bytes
//!     → tokenizer (validates field boundaries up front)
//!     → field extraction (MissingField / Truncated / AmbiguousNesting / InvalidValue)
//!     → Envelope
//! ```
//!
//! # Design Decisions
//! - Two interchangeable variants: structured markup (markup.rs) and flat text (flat.rs)
//! - Field-oriented decoding: no document tree, no schema validation
//! - Decoding is total: malformed input yields a `MalformedMessage`, never a panic
//! - `decode(encode(e)) == e` within one variant

use thiserror::Error;

use crate::protocol::{Envelope, MessageId, TransportKind};

pub mod flat;
pub mod markup;

pub use flat::FlatCodec;
pub use markup::MarkupCodec;

/// Why a frame could not be decoded into an envelope.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MalformedMessage {
    /// A required field's opening marker is absent.
    #[error("missing field `{field}`")]
    MissingField { field: String },

    /// A field was opened but the input ended before it was closed.
    #[error("field `{field}` is truncated")]
    Truncated { field: String },

    /// A field's value contains the variant's own nesting delimiter.
    #[error("field `{field}` contains a nested marker")]
    AmbiguousNesting { field: String },

    /// A field is present and delimited but its value is not acceptable.
    #[error("field `{field}` has an invalid value: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl MalformedMessage {
    pub(crate) fn missing(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    pub(crate) fn truncated(field: impl Into<String>) -> Self {
        Self::Truncated {
            field: field.into(),
        }
    }

    pub(crate) fn nested(field: impl Into<String>) -> Self {
        Self::AmbiguousNesting {
            field: field.into(),
        }
    }

    pub(crate) fn invalid(field: impl Into<String>, reason: impl ToString) -> Self {
        Self::InvalidValue {
            field: field.into(),
            reason: reason.to_string(),
        }
    }

    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MissingField { .. } => "missing_field",
            Self::Truncated { .. } => "truncated",
            Self::AmbiguousNesting { .. } => "ambiguous_nesting",
            Self::InvalidValue { .. } => "invalid_value",
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::MissingField { field }
            | Self::Truncated { field }
            | Self::AmbiguousNesting { field }
            | Self::InvalidValue { field, .. } => field,
        }
    }
}

/// Encode/decode pair for one wire format.
pub trait MessageCodec {
    /// Render an envelope into one frame. Never fails.
    fn encode(&self, envelope: &Envelope) -> Vec<u8>;

    /// Parse one frame.
    fn decode(&self, bytes: &[u8]) -> Result<Envelope, MalformedMessage>;

    /// Best-effort recovery of the correlation id from a frame that failed
    /// to decode, so the error reply can still be correlated.
    fn peek_message_id(&self, bytes: &[u8]) -> Option<MessageId>;
}

/// The codec variant for a session's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Codec {
    Markup(MarkupCodec),
    Flat(FlatCodec),
}

impl Codec {
    pub fn for_transport(kind: TransportKind) -> Self {
        match kind {
            TransportKind::StructuredRpc => Self::Markup(MarkupCodec),
            TransportKind::FlatText => Self::Flat(FlatCodec),
        }
    }

    pub fn transport_kind(&self) -> TransportKind {
        match self {
            Self::Markup(_) => TransportKind::StructuredRpc,
            Self::Flat(_) => TransportKind::FlatText,
        }
    }
}

impl MessageCodec for Codec {
    fn encode(&self, envelope: &Envelope) -> Vec<u8> {
        match self {
            Self::Markup(codec) => codec.encode(envelope),
            Self::Flat(codec) => codec.encode(envelope),
        }
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, MalformedMessage> {
        match self {
            Self::Markup(codec) => codec.decode(bytes),
            Self::Flat(codec) => codec.decode(bytes),
        }
    }

    fn peek_message_id(&self, bytes: &[u8]) -> Option<MessageId> {
        match self {
            Self::Markup(codec) => codec.peek_message_id(bytes),
            Self::Flat(codec) => codec.peek_message_id(bytes),
        }
    }
}

pub(crate) fn utf8(bytes: &[u8]) -> Result<&str, MalformedMessage> {
    std::str::from_utf8(bytes).map_err(|e| MalformedMessage::invalid("encoding", e))
}
