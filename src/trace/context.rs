//! Trace and span identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Number of hex characters in a rendered trace id.
pub const TRACE_ID_HEX_LEN: usize = 32;

/// Number of hex characters in a rendered span id.
pub const SPAN_ID_HEX_LEN: usize = 16;

/// Rejected identifier text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidIdentifier {
    #[error("expected {expected} hex characters, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("character {found:?} at offset {offset} is not lowercase hex")]
    Alphabet { offset: usize, found: char },
}

fn check_lower_hex(s: &str, expected: usize) -> Result<(), InvalidIdentifier> {
    if s.len() != expected {
        return Err(InvalidIdentifier::Length {
            expected,
            actual: s.len(),
        });
    }
    for (offset, found) in s.char_indices() {
        if !matches!(found, '0'..='9' | 'a'..='f') {
            return Err(InvalidIdentifier::Alphabet { offset, found });
        }
    }
    Ok(())
}

/// A 128-bit trace identifier, rendered as 32 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct TraceId(u128);

impl TraceId {
    /// Build from the 16 raw bytes drawn by the generator.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl FromStr for TraceId {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_lower_hex(s, TRACE_ID_HEX_LEN)?;
        // Alphabet and width were checked above.
        u128::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| InvalidIdentifier::Length {
                expected: TRACE_ID_HEX_LEN,
                actual: s.len(),
            })
    }
}

impl TryFrom<String> for TraceId {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TraceId> for String {
    fn from(id: TraceId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TraceId({:032x})", self.0)
    }
}

/// A 64-bit span identifier, rendered as 16 lowercase hex characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct SpanId(u64);

impl SpanId {
    pub const fn from_bytes(bytes: [u8; 8]) -> Self {
        Self(u64::from_be_bytes(bytes))
    }
}

impl FromStr for SpanId {
    type Err = InvalidIdentifier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        check_lower_hex(s, SPAN_ID_HEX_LEN)?;
        u64::from_str_radix(s, 16)
            .map(Self)
            .map_err(|_| InvalidIdentifier::Length {
                expected: SPAN_ID_HEX_LEN,
                actual: s.len(),
            })
    }
}

impl TryFrom<String> for SpanId {
    type Error = InvalidIdentifier;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SpanId> for String {
    fn from(id: SpanId) -> Self {
        id.to_string()
    }
}

impl fmt::Display for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for SpanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SpanId({:016x})", self.0)
    }
}

/// The trace/span identifier pair propagated between peers.
///
/// Immutable once created. Fresh contexts come from
/// [`IdentifierGenerator`](crate::trace::IdentifierGenerator); contexts
/// received on the wire go through [`TraceContext::parse`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TraceContext {
    trace_id: TraceId,
    span_id: SpanId,
}

impl TraceContext {
    pub const fn new(trace_id: TraceId, span_id: SpanId) -> Self {
        Self { trace_id, span_id }
    }

    /// Parse the wire rendering of both identifiers.
    pub fn parse(trace_id: &str, span_id: &str) -> Result<Self, InvalidIdentifier> {
        Ok(Self {
            trace_id: trace_id.parse()?,
            span_id: span_id.parse()?,
        })
    }

    pub const fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    pub const fn span_id(&self) -> SpanId {
        self.span_id
    }
}

impl fmt::Display for TraceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.trace_id, self.span_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_fixed_width_lowercase() {
        let ctx = TraceContext::new(
            TraceId::from_bytes([0; 16]),
            SpanId::from_bytes([0, 0, 0, 0, 0, 0, 0, 0xAB]),
        );
        assert_eq!(ctx.trace_id().to_string(), "0".repeat(32));
        assert_eq!(ctx.span_id().to_string(), "00000000000000ab");
    }

    #[test]
    fn parse_accepts_wire_rendering() {
        let ctx = TraceContext::parse("aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa", "bbbbbbbbbbbbbbbb").unwrap();
        assert_eq!(ctx.trace_id().to_string(), "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa");
        assert_eq!(ctx.span_id().to_string(), "bbbbbbbbbbbbbbbb");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        let err = "abc".parse::<SpanId>().unwrap_err();
        assert_eq!(err, InvalidIdentifier::Length { expected: 16, actual: 3 });
    }

    #[test]
    fn parse_rejects_uppercase_and_signs() {
        let err = "AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA".parse::<TraceId>().unwrap_err();
        assert!(matches!(err, InvalidIdentifier::Alphabet { offset: 0, found: 'A' }));

        // from_str_radix would accept a leading '+'.
        let err = "+bbbbbbbbbbbbbbb".parse::<SpanId>().unwrap_err();
        assert!(matches!(err, InvalidIdentifier::Alphabet { offset: 0, .. }));
    }

    #[test]
    fn serde_uses_hex_strings() {
        let ctx = TraceContext::parse("0123456789abcdef0123456789abcdef", "fedcba9876543210").unwrap();
        let json = serde_json::to_string(&ctx).unwrap();
        assert_eq!(
            json,
            r#"{"trace_id":"0123456789abcdef0123456789abcdef","span_id":"fedcba9876543210"}"#
        );
        let back: TraceContext = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ctx);
    }
}
