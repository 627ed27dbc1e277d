//! Flat-text codec (single JSON-like object per frame).
//!
//! The lexer reads exactly one object of `"key": value` members where a value
//! is a string or an integer. Nested objects and arrays are rejected as
//! ambiguous rather than skipped.

use std::fmt::Write as _;

use crate::codec::{utf8, MalformedMessage, MessageCodec};
use crate::protocol::{
    Envelope, ErrorCode, InterfaceOperation, InterfaceRecord, InterfaceStatus, Kind, MessageId,
    Operation, Payload,
};
use crate::trace::TraceContext;

/// Flat-text variant of [`MessageCodec`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlatCodec;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Value {
    Str(String),
    Int(u64),
}

/// Lexed object members in wire order.
struct Members(Vec<(String, Value)>);

impl Members {
    fn get(&self, key: &str) -> Option<&Value> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    fn str(&self, key: &str) -> Result<Option<&str>, MalformedMessage> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Str(s)) => Ok(Some(s)),
            Some(Value::Int(_)) => Err(MalformedMessage::invalid(key, "expected a string")),
        }
    }

    fn required_str(&self, key: &str) -> Result<&str, MalformedMessage> {
        self.str(key)?.ok_or_else(|| MalformedMessage::missing(key))
    }

    fn int(&self, key: &str) -> Result<Option<u64>, MalformedMessage> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Int(n)) => Ok(Some(*n)),
            Some(Value::Str(_)) => Err(MalformedMessage::invalid(key, "expected an integer")),
        }
    }
}

struct Lexer<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    fn peek(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(' ' | '\t' | '\r' | '\n')) {
            self.pos += 1;
        }
    }

    fn object(&mut self) -> Result<Members, MalformedMessage> {
        let mut members = Vec::new();
        self.members(&mut members)?;
        Ok(Members(members))
    }

    /// Lex members into `members`. On error, the members read so far are kept.
    fn members(&mut self, members: &mut Vec<(String, Value)>) -> Result<(), MalformedMessage> {
        self.skip_ws();
        match self.bump() {
            Some('{') => {}
            Some(c) => return Err(MalformedMessage::invalid("object", format!("unexpected {c:?}"))),
            None => return Err(MalformedMessage::missing("object")),
        }

        self.skip_ws();
        if self.peek() == Some('}') {
            self.pos += 1;
            return self.finish();
        }

        loop {
            self.skip_ws();
            match self.bump() {
                Some('"') => {}
                Some(c) => return Err(MalformedMessage::invalid("object", format!("unexpected {c:?}"))),
                None => return Err(MalformedMessage::truncated("object")),
            }
            let key = self.string("object")?;

            self.skip_ws();
            match self.bump() {
                Some(':') => {}
                Some(c) => return Err(MalformedMessage::invalid(key, format!("expected ':', found {c:?}"))),
                None => return Err(MalformedMessage::truncated(key)),
            }

            self.skip_ws();
            let value = match self.peek() {
                Some('"') => {
                    self.pos += 1;
                    Value::Str(self.string(&key)?)
                }
                Some('0'..='9') => Value::Int(self.integer(&key)?),
                Some('{' | '[') => return Err(MalformedMessage::nested(key)),
                Some(c) => return Err(MalformedMessage::invalid(key, format!("unexpected {c:?}"))),
                None => return Err(MalformedMessage::truncated(key)),
            };
            members.push((key, value));

            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return self.finish(),
                Some(c) => return Err(MalformedMessage::invalid("object", format!("unexpected {c:?}"))),
                None => return Err(MalformedMessage::truncated("object")),
            }
        }
    }

    fn finish(&mut self) -> Result<(), MalformedMessage> {
        self.skip_ws();
        if self.pos < self.input.len() {
            return Err(MalformedMessage::invalid("object", "trailing data after object"));
        }
        Ok(())
    }

    /// Read a string body; the opening quote is already consumed.
    fn string(&mut self, field: &str) -> Result<String, MalformedMessage> {
        let mut out = String::new();
        loop {
            match self.bump() {
                None => return Err(MalformedMessage::truncated(field)),
                Some('"') => return Ok(out),
                Some('\\') => {
                    let escaped = match self.bump() {
                        None => return Err(MalformedMessage::truncated(field)),
                        Some('"') => '"',
                        Some('\\') => '\\',
                        Some('/') => '/',
                        Some('n') => '\n',
                        Some('r') => '\r',
                        Some('t') => '\t',
                        Some('u') => self.unicode_escape(field)?,
                        Some(c) => {
                            return Err(MalformedMessage::invalid(field, format!("bad escape \\{c}")))
                        }
                    };
                    out.push(escaped);
                }
                Some(c) => out.push(c),
            }
        }
    }

    fn unicode_escape(&mut self, field: &str) -> Result<char, MalformedMessage> {
        let end = self.pos + 4;
        let hex = self
            .input
            .get(self.pos..end)
            .ok_or_else(|| MalformedMessage::truncated(field))?;
        let code = u32::from_str_radix(hex, 16)
            .map_err(|_| MalformedMessage::invalid(field, format!("bad unicode escape {hex:?}")))?;
        self.pos = end;
        char::from_u32(code)
            .ok_or_else(|| MalformedMessage::invalid(field, format!("unpaired surrogate {hex}")))
    }

    fn integer(&mut self, field: &str) -> Result<u64, MalformedMessage> {
        let start = self.pos;
        while matches!(self.peek(), Some('0'..='9')) {
            self.pos += 1;
        }
        self.input[start..self.pos]
            .parse()
            .map_err(|e| MalformedMessage::invalid(field, e))
    }
}

fn write_str(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_member(out: &mut String, key: &str, value: &str) {
    out.push_str(",\"");
    out.push_str(key);
    out.push_str("\":");
    write_str(out, value);
}

fn write_trace(out: &mut String, prefix: &str, trace: &TraceContext) {
    let _ = write!(
        out,
        r#","{prefix}traceid":"{}","{prefix}spanid":"{}""#,
        trace.trace_id(),
        trace.span_id()
    );
}

fn write_payload(out: &mut String, prefix: &str, payload: &Payload) {
    match payload {
        Payload::Empty => {}
        Payload::Trace(trace) => write_trace(out, prefix, trace),
        Payload::Interface(record) => {
            write_member(out, "interface", &record.name);
            write_member(out, "interface_operation", record.operation.as_str());
            write_member(out, "interface_status", record.status.as_str());
            write_trace(out, prefix, &record.trace);
        }
    }
}

fn decode_trace(members: &Members, prefix: &str) -> Result<TraceContext, MalformedMessage> {
    let trace_key = format!("{prefix}traceid");
    let span_key = format!("{prefix}spanid");
    let trace_id = members
        .required_str(&trace_key)?
        .parse()
        .map_err(|e| MalformedMessage::invalid(trace_key.as_str(), e))?;
    let span_id = members
        .required_str(&span_key)?
        .parse()
        .map_err(|e| MalformedMessage::invalid(span_key.as_str(), e))?;
    Ok(TraceContext::new(trace_id, span_id))
}

fn decode_payload(
    members: &Members,
    prefix: &str,
    default_operation: InterfaceOperation,
) -> Result<Payload, MalformedMessage> {
    if let Some(name) = members.str("interface")? {
        let operation = match members.str("interface_operation")? {
            Some(op) => op
                .parse()
                .map_err(|e| MalformedMessage::invalid("interface_operation", e))?,
            None => default_operation,
        };
        let status = match members.str("interface_status")? {
            Some(status) => status
                .parse()
                .map_err(|e| MalformedMessage::invalid("interface_status", e))?,
            None => InterfaceStatus::default(),
        };
        return Ok(Payload::Interface(InterfaceRecord {
            name: name.to_string(),
            operation,
            status,
            trace: decode_trace(members, prefix)?,
        }));
    }

    if members.contains(&format!("{prefix}traceid")) || members.contains(&format!("{prefix}spanid")) {
        return Ok(Payload::Trace(decode_trace(members, prefix)?));
    }

    Ok(Payload::Empty)
}

fn success_message(payload: &Payload) -> &'static str {
    match payload {
        Payload::Empty => "ok",
        Payload::Trace(_) => "Tracing data received and processed",
        Payload::Interface(_) => "Interface data received and processed",
    }
}

impl FlatCodec {
    fn decode_str(&self, input: &str) -> Result<Envelope, MalformedMessage> {
        let members = Lexer::new(input).object()?;
        let message_id = MessageId(members.int("message_id")?.unwrap_or_default());
        let timestamp = members.int("timestamp")?;

        let (kind, payload) = if let Some(kind) = members.str("type")? {
            match kind {
                "hello" => (Kind::Hello, Payload::Empty),
                "close" => (Kind::Close, Payload::Empty),
                "tracing_data" => (
                    Kind::Request(Operation::Get),
                    decode_payload(&members, "", InterfaceOperation::Get)?,
                ),
                "edit_config" => (
                    Kind::Request(Operation::Edit),
                    decode_payload(&members, "", InterfaceOperation::Set)?,
                ),
                other => {
                    let operation = Operation::other(other).ok_or_else(|| {
                        MalformedMessage::invalid("type", format!("bad message type {other:?}"))
                    })?;
                    (
                        Kind::Request(operation),
                        decode_payload(&members, "", InterfaceOperation::Get)?,
                    )
                }
            }
        } else if let Some(status) = members.str("status")? {
            match status {
                "success" => (
                    Kind::Reply,
                    decode_payload(&members, "received_", InterfaceOperation::Get)?,
                ),
                // Peers that predate error codes only ever report parse failures.
                "error" => {
                    let code = match members.str("error")? {
                        Some(tag) => ErrorCode::from_tag(tag).ok_or_else(|| {
                            MalformedMessage::invalid("error", format!("unknown error code {tag:?}"))
                        })?,
                        None => ErrorCode::MalformedMessage,
                    };
                    (Kind::ErrorReply(code), Payload::Empty)
                }
                other => {
                    return Err(MalformedMessage::invalid(
                        "status",
                        format!("unknown status {other:?}"),
                    ))
                }
            }
        } else {
            return Err(MalformedMessage::missing("type"));
        };

        Ok(Envelope {
            message_id,
            kind,
            payload,
            timestamp,
        })
    }
}

impl MessageCodec for FlatCodec {
    fn encode(&self, envelope: &Envelope) -> Vec<u8> {
        let mut out = String::with_capacity(192);
        let id = envelope.message_id;

        match &envelope.kind {
            Kind::Hello | Kind::Close | Kind::Request(_) => {
                let kind = match &envelope.kind {
                    Kind::Hello => "hello",
                    Kind::Close => "close",
                    Kind::Request(Operation::Get) => "tracing_data",
                    Kind::Request(Operation::Edit) => "edit_config",
                    Kind::Request(Operation::Other(name)) => name.as_str(),
                    _ => unreachable!("response kinds are handled below"),
                };
                out.push_str("{\"type\":");
                write_str(&mut out, kind);
                let _ = write!(out, ",\"message_id\":{id}");
                write_payload(&mut out, "", &envelope.payload);
            }
            Kind::Reply => {
                let _ = write!(
                    out,
                    r#"{{"status":"success","message":"{}","message_id":{id}"#,
                    success_message(&envelope.payload)
                );
                write_payload(&mut out, "received_", &envelope.payload);
            }
            Kind::ErrorReply(code) => {
                let _ = write!(
                    out,
                    r#"{{"status":"error","message":"{}","error":"{}","message_id":{id}"#,
                    code.message(),
                    code.tag()
                );
            }
        }

        if let Some(ts) = envelope.timestamp {
            let _ = write!(out, ",\"timestamp\":{ts}");
        }
        out.push('}');
        out.into_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, MalformedMessage> {
        self.decode_str(utf8(bytes)?)
    }

    fn peek_message_id(&self, bytes: &[u8]) -> Option<MessageId> {
        let input = std::str::from_utf8(bytes).ok()?;
        let mut members = Vec::new();
        // A cut-off object still yields the members before the cut.
        let _ = Lexer::new(input).members(&mut members);
        Members(members).int("message_id").ok().flatten().map(MessageId)
    }
}
