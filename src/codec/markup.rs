//! Structured-markup codec (NETCONF-style `rpc` / `rpc-reply`).
//!
//! The decoder tokenizes the whole frame first, so every tag boundary is
//! known before any field is extracted. Fields are then located by name in
//! the token stream; nothing is located by raw substring search.

use std::fmt::Write as _;
use std::ops::Range;

use crate::codec::{utf8, MalformedMessage, MessageCodec};
use crate::protocol::{
    Envelope, ErrorCode, InterfaceOperation, InterfaceRecord, InterfaceStatus, Kind, MessageId,
    Operation, Payload,
};
use crate::trace::TraceContext;

const BASE_CAPABILITY: &str = "urn:ietf:params:netconf:base:1.0";

/// Structured-markup variant of [`MessageCodec`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarkupCodec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Open { name: &'a str, attrs: &'a str },
    Close { name: &'a str },
    Empty { name: &'a str, attrs: &'a str },
    Text(&'a str),
}

impl<'a> Token<'a> {
    fn is_blank(&self) -> bool {
        matches!(self, Token::Text(t) if t.trim().is_empty())
    }
}

/// Split a frame into tags and text. Declarations and comments are dropped.
fn tokenize(input: &str) -> Result<Vec<Token<'_>>, MalformedMessage> {
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        let rest = &input[pos..];
        if !rest.starts_with('<') {
            let end = rest.find('<').unwrap_or(rest.len());
            tokens.push(Token::Text(&rest[..end]));
            pos += end;
            continue;
        }

        if rest.starts_with("<!--") {
            let end = rest
                .find("-->")
                .ok_or_else(|| MalformedMessage::truncated("comment"))?;
            pos += end + 3;
            continue;
        }

        let end = rest.find('>').ok_or_else(|| {
            let name = rest[1..]
                .split(|c: char| c.is_whitespace() || c == '/')
                .next()
                .filter(|n| !n.is_empty())
                .unwrap_or("markup");
            MalformedMessage::truncated(name)
        })?;
        let inner = &rest[1..end];
        pos += end + 1;

        if inner.starts_with('?') || inner.starts_with('!') {
            continue;
        }

        let token = if let Some(name) = inner.strip_prefix('/') {
            Token::Close { name: name.trim() }
        } else if let Some(body) = inner.strip_suffix('/') {
            let (name, attrs) = split_tag(body);
            Token::Empty { name, attrs }
        } else {
            let (name, attrs) = split_tag(inner);
            Token::Open { name, attrs }
        };

        match token {
            Token::Open { name, .. } | Token::Close { name } | Token::Empty { name, .. }
                if name.is_empty() =>
            {
                return Err(MalformedMessage::invalid("markup", "empty tag name"));
            }
            _ => tokens.push(token),
        }
    }

    Ok(tokens)
}

fn split_tag(body: &str) -> (&str, &str) {
    match body.find(char::is_whitespace) {
        Some(i) => (&body[..i], &body[i..]),
        None => (body, ""),
    }
}

/// Parse `name="value"` pairs from a tag's attribute text.
fn attributes(attrs: &str) -> Result<Vec<(&str, &str)>, MalformedMessage> {
    let mut out = Vec::new();
    let mut rest = attrs.trim_start();

    while !rest.is_empty() {
        let eq = rest
            .find('=')
            .ok_or_else(|| MalformedMessage::invalid("attributes", "attribute without value"))?;
        let name = rest[..eq].trim();
        let after = rest[eq + 1..].trim_start();
        let quote = after
            .chars()
            .next()
            .filter(|c| *c == '"' || *c == '\'')
            .ok_or_else(|| MalformedMessage::invalid(name, "unquoted attribute value"))?;
        let close = after[1..]
            .find(quote)
            .ok_or_else(|| MalformedMessage::truncated(name))?;
        out.push((name, &after[1..1 + close]));
        rest = after[close + 2..].trim_start();
    }

    Ok(out)
}

/// Locate the first `name` element in `scope` and return the range of its
/// content tokens. A self-closing element has empty content.
fn section(
    tokens: &[Token<'_>],
    scope: Range<usize>,
    name: &str,
) -> Result<Option<Range<usize>>, MalformedMessage> {
    let Some(start) = scope.clone().find(|&i| match tokens[i] {
        Token::Open { name: n, .. } | Token::Empty { name: n, .. } => n == name,
        _ => false,
    }) else {
        return Ok(None);
    };

    if matches!(tokens[start], Token::Empty { .. }) {
        return Ok(Some(start + 1..start + 1));
    }

    let mut depth = 0usize;
    for i in start + 1..scope.end {
        match tokens[i] {
            Token::Open { name: n, .. } if n == name => depth += 1,
            Token::Close { name: n } if n == name => {
                if depth == 0 {
                    return Ok(Some(start + 1..i));
                }
                depth -= 1;
            }
            _ => {}
        }
    }

    Err(MalformedMessage::truncated(name))
}

fn required_section(
    tokens: &[Token<'_>],
    scope: Range<usize>,
    name: &str,
) -> Result<Range<usize>, MalformedMessage> {
    section(tokens, scope, name)?.ok_or_else(|| MalformedMessage::missing(name))
}

/// Extract the text of a leaf field.
///
/// The closing marker is searched up to the end of the frame; any tag found
/// between the opening and closing markers makes the value ambiguous.
fn leaf(
    tokens: &[Token<'_>],
    scope: Range<usize>,
    name: &str,
) -> Result<Option<String>, MalformedMessage> {
    let Some(start) = scope.clone().find(|&i| match tokens[i] {
        Token::Open { name: n, .. } | Token::Empty { name: n, .. } => n == name,
        _ => false,
    }) else {
        return Ok(None);
    };

    if matches!(tokens[start], Token::Empty { .. }) {
        return Ok(Some(String::new()));
    }

    let close = (start + 1..tokens.len())
        .find(|&i| matches!(tokens[i], Token::Close { name: n } if n == name))
        .ok_or_else(|| MalformedMessage::truncated(name))?;

    let mut value = String::new();
    for token in &tokens[start + 1..close] {
        match token {
            Token::Text(text) => value.push_str(&unescape(text, name)?),
            _ => return Err(MalformedMessage::nested(name)),
        }
    }
    Ok(Some(value))
}

fn required_leaf(
    tokens: &[Token<'_>],
    scope: Range<usize>,
    name: &str,
) -> Result<String, MalformedMessage> {
    leaf(tokens, scope, name)?.ok_or_else(|| MalformedMessage::missing(name))
}

/// First element (open or self-closing) directly inside `scope`.
fn first_element<'a>(tokens: &[Token<'a>], scope: Range<usize>) -> Option<&'a str> {
    tokens[scope].iter().find_map(|t| match *t {
        Token::Open { name, .. } | Token::Empty { name, .. } => Some(name),
        _ => None,
    })
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

fn unescape(text: &str, field: &str) -> Result<String, MalformedMessage> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let tail = &rest[amp..];
        let semi = tail
            .find(';')
            .ok_or_else(|| MalformedMessage::invalid(field, "unterminated entity"))?;
        let ch = match &tail[1..semi] {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            other => {
                return Err(MalformedMessage::invalid(
                    field,
                    format!("unknown entity &{other};"),
                ))
            }
        };
        out.push(ch);
        rest = &tail[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

fn write_leaf(out: &mut String, name: &str, value: &str) {
    out.push('<');
    out.push_str(name);
    out.push('>');
    escape_into(out, value);
    out.push_str("</");
    out.push_str(name);
    out.push('>');
}

fn write_trace(out: &mut String, trace: &TraceContext) {
    let _ = write!(
        out,
        "<tracing><traceid>{}</traceid><spanid>{}</spanid></tracing>",
        trace.trace_id(),
        trace.span_id()
    );
}

fn write_payload(out: &mut String, payload: &Payload) {
    match payload {
        Payload::Empty => {}
        Payload::Trace(trace) => write_trace(out, trace),
        Payload::Interface(record) => {
            out.push_str("<o1-interface>");
            write_leaf(out, "name", &record.name);
            write_leaf(out, "operation", record.operation.as_str());
            write_leaf(out, "status", record.status.as_str());
            write_trace(out, &record.trace);
            out.push_str("</o1-interface>");
        }
    }
}

/// `<tag>payload</tag>`, or `<tag/>` for an empty payload.
fn write_container(out: &mut String, tag: &str, attrs: &str, payload: &Payload) {
    if matches!(payload, Payload::Empty) {
        let _ = write!(out, "<{tag}{attrs}/>");
    } else {
        let _ = write!(out, "<{tag}{attrs}>");
        write_payload(out, payload);
        let _ = write!(out, "</{tag}>");
    }
}

fn decode_trace(tokens: &[Token<'_>], scope: Range<usize>) -> Result<TraceContext, MalformedMessage> {
    let trace_id = required_leaf(tokens, scope.clone(), "traceid")?;
    let span_id = required_leaf(tokens, scope, "spanid")?;
    let trace_id = trace_id
        .parse()
        .map_err(|e| MalformedMessage::invalid("traceid", e))?;
    let span_id = span_id
        .parse()
        .map_err(|e| MalformedMessage::invalid("spanid", e))?;
    Ok(TraceContext::new(trace_id, span_id))
}

/// Decode whatever payload `scope` carries.
///
/// `default_operation` fills in an interface record's operation when the
/// sender omitted it, as the original management peers do.
fn decode_payload(
    tokens: &[Token<'_>],
    scope: Range<usize>,
    default_operation: InterfaceOperation,
) -> Result<Payload, MalformedMessage> {
    if let Some(iface) = section(tokens, scope.clone(), "o1-interface")? {
        let name = required_leaf(tokens, iface.clone(), "name")?;
        let operation = match leaf(tokens, iface.clone(), "operation")? {
            Some(op) => op
                .parse()
                .map_err(|e| MalformedMessage::invalid("operation", e))?,
            None => default_operation,
        };
        let status = match leaf(tokens, iface.clone(), "status")? {
            Some(status) => status
                .parse()
                .map_err(|e| MalformedMessage::invalid("status", e))?,
            None => InterfaceStatus::default(),
        };
        let tracing = required_section(tokens, iface, "tracing")?;
        let trace = decode_trace(tokens, tracing)?;
        return Ok(Payload::Interface(InterfaceRecord {
            name,
            operation,
            status,
            trace,
        }));
    }

    match section(tokens, scope, "tracing")? {
        Some(tracing) => Ok(Payload::Trace(decode_trace(tokens, tracing)?)),
        None => Ok(Payload::Empty),
    }
}

fn root(tokens: &[Token<'_>]) -> Result<(usize, &'static str), MalformedMessage> {
    let index = tokens
        .iter()
        .position(|t| !t.is_blank())
        .ok_or_else(|| MalformedMessage::missing("rpc"))?;
    let name = match tokens[index] {
        Token::Open { name, .. } | Token::Empty { name, .. } => name,
        Token::Close { name } => {
            return Err(MalformedMessage::invalid(name, "closing marker before opening marker"))
        }
        Token::Text(_) => return Err(MalformedMessage::invalid("rpc", "text before root element")),
    };
    let root = match name {
        "hello" => "hello",
        "rpc" => "rpc",
        "rpc-reply" => "rpc-reply",
        other => {
            return Err(MalformedMessage::invalid(
                "rpc",
                format!("unexpected root element <{other}>"),
            ))
        }
    };
    Ok((index, root))
}

fn header(token: &Token<'_>, root: &str) -> Result<(MessageId, Option<u64>), MalformedMessage> {
    let attrs = match token {
        Token::Open { attrs, .. } | Token::Empty { attrs, .. } => attributes(attrs)?,
        _ => Vec::new(),
    };
    let mut message_id = None;
    let mut timestamp = None;
    for (name, value) in attrs {
        match name {
            "message-id" => {
                message_id = Some(MessageId(
                    value
                        .parse()
                        .map_err(|e| MalformedMessage::invalid("message-id", e))?,
                ))
            }
            "timestamp" => {
                timestamp = Some(
                    value
                        .parse()
                        .map_err(|e| MalformedMessage::invalid("timestamp", e))?,
                )
            }
            _ => {}
        }
    }
    let message_id = match message_id {
        Some(id) => id,
        // Capability exchanges are not correlated.
        None if root == "hello" => MessageId::default(),
        None => return Err(MalformedMessage::missing("message-id")),
    };
    Ok((message_id, timestamp))
}

impl MarkupCodec {
    fn decode_str(&self, input: &str) -> Result<Envelope, MalformedMessage> {
        let tokens = tokenize(input)?;
        let (index, root_name) = root(&tokens)?;
        let (message_id, timestamp) = header(&tokens[index], root_name)?;
        let body = required_section(&tokens, index..tokens.len(), root_name)?;

        let (kind, payload) = match root_name {
            "hello" => (Kind::Hello, Payload::Empty),
            "rpc" => {
                let op = first_element(&tokens, body.clone())
                    .ok_or_else(|| MalformedMessage::missing("operation"))?;
                let op_body = required_section(&tokens, body, op)?;
                match op {
                    "get-config" => {
                        let payload = match section(&tokens, op_body, "filter")? {
                            Some(filter) => decode_payload(&tokens, filter, InterfaceOperation::Get)?,
                            None => Payload::Empty,
                        };
                        (Kind::Request(Operation::Get), payload)
                    }
                    "edit-config" => {
                        let payload = match section(&tokens, op_body, "config")? {
                            Some(config) => decode_payload(&tokens, config, InterfaceOperation::Set)?,
                            None => Payload::Empty,
                        };
                        (Kind::Request(Operation::Edit), payload)
                    }
                    "close-session" => (Kind::Close, Payload::Empty),
                    other => {
                        let operation = Operation::other(other).ok_or_else(|| {
                            MalformedMessage::invalid("operation", format!("bad operation name {other:?}"))
                        })?;
                        let payload = decode_payload(&tokens, op_body, InterfaceOperation::Get)?;
                        (Kind::Request(operation), payload)
                    }
                }
            }
            _ => {
                if section(&tokens, body.clone(), "ok")?.is_some() {
                    (Kind::Reply, Payload::Empty)
                } else if let Some(data) = section(&tokens, body.clone(), "data")? {
                    (Kind::Reply, decode_payload(&tokens, data, InterfaceOperation::Get)?)
                } else if let Some(error) = section(&tokens, body, "rpc-error")? {
                    let tag = required_leaf(&tokens, error, "error-tag")?;
                    let code = ErrorCode::from_tag(&tag).ok_or_else(|| {
                        MalformedMessage::invalid("error-tag", format!("unknown error tag {tag:?}"))
                    })?;
                    (Kind::ErrorReply(code), Payload::Empty)
                } else {
                    return Err(MalformedMessage::missing("ok"));
                }
            }
        };

        Ok(Envelope {
            message_id,
            kind,
            payload,
            timestamp,
        })
    }
}

impl MessageCodec for MarkupCodec {
    fn encode(&self, envelope: &Envelope) -> Vec<u8> {
        let mut attrs = format!(r#" message-id="{}""#, envelope.message_id);
        if let Some(ts) = envelope.timestamp {
            let _ = write!(attrs, r#" timestamp="{ts}""#);
        }

        let mut out = String::with_capacity(256);
        match &envelope.kind {
            Kind::Hello => {
                let _ = write!(
                    out,
                    "<hello{attrs}><capabilities><capability>{BASE_CAPABILITY}</capability></capabilities></hello>"
                );
            }
            Kind::Request(op) => {
                let _ = write!(out, "<rpc{attrs}>");
                match op {
                    Operation::Get => {
                        out.push_str("<get-config><source><running/></source>");
                        write_container(&mut out, "filter", r#" type="subtree""#, &envelope.payload);
                        out.push_str("</get-config>");
                    }
                    Operation::Edit => {
                        out.push_str("<edit-config><target><running/></target>");
                        write_container(&mut out, "config", "", &envelope.payload);
                        out.push_str("</edit-config>");
                    }
                    Operation::Other(name) => {
                        write_container(&mut out, name, "", &envelope.payload);
                    }
                }
                out.push_str("</rpc>");
            }
            Kind::Close => {
                let _ = write!(out, "<rpc{attrs}><close-session/></rpc>");
            }
            Kind::Reply => {
                let _ = write!(out, "<rpc-reply{attrs}>");
                if matches!(envelope.payload, Payload::Empty) {
                    out.push_str("<ok/>");
                } else {
                    write_container(&mut out, "data", "", &envelope.payload);
                }
                out.push_str("</rpc-reply>");
            }
            Kind::ErrorReply(code) => {
                let _ = write!(
                    out,
                    "<rpc-reply{attrs}><rpc-error><error-tag>{}</error-tag><error-message>{}</error-message></rpc-error></rpc-reply>",
                    code.tag(),
                    code.message()
                );
            }
        }
        out.into_bytes()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Envelope, MalformedMessage> {
        self.decode_str(utf8(bytes)?)
    }

    fn peek_message_id(&self, bytes: &[u8]) -> Option<MessageId> {
        let input = std::str::from_utf8(bytes).ok()?;
        let tokens = tokenize(input).ok()?;
        let (index, root_name) = root(&tokens).ok()?;
        header(&tokens[index], root_name).ok().map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TRACE: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SPAN: &str = "bbbbbbbbbbbbbbbb";

    fn ctx() -> TraceContext {
        TraceContext::parse(TRACE, SPAN).unwrap()
    }

    fn decode(input: &str) -> Result<Envelope, MalformedMessage> {
        MarkupCodec.decode(input.as_bytes())
    }

    #[test]
    fn encodes_edit_config_with_trace() {
        let env = Envelope::request(MessageId(1), Operation::Edit, Payload::Trace(ctx()));
        let text = String::from_utf8(MarkupCodec.encode(&env)).unwrap();
        assert_eq!(
            text,
            format!(
                r#"<rpc message-id="1"><edit-config><target><running/></target><config><tracing><traceid>{TRACE}</traceid><spanid>{SPAN}</spanid></tracing></config></edit-config></rpc>"#
            )
        );
    }

    #[test]
    fn encodes_ok_reply() {
        let env = Envelope::new(MessageId(4), Kind::Reply, Payload::Empty);
        assert_eq!(
            MarkupCodec.encode(&env),
            br#"<rpc-reply message-id="4"><ok/></rpc-reply>"#.to_vec()
        );
    }

    #[test]
    fn decodes_pretty_printed_peer_message() {
        let input = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<rpc xmlns="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="1">
  <edit-config>
    <target>
      <running/>
    </target>
    <config>
      <tracing xmlns="urn:example:tracing">
        <traceid>{TRACE}</traceid>
        <spanid>{SPAN}</spanid>
      </tracing>
    </config>
  </edit-config>
</rpc>
"#
        );
        let env = decode(&input).unwrap();
        assert_eq!(env.message_id, MessageId(1));
        assert_eq!(env.kind, Kind::Request(Operation::Edit));
        assert_eq!(env.payload, Payload::Trace(ctx()));
    }

    #[test]
    fn decodes_get_config_reply_without_operation_field() {
        let input = format!(
            r#"<rpc-reply message-id="1"><data><o1-interface xmlns="urn:example:o1-interface"><name>eth0</name><status>up</status><tracing><traceid>{TRACE}</traceid><spanid>{SPAN}</spanid></tracing></o1-interface></data></rpc-reply>"#
        );
        let env = decode(&input).unwrap();
        assert_eq!(env.kind, Kind::Reply);
        assert_eq!(env.payload, Payload::Interface(InterfaceRecord::get("eth0", ctx())));
    }

    #[test]
    fn unclosed_traceid_is_truncated() {
        let input = format!(
            r#"<rpc message-id="1"><edit-config><config><tracing><traceid>{TRACE}<spanid>{SPAN}</spanid></tracing></config></edit-config></rpc>"#
        );
        assert_eq!(decode(&input), Err(MalformedMessage::truncated("traceid")));
    }

    #[test]
    fn frame_cut_inside_traceid_is_truncated() {
        let input = r#"<rpc message-id="1"><edit-config><config><tracing><traceid>aaaa"#;
        assert!(matches!(decode(input), Err(MalformedMessage::Truncated { .. })));
    }

    #[test]
    fn frame_cut_inside_tag_is_truncated() {
        let input = r#"<rpc message-id="1"><edit-con"#;
        assert_eq!(decode(input), Err(MalformedMessage::truncated("edit-con")));
    }

    #[test]
    fn nested_marker_in_leaf_is_ambiguous() {
        let input = format!(
            r#"<rpc message-id="1"><edit-config><config><tracing><traceid><traceid>{TRACE}</traceid></traceid><spanid>{SPAN}</spanid></tracing></config></edit-config></rpc>"#
        );
        assert_eq!(decode(&input), Err(MalformedMessage::nested("traceid")));
    }

    #[test]
    fn missing_spanid_is_reported() {
        let input = format!(
            r#"<rpc message-id="1"><edit-config><config><tracing><traceid>{TRACE}</traceid></tracing></config></edit-config></rpc>"#
        );
        assert_eq!(decode(&input), Err(MalformedMessage::missing("spanid")));
    }

    #[test]
    fn missing_message_id_is_reported() {
        let input = r#"<rpc><close-session/></rpc>"#;
        assert_eq!(decode(input), Err(MalformedMessage::missing("message-id")));
    }

    #[test]
    fn short_traceid_is_invalid() {
        let input = format!(
            r#"<rpc message-id="1"><edit-config><config><tracing><traceid>abc</traceid><spanid>{SPAN}</spanid></tracing></config></edit-config></rpc>"#
        );
        assert!(matches!(
            decode(&input),
            Err(MalformedMessage::InvalidValue { field, .. }) if field == "traceid"
        ));
    }

    #[test]
    fn unknown_operation_decodes_as_other() {
        let env = decode(r#"<rpc message-id="9"><delete-config/></rpc>"#).unwrap();
        assert_eq!(env.kind, Kind::Request(Operation::Other("delete-config".into())));
        assert_eq!(env.payload, Payload::Empty);
    }

    #[test]
    fn error_reply_round_trip_keeps_code() {
        let env = Envelope::error_reply(MessageId(3), ErrorCode::UnsupportedOperation);
        assert_eq!(MarkupCodec.decode(&MarkupCodec.encode(&env)), Ok(env));
    }

    #[test]
    fn interface_names_are_escaped() {
        let record = InterfaceRecord::get("a<b>&\"c", ctx());
        let env = Envelope::new(MessageId(2), Kind::Reply, Payload::Interface(record));
        let bytes = MarkupCodec.encode(&env);
        assert!(String::from_utf8_lossy(&bytes).contains("a&lt;b&gt;&amp;&quot;c"));
        assert_eq!(MarkupCodec.decode(&bytes), Ok(env));
    }

    #[test]
    fn peek_recovers_id_from_undecodable_frame() {
        let input = br#"<rpc message-id="42"><edit-config><config><tracing><traceid>x"#;
        assert!(MarkupCodec.decode(input).is_err());
        assert_eq!(MarkupCodec.peek_message_id(input), Some(MessageId(42)));
    }

    #[test]
    fn peer_hello_without_message_id_is_accepted() {
        let env = decode(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
  </capabilities>
</hello>"#,
        )
        .unwrap();
        assert_eq!(env.kind, Kind::Hello);
        assert_eq!(env.message_id, MessageId(0));
    }

    #[test]
    fn empty_input_is_missing_root() {
        assert_eq!(decode("  \n"), Err(MalformedMessage::missing("rpc")));
    }
}
