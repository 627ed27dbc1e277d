//! Request dispatch.
//!
//! # Data Flow
//! ```text
//! decoded request Envelope
//!     → Dispatcher::dispatch (route on operation + payload)
//!     → InterfaceStore (get / set / delete)
//!     → response Envelope (same message_id, stamped)
//! ```
//!
//! # Design Decisions
//! - Dispatch never fails: every request gets a Reply or an ErrorReply
//! - Unknown operations are answered, not treated as session faults
//! - Interface state lives outside the session state machine and is shared across sessions

use crate::protocol::{
    Envelope, ErrorCode, InterfaceOperation, InterfaceRecord, Kind, Operation, Payload,
};

pub mod store;

pub use store::InterfaceStore;

/// Routes requests to handlers and builds the correlated response.
#[derive(Debug, Clone, Default)]
pub struct Dispatcher {
    store: InterfaceStore,
}

impl Dispatcher {
    pub fn new(store: InterfaceStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &InterfaceStore {
        &self.store
    }

    /// Produce the response for `request`.
    pub fn dispatch(&self, request: &Envelope) -> Envelope {
        let response = match (&request.kind, &request.payload) {
            (Kind::Request(Operation::Get), Payload::Interface(record)) => {
                Envelope::reply_to(request, Payload::Interface(self.read(record)))
            }
            (Kind::Request(Operation::Get), Payload::Trace(ctx)) => {
                tracing::info!(
                    message_id = %request.message_id,
                    trace_id = %ctx.trace_id(),
                    span_id = %ctx.span_id(),
                    "Tracing data received"
                );
                Envelope::reply_to(request, Payload::Trace(*ctx))
            }
            (Kind::Request(Operation::Edit), Payload::Interface(record)) => {
                self.apply(record);
                Envelope::reply_to(request, Payload::Empty)
            }
            (Kind::Request(Operation::Edit), Payload::Trace(ctx)) => {
                tracing::info!(
                    message_id = %request.message_id,
                    trace_id = %ctx.trace_id(),
                    span_id = %ctx.span_id(),
                    "Configuration edit acknowledged"
                );
                Envelope::reply_to(request, Payload::Empty)
            }
            (Kind::Request(Operation::Get | Operation::Edit), Payload::Empty) => {
                tracing::warn!(message_id = %request.message_id, "Request carries no payload");
                Envelope::error_reply(request.message_id, ErrorCode::InvalidValue)
            }
            (kind, _) => {
                tracing::warn!(
                    message_id = %request.message_id,
                    kind = kind.label(),
                    "Unsupported operation"
                );
                Envelope::error_reply(request.message_id, ErrorCode::UnsupportedOperation)
            }
        };
        response.stamped()
    }

    fn read(&self, record: &InterfaceRecord) -> InterfaceRecord {
        let status = self.store.status(&record.name).unwrap_or_default();
        tracing::info!(
            interface = %record.name,
            status = %status,
            trace_id = %record.trace.trace_id(),
            "Interface read"
        );
        InterfaceRecord {
            name: record.name.clone(),
            operation: InterfaceOperation::Get,
            status,
            trace: record.trace,
        }
    }

    fn apply(&self, record: &InterfaceRecord) {
        match record.operation {
            InterfaceOperation::Set | InterfaceOperation::Get => {
                // An edit that names `get` is treated as a set of the carried status.
                self.store.set(&record.name, record.status);
            }
            InterfaceOperation::Delete => {
                self.store.remove(&record.name);
            }
        }
        tracing::info!(
            interface = %record.name,
            operation = %record.operation,
            status = %record.status,
            trace_id = %record.trace.trace_id(),
            "Interface updated"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{InterfaceStatus, MessageId};
    use crate::trace::TraceContext;

    fn ctx() -> TraceContext {
        TraceContext::parse("0123456789abcdef0123456789abcdef", "0011223344556677").unwrap()
    }

    fn request(id: u64, op: Operation, payload: Payload) -> Envelope {
        Envelope::request(MessageId(id), op, payload)
    }

    #[test]
    fn get_interface_defaults_to_up() {
        let dispatcher = Dispatcher::default();
        let req = request(3, Operation::Get, Payload::Interface(InterfaceRecord::get("eth0", ctx())));

        let reply = dispatcher.dispatch(&req);

        assert_eq!(reply.message_id, MessageId(3));
        assert_eq!(reply.kind, Kind::Reply);
        assert!(reply.timestamp.is_some());
        assert_eq!(
            reply.payload,
            Payload::Interface(InterfaceRecord {
                name: "eth0".into(),
                operation: InterfaceOperation::Get,
                status: InterfaceStatus::Up,
                trace: ctx(),
            })
        );
    }

    #[test]
    fn set_then_get_reports_stored_status() {
        let dispatcher = Dispatcher::default();
        let set = InterfaceRecord::set("eth0", InterfaceStatus::Down, ctx());

        let reply = dispatcher.dispatch(&request(1, Operation::Edit, Payload::Interface(set)));
        assert_eq!(reply.kind, Kind::Reply);
        assert_eq!(reply.payload, Payload::Empty);

        let reply = dispatcher.dispatch(&request(
            2,
            Operation::Get,
            Payload::Interface(InterfaceRecord::get("eth0", ctx())),
        ));
        match reply.payload {
            Payload::Interface(record) => assert_eq!(record.status, InterfaceStatus::Down),
            other => panic!("unexpected payload {other:?}"),
        }
    }

    #[test]
    fn delete_removes_record() {
        let dispatcher = Dispatcher::default();
        dispatcher.store().set("eth1", InterfaceStatus::Error);
        let delete = InterfaceRecord {
            operation: InterfaceOperation::Delete,
            ..InterfaceRecord::get("eth1", ctx())
        };

        dispatcher.dispatch(&request(1, Operation::Edit, Payload::Interface(delete)));

        assert_eq!(dispatcher.store().status("eth1"), None);
    }

    #[test]
    fn trace_get_echoes_context() {
        let reply = Dispatcher::default().dispatch(&request(0, Operation::Get, Payload::Trace(ctx())));
        assert_eq!(reply.kind, Kind::Reply);
        assert_eq!(reply.payload, Payload::Trace(ctx()));
    }

    #[test]
    fn empty_payload_is_invalid_value() {
        let reply = Dispatcher::default().dispatch(&request(9, Operation::Edit, Payload::Empty));
        assert_eq!(reply.kind, Kind::ErrorReply(ErrorCode::InvalidValue));
        assert_eq!(reply.message_id, MessageId(9));
    }

    #[test]
    fn unknown_operation_is_unsupported() {
        let op = Operation::other("delete-config").unwrap();
        let reply = Dispatcher::default().dispatch(&request(4, op, Payload::Trace(ctx())));
        assert_eq!(reply.kind, Kind::ErrorReply(ErrorCode::UnsupportedOperation));
        assert_eq!(reply.message_id, MessageId(4));
    }

    #[test]
    fn non_request_kinds_are_unsupported() {
        let reply = Dispatcher::default().dispatch(&Envelope::hello(MessageId(1)));
        assert_eq!(reply.kind, Kind::ErrorReply(ErrorCode::UnsupportedOperation));
    }
}
