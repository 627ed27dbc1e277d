//! Protocol data model.
//!
//! # Data Flow
//! ```text
//! TraceContext / InterfaceRecord (payload)
//!     → Envelope { message_id, kind, payload, timestamp }
//!     → codec (wire bytes) and dispatch (routing)
//! ```
//!
//! # Design Decisions
//! - One envelope model for both wire bindings
//! - InterfaceRecord is an optional extension of the trace payload, not a
//!   separate protocol
//! - Values are immutable after construction and safe to share across tasks

pub mod envelope;
pub mod interface;

pub use envelope::{Envelope, ErrorCode, Kind, MessageId, Operation, Payload, TransportKind};
pub use interface::{InterfaceOperation, InterfaceRecord, InterfaceStatus, UnknownValue};
