//! tracelink: trace-context propagation over request/reply sessions.
//!
//! A trace context (128-bit trace id, 64-bit span id) travels from an
//! initiator to a peer inside a correlated request, over one of two wire
//! bindings: a structured-markup RPC envelope or a flat text object.

// Protocol core
pub mod codec;
pub mod dispatch;
pub mod protocol;
pub mod session;
pub mod trace;

// Network and drivers
pub mod client;
pub mod net;
pub mod server;

// Cross-cutting concerns
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod observability;
pub mod provisioning;

pub use codec::{Codec, MalformedMessage, MessageCodec};
pub use config::TracelinkConfig;
pub use dispatch::{Dispatcher, InterfaceStore};
pub use error::{Error, Result};
pub use lifecycle::{Shutdown, ShutdownToken};
pub use protocol::{Envelope, Kind, MessageId, Operation, Payload, TransportKind};
pub use server::Server;
pub use session::{SessionError, SessionHandler, SessionState};
pub use trace::{IdentifierGenerator, TraceContext};
