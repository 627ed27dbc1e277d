//! Trace context subsystem.
//!
//! # Data Flow
//! ```text
//! OS entropy (generator.rs)
//!     → 16 bytes trace id, 8 bytes span id
//!     → TraceContext (context.rs, immutable)
//!     → embedded in Envelope payloads
//! ```
//!
//! # Design Decisions
//! - Identifier format is enforced at construction, never at use
//! - Ids are stored as integers; hex rendering is always exact-width lowercase

pub mod context;
pub mod generator;

pub use context::{InvalidIdentifier, SpanId, TraceContext, TraceId};
pub use generator::{EntropySource, IdentifierGenerator, OsEntropy, RandomSourceUnavailable};
