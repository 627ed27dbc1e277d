//! Trace context generation from a secure random source.

use rand::rngs::OsRng;
use rand::RngCore;
use thiserror::Error;

use crate::trace::context::{SpanId, TraceContext, TraceId};

/// The entropy source could not supply the requested bytes.
#[derive(Debug, Error)]
#[error("random source unavailable: {reason}")]
pub struct RandomSourceUnavailable {
    reason: String,
}

impl RandomSourceUnavailable {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Source of cryptographically secure random bytes.
pub trait EntropySource {
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), RandomSourceUnavailable>;
}

/// The operating system's CSPRNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&mut self, dest: &mut [u8]) -> Result<(), RandomSourceUnavailable> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| RandomSourceUnavailable::new(e.to_string()))
    }
}

/// Produces fresh trace contexts.
#[derive(Debug, Default)]
pub struct IdentifierGenerator<E = OsEntropy> {
    entropy: E,
}

impl IdentifierGenerator<OsEntropy> {
    pub fn new() -> Self {
        Self { entropy: OsEntropy }
    }
}

impl<E: EntropySource> IdentifierGenerator<E> {
    pub fn with_entropy(entropy: E) -> Self {
        Self { entropy }
    }

    /// Draw a new trace id and span id.
    ///
    /// Failure is not retried; the caller decides what to do.
    pub fn generate(&mut self) -> Result<TraceContext, RandomSourceUnavailable> {
        let mut trace = [0u8; 16];
        self.entropy.fill(&mut trace).inspect_err(|e| {
            tracing::error!(error = %e, "Failed to generate random trace id");
        })?;

        let mut span = [0u8; 8];
        self.entropy.fill(&mut span).inspect_err(|e| {
            tracing::error!(error = %e, "Failed to generate random span id");
        })?;

        Ok(TraceContext::new(
            TraceId::from_bytes(trace),
            SpanId::from_bytes(span),
        ))
    }
}
