//! Error types for locator evaluation

use thiserror::Error;

use crate::types::LocatorKind;

/// Fault raised while evaluating a single locator.
///
/// The engine never propagates these: a faulting locator counts as a
/// locator that found nothing.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LocatorError {
    /// Locator payload could not be evaluated
    #[error("locator '{kind}' failed: {reason}")]
    EvaluationFault { kind: LocatorKind, reason: String },

    /// Evaluator has no matcher for this kind
    #[error("unsupported locator kind: {0}")]
    UnsupportedKind(LocatorKind),

    /// Payload is syntactically invalid
    #[error("invalid locator payload: {0}")]
    InvalidPayload(String),
}

impl LocatorError {
    pub fn fault(kind: LocatorKind, reason: impl Into<String>) -> Self {
        LocatorError::EvaluationFault {
            kind,
            reason: reason.into(),
        }
    }

    /// Get error severity (0=low, 1=medium, 2=high)
    pub fn severity(&self) -> u8 {
        match self {
            LocatorError::UnsupportedKind(_) => 2,
            LocatorError::InvalidPayload(_) => 1,
            LocatorError::EvaluationFault { .. } => 0,
        }
    }
}
