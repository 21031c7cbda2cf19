//! Error types for wugsim solving and simulation.

use thiserror::Error;

/// Errors that can occur while configuring, clustering or simulating.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in the future without breaking changes.
///
/// All public APIs return `Result<T, SimError>`; library code does not panic on
/// bad input. Errors raised by pluggable strategies (samplers, annotators,
/// clusterers, criteria, listeners) are propagated to the caller unchanged.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimError {
    /// Contradictory or out-of-range parameters, detected before work begins.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A structural guarantee was broken (overlapping or missing partition
    /// nodes, evidence splitting changing the node multiset). Signals a bug and
    /// is never repaired silently.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Failure reported by a pluggable strategy implementation.
    #[error("strategy failure: {0}")]
    Strategy(String),

    /// An observation that cannot be ingested (node outside the graph bound,
    /// self loop, non-finite weight).
    #[error("invalid observation: {0}")]
    InvalidObservation(String),

    /// Numerical stability error (NaN/Inf in a statistic or metric).
    #[error("numerical error: {0}")]
    Numerical(String),
}

impl SimError {
    /// Shorthand for [`SimError::Configuration`].
    pub fn config(msg: impl Into<String>) -> Self {
        SimError::Configuration(msg.into())
    }

    /// Shorthand for [`SimError::InvariantViolation`].
    pub fn invariant(msg: impl Into<String>) -> Self {
        SimError::InvariantViolation(msg.into())
    }

    /// Returns true for errors that indicate a bug rather than bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, SimError::InvariantViolation(_))
    }
}
