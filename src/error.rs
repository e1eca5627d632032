//! Error types for the constraint engine.
//!
//! Errors are designed to be specific and actionable. Definition errors are
//! rejected synchronously at registration and never enter the matching
//! network; invariant errors indicate internal bookkeeping bugs and are never
//! expected to surface in correct operation.

use thiserror::Error;

use crate::fact::FactKey;
use crate::registry::ConstraintId;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// A malformed constraint expression, detected at registration.
///
/// A constraint that fails definition validation is never compiled into the
/// network, so it can never produce a permanently-unknown production.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DefinitionError {
    /// A `RateLimit` period that evaluates statically to a non-positive value.
    #[error("rate limit period must be positive, got {value}")]
    NonPositiveRateLimitPeriod { value: i128 },

    /// Expression nesting beyond [`crate::MAX_EXPR_DEPTH`].
    #[error("expression depth {depth} exceeds maximum of {max}")]
    ExpressionTooDeep { depth: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    /// The submitted expression is malformed; the constraint was not created.
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// A required fact could not be fetched during seeding. The constraint
    /// still exists and reports an unknown activation until the fact arrives.
    #[error("required fact unavailable: {key}")]
    FactUnavailable { key: FactKey },

    /// The ledger client failed entirely. Retryable; previously known facts
    /// are retained, never discarded, on fetch failure.
    #[error("ledger client unavailable: {0}")]
    Upstream(String),

    /// The constraint id was never registered (or was removed).
    #[error("unknown constraint: {0}")]
    UnknownConstraint(ConstraintId),

    /// A fact update carried a value of the wrong kind for its key.
    #[error("fact value for {key} has the wrong kind (expected {expected})")]
    TypeMismatch {
        key: FactKey,
        expected: &'static str,
    },

    /// A read observed an in-progress version transition. Unreachable by
    /// construction (mutations are serialized through one coordinator);
    /// treated as fatal if it ever occurs.
    #[error("read observed an in-progress version transition")]
    StaleRead,

    /// Internal bookkeeping violated an invariant (e.g. node reference count
    /// underflow on removal). Fatal, never silently ignored.
    #[error("internal invariant violated: {0}")]
    Invariant(String),
}
