//! Typed errors raised by the core crate.

use thiserror::Error;

/// Caller-supplied input that is rejected before any gateway call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("page must be >= 1 (got {0})")]
    Page(i64),

    #[error("limit must be between 1 and {max} (got {got})")]
    Limit { got: i64, max: u32 },

    #[error("unknown tree_type '{0}': expected Healthy or Infected")]
    Category(String),

    #[error("role must be 'admin' or 'farmer' (got '{0}')")]
    Role(String),

    #[error("{field} is invalid: {reason}")]
    Field {
        field: &'static str,
        reason: &'static str,
    },
}

/// Failure of the weekly aggregation.
///
/// Malformed timestamps never produce this error; they are skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AggregationError {
    /// The result store could not be read.
    #[error("{0}")]
    Upstream(String),

    #[error("window length must be between 1 and 53 weeks (got {0})")]
    Window(usize),
}
