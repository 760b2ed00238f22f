//! Core error types.

use thiserror::Error;

use recset_tuple::TupleError;

/// Errors raised by plan construction, compilation, and enumeration.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// Tuple-level error.
    #[error("tuple error: {0}")]
    Tuple(#[from] TupleError),

    /// No compile rule claims the logical node.
    #[error("unsupported provider: {0}")]
    UnsupportedProvider(String),

    /// Column index exceeds a header's width.
    #[error("column {column} out of range for {arity} columns")]
    ColumnOutOfRange { column: usize, arity: usize },

    /// Two plan branches disagree on row shape.
    #[error("header mismatch: {0}")]
    HeaderMismatch(String),

    /// A parameter slot was referenced but never bound.
    #[error("parameter {0} not bound")]
    MissingParameter(usize),

    /// Plan structure violates an operator's requirements.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// Expression evaluated over incompatible value types.
    #[error("expression type error: {0}")]
    ExprType(String),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
