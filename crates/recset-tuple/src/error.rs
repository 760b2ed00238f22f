//! Tuple error types.

use thiserror::Error;

use crate::types::ValueType;

/// Errors raised by tuple construction and field access.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TupleError {
    /// Field index exceeds the tuple's arity.
    #[error("field index {index} out of range for arity {arity}")]
    FieldIndexOutOfRange { index: usize, arity: usize },

    /// Null written to a field whose type does not allow it.
    #[error("field {index} does not allow null")]
    NullNotAllowed { index: usize },

    /// Value variant does not match the field's declared type.
    #[error("type mismatch: expected {expected:?}, got {actual:?}")]
    TypeMismatch {
        expected: ValueType,
        actual: ValueType,
    },

    /// A 2-bit state slot held a bit pattern outside the known states.
    #[error("invalid field state bits: {0}")]
    InvalidFieldState(u8),

    /// The value kind has no 64-bit packed encoding.
    #[error("value type {0:?} cannot be bit-packed")]
    UnsupportedPacking(ValueType),

    /// Tuple shape differs from the shape an operation expects.
    #[error("tuple descriptor mismatch")]
    DescriptorMismatch,
}
