//! Bit-packed tuple representation for the recset query execution core.
//!
//! A tuple is a fixed-arity row of typed, independently nullable fields.
//! [`PackedTuple`] stores primitive fields bit-packed into 64-bit words
//! with a 2-bit state code per field, plus a parallel object array for
//! reference-typed fields. [`TupleDescriptor`] computes the packing layout
//! once per shape, using greedy largest-first placement, and is shared by
//! every tuple of that shape.
//!
//! # Modules
//!
//! - [`types`] - Field type and state definitions
//! - [`value`] - Runtime values flowing through fields
//! - [`codec`] - Encode/decode between values and packed bit patterns
//! - [`descriptor`] - Per-shape packing layout
//! - [`tuple`] - The [`Tuple`] trait and [`PackedTuple`]
//! - [`transform`] - Column projections applied tuple-by-tuple
//! - [`error`] - Tuple error types

pub mod codec;
pub mod descriptor;
pub mod error;
pub mod transform;
pub mod tuple;
pub mod types;
pub mod value;

pub use descriptor::{PackedField, TupleDescriptor};
pub use error::TupleError;
pub use transform::TupleTransform;
pub use tuple::{PackedTuple, Tuple};
pub use types::{FieldState, FieldType, PackingKind, ValueType};
pub use value::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_field_end_to_end() {
        let descriptor = TupleDescriptor::intern(&[
            FieldType::scalar(ValueType::Bool),
            FieldType::scalar(ValueType::Int32),
            FieldType::scalar(ValueType::Str),
        ]);
        let mut tuple = PackedTuple::new(descriptor);

        // Writes land in arbitrary order and never disturb each other.
        tuple.set(2, Some(Value::Str("first".into()))).unwrap();
        tuple.set(0, Some(Value::Bool(true))).unwrap();
        assert_eq!(tuple.state(1).unwrap(), FieldState::Unavailable);

        tuple.set(1, Some(Value::Int32(10))).unwrap();
        tuple.set(2, Some(Value::Str("second".into()))).unwrap();
        tuple.set(0, Some(Value::Bool(false))).unwrap();

        assert_eq!(tuple.get(0).unwrap(), Some(Value::Bool(false)));
        assert_eq!(tuple.get(1).unwrap(), Some(Value::Int32(10)));
        assert_eq!(tuple.get(2).unwrap(), Some(Value::Str("second".into())));

        tuple.set_state(1, FieldState::Unavailable).unwrap();
        assert_eq!(tuple.get(1).unwrap(), None);
        assert_eq!(tuple.get(0).unwrap(), Some(Value::Bool(false)));
        assert_eq!(tuple.get(2).unwrap(), Some(Value::Str("second".into())));
    }
}
