//! Field type and state definitions for packed tuples.

use crate::error::TupleError;

/// Scalar value kinds a tuple field can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    /// Boolean value.
    Bool,
    /// 8-bit signed integer.
    Int8,
    /// 16-bit signed integer.
    Int16,
    /// 32-bit signed integer.
    Int32,
    /// 64-bit signed integer.
    Int64,
    /// 8-bit unsigned integer.
    UInt8,
    /// 16-bit unsigned integer.
    UInt16,
    /// 32-bit unsigned integer.
    UInt32,
    /// 64-bit unsigned integer.
    UInt64,
    /// 32-bit floating point.
    Float32,
    /// 64-bit floating point.
    Float64,
    /// Point in time as a signed microsecond tick count.
    Timestamp,
    /// Duration as a signed microsecond tick count.
    Interval,
    /// UTF-8 string.
    Str,
    /// Binary data.
    Bytes,
    /// UUID (128-bit identifier).
    Uuid,
}

/// How a field's value is stored inside a packed tuple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PackingKind {
    /// Single bit inside a value word.
    Flag,
    /// Fixed-width bit run inside a value word.
    Value,
    /// Slot in the parallel object array.
    Object,
}

impl ValueType {
    /// Storage class used for fields of this type.
    ///
    /// Booleans pack as a single flag bit; fixed-width primitives pack as
    /// bit runs inside 64-bit words; everything else (including Uuid, whose
    /// 128 bits exceed one word) is stored as an object reference.
    pub fn packing_kind(&self) -> PackingKind {
        match self {
            ValueType::Bool => PackingKind::Flag,
            ValueType::Int8
            | ValueType::Int16
            | ValueType::Int32
            | ValueType::Int64
            | ValueType::UInt8
            | ValueType::UInt16
            | ValueType::UInt32
            | ValueType::UInt64
            | ValueType::Float32
            | ValueType::Float64
            | ValueType::Timestamp
            | ValueType::Interval => PackingKind::Value,
            ValueType::Str | ValueType::Bytes | ValueType::Uuid => PackingKind::Object,
        }
    }

    /// Number of value bits a packed field of this type occupies.
    ///
    /// Object-kind types occupy no value bits and return 0.
    pub fn bit_width(&self) -> u32 {
        match self {
            ValueType::Bool => 1,
            ValueType::Int8 | ValueType::UInt8 => 8,
            ValueType::Int16 | ValueType::UInt16 => 16,
            ValueType::Int32 | ValueType::UInt32 | ValueType::Float32 => 32,
            ValueType::Int64
            | ValueType::UInt64
            | ValueType::Float64
            | ValueType::Timestamp
            | ValueType::Interval => 64,
            ValueType::Str | ValueType::Bytes | ValueType::Uuid => 0,
        }
    }

    /// Check if this type is stored in the object array.
    pub fn is_object(&self) -> bool {
        self.packing_kind() == PackingKind::Object
    }
}

/// Field types - a scalar kind plus nullability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    /// A non-nullable scalar value.
    Scalar(ValueType),
    /// A nullable scalar value.
    Optional(ValueType),
}

impl FieldType {
    /// Create a non-nullable field type.
    pub fn scalar(value_type: ValueType) -> Self {
        FieldType::Scalar(value_type)
    }

    /// Create a nullable field type.
    pub fn optional(value_type: ValueType) -> Self {
        FieldType::Optional(value_type)
    }

    /// The scalar kind underneath the nullability wrapper.
    pub fn value_type(&self) -> ValueType {
        match self {
            FieldType::Scalar(vt) | FieldType::Optional(vt) => *vt,
        }
    }

    /// Check if null may be written to fields of this type.
    ///
    /// Object-kind fields accept null regardless of the wrapper, matching
    /// reference semantics.
    pub fn is_nullable(&self) -> bool {
        matches!(self, FieldType::Optional(_)) || self.value_type().is_object()
    }
}

/// Per-field tri-state marker, independent of the stored value bits.
///
/// Value bits are only meaningful while the state is [`Available`].
///
/// [`Available`]: FieldState::Available
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FieldState {
    /// Never set.
    Unavailable = 0,
    /// Holds a value.
    Available = 1,
    /// Explicitly set to null.
    Null = 2,
}

impl FieldState {
    /// Check if the field holds a value.
    pub fn is_available(&self) -> bool {
        matches!(self, FieldState::Available)
    }

    /// Check if the field was explicitly set to null.
    pub fn is_null(&self) -> bool {
        matches!(self, FieldState::Null)
    }
}

impl TryFrom<u8> for FieldState {
    type Error = TupleError;

    fn try_from(bits: u8) -> Result<Self, TupleError> {
        match bits {
            0 => Ok(FieldState::Unavailable),
            1 => Ok(FieldState::Available),
            2 => Ok(FieldState::Null),
            other => Err(TupleError::InvalidFieldState(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packing_kind_classification() {
        assert_eq!(ValueType::Bool.packing_kind(), PackingKind::Flag);
        assert_eq!(ValueType::Int32.packing_kind(), PackingKind::Value);
        assert_eq!(ValueType::Float64.packing_kind(), PackingKind::Value);
        assert_eq!(ValueType::Timestamp.packing_kind(), PackingKind::Value);
        assert_eq!(ValueType::Str.packing_kind(), PackingKind::Object);
        assert_eq!(ValueType::Bytes.packing_kind(), PackingKind::Object);
        assert_eq!(ValueType::Uuid.packing_kind(), PackingKind::Object);
    }

    #[test]
    fn test_bit_widths() {
        assert_eq!(ValueType::Bool.bit_width(), 1);
        assert_eq!(ValueType::Int8.bit_width(), 8);
        assert_eq!(ValueType::UInt16.bit_width(), 16);
        assert_eq!(ValueType::Float32.bit_width(), 32);
        assert_eq!(ValueType::Int64.bit_width(), 64);
        assert_eq!(ValueType::Interval.bit_width(), 64);
        assert_eq!(ValueType::Uuid.bit_width(), 0);
    }

    #[test]
    fn test_nullability() {
        assert!(!FieldType::scalar(ValueType::Int32).is_nullable());
        assert!(FieldType::optional(ValueType::Int32).is_nullable());
        // Object kinds are reference-like and always accept null.
        assert!(FieldType::scalar(ValueType::Str).is_nullable());
        assert!(FieldType::optional(ValueType::Bytes).is_nullable());
    }

    #[test]
    fn test_field_state_from_bits() {
        assert_eq!(FieldState::try_from(0), Ok(FieldState::Unavailable));
        assert_eq!(FieldState::try_from(1), Ok(FieldState::Available));
        assert_eq!(FieldState::try_from(2), Ok(FieldState::Null));
        assert_eq!(
            FieldState::try_from(3),
            Err(TupleError::InvalidFieldState(3))
        );
    }
}
