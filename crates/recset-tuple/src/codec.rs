//! Static encode/decode between values and 64-bit packed bit patterns.
//!
//! Every packable value kind has exactly one encode/decode pair, written
//! out statically and dispatched by exhaustive match. Floats are
//! reinterpreted via their IEEE-754 bit pattern; timestamps and intervals
//! via their tick count; signed integers via two's-complement truncation
//! to their declared width. Each pair is lossless: `decode(encode(v))`
//! returns `v` bit-for-bit for every representable value.

use crate::error::TupleError;
use crate::types::{PackingKind, ValueType};
use crate::value::Value;

/// Encode a value into the bit pattern stored in a packed word.
///
/// The result occupies the low `value_type.bit_width()` bits; callers
/// shift and mask it into position. Object kinds have no packed encoding
/// and return [`TupleError::UnsupportedPacking`].
pub fn encode(value_type: ValueType, value: &Value) -> Result<u64, TupleError> {
    match (value_type, value) {
        (ValueType::Bool, Value::Bool(v)) => Ok(u64::from(*v)),
        (ValueType::Int8, Value::Int8(v)) => Ok(u64::from(*v as u8)),
        (ValueType::Int16, Value::Int16(v)) => Ok(u64::from(*v as u16)),
        (ValueType::Int32, Value::Int32(v)) => Ok(u64::from(*v as u32)),
        (ValueType::Int64, Value::Int64(v)) => Ok(*v as u64),
        (ValueType::UInt8, Value::UInt8(v)) => Ok(u64::from(*v)),
        (ValueType::UInt16, Value::UInt16(v)) => Ok(u64::from(*v)),
        (ValueType::UInt32, Value::UInt32(v)) => Ok(u64::from(*v)),
        (ValueType::UInt64, Value::UInt64(v)) => Ok(*v),
        (ValueType::Float32, Value::Float32(v)) => Ok(u64::from(v.to_bits())),
        (ValueType::Float64, Value::Float64(v)) => Ok(v.to_bits()),
        (ValueType::Timestamp, Value::Timestamp(v)) => Ok(*v as u64),
        (ValueType::Interval, Value::Interval(v)) => Ok(*v as u64),
        (vt, _) if vt.packing_kind() == PackingKind::Object => {
            Err(TupleError::UnsupportedPacking(vt))
        }
        (vt, v) => Err(TupleError::TypeMismatch {
            expected: vt,
            actual: v.value_type(),
        }),
    }
}

/// Decode the bit pattern extracted from a packed word back into a value.
///
/// `bits` must already be shifted down so the value occupies the low bits.
pub fn decode(value_type: ValueType, bits: u64) -> Result<Value, TupleError> {
    match value_type {
        ValueType::Bool => Ok(Value::Bool(bits & 1 != 0)),
        ValueType::Int8 => Ok(Value::Int8(bits as u8 as i8)),
        ValueType::Int16 => Ok(Value::Int16(bits as u16 as i16)),
        ValueType::Int32 => Ok(Value::Int32(bits as u32 as i32)),
        ValueType::Int64 => Ok(Value::Int64(bits as i64)),
        ValueType::UInt8 => Ok(Value::UInt8(bits as u8)),
        ValueType::UInt16 => Ok(Value::UInt16(bits as u16)),
        ValueType::UInt32 => Ok(Value::UInt32(bits as u32)),
        ValueType::UInt64 => Ok(Value::UInt64(bits)),
        ValueType::Float32 => Ok(Value::Float32(f32::from_bits(bits as u32))),
        ValueType::Float64 => Ok(Value::Float64(f64::from_bits(bits))),
        ValueType::Timestamp => Ok(Value::Timestamp(bits as i64)),
        ValueType::Interval => Ok(Value::Interval(bits as i64)),
        ValueType::Str | ValueType::Bytes | ValueType::Uuid => {
            Err(TupleError::UnsupportedPacking(value_type))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(value_type: ValueType, value: Value) {
        let bits = encode(value_type, &value).unwrap();
        assert_eq!(decode(value_type, bits).unwrap(), value);
    }

    #[test]
    fn test_bool_roundtrip() {
        roundtrip(ValueType::Bool, Value::Bool(false));
        roundtrip(ValueType::Bool, Value::Bool(true));
    }

    #[test]
    fn test_signed_roundtrip() {
        roundtrip(ValueType::Int8, Value::Int8(i8::MIN));
        roundtrip(ValueType::Int8, Value::Int8(-1));
        roundtrip(ValueType::Int8, Value::Int8(i8::MAX));
        roundtrip(ValueType::Int16, Value::Int16(i16::MIN));
        roundtrip(ValueType::Int32, Value::Int32(i32::MIN));
        roundtrip(ValueType::Int32, Value::Int32(0));
        roundtrip(ValueType::Int64, Value::Int64(i64::MIN));
        roundtrip(ValueType::Int64, Value::Int64(i64::MAX));
    }

    #[test]
    fn test_unsigned_roundtrip() {
        roundtrip(ValueType::UInt8, Value::UInt8(u8::MAX));
        roundtrip(ValueType::UInt16, Value::UInt16(u16::MAX));
        roundtrip(ValueType::UInt32, Value::UInt32(u32::MAX));
        roundtrip(ValueType::UInt64, Value::UInt64(u64::MAX));
        roundtrip(ValueType::UInt64, Value::UInt64(0));
    }

    #[test]
    fn test_float_roundtrip_is_bit_exact() {
        roundtrip(ValueType::Float32, Value::Float32(f32::MIN));
        roundtrip(ValueType::Float32, Value::Float32(f32::MAX));
        roundtrip(ValueType::Float64, Value::Float64(f64::MIN_POSITIVE));
        roundtrip(ValueType::Float64, Value::Float64(-0.0));

        // NaN payload bits survive the trip even though NaN != NaN.
        let nan = f64::NAN;
        let bits = encode(ValueType::Float64, &Value::Float64(nan)).unwrap();
        match decode(ValueType::Float64, bits).unwrap() {
            Value::Float64(back) => assert_eq!(back.to_bits(), nan.to_bits()),
            other => panic!("unexpected value: {:?}", other),
        }

        let nan32 = f32::NAN;
        let bits = encode(ValueType::Float32, &Value::Float32(nan32)).unwrap();
        match decode(ValueType::Float32, bits).unwrap() {
            Value::Float32(back) => assert_eq!(back.to_bits(), nan32.to_bits()),
            other => panic!("unexpected value: {:?}", other),
        }
    }

    #[test]
    fn test_tick_roundtrip() {
        roundtrip(ValueType::Timestamp, Value::Timestamp(i64::MIN));
        roundtrip(ValueType::Timestamp, Value::Timestamp(1_700_000_000_000_000));
        roundtrip(ValueType::Interval, Value::Interval(-86_400_000_000));
    }

    #[test]
    fn test_type_mismatch() {
        let err = encode(ValueType::Int32, &Value::Int64(1)).unwrap_err();
        assert_eq!(
            err,
            TupleError::TypeMismatch {
                expected: ValueType::Int32,
                actual: ValueType::Int64,
            }
        );
    }

    #[test]
    fn test_object_kinds_have_no_packing() {
        let err = encode(ValueType::Str, &Value::Str("x".into())).unwrap_err();
        assert_eq!(err, TupleError::UnsupportedPacking(ValueType::Str));
        let err = decode(ValueType::Uuid, 0).unwrap_err();
        assert_eq!(err, TupleError::UnsupportedPacking(ValueType::Uuid));
    }

    #[test]
    fn test_narrow_encodings_fit_declared_width() {
        let bits = encode(ValueType::Int8, &Value::Int8(-1)).unwrap();
        assert_eq!(bits, 0xFF);
        let bits = encode(ValueType::Int16, &Value::Int16(-1)).unwrap();
        assert_eq!(bits, 0xFFFF);
        let bits = encode(ValueType::Bool, &Value::Bool(true)).unwrap();
        assert_eq!(bits, 1);
    }
}
