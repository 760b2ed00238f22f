//! The `Tuple` trait and the bit-packed `PackedTuple` implementation.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::codec;
use crate::descriptor::TupleDescriptor;
use crate::error::TupleError;
use crate::types::{FieldState, PackingKind};
use crate::value::Value;

/// Multiplier combining per-field hashes, applied in field order.
const HASH_MULTIPLIER: u64 = 31;

/// An ordered, fixed-arity row of typed, independently nullable fields.
///
/// Every query operator reads and writes rows through this contract.
/// Reading a field yields its value together with a tri-state marker; see
/// [`FieldState`]. Writing a non-null value always moves the field to
/// `Available`; writing null moves it to `Null` and is rejected for
/// non-nullable fields.
pub trait Tuple {
    /// The shape shared by every row of this kind.
    fn descriptor(&self) -> &TupleDescriptor;

    /// Number of fields.
    fn arity(&self) -> usize {
        self.descriptor().arity()
    }

    /// Read one field's state.
    fn state(&self, index: usize) -> Result<FieldState, TupleError>;

    /// Read one field's value. `None` when the field is null or
    /// unavailable; disambiguate with [`Tuple::state`] where it matters.
    fn get(&self, index: usize) -> Result<Option<Value>, TupleError>;

    /// Write one field. `Some` stores the value and marks the field
    /// `Available`; `None` marks it `Null`.
    fn set(&mut self, index: usize, value: Option<Value>) -> Result<(), TupleError>;

    /// Overwrite one field's state. Object slots are cleared whenever the
    /// field leaves `Available`, so stale references are never retained.
    fn set_state(&mut self, index: usize, state: FieldState) -> Result<(), TupleError>;
}

/// The concrete packed row: primitives bit-packed into 64-bit words, state
/// codes packed 32 fields per word behind them, and reference-typed fields
/// in a parallel object array.
///
/// A tuple's shape never changes after construction. `Clone` copies both
/// backing arrays, so clones never share mutable state (object payloads
/// are `Arc`-shared immutable data).
#[derive(Clone)]
pub struct PackedTuple {
    descriptor: TupleDescriptor,
    values: Box<[u64]>,
    objects: Box<[Option<Value>]>,
}

impl PackedTuple {
    /// Build a tuple of the given shape with every field `Unavailable`.
    pub fn new(descriptor: TupleDescriptor) -> Self {
        let values = vec![0u64; descriptor.total_words()].into_boxed_slice();
        let objects = vec![None; descriptor.object_slots()].into_boxed_slice();
        PackedTuple {
            descriptor,
            values,
            objects,
        }
    }

    fn check_index(&self, index: usize) -> Result<(), TupleError> {
        if index >= self.descriptor.arity() {
            return Err(TupleError::FieldIndexOutOfRange {
                index,
                arity: self.descriptor.arity(),
            });
        }
        Ok(())
    }

    /// Raw 2-bit state code for a field. Caller has bounds-checked.
    fn state_bits(&self, index: usize) -> u8 {
        let slot = &self.descriptor.packed()[index];
        ((self.values[slot.state_word] >> slot.state_offset) & 0b11) as u8
    }

    fn write_state(&mut self, index: usize, state: FieldState) {
        let slot = self.descriptor.packed()[index];
        let word = &mut self.values[slot.state_word];
        *word = (*word & !(0b11u64 << slot.state_offset)) | ((state as u64) << slot.state_offset);
    }

    /// Extracted value bits for a Flag/Value field, shifted to the low end.
    fn value_bits(&self, index: usize) -> u64 {
        let slot = &self.descriptor.packed()[index];
        (self.values[slot.word] & slot.mask) >> slot.bit_offset
    }
}

impl Tuple for PackedTuple {
    fn descriptor(&self) -> &TupleDescriptor {
        &self.descriptor
    }

    fn state(&self, index: usize) -> Result<FieldState, TupleError> {
        self.check_index(index)?;
        FieldState::try_from(self.state_bits(index))
    }

    fn get(&self, index: usize) -> Result<Option<Value>, TupleError> {
        self.check_index(index)?;
        if FieldState::try_from(self.state_bits(index))? != FieldState::Available {
            return Ok(None);
        }
        let slot = self.descriptor.packed()[index];
        match slot.kind {
            PackingKind::Object => Ok(self.objects[slot.object_slot].clone()),
            PackingKind::Flag | PackingKind::Value => {
                let field = self.descriptor.fields()[index];
                codec::decode(field.value_type(), self.value_bits(index)).map(Some)
            }
        }
    }

    fn set(&mut self, index: usize, value: Option<Value>) -> Result<(), TupleError> {
        self.check_index(index)?;
        let field = self.descriptor.fields()[index];
        let slot = self.descriptor.packed()[index];
        match value {
            None => {
                if !field.is_nullable() {
                    return Err(TupleError::NullNotAllowed { index });
                }
                if slot.kind == PackingKind::Object {
                    self.objects[slot.object_slot] = None;
                }
                self.write_state(index, FieldState::Null);
            }
            Some(value) => {
                match slot.kind {
                    PackingKind::Object => {
                        let expected = field.value_type();
                        if value.value_type() != expected {
                            return Err(TupleError::TypeMismatch {
                                expected,
                                actual: value.value_type(),
                            });
                        }
                        self.objects[slot.object_slot] = Some(value);
                    }
                    PackingKind::Flag | PackingKind::Value => {
                        let bits = codec::encode(field.value_type(), &value)?;
                        let word = &mut self.values[slot.word];
                        *word = (*word & !slot.mask) | ((bits << slot.bit_offset) & slot.mask);
                    }
                }
                self.write_state(index, FieldState::Available);
            }
        }
        Ok(())
    }

    fn set_state(&mut self, index: usize, state: FieldState) -> Result<(), TupleError> {
        self.check_index(index)?;
        if state == FieldState::Null && !self.descriptor.fields()[index].is_nullable() {
            return Err(TupleError::NullNotAllowed { index });
        }
        let slot = self.descriptor.packed()[index];
        if slot.kind == PackingKind::Object && state != FieldState::Available {
            self.objects[slot.object_slot] = None;
        }
        self.write_state(index, state);
        Ok(())
    }
}

impl PartialEq for PackedTuple {
    /// Field-by-field comparison: states must match, and `Available`
    /// fields compare bit-exact for packed primitives and by value for
    /// objects. Value bits of non-`Available` fields are ignored.
    fn eq(&self, other: &Self) -> bool {
        if self.descriptor != other.descriptor {
            return false;
        }
        for index in 0..self.descriptor.arity() {
            let state = self.state_bits(index);
            if state != other.state_bits(index) {
                return false;
            }
            if state != FieldState::Available as u8 {
                continue;
            }
            let slot = &self.descriptor.packed()[index];
            let equal = match slot.kind {
                PackingKind::Object => {
                    self.objects[slot.object_slot] == other.objects[slot.object_slot]
                }
                PackingKind::Flag | PackingKind::Value => {
                    self.value_bits(index) == other.value_bits(index)
                }
            };
            if !equal {
                return false;
            }
        }
        true
    }
}

impl Eq for PackedTuple {}

impl Hash for PackedTuple {
    fn hash<H: Hasher>(&self, state: &mut H) {
        let mut combined: u64 = 0;
        for index in 0..self.descriptor.arity() {
            let field_hash = if self.state_bits(index) == FieldState::Available as u8 {
                let slot = &self.descriptor.packed()[index];
                match slot.kind {
                    PackingKind::Object => object_hash(self.objects[slot.object_slot].as_ref()),
                    PackingKind::Flag | PackingKind::Value => self.value_bits(index),
                }
            } else {
                0
            };
            combined = combined
                .wrapping_mul(HASH_MULTIPLIER)
                .wrapping_add(field_hash);
        }
        state.write_u64(combined);
    }
}

fn object_hash(value: Option<&Value>) -> u64 {
    let Some(value) = value else {
        return 0;
    };
    let mut hasher = DefaultHasher::new();
    match value {
        Value::Str(s) => s.as_bytes().hash(&mut hasher),
        Value::Bytes(b) => b.hash(&mut hasher),
        Value::Uuid(u) => u.hash(&mut hasher),
        // Object slots only ever hold object-kind values; anything else
        // contributes its discriminant so the match stays total.
        other => std::mem::discriminant(other).hash(&mut hasher),
    }
    hasher.finish()
}

impl fmt::Debug for PackedTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for index in 0..self.descriptor.arity() {
            match FieldState::try_from(self.state_bits(index)) {
                Ok(FieldState::Available) => match self.get(index) {
                    Ok(Some(value)) => list.entry(&value),
                    Ok(None) => list.entry(&"<empty>"),
                    Err(_) => list.entry(&"<error>"),
                },
                Ok(FieldState::Null) => list.entry(&"null"),
                Ok(FieldState::Unavailable) => list.entry(&"?"),
                Err(_) => list.entry(&"<bad state>"),
            };
        }
        list.finish()
    }
}
