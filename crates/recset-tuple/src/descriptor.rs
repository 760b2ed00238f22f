//! Tuple descriptors: per-shape packing layout, computed once and shared.
//!
//! A descriptor assigns every field a packing slot using a greedy
//! largest-first layout: fields are sorted by descending bit width (ties
//! broken by original index) and placed left to right into 64-bit words,
//! opening a new word whenever the current one cannot hold the next field.
//! Field states (2 bits each, 32 fields per word) are packed separately,
//! in original field order, into words that follow the value words in the
//! same array.

use std::cmp::Reverse;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;

use crate::types::{FieldType, PackingKind};

/// Per-field packing slot, computed at descriptor construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackedField {
    /// Storage class for the field.
    pub kind: PackingKind,
    /// Value word index. Meaningful for Flag/Value kinds.
    pub word: usize,
    /// Bit offset of the value inside its word.
    pub bit_offset: u32,
    /// Width of the value in bits.
    pub bit_width: u32,
    /// In-place mask covering the value bits inside the word.
    pub mask: u64,
    /// Index of the word holding the field's 2-bit state.
    pub state_word: usize,
    /// Bit offset of the state inside its state word.
    pub state_offset: u32,
    /// Slot in the object array. Meaningful only for Object kind.
    pub object_slot: usize,
}

#[derive(Debug)]
struct Inner {
    fields: Box<[FieldType]>,
    packed: Box<[PackedField]>,
    value_words: usize,
    state_words: usize,
    object_slots: usize,
}

/// A tuple shape: ordered field types plus their computed packing layout.
///
/// Descriptors are immutable and shared via `Arc`; cloning the handle is
/// cheap. [`TupleDescriptor::intern`] returns the canonical instance for a
/// field list so repeated shapes share one layout across the engine, while
/// [`TupleDescriptor::new`] always builds a fresh one. Equality is pointer
/// identity first, field-list comparison second, so interned and fresh
/// descriptors of the same shape still compare equal.
#[derive(Debug, Clone)]
pub struct TupleDescriptor {
    inner: Arc<Inner>,
}

static INTERNED: OnceLock<DashMap<Box<[FieldType]>, TupleDescriptor>> = OnceLock::new();

impl TupleDescriptor {
    /// Build a fresh descriptor for the given field list.
    pub fn new(fields: &[FieldType]) -> Self {
        TupleDescriptor {
            inner: Arc::new(compute(fields)),
        }
    }

    /// Return the shared descriptor for the given field list, building it
    /// on first use.
    pub fn intern(fields: &[FieldType]) -> Self {
        let map = INTERNED.get_or_init(DashMap::new);
        if let Some(existing) = map.get(fields) {
            return existing.clone();
        }
        map.entry(Box::from(fields))
            .or_insert_with(|| TupleDescriptor::new(fields))
            .clone()
    }

    /// Number of fields in the shape.
    pub fn arity(&self) -> usize {
        self.inner.fields.len()
    }

    /// The ordered field types.
    pub fn fields(&self) -> &[FieldType] {
        &self.inner.fields
    }

    /// The computed packing slot per field, in field order.
    pub fn packed(&self) -> &[PackedField] {
        &self.inner.packed
    }

    /// Words holding packed values.
    pub fn value_words(&self) -> usize {
        self.inner.value_words
    }

    /// Words holding field states.
    pub fn state_words(&self) -> usize {
        self.inner.state_words
    }

    /// Total length of a tuple's word array (values plus states).
    pub fn total_words(&self) -> usize {
        self.inner.value_words + self.inner.state_words
    }

    /// Length of a tuple's object array.
    pub fn object_slots(&self) -> usize {
        self.inner.object_slots
    }

    /// Check whether two handles point at the same shared layout.
    pub fn same_instance(&self, other: &TupleDescriptor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for TupleDescriptor {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.fields == other.inner.fields
    }
}

impl Eq for TupleDescriptor {}

impl Hash for TupleDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.fields.hash(state);
    }
}

/// Mask covering the low `width` bits.
fn width_mask(width: u32) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

fn compute(fields: &[FieldType]) -> Inner {
    let arity = fields.len();

    // Classification pass: storage class and width per field.
    let mut packed: Vec<PackedField> = fields
        .iter()
        .map(|field| {
            let vt = field.value_type();
            PackedField {
                kind: vt.packing_kind(),
                word: 0,
                bit_offset: 0,
                bit_width: vt.bit_width(),
                mask: 0,
                state_word: 0,
                state_offset: 0,
                object_slot: 0,
            }
        })
        .collect();

    // Largest fields first minimizes padding; ties keep original order so
    // the layout is deterministic for a given field list.
    let mut order: Vec<usize> = (0..arity).collect();
    order.sort_by_key(|&i| (Reverse(packed[i].bit_width), i));

    let mut value_words = 0usize;
    let mut cursor = 64u32; // bits used in the current word; 64 forces a fresh word
    let mut object_slots = 0usize;
    for &i in &order {
        let slot = &mut packed[i];
        match slot.kind {
            PackingKind::Object => {
                slot.object_slot = object_slots;
                object_slots += 1;
            }
            PackingKind::Flag | PackingKind::Value => {
                if cursor + slot.bit_width > 64 {
                    value_words += 1;
                    cursor = 0;
                }
                slot.word = value_words - 1;
                slot.bit_offset = cursor;
                slot.mask = width_mask(slot.bit_width) << cursor;
                cursor += slot.bit_width;
            }
        }
    }

    // States pack 32 per word in original field order, after the values.
    let state_words = arity.div_ceil(32);
    for (i, slot) in packed.iter_mut().enumerate() {
        slot.state_word = value_words + i / 32;
        slot.state_offset = (2 * (i % 32)) as u32;
    }

    Inner {
        fields: fields.into(),
        packed: packed.into_boxed_slice(),
        value_words,
        state_words,
        object_slots,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ValueType;

    fn scalar(vt: ValueType) -> FieldType {
        FieldType::scalar(vt)
    }

    #[test]
    fn test_empty_descriptor() {
        let d = TupleDescriptor::new(&[]);
        assert_eq!(d.arity(), 0);
        assert_eq!(d.total_words(), 0);
        assert_eq!(d.object_slots(), 0);
    }

    #[test]
    fn test_all_primitive_descriptor_has_no_object_slots() {
        let d = TupleDescriptor::new(&[scalar(ValueType::Bool), scalar(ValueType::Int64)]);
        assert_eq!(d.object_slots(), 0);
    }

    #[test]
    fn test_largest_first_packing() {
        // Declared small-to-large; layout must place the i64 first.
        let d = TupleDescriptor::new(&[
            scalar(ValueType::Bool),
            scalar(ValueType::Int16),
            scalar(ValueType::Int64),
        ]);
        let p = d.packed();
        assert_eq!(p[2].word, 0);
        assert_eq!(p[2].bit_offset, 0);
        assert_eq!(p[1].word, 1);
        assert_eq!(p[1].bit_offset, 0);
        assert_eq!(p[0].word, 1);
        assert_eq!(p[0].bit_offset, 16);
        assert_eq!(d.value_words(), 2);
    }

    #[test]
    fn test_ties_broken_by_field_order() {
        let d = TupleDescriptor::new(&[
            scalar(ValueType::Int32),
            scalar(ValueType::UInt32),
            scalar(ValueType::Float32),
        ]);
        let p = d.packed();
        assert_eq!((p[0].word, p[0].bit_offset), (0, 0));
        assert_eq!((p[1].word, p[1].bit_offset), (0, 32));
        assert_eq!((p[2].word, p[2].bit_offset), (1, 0));
    }

    #[test]
    fn test_no_overlap_within_words() {
        let d = TupleDescriptor::new(&[
            scalar(ValueType::Int8),
            scalar(ValueType::Bool),
            scalar(ValueType::Int32),
            scalar(ValueType::UInt16),
            scalar(ValueType::Bool),
            scalar(ValueType::Int64),
            scalar(ValueType::UInt8),
        ]);
        let mut used = vec![0u64; d.value_words()];
        let mut total_bits = vec![0u32; d.value_words()];
        for slot in d.packed() {
            assert_eq!(used[slot.word] & slot.mask, 0, "overlapping bit ranges");
            used[slot.word] |= slot.mask;
            total_bits[slot.word] += slot.bit_width;
            assert!(slot.bit_offset + slot.bit_width <= 64);
        }
        for bits in total_bits {
            assert!(bits <= 64);
        }
    }

    #[test]
    fn test_object_slots_in_field_order() {
        let d = TupleDescriptor::new(&[
            scalar(ValueType::Str),
            scalar(ValueType::Int32),
            scalar(ValueType::Bytes),
            scalar(ValueType::Uuid),
        ]);
        let p = d.packed();
        assert_eq!(p[0].object_slot, 0);
        assert_eq!(p[2].object_slot, 1);
        assert_eq!(p[3].object_slot, 2);
        assert_eq!(d.object_slots(), 3);
        // Objects consume no value bits.
        assert_eq!(d.value_words(), 1);
    }

    #[test]
    fn test_state_slots_use_original_field_order() {
        let d = TupleDescriptor::new(&[
            scalar(ValueType::Bool),
            scalar(ValueType::Int64),
            scalar(ValueType::Str),
        ]);
        let p = d.packed();
        assert_eq!(p[0].state_word, d.value_words());
        assert_eq!(p[0].state_offset, 0);
        assert_eq!(p[1].state_offset, 2);
        assert_eq!(p[2].state_offset, 4);
        assert_eq!(d.state_words(), 1);
    }

    #[test]
    fn test_state_words_hold_32_fields_each() {
        let fields: Vec<FieldType> = (0..33).map(|_| scalar(ValueType::Bool)).collect();
        let d = TupleDescriptor::new(&fields);
        assert_eq!(d.state_words(), 2);
        assert_eq!(d.packed()[31].state_word, d.value_words());
        assert_eq!(d.packed()[31].state_offset, 62);
        assert_eq!(d.packed()[32].state_word, d.value_words() + 1);
        assert_eq!(d.packed()[32].state_offset, 0);
    }

    #[test]
    fn test_intern_returns_shared_instance() {
        let fields = [scalar(ValueType::Int32), scalar(ValueType::Str)];
        let a = TupleDescriptor::intern(&fields);
        let b = TupleDescriptor::intern(&fields);
        assert!(a.same_instance(&b));

        let fresh = TupleDescriptor::new(&fields);
        assert!(!fresh.same_instance(&a));
        assert_eq!(fresh, a);
    }

    #[test]
    fn test_sixty_four_bit_mask() {
        let d = TupleDescriptor::new(&[scalar(ValueType::UInt64)]);
        assert_eq!(d.packed()[0].mask, u64::MAX);
    }
}
