//! Column projections applied tuple-by-tuple.

use crate::descriptor::TupleDescriptor;
use crate::error::TupleError;
use crate::tuple::{PackedTuple, Tuple};
use crate::types::FieldState;

/// A reusable column projection from one tuple shape to another.
///
/// The target descriptor is computed once at construction; `apply` then
/// maps any number of source tuples. Joins use this to build key tuples
/// for hashing and comparison, aggregation uses it for group-by keys.
#[derive(Debug, Clone, PartialEq)]
pub struct TupleTransform {
    source: TupleDescriptor,
    target: TupleDescriptor,
    columns: Box<[usize]>,
}

impl TupleTransform {
    /// Build a projection picking `columns` (source field indices, in
    /// target order) out of `source`. The target keeps each picked
    /// field's type unchanged.
    pub fn new(source: TupleDescriptor, columns: &[usize]) -> Result<Self, TupleError> {
        let mut fields = Vec::with_capacity(columns.len());
        for &column in columns {
            let field = source.fields().get(column).copied().ok_or(
                TupleError::FieldIndexOutOfRange {
                    index: column,
                    arity: source.arity(),
                },
            )?;
            fields.push(field);
        }
        let target = TupleDescriptor::intern(&fields);
        Self::with_target(source, target, columns)
    }

    /// Build a projection into an explicitly chosen target shape.
    ///
    /// Lets two projections from differently-typed sources share one
    /// target descriptor, which join key tuples need: equality between
    /// key tuples requires equal descriptors, so each side widens its
    /// key fields into the same all-nullable shape. Value types must
    /// match exactly; only scalar-to-optional widening is allowed.
    pub fn with_target(
        source: TupleDescriptor,
        target: TupleDescriptor,
        columns: &[usize],
    ) -> Result<Self, TupleError> {
        if columns.len() != target.arity() {
            return Err(TupleError::DescriptorMismatch);
        }
        for (target_index, &column) in columns.iter().enumerate() {
            let from = source.fields().get(column).copied().ok_or(
                TupleError::FieldIndexOutOfRange {
                    index: column,
                    arity: source.arity(),
                },
            )?;
            let to = target.fields()[target_index];
            if from.value_type() != to.value_type() {
                return Err(TupleError::TypeMismatch {
                    expected: to.value_type(),
                    actual: from.value_type(),
                });
            }
            if from.is_nullable() && !to.is_nullable() {
                return Err(TupleError::DescriptorMismatch);
            }
        }
        Ok(TupleTransform {
            source,
            target,
            columns: columns.into(),
        })
    }

    /// The shape transformed tuples come out with.
    pub fn target(&self) -> &TupleDescriptor {
        &self.target
    }

    /// The shape tuples must have going in.
    pub fn source(&self) -> &TupleDescriptor {
        &self.source
    }

    /// Source column picked for each target field.
    pub fn columns(&self) -> &[usize] {
        &self.columns
    }

    /// Project one tuple, carrying each mapped field's state along with
    /// its value.
    pub fn apply<T: Tuple>(&self, tuple: &T) -> Result<PackedTuple, TupleError> {
        if *tuple.descriptor() != self.source {
            return Err(TupleError::DescriptorMismatch);
        }
        let mut out = PackedTuple::new(self.target.clone());
        for (target_index, &column) in self.columns.iter().enumerate() {
            match tuple.state(column)? {
                FieldState::Available => out.set(target_index, tuple.get(column)?)?,
                FieldState::Null => out.set_state(target_index, FieldState::Null)?,
                FieldState::Unavailable => {}
            }
        }
        Ok(out)
    }
}
