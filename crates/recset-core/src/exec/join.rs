//! Join strategy selection and the four join algorithms.
//!
//! Selection happens once at compile time from the capabilities of the
//! two compiled children; it is never re-evaluated per row. Every
//! algorithm streams the left side, so a join's output order is its
//! left input's order. Key equality is tuple equality over the
//! projected key tuples: null keys match null keys, and floats match
//! bit-for-bit.

use std::collections::{HashMap, VecDeque};
use std::cmp::Ordering;
use std::sync::Arc;

use recset_tuple::{PackedTuple, Tuple, TupleDescriptor, TupleTransform};

use crate::error::{Error, Result};
use crate::exec::EnumerationContext;
use crate::exec::node::{combine_rows, materialize, memo_key, ExecNode};
use crate::expr::compare_keys;
use crate::header::Direction;
use crate::provider::{JoinHint, JoinKind, Provider};
use crate::source::TupleIter;

/// The physical join algorithm chosen at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinAlgorithm {
    NestedLoop,
    Hash,
    Loop,
    Merge,
}

/// Capability summary of one compiled join input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinSideCaps {
    /// The side's output order has the join keys as its leading
    /// columns, with directions matching the other side's.
    pub ordered_on_keys: bool,
    /// The side supports ordered lookup by the single join key.
    pub keyed_lookup: bool,
}

/// Pick the join algorithm. Pure over its inputs: the same hint and
/// capabilities always select the same algorithm.
///
/// A hint the children cannot support falls back to nested-loop, the
/// one algorithm with no capability requirements. Without a hint the
/// preference is merge, then loop, then nested-loop. Inner and
/// left-outer variants exist for every algorithm, so the join kind
/// never influences the choice.
pub fn select_join_algorithm(
    hint: JoinHint,
    left: JoinSideCaps,
    right: JoinSideCaps,
) -> JoinAlgorithm {
    match hint {
        JoinHint::NestedLoop => JoinAlgorithm::NestedLoop,
        JoinHint::Hash => JoinAlgorithm::Hash,
        JoinHint::Loop if right.keyed_lookup => JoinAlgorithm::Loop,
        JoinHint::Merge if left.ordered_on_keys && right.ordered_on_keys => JoinAlgorithm::Merge,
        JoinHint::Loop | JoinHint::Merge => JoinAlgorithm::NestedLoop,
        JoinHint::Auto => {
            if left.ordered_on_keys && right.ordered_on_keys {
                JoinAlgorithm::Merge
            } else if right.keyed_lookup {
                JoinAlgorithm::Loop
            } else {
                JoinAlgorithm::NestedLoop
            }
        }
    }
}

/// Everything a join algorithm needs beyond its two children.
pub(crate) struct JoinSpec {
    pub kind: JoinKind,
    /// (left column, right column) pairs the join equates.
    pub pairs: Vec<(usize, usize)>,
    /// Projects a left row into the shared key shape.
    pub left_key: TupleTransform,
    /// Projects a right row into the shared key shape.
    pub right_key: TupleTransform,
    /// Combined output shape: left fields then right fields.
    pub output: TupleDescriptor,
    /// Key directions when both sides arrive ordered on the keys;
    /// empty otherwise. Merge requires one entry per pair.
    pub directions: Vec<Direction>,
}

/// Hash table over the right side, grouped by key tuple.
pub(crate) struct JoinTable {
    groups: HashMap<PackedTuple, Vec<PackedTuple>>,
}

impl JoinTable {
    fn build(right: TupleIter<'_>, key: &TupleTransform) -> Result<JoinTable> {
        let mut groups: HashMap<PackedTuple, Vec<PackedTuple>> = HashMap::new();
        for item in right {
            let row = item?;
            groups.entry(key.apply(&row)?).or_default().push(row);
        }
        Ok(JoinTable { groups })
    }

    fn probe(&self, key: &PackedTuple) -> &[PackedTuple] {
        self.groups.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    #[cfg(test)]
    fn group_count(&self) -> usize {
        self.groups.len()
    }
}

pub(crate) fn enumerate_join<'a>(
    origin: &'a Arc<Provider>,
    left: &'a ExecNode,
    right: &'a ExecNode,
    spec: &'a JoinSpec,
    algorithm: JoinAlgorithm,
    right_correlated: bool,
    ctx: &'a EnumerationContext,
) -> Result<TupleIter<'a>> {
    match algorithm {
        JoinAlgorithm::NestedLoop => nested_loop(left, right, spec, right_correlated, ctx),
        JoinAlgorithm::Hash => hash_join(origin, left, right, spec, right_correlated, ctx),
        JoinAlgorithm::Loop => loop_join(left, right, spec, ctx),
        JoinAlgorithm::Merge => merge_join(left, right, spec, ctx),
    }
}

/// Materialize the right side, then scan it once per left row.
fn nested_loop<'a>(
    left: &'a ExecNode,
    right: &'a ExecNode,
    spec: &'a JoinSpec,
    right_correlated: bool,
    ctx: &'a EnumerationContext,
) -> Result<TupleIter<'a>> {
    let rows = materialize(right, right_correlated, ctx)?;
    let left_iter = left.enumerate(ctx)?;
    Ok(Box::new(left_iter.flat_map(
        move |item| -> Vec<Result<PackedTuple>> {
            let left_row = match item {
                Ok(row) => row,
                Err(e) => return vec![Err(e)],
            };
            let left_key = match spec.left_key.apply(&left_row) {
                Ok(key) => key,
                Err(e) => return vec![Err(e.into())],
            };
            let mut out = Vec::new();
            for right_row in rows.iter() {
                let matched = if spec.pairs.is_empty() {
                    true
                } else {
                    match spec.right_key.apply(right_row) {
                        Ok(key) => key == left_key,
                        Err(e) => return vec![Err(e.into())],
                    }
                };
                if matched {
                    out.push(combine_rows(&spec.output, &left_row, Some(right_row)));
                }
            }
            if out.is_empty() && spec.kind == JoinKind::LeftOuter {
                out.push(combine_rows(&spec.output, &left_row, None));
            }
            out
        },
    )))
}

/// Build (or reuse) a hash table over the right side, then probe it
/// with each left row's key tuple.
fn hash_join<'a>(
    origin: &'a Arc<Provider>,
    left: &'a ExecNode,
    right: &'a ExecNode,
    spec: &'a JoinSpec,
    right_correlated: bool,
    ctx: &'a EnumerationContext,
) -> Result<TupleIter<'a>> {
    let key = memo_key(origin);
    let table = if right_correlated {
        Arc::new(JoinTable::build(right.enumerate(ctx)?, &spec.right_key)?)
    } else {
        match ctx.cached_table(key) {
            Some(table) => table,
            None => {
                let table = Arc::new(JoinTable::build(right.enumerate(ctx)?, &spec.right_key)?);
                ctx.store_table(key, table.clone());
                table
            }
        }
    };
    let left_iter = left.enumerate(ctx)?;
    Ok(Box::new(left_iter.flat_map(
        move |item| -> Vec<Result<PackedTuple>> {
            let left_row = match item {
                Ok(row) => row,
                Err(e) => return vec![Err(e)],
            };
            let left_key = match spec.left_key.apply(&left_row) {
                Ok(key) => key,
                Err(e) => return vec![Err(e.into())],
            };
            let matches = table.probe(&left_key);
            if matches.is_empty() {
                return match spec.kind {
                    JoinKind::LeftOuter => vec![combine_rows(&spec.output, &left_row, None)],
                    JoinKind::Inner => Vec::new(),
                };
            }
            matches
                .iter()
                .map(|right_row| combine_rows(&spec.output, &left_row, Some(right_row)))
                .collect()
        },
    )))
}

/// Seek the right side's index once per left row.
fn loop_join<'a>(
    left: &'a ExecNode,
    right: &'a ExecNode,
    spec: &'a JoinSpec,
    ctx: &'a EnumerationContext,
) -> Result<TupleIter<'a>> {
    let (source, _) = right.keyed_lookup().ok_or_else(|| {
        Error::InvalidPlan("loop join selected over a side without keyed lookup".into())
    })?;
    let source = source.clone();
    let &(left_column, _) = spec.pairs.first().ok_or_else(|| {
        Error::InvalidPlan("loop join requires a join key".into())
    })?;
    let left_iter = left.enumerate(ctx)?;
    Ok(Box::new(left_iter.flat_map(
        move |item| -> Vec<Result<PackedTuple>> {
            let left_row = match item {
                Ok(row) => row,
                Err(e) => return vec![Err(e)],
            };
            let key = match left_row.get(left_column) {
                Ok(key) => key,
                Err(e) => return vec![Err(e.into())],
            };
            let probe = match source.lookup(key.as_ref()) {
                Ok(iter) => iter,
                Err(e) => return vec![Err(e)],
            };
            let mut out = Vec::new();
            for matched in probe {
                match matched {
                    Ok(right_row) => {
                        out.push(combine_rows(&spec.output, &left_row, Some(&right_row)));
                    }
                    Err(e) => return vec![Err(e)],
                }
            }
            if out.is_empty() && spec.kind == JoinKind::LeftOuter {
                out.push(combine_rows(&spec.output, &left_row, None));
            }
            out
        },
    )))
}

/// Advance both ordered inputs together, joining equal-key groups.
fn merge_join<'a>(
    left: &'a ExecNode,
    right: &'a ExecNode,
    spec: &'a JoinSpec,
    ctx: &'a EnumerationContext,
) -> Result<TupleIter<'a>> {
    if spec.directions.len() != spec.pairs.len() {
        return Err(Error::InvalidPlan(
            "merge join selected without matching input orders".into(),
        ));
    }
    Ok(Box::new(MergeJoinIter {
        left: left.enumerate(ctx)?,
        right: right.enumerate(ctx)?,
        spec,
        group: Vec::new(),
        group_key: None,
        right_next: None,
        right_done: false,
        pending: VecDeque::new(),
    }))
}

/// Compare two key tuples field by field, honoring the shared key
/// directions.
fn compare_key_tuples(
    a: &PackedTuple,
    b: &PackedTuple,
    directions: &[Direction],
) -> Result<Ordering> {
    for (index, direction) in directions.iter().enumerate() {
        let av = a.get(index)?;
        let bv = b.get(index)?;
        let ordering = match direction {
            Direction::Asc => compare_keys(av.as_ref(), bv.as_ref()),
            Direction::Desc => compare_keys(bv.as_ref(), av.as_ref()),
        };
        if ordering != Ordering::Equal {
            return Ok(ordering);
        }
    }
    Ok(Ordering::Equal)
}

struct MergeJoinIter<'a> {
    left: TupleIter<'a>,
    right: TupleIter<'a>,
    spec: &'a JoinSpec,
    /// Right rows sharing the current key.
    group: Vec<PackedTuple>,
    group_key: Option<PackedTuple>,
    /// Lookahead right row beyond the current group.
    right_next: Option<PackedTuple>,
    right_done: bool,
    pending: VecDeque<Result<PackedTuple>>,
}

impl MergeJoinIter<'_> {
    /// Load the next right-side group into `group`.
    fn load_group(&mut self) -> Result<()> {
        self.group.clear();
        let first = match self.right_next.take() {
            Some(row) => Some(row),
            None if self.right_done => None,
            None => match self.right.next() {
                Some(row) => Some(row?),
                None => {
                    self.right_done = true;
                    None
                }
            },
        };
        let Some(first) = first else {
            self.group_key = None;
            return Ok(());
        };
        let key = self.spec.right_key.apply(&first)?;
        self.group.push(first);
        loop {
            match self.right.next() {
                None => {
                    self.right_done = true;
                    break;
                }
                Some(Err(e)) => return Err(e),
                Some(Ok(row)) => {
                    let row_key = self.spec.right_key.apply(&row)?;
                    if compare_key_tuples(&row_key, &key, &self.spec.directions)?
                        == Ordering::Equal
                    {
                        self.group.push(row);
                    } else {
                        self.right_next = Some(row);
                        break;
                    }
                }
            }
        }
        self.group_key = Some(key);
        Ok(())
    }

    /// Advance right groups until the current group's key is at or past
    /// the left key.
    fn align(&mut self, left_key: &PackedTuple) -> Result<()> {
        loop {
            match &self.group_key {
                Some(key) => {
                    if compare_key_tuples(key, left_key, &self.spec.directions)?
                        == Ordering::Less
                    {
                        self.load_group()?;
                    } else {
                        return Ok(());
                    }
                }
                None if !self.right_done => self.load_group()?,
                None => return Ok(()),
            }
        }
    }

    fn push_matches(&mut self, left_row: &PackedTuple) -> Result<()> {
        let left_key = self.spec.left_key.apply(left_row)?;
        self.align(&left_key)?;
        let matched = match &self.group_key {
            Some(key) => {
                compare_key_tuples(key, &left_key, &self.spec.directions)? == Ordering::Equal
            }
            None => false,
        };
        if matched {
            for right_row in &self.group {
                self.pending
                    .push_back(combine_rows(&self.spec.output, left_row, Some(right_row)));
            }
        } else if self.spec.kind == JoinKind::LeftOuter {
            self.pending
                .push_back(combine_rows(&self.spec.output, left_row, None));
        }
        Ok(())
    }
}

impl Iterator for MergeJoinIter<'_> {
    type Item = Result<PackedTuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            let left_row = match self.left.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            if let Err(e) = self.push_matches(&left_row) {
                return Some(Err(e));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recset_tuple::{FieldType, Value, ValueType};

    const UNORDERED: JoinSideCaps = JoinSideCaps {
        ordered_on_keys: false,
        keyed_lookup: false,
    };
    const ORDERED: JoinSideCaps = JoinSideCaps {
        ordered_on_keys: true,
        keyed_lookup: false,
    };
    const SEEKABLE: JoinSideCaps = JoinSideCaps {
        ordered_on_keys: true,
        keyed_lookup: true,
    };

    #[test]
    fn test_explicit_hints() {
        assert_eq!(
            select_join_algorithm(JoinHint::NestedLoop, SEEKABLE, SEEKABLE),
            JoinAlgorithm::NestedLoop
        );
        assert_eq!(
            select_join_algorithm(JoinHint::Hash, UNORDERED, UNORDERED),
            JoinAlgorithm::Hash
        );
        assert_eq!(
            select_join_algorithm(JoinHint::Loop, UNORDERED, SEEKABLE),
            JoinAlgorithm::Loop
        );
        assert_eq!(
            select_join_algorithm(JoinHint::Merge, ORDERED, ORDERED),
            JoinAlgorithm::Merge
        );
    }

    #[test]
    fn test_unusable_hints_fall_back_to_nested_loop() {
        assert_eq!(
            select_join_algorithm(JoinHint::Loop, ORDERED, ORDERED),
            JoinAlgorithm::NestedLoop
        );
        assert_eq!(
            select_join_algorithm(JoinHint::Merge, ORDERED, UNORDERED),
            JoinAlgorithm::NestedLoop
        );
        assert_eq!(
            select_join_algorithm(JoinHint::Merge, UNORDERED, SEEKABLE),
            JoinAlgorithm::NestedLoop
        );
    }

    #[test]
    fn test_auto_prefers_merge_then_loop() {
        assert_eq!(
            select_join_algorithm(JoinHint::Auto, ORDERED, ORDERED),
            JoinAlgorithm::Merge
        );
        assert_eq!(
            select_join_algorithm(JoinHint::Auto, UNORDERED, SEEKABLE),
            JoinAlgorithm::Loop
        );
        assert_eq!(
            select_join_algorithm(JoinHint::Auto, UNORDERED, ORDERED),
            JoinAlgorithm::NestedLoop
        );
        assert_eq!(
            select_join_algorithm(JoinHint::Auto, UNORDERED, UNORDERED),
            JoinAlgorithm::NestedLoop
        );
    }

    #[test]
    fn test_selection_is_deterministic() {
        let hints = [
            JoinHint::Auto,
            JoinHint::NestedLoop,
            JoinHint::Hash,
            JoinHint::Loop,
            JoinHint::Merge,
        ];
        let caps = [UNORDERED, ORDERED, SEEKABLE];
        for hint in hints {
            for left in caps {
                for right in caps {
                    assert_eq!(
                        select_join_algorithm(hint, left, right),
                        select_join_algorithm(hint, left, right)
                    );
                }
            }
        }
    }

    #[test]
    fn test_join_table_groups_by_key_tuple() {
        let descriptor = TupleDescriptor::intern(&[
            FieldType::optional(ValueType::Int32),
            FieldType::scalar(ValueType::Str),
        ]);
        let key = TupleTransform::new(descriptor.clone(), &[0]).unwrap();
        let mut rows = Vec::new();
        for (id, name) in [(Some(1), "a"), (Some(1), "b"), (Some(2), "c"), (None, "n")] {
            let mut row = PackedTuple::new(descriptor.clone());
            row.set(0, id.map(Value::Int32)).unwrap();
            row.set(1, Some(Value::Str(name.into()))).unwrap();
            rows.push(Ok(row));
        }
        let table = JoinTable::build(Box::new(rows.into_iter()), &key).unwrap();
        assert_eq!(table.group_count(), 3);

        let mut probe = PackedTuple::new(key.target().clone());
        probe.set(0, Some(Value::Int32(1))).unwrap();
        assert_eq!(table.probe(&probe).len(), 2);

        // Null keys group together.
        let mut null_probe = PackedTuple::new(key.target().clone());
        null_probe.set(0, None).unwrap();
        assert_eq!(table.probe(&null_probe).len(), 1);
    }
}
