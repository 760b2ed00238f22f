//! Physical plan nodes and their pull-based enumeration.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::sync::Arc;

use recset_tuple::{FieldState, PackedTuple, Tuple, TupleDescriptor, TupleTransform, Value};

use crate::error::{Error, Result};
use crate::exec::{aggregate, join, EnumerationContext, GroupingSpec, JoinAlgorithm, JoinSpec};
use crate::expr::{compare_keys, Expr};
use crate::header::{Direction, Header, SortOrder};
use crate::provider::{JoinKind, Provider};
use crate::range::RangeSetExpr;
use crate::source::{IndexSource, TupleIter, TupleSource};

/// One physical operator. Every node keeps the logical node it was
/// compiled from; the logical header doubles as the physical output
/// contract, ordering included.
pub(crate) enum ExecNode {
    Scan {
        origin: Arc<Provider>,
        source: Arc<dyn TupleSource>,
    },
    IndexScan {
        origin: Arc<Provider>,
        source: Arc<dyn IndexSource>,
    },
    /// Ordered seek: evaluates its symbolic ranges against the
    /// enumeration parameters, then scans only the matching spans.
    RangeSeek {
        origin: Arc<Provider>,
        source: Arc<dyn IndexSource>,
        ranges: RangeSetExpr,
    },
    Filter {
        origin: Arc<Provider>,
        child: Box<ExecNode>,
        predicate: Expr,
    },
    Select {
        origin: Arc<Provider>,
        child: Box<ExecNode>,
        transform: TupleTransform,
    },
    Sort {
        origin: Arc<Provider>,
        child: Box<ExecNode>,
        correlated: bool,
    },
    Distinct {
        origin: Arc<Provider>,
        child: Box<ExecNode>,
    },
    Concat {
        origin: Arc<Provider>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
        left_transform: Option<TupleTransform>,
        right_transform: Option<TupleTransform>,
    },
    Union {
        origin: Arc<Provider>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
        left_transform: Option<TupleTransform>,
        right_transform: Option<TupleTransform>,
    },
    Intersect {
        origin: Arc<Provider>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
        left_transform: Option<TupleTransform>,
        right_transform: Option<TupleTransform>,
        right_correlated: bool,
    },
    Except {
        origin: Arc<Provider>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
        left_transform: Option<TupleTransform>,
        right_transform: Option<TupleTransform>,
        right_correlated: bool,
    },
    Join {
        origin: Arc<Provider>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
        spec: JoinSpec,
        algorithm: JoinAlgorithm,
        right_correlated: bool,
    },
    Apply {
        origin: Arc<Provider>,
        left: Box<ExecNode>,
        right: Box<ExecNode>,
        kind: JoinKind,
    },
    Aggregate {
        origin: Arc<Provider>,
        child: Box<ExecNode>,
        spec: GroupingSpec,
        correlated: bool,
    },
    RowNumber {
        origin: Arc<Provider>,
        child: Box<ExecNode>,
    },
}

impl ExecNode {
    pub(crate) fn origin(&self) -> &Arc<Provider> {
        match self {
            ExecNode::Scan { origin, .. }
            | ExecNode::IndexScan { origin, .. }
            | ExecNode::RangeSeek { origin, .. }
            | ExecNode::Filter { origin, .. }
            | ExecNode::Select { origin, .. }
            | ExecNode::Sort { origin, .. }
            | ExecNode::Distinct { origin, .. }
            | ExecNode::Concat { origin, .. }
            | ExecNode::Union { origin, .. }
            | ExecNode::Intersect { origin, .. }
            | ExecNode::Except { origin, .. }
            | ExecNode::Join { origin, .. }
            | ExecNode::Apply { origin, .. }
            | ExecNode::Aggregate { origin, .. }
            | ExecNode::RowNumber { origin, .. } => origin,
        }
    }

    pub(crate) fn header(&self) -> &Header {
        self.origin().header()
    }

    pub(crate) fn children(&self) -> Vec<&ExecNode> {
        match self {
            ExecNode::Scan { .. } | ExecNode::IndexScan { .. } | ExecNode::RangeSeek { .. } => {
                Vec::new()
            }
            ExecNode::Filter { child, .. }
            | ExecNode::Select { child, .. }
            | ExecNode::Sort { child, .. }
            | ExecNode::Distinct { child, .. }
            | ExecNode::Aggregate { child, .. }
            | ExecNode::RowNumber { child, .. } => vec![child],
            ExecNode::Concat { left, right, .. }
            | ExecNode::Union { left, right, .. }
            | ExecNode::Intersect { left, right, .. }
            | ExecNode::Except { left, right, .. }
            | ExecNode::Join { left, right, .. }
            | ExecNode::Apply { left, right, .. } => vec![left, right],
        }
    }

    /// Ordered-enumeration capability: the order this node's output is
    /// guaranteed to arrive in.
    pub(crate) fn output_order(&self) -> &SortOrder {
        self.header().order()
    }

    /// Keyed-lookup capability: an ordered seek by one key column.
    /// Absence means the caller falls back to a generic strategy.
    pub(crate) fn keyed_lookup(&self) -> Option<(&Arc<dyn IndexSource>, usize)> {
        match self {
            ExecNode::IndexScan { source, .. } => Some((source, source.key_column())),
            _ => None,
        }
    }

    pub(crate) fn enumerate<'a>(
        &'a self,
        ctx: &'a EnumerationContext,
    ) -> Result<TupleIter<'a>> {
        match self {
            ExecNode::Scan { source, .. } => source.scan(),
            ExecNode::IndexScan { source, .. } => source.scan(),
            ExecNode::RangeSeek { source, ranges, .. } => {
                let set = ranges.evaluate(ctx.params())?;
                source.scan_ranges(&set)
            }
            ExecNode::Filter {
                child, predicate, ..
            } => {
                let rows = child.enumerate(ctx)?;
                Ok(Box::new(rows.filter_map(move |item| match item {
                    Ok(row) => match predicate.matches(&row, ctx) {
                        Ok(true) => Some(Ok(row)),
                        Ok(false) => None,
                        Err(e) => Some(Err(e)),
                    },
                    Err(e) => Some(Err(e)),
                })))
            }
            ExecNode::Select {
                child, transform, ..
            } => {
                let rows = child.enumerate(ctx)?;
                Ok(Box::new(rows.map(move |item| {
                    item.and_then(|row| transform.apply(&row).map_err(Error::from))
                })))
            }
            ExecNode::Sort {
                origin,
                child,
                correlated,
            } => {
                let key = memo_key(origin);
                if !correlated {
                    if let Some(rows) = ctx.cached_rows(key) {
                        return Ok(iter_rows(rows));
                    }
                }
                let mut rows: Vec<PackedTuple> =
                    child.enumerate(ctx)?.collect::<Result<_>>()?;
                sort_rows(&mut rows, origin.header().order());
                let rows: Arc<[PackedTuple]> = rows.into();
                if !correlated {
                    ctx.store_rows(key, rows.clone());
                }
                Ok(iter_rows(rows))
            }
            ExecNode::Distinct { child, .. } => {
                let rows = child.enumerate(ctx)?;
                Ok(distinct(rows))
            }
            ExecNode::Concat {
                left,
                right,
                left_transform,
                right_transform,
                ..
            } => {
                let left = transformed(left.enumerate(ctx)?, left_transform.as_ref());
                let right = transformed(right.enumerate(ctx)?, right_transform.as_ref());
                Ok(Box::new(left.chain(right)))
            }
            ExecNode::Union {
                left,
                right,
                left_transform,
                right_transform,
                ..
            } => {
                let left = transformed(left.enumerate(ctx)?, left_transform.as_ref());
                let right = transformed(right.enumerate(ctx)?, right_transform.as_ref());
                Ok(distinct(Box::new(left.chain(right))))
            }
            ExecNode::Intersect {
                left,
                right,
                left_transform,
                right_transform,
                right_correlated,
                ..
            } => {
                let set = membership_set(right, right_transform.as_ref(), *right_correlated, ctx)?;
                let left = transformed(left.enumerate(ctx)?, left_transform.as_ref());
                Ok(set_filter(left, set, true))
            }
            ExecNode::Except {
                left,
                right,
                left_transform,
                right_transform,
                right_correlated,
                ..
            } => {
                let set = membership_set(right, right_transform.as_ref(), *right_correlated, ctx)?;
                let left = transformed(left.enumerate(ctx)?, left_transform.as_ref());
                Ok(set_filter(left, set, false))
            }
            ExecNode::Join {
                origin,
                left,
                right,
                spec,
                algorithm,
                right_correlated,
            } => join::enumerate_join(
                origin,
                left,
                right,
                spec,
                *algorithm,
                *right_correlated,
                ctx,
            ),
            ExecNode::Apply {
                origin,
                left,
                right,
                kind,
            } => {
                let left_iter = left.enumerate(ctx)?;
                Ok(Box::new(ApplyIter {
                    left: left_iter,
                    right_node: right,
                    ctx,
                    kind: *kind,
                    descriptor: origin.header().descriptor().clone(),
                    state: None,
                }))
            }
            ExecNode::Aggregate {
                origin,
                child,
                spec,
                correlated,
            } => aggregate::enumerate_aggregate(origin, child, spec, *correlated, ctx),
            ExecNode::RowNumber { origin, child, .. } => {
                let rows = child.enumerate(ctx)?;
                let descriptor = origin.header().descriptor().clone();
                let number_index = origin.header().arity() - 1;
                let mut counter: i64 = 0;
                Ok(Box::new(rows.map(move |item| {
                    item.and_then(|row| {
                        counter += 1;
                        let mut out = PackedTuple::new(descriptor.clone());
                        copy_fields(&mut out, 0, &row)?;
                        out.set(number_index, Some(Value::Int64(counter)))?;
                        Ok(out)
                    })
                })))
            }
        }
    }
}

/// A compiled physical plan, reusable across enumerations.
pub struct Executable {
    root: ExecNode,
}

impl Executable {
    pub(crate) fn new(root: ExecNode) -> Executable {
        Executable { root }
    }

    pub(crate) fn root(&self) -> &ExecNode {
        &self.root
    }

    /// Output shape of the plan.
    pub fn header(&self) -> &Header {
        self.root.header()
    }

    /// Ordered-enumeration capability: the order the output is
    /// guaranteed to arrive in. Empty means unordered.
    pub fn output_order(&self) -> &SortOrder {
        self.root.output_order()
    }

    /// Keyed-lookup capability: an ordered seek by one key column,
    /// present when the whole plan is a bare index leaf. Callers treat
    /// absence as "use a generic strategy", never as an error.
    pub fn keyed_lookup(&self) -> Option<(&Arc<dyn IndexSource>, usize)> {
        self.root.keyed_lookup()
    }

    /// Pull-based enumeration. The context carries the parameter
    /// bindings and all per-enumeration state; it must not be shared
    /// with a concurrently running enumeration.
    pub fn enumerate<'a>(&'a self, ctx: &'a EnumerationContext) -> Result<TupleIter<'a>> {
        self.root.enumerate(ctx)
    }
}

/// Memoization key: the identity of the logical node.
pub(crate) fn memo_key(origin: &Arc<Provider>) -> usize {
    Arc::as_ptr(origin) as usize
}

/// Fully enumerate a node into a shared buffer, memoized in the context
/// unless the subtree is correlated with an outer row.
pub(crate) fn materialize(
    node: &ExecNode,
    correlated: bool,
    ctx: &EnumerationContext,
) -> Result<Arc<[PackedTuple]>> {
    let key = memo_key(node.origin());
    if !correlated {
        if let Some(rows) = ctx.cached_rows(key) {
            return Ok(rows);
        }
    }
    let rows: Vec<PackedTuple> = node.enumerate(ctx)?.collect::<Result<_>>()?;
    let rows: Arc<[PackedTuple]> = rows.into();
    if !correlated {
        ctx.store_rows(key, rows.clone());
    }
    Ok(rows)
}

/// Iterate a shared buffer by cloning rows out of it.
pub(crate) fn iter_rows<'a>(rows: Arc<[PackedTuple]>) -> TupleIter<'a> {
    Box::new((0..rows.len()).map(move |i| Ok(rows[i].clone())))
}

fn transformed<'a>(rows: TupleIter<'a>, transform: Option<&'a TupleTransform>) -> TupleIter<'a> {
    match transform {
        None => rows,
        Some(transform) => Box::new(rows.map(move |item| {
            item.and_then(|row| transform.apply(&row).map_err(Error::from))
        })),
    }
}

/// Keep the first occurrence of each distinct row.
fn distinct(rows: TupleIter<'_>) -> TupleIter<'_> {
    let mut seen = HashSet::new();
    Box::new(rows.filter_map(move |item| match item {
        Ok(row) => seen.insert(row.clone()).then_some(Ok(row)),
        Err(e) => Some(Err(e)),
    }))
}

fn membership_set(
    right: &ExecNode,
    transform: Option<&TupleTransform>,
    correlated: bool,
    ctx: &EnumerationContext,
) -> Result<HashSet<PackedTuple>> {
    let rows = materialize(right, correlated, ctx)?;
    let mut set = HashSet::with_capacity(rows.len());
    for row in rows.iter() {
        match transform {
            None => set.insert(row.clone()),
            Some(t) => set.insert(t.apply(row)?),
        };
    }
    Ok(set)
}

/// Distinct left rows filtered by membership in the right-side set.
fn set_filter(
    rows: TupleIter<'_>,
    set: HashSet<PackedTuple>,
    keep_members: bool,
) -> TupleIter<'_> {
    let mut seen = HashSet::new();
    Box::new(rows.filter_map(move |item| match item {
        Ok(row) => {
            if set.contains(&row) != keep_members {
                return None;
            }
            seen.insert(row.clone()).then_some(Ok(row))
        }
        Err(e) => Some(Err(e)),
    }))
}

/// Copy every field of `src` into `dst` starting at `offset`,
/// preserving the field states.
pub(crate) fn copy_fields(dst: &mut PackedTuple, offset: usize, src: &PackedTuple) -> Result<()> {
    for index in 0..src.arity() {
        match src.state(index)? {
            FieldState::Available => dst.set(offset + index, src.get(index)?)?,
            FieldState::Null => dst.set_state(offset + index, FieldState::Null)?,
            FieldState::Unavailable => {}
        }
    }
    Ok(())
}

/// Build a combined row: left fields first, then the right side's, or a
/// blank (all unassigned) right side when no row matched.
pub(crate) fn combine_rows(
    descriptor: &TupleDescriptor,
    left: &PackedTuple,
    right: Option<&PackedTuple>,
) -> Result<PackedTuple> {
    let mut out = PackedTuple::new(descriptor.clone());
    copy_fields(&mut out, 0, left)?;
    if let Some(right) = right {
        copy_fields(&mut out, left.arity(), right)?;
    }
    Ok(out)
}

/// Stable sort by the order's keys; null fields sort first within an
/// ascending key.
pub(crate) fn sort_rows(rows: &mut [PackedTuple], order: &SortOrder) {
    rows.sort_by(|a, b| compare_rows(a, b, order.keys()));
}

pub(crate) fn compare_rows(
    a: &PackedTuple,
    b: &PackedTuple,
    keys: &[(usize, Direction)],
) -> Ordering {
    for &(column, direction) in keys {
        // Columns are validated when the order is constructed.
        let av = a.get(column).ok().flatten();
        let bv = b.get(column).ok().flatten();
        let ordering = match direction {
            Direction::Asc => compare_keys(av.as_ref(), bv.as_ref()),
            Direction::Desc => compare_keys(bv.as_ref(), av.as_ref()),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

struct ApplyIter<'a> {
    left: TupleIter<'a>,
    right_node: &'a ExecNode,
    ctx: &'a EnumerationContext,
    kind: JoinKind,
    descriptor: TupleDescriptor,
    state: Option<ApplyState<'a>>,
}

struct ApplyState<'a> {
    left_row: PackedTuple,
    right: TupleIter<'a>,
    matched: bool,
}

impl Iterator for ApplyIter<'_> {
    type Item = Result<PackedTuple>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(state) = &mut self.state {
                match state.right.next() {
                    Some(Ok(right_row)) => {
                        state.matched = true;
                        return Some(combine_rows(
                            &self.descriptor,
                            &state.left_row,
                            Some(&right_row),
                        ));
                    }
                    Some(Err(e)) => return Some(Err(e)),
                    None => {
                        self.ctx.pop_outer();
                        let state = self.state.take();
                        if let Some(state) = state {
                            if self.kind == JoinKind::LeftOuter && !state.matched {
                                return Some(combine_rows(
                                    &self.descriptor,
                                    &state.left_row,
                                    None,
                                ));
                            }
                        }
                    }
                }
                continue;
            }
            match self.left.next() {
                Some(Ok(left_row)) => {
                    self.ctx.push_outer(left_row.clone());
                    match self.right_node.enumerate(self.ctx) {
                        Ok(right) => {
                            self.state = Some(ApplyState {
                                left_row,
                                right,
                                matched: false,
                            });
                        }
                        Err(e) => {
                            self.ctx.pop_outer();
                            return Some(Err(e));
                        }
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => return None,
            }
        }
    }
}

impl Drop for ApplyIter<'_> {
    fn drop(&mut self) {
        // Keep the outer stack balanced when the caller stops early.
        if self.state.take().is_some() {
            self.ctx.pop_outer();
        }
    }
}
