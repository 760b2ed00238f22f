//! Logical-to-physical plan compilation.
//!
//! Compilation runs in two strictly ordered phases. The rewrite phase
//! is logical to logical: ordering correction first, then index range
//! optimization, then redundant column elimination. The build phase
//! maps every logical node to its physical counterpart bottom-up, so a
//! node's choices (most visibly the join algorithm) can consult the
//! capabilities its compiled children actually offer. A logical shape
//! with no physical counterpart fails compilation outright; nothing at
//! this level is retried or degraded.

mod order;
mod prune;
mod range_opt;

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use recset_tuple::{FieldType, TupleDescriptor, TupleTransform};

use crate::error::{Error, Result};
use crate::exec::{
    select_join_algorithm, Executable, ExecNode, GroupingSpec, JoinSideCaps, JoinSpec,
};
use crate::header::Header;
use crate::provider::{collect_outer_columns, Provider, ProviderKind};
use crate::source::IndexSource;

/// Compile a logical plan into an executable one.
///
/// The input tree is never mutated; rewrites build fresh nodes and
/// share unchanged subtrees with the original.
#[instrument(skip(provider))]
pub fn compile(provider: &Arc<Provider>) -> Result<Executable> {
    let rewritten = rewrite(provider)?;
    let root = build(&rewritten)?;
    debug!(root = rewritten.name(), "Compiled plan");
    Ok(Executable::new(root))
}

fn rewrite(provider: &Arc<Provider>) -> Result<Arc<Provider>> {
    let corrected = order::correct(provider)?;
    let ranged = range_opt::optimize(&corrected)?;
    let all: BTreeSet<usize> = (0..ranged.header().arity()).collect();
    let (pruned, _) = prune::prune(&ranged, &all)?;
    debug!(plan = ?pruned, "Applied logical rewrites");
    Ok(pruned)
}

fn build(provider: &Arc<Provider>) -> Result<ExecNode> {
    let origin = provider.clone();
    match provider.kind() {
        ProviderKind::Scan { source, .. } => Ok(ExecNode::Scan {
            origin,
            source: source.clone(),
        }),
        ProviderKind::IndexScan { source, .. } => Ok(ExecNode::IndexScan {
            origin,
            source: source.clone(),
        }),
        ProviderKind::Filter { source, predicate } => Ok(ExecNode::Filter {
            origin,
            child: Box::new(build(source)?),
            predicate: predicate.clone(),
        }),
        ProviderKind::Select { source, columns } => {
            let transform = TupleTransform::with_target(
                source.header().descriptor().clone(),
                provider.header().descriptor().clone(),
                columns,
            )?;
            Ok(ExecNode::Select {
                origin,
                child: Box::new(build(source)?),
                transform,
            })
        }
        ProviderKind::Sort { source, .. } => Ok(ExecNode::Sort {
            origin,
            child: Box::new(build(source)?),
            correlated: is_correlated(source),
        }),
        ProviderKind::Distinct { source } => Ok(ExecNode::Distinct {
            origin,
            child: Box::new(build(source)?),
        }),
        ProviderKind::Concat { left, right } => {
            let output = provider.header().descriptor();
            Ok(ExecNode::Concat {
                origin,
                left_transform: side_transform(left.header(), output)?,
                right_transform: side_transform(right.header(), output)?,
                left: Box::new(build(left)?),
                right: Box::new(build(right)?),
            })
        }
        ProviderKind::Union { left, right } => {
            let output = provider.header().descriptor();
            Ok(ExecNode::Union {
                origin,
                left_transform: side_transform(left.header(), output)?,
                right_transform: side_transform(right.header(), output)?,
                left: Box::new(build(left)?),
                right: Box::new(build(right)?),
            })
        }
        ProviderKind::Intersect { left, right } => {
            let output = provider.header().descriptor();
            Ok(ExecNode::Intersect {
                origin,
                left_transform: side_transform(left.header(), output)?,
                right_transform: side_transform(right.header(), output)?,
                right_correlated: is_correlated(right),
                left: Box::new(build(left)?),
                right: Box::new(build(right)?),
            })
        }
        ProviderKind::Except { left, right } => {
            let output = provider.header().descriptor();
            Ok(ExecNode::Except {
                origin,
                left_transform: side_transform(left.header(), output)?,
                right_transform: side_transform(right.header(), output)?,
                right_correlated: is_correlated(right),
                left: Box::new(build(left)?),
                right: Box::new(build(right)?),
            })
        }
        ProviderKind::Join {
            left,
            right,
            kind,
            hint,
            pairs,
        } => {
            let left_node = build(left)?;
            let right_node = build(right)?;
            let left_columns: Vec<usize> = pairs.iter().map(|&(l, _)| l).collect();
            let right_columns: Vec<usize> = pairs.iter().map(|&(_, r)| r).collect();
            // Merge needs both sides ordered on the keys with one
            // shared direction profile.
            let directions = if pairs.is_empty() {
                Vec::new()
            } else {
                let left_profile = left_node.output_order().direction_profile(&left_columns);
                let right_profile = right_node.output_order().direction_profile(&right_columns);
                match (left_profile, right_profile) {
                    (Some(a), Some(b)) if a == b => a,
                    _ => Vec::new(),
                }
            };
            let ordered = !directions.is_empty();
            let algorithm = select_join_algorithm(
                *hint,
                JoinSideCaps {
                    ordered_on_keys: ordered,
                    keyed_lookup: side_lookup(&left_node, &left_columns),
                },
                JoinSideCaps {
                    ordered_on_keys: ordered,
                    keyed_lookup: side_lookup(&right_node, &right_columns),
                },
            );
            debug!(algorithm = ?algorithm, hint = ?hint, pairs = pairs.len(), "Selected join algorithm");
            let key_target = join_key_target(left.header(), &left_columns);
            let spec = JoinSpec {
                kind: *kind,
                pairs: pairs.clone(),
                left_key: TupleTransform::with_target(
                    left.header().descriptor().clone(),
                    key_target.clone(),
                    &left_columns,
                )?,
                right_key: TupleTransform::with_target(
                    right.header().descriptor().clone(),
                    key_target,
                    &right_columns,
                )?,
                output: provider.header().descriptor().clone(),
                directions,
            };
            Ok(ExecNode::Join {
                origin,
                left: Box::new(left_node),
                right: Box::new(right_node),
                spec,
                algorithm,
                right_correlated: is_correlated(right),
            })
        }
        ProviderKind::Apply { left, right, kind } => Ok(ExecNode::Apply {
            origin,
            left: Box::new(build(left)?),
            right: Box::new(build(right)?),
            kind: *kind,
        }),
        ProviderKind::Aggregate {
            source,
            group_by,
            columns,
        } => {
            let spec = GroupingSpec {
                group_key: TupleTransform::new(source.header().descriptor().clone(), group_by)?,
                columns: columns.clone(),
                output: provider.header().descriptor().clone(),
            };
            Ok(ExecNode::Aggregate {
                origin,
                child: Box::new(build(source)?),
                spec,
                correlated: is_correlated(source),
            })
        }
        ProviderKind::RowNumber { source, .. } => Ok(ExecNode::RowNumber {
            origin,
            child: Box::new(build(source)?),
        }),
        ProviderKind::Range { source, range } => Ok(ExecNode::RangeSeek {
            origin,
            source: seek_source(source)?,
            ranges: range.as_set_expr(),
        }),
        ProviderKind::RangeSet { source, ranges } => Ok(ExecNode::RangeSeek {
            origin,
            source: seek_source(source)?,
            ranges: ranges.clone(),
        }),
    }
}

/// True when the subtree reads columns of an enclosing apply's left
/// rows, which makes its output depend on the current outer row and
/// disqualifies it from per-enumeration memoization.
fn is_correlated(provider: &Arc<Provider>) -> bool {
    let mut outer = HashSet::new();
    collect_outer_columns(provider, &mut outer);
    !outer.is_empty()
}

/// A range restriction compiles to a seek only directly over an index
/// leaf; any other child shape has no seek counterpart.
fn seek_source(source: &Arc<Provider>) -> Result<Arc<dyn IndexSource>> {
    match source.kind() {
        ProviderKind::IndexScan { source, .. } => Ok(source.clone()),
        _ => Err(Error::UnsupportedProvider(format!(
            "range restriction over {} node",
            source.name()
        ))),
    }
}

/// Single-key ordered lookup capability over the join keys.
fn side_lookup(node: &ExecNode, key_columns: &[usize]) -> bool {
    key_columns.len() == 1
        && node
            .keyed_lookup()
            .is_some_and(|(_, key_column)| key_column == key_columns[0])
}

/// Identity projection into a set operation's output shape, or `None`
/// when the side already produces rows in that shape. Needed because
/// nullability widens to cover both sides.
fn side_transform(
    side: &Header,
    output: &TupleDescriptor,
) -> Result<Option<TupleTransform>> {
    if side.descriptor() == output {
        return Ok(None);
    }
    let identity: Vec<usize> = (0..side.arity()).collect();
    Ok(Some(TupleTransform::with_target(
        side.descriptor().clone(),
        output.clone(),
        &identity,
    )?))
}

/// Shared key tuple shape for one join: every key field widened to
/// optional so both sides' key tuples compare and hash as equals.
fn join_key_target(header: &Header, columns: &[usize]) -> TupleDescriptor {
    let fields: Vec<FieldType> = columns
        .iter()
        .map(|&column| FieldType::optional(header.columns()[column].field_type.value_type()))
        .collect();
    TupleDescriptor::intern(&fields)
}

/// Rebuild a node over replacement children, revalidating through the
/// public constructors. Serves rewrite passes that keep the node's own
/// parameters untouched.
fn rebuild(provider: &Provider, children: Vec<Arc<Provider>>) -> Result<Provider> {
    let mut children = children.into_iter();
    let mut next = || {
        children
            .next()
            .ok_or_else(|| Error::InvalidPlan("rewrite lost a child node".into()))
    };
    match provider.kind() {
        ProviderKind::Scan { name, source } => Ok(Provider::scan(name.clone(), source.clone())),
        ProviderKind::IndexScan { name, source } => {
            Ok(Provider::index_scan(name.clone(), source.clone()))
        }
        ProviderKind::Filter { predicate, .. } => Provider::filter(next()?, predicate.clone()),
        ProviderKind::Select { columns, .. } => Provider::select(next()?, columns.clone()),
        ProviderKind::Sort { order, .. } => Provider::sort(next()?, order.clone()),
        ProviderKind::Distinct { .. } => Ok(Provider::distinct(next()?)),
        ProviderKind::Concat { .. } => Provider::concat(next()?, next()?),
        ProviderKind::Union { .. } => Provider::union(next()?, next()?),
        ProviderKind::Intersect { .. } => Provider::intersect(next()?, next()?),
        ProviderKind::Except { .. } => Provider::except(next()?, next()?),
        ProviderKind::Join {
            kind, hint, pairs, ..
        } => Provider::join(next()?, next()?, *kind, *hint, pairs.clone()),
        ProviderKind::Apply { kind, .. } => Provider::apply(next()?, next()?, *kind),
        ProviderKind::Aggregate {
            group_by, columns, ..
        } => Provider::aggregate(next()?, group_by.clone(), columns.clone()),
        ProviderKind::RowNumber { name, .. } => Ok(Provider::row_number(next()?, name.clone())),
        ProviderKind::Range { range, .. } => Provider::range(next()?, range.clone()),
        ProviderKind::RangeSet { ranges, .. } => Provider::range_set(next()?, ranges.clone()),
    }
}

/// Share the original node when no child changed, otherwise rebuild it
/// over the new children. Keeping the original `Arc` preserves subtree
/// sharing, and with it the memoization identity of unchanged nodes.
fn reuse_or_rebuild(
    provider: &Arc<Provider>,
    children: Vec<Arc<Provider>>,
) -> Result<Arc<Provider>> {
    let originals = provider.sources();
    let unchanged = originals.len() == children.len()
        && originals
            .iter()
            .zip(&children)
            .all(|(old, new)| Arc::ptr_eq(old, new));
    if unchanged {
        Ok(provider.clone())
    } else {
        Ok(Arc::new(rebuild(provider, children)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::{EnumerationContext, JoinAlgorithm};
    use crate::expr::Expr;
    use crate::header::{Column, SortOrder};
    use crate::provider::{JoinHint, JoinKind};
    use crate::range::{Bound, EntireBound, RangeExpr};
    use crate::source::{MemoryIndex, MemorySource};
    use recset_tuple::{FieldType, PackedTuple, Tuple, Value, ValueType};

    fn people_header() -> Header {
        Header::new(vec![
            Column::new("id", FieldType::scalar(ValueType::Int32)),
            Column::new("name", FieldType::scalar(ValueType::Str)),
        ])
    }

    fn person(id: i32, name: &str) -> PackedTuple {
        let mut row = PackedTuple::new(people_header().descriptor().clone());
        row.set(0, Some(Value::Int32(id))).unwrap();
        row.set(1, Some(Value::Str(name.into()))).unwrap();
        row
    }

    fn people_index(rows: Vec<PackedTuple>) -> Arc<Provider> {
        let index = MemoryIndex::new(people_header(), 0, rows).unwrap();
        Arc::new(Provider::index_scan("people_by_id", index.into_source()))
    }

    fn ids(executable: &Executable, ctx: &EnumerationContext) -> Vec<i32> {
        executable
            .enumerate(ctx)
            .unwrap()
            .map(|item| match item.unwrap().get(0).unwrap() {
                Some(Value::Int32(id)) => id,
                other => panic!("unexpected {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_filter_over_index_compiles_to_range_seek() {
        let rows = vec![person(1, "a"), person(2, "b"), person(5, "c"), person(9, "d")];
        let plan = Arc::new(
            Provider::filter(
                Provider::index_scan(
                    "people_by_id",
                    MemoryIndex::new(people_header(), 0, rows).unwrap().into_source(),
                ),
                Expr::gt(Expr::column(0), Expr::literal(Value::Int32(2))),
            )
            .unwrap(),
        );
        let executable = compile(&plan).unwrap();
        assert!(matches!(
            executable.root(),
            ExecNode::Filter { child, .. } if matches!(**child, ExecNode::RangeSeek { .. })
        ));
        let ctx = EnumerationContext::new();
        assert_eq!(ids(&executable, &ctx), vec![5, 9]);
    }

    #[test]
    fn test_range_over_non_index_is_unsupported() {
        let scan = Arc::new(Provider::scan(
            "people",
            MemorySource::new(people_header(), vec![person(1, "a")])
                .unwrap()
                .into_source(),
        ));
        let sorted = Provider::sort(scan, SortOrder::ascending(&[0])).unwrap();
        let range = RangeExpr::new(
            EntireBound::Exact(Bound::Literal(Value::Int32(1))),
            EntireBound::PositiveInfinity,
        );
        let plan = Arc::new(Provider::range(sorted, range).unwrap());
        assert!(matches!(
            compile(&plan),
            Err(Error::UnsupportedProvider(_))
        ));
    }

    #[test]
    fn test_auto_join_over_indexes_picks_merge() {
        let left = people_index(vec![person(1, "a"), person(2, "b")]);
        let right = people_index(vec![person(2, "x"), person(3, "y")]);
        let plan = Arc::new(
            Provider::join(left, right, JoinKind::Inner, JoinHint::Auto, vec![(0, 0)]).unwrap(),
        );
        let executable = compile(&plan).unwrap();
        assert!(matches!(
            executable.root(),
            ExecNode::Join {
                algorithm: JoinAlgorithm::Merge,
                ..
            }
        ));
        let ctx = EnumerationContext::new();
        assert_eq!(ids(&executable, &ctx), vec![2]);
    }

    #[test]
    fn test_parameterized_range_seek_reuses_compiled_plan() {
        let rows = vec![person(1, "a"), person(3, "b"), person(7, "c")];
        let plan = Arc::new(
            Provider::filter(
                Provider::index_scan(
                    "people_by_id",
                    MemoryIndex::new(people_header(), 0, rows).unwrap().into_source(),
                ),
                Expr::compare(
                    crate::expr::CompareOp::Ge,
                    Expr::column(0),
                    Expr::parameter(0),
                ),
            )
            .unwrap(),
        );
        let executable = compile(&plan).unwrap();
        let low = EnumerationContext::with_params(vec![Value::Int32(0)]);
        assert_eq!(ids(&executable, &low), vec![1, 3, 7]);
        let high = EnumerationContext::with_params(vec![Value::Int32(3)]);
        assert_eq!(ids(&executable, &high), vec![3, 7]);
    }
}
