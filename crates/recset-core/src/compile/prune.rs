//! Redundant column elimination.
//!
//! A backward dataflow pass. Starting from the full set at the root,
//! each operator passes down the columns it consumes itself plus the
//! ones its parent still needs, then rebuilds over the narrowed child
//! with its own column references remapped. The pass only drops
//! columns proven unused, so the returned node always still produces
//! every requested column; the `kept` vector reports which original
//! columns those are, in their original order.
//!
//! Some operators are barriers. Row identity operators (distinct and
//! the set operations) compare whole rows, so every column counts.
//! Apply subtrees read left columns by index through outer references,
//! which a narrowing would silently re-point. Range restrictions must
//! keep their index leaf intact to stay seekable. Index leaves keep
//! their full width so their seek and lookup capabilities survive;
//! plain scans narrow behind an inserted projection.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::header::{Direction, SortOrder};
use crate::provider::{AggregateColumn, Provider, ProviderKind};

pub(super) fn prune(
    provider: &Arc<Provider>,
    required: &BTreeSet<usize>,
) -> Result<(Arc<Provider>, Vec<usize>)> {
    match provider.kind() {
        ProviderKind::Scan { .. } => {
            let kept: Vec<usize> = required.iter().copied().collect();
            if kept.len() == provider.header().arity() {
                return Ok((provider.clone(), kept));
            }
            let narrowed = Provider::select(provider.clone(), kept.clone())?;
            Ok((Arc::new(narrowed), kept))
        }
        ProviderKind::IndexScan { .. } => Ok((provider.clone(), all_columns(provider))),
        ProviderKind::Filter { source, predicate } => {
            let mut need = required.clone();
            let mut referenced = HashSet::new();
            predicate.collect_columns(&mut referenced);
            need.extend(referenced);
            let (child, kept) = prune(source, &need)?;
            if unchanged(source, &child, &kept) {
                return Ok((provider.clone(), kept));
            }
            let map = position_map(&kept);
            let predicate = predicate.remap_columns(&|column| map.get(&column).copied())?;
            Ok((Arc::new(Provider::filter(child, predicate)?), kept))
        }
        ProviderKind::Select { source, columns } => {
            let kept: Vec<usize> = required.iter().copied().collect();
            let need: BTreeSet<usize> = kept.iter().map(|&index| columns[index]).collect();
            let (child, child_kept) = prune(source, &need)?;
            let map = position_map(&child_kept);
            let picked: Vec<usize> = kept
                .iter()
                .map(|&index| remap(&map, columns[index]))
                .collect::<Result<_>>()?;
            // A projection that forwards its child unchanged is a no-op.
            if picked.len() == child.header().arity()
                && picked.iter().enumerate().all(|(position, &column)| position == column)
            {
                return Ok((child, kept));
            }
            Ok((Arc::new(Provider::select(child, picked)?), kept))
        }
        ProviderKind::Sort { source, order } => {
            let mut need = required.clone();
            need.extend(order.keys().iter().map(|&(column, _)| column));
            let (child, kept) = prune(source, &need)?;
            if unchanged(source, &child, &kept) {
                return Ok((provider.clone(), kept));
            }
            let map = position_map(&kept);
            let keys: Vec<(usize, Direction)> = order
                .keys()
                .iter()
                .map(|&(column, direction)| Ok((remap(&map, column)?, direction)))
                .collect::<Result<_>>()?;
            Ok((
                Arc::new(Provider::sort(child, SortOrder::new(keys))?),
                kept,
            ))
        }
        ProviderKind::Join {
            left,
            right,
            kind,
            hint,
            pairs,
        } => {
            let left_arity = left.header().arity();
            let mut need_left: BTreeSet<usize> = required
                .iter()
                .copied()
                .filter(|&column| column < left_arity)
                .collect();
            let mut need_right: BTreeSet<usize> = required
                .iter()
                .filter(|&&column| column >= left_arity)
                .map(|&column| column - left_arity)
                .collect();
            for &(l, r) in pairs {
                need_left.insert(l);
                need_right.insert(r);
            }
            let (left_node, left_kept) = prune(left, &need_left)?;
            let (right_node, right_kept) = prune(right, &need_right)?;
            let kept: Vec<usize> = left_kept
                .iter()
                .copied()
                .chain(right_kept.iter().map(|&column| column + left_arity))
                .collect();
            if unchanged(left, &left_node, &left_kept) && unchanged(right, &right_node, &right_kept)
            {
                return Ok((provider.clone(), kept));
            }
            let left_map = position_map(&left_kept);
            let right_map = position_map(&right_kept);
            let pairs: Vec<(usize, usize)> = pairs
                .iter()
                .map(|&(l, r)| Ok((remap(&left_map, l)?, remap(&right_map, r)?)))
                .collect::<Result<_>>()?;
            Ok((
                Arc::new(Provider::join(left_node, right_node, *kind, *hint, pairs)?),
                kept,
            ))
        }
        ProviderKind::Aggregate {
            source,
            group_by,
            columns,
        } => {
            let group_arity = group_by.len();
            // Group columns always stay: they define the grouping.
            let mut kept: Vec<usize> = (0..group_arity).collect();
            let mut kept_aggregates: Vec<AggregateColumn> = Vec::new();
            for (index, column) in columns.iter().enumerate() {
                if required.contains(&(group_arity + index)) {
                    kept.push(group_arity + index);
                    kept_aggregates.push(column.clone());
                }
            }
            let mut need: BTreeSet<usize> = group_by.iter().copied().collect();
            need.extend(kept_aggregates.iter().filter_map(|a| a.column));
            let (child, child_kept) = prune(source, &need)?;
            if unchanged(source, &child, &child_kept) && kept_aggregates.len() == columns.len() {
                return Ok((provider.clone(), kept));
            }
            let map = position_map(&child_kept);
            let group_by: Vec<usize> = group_by
                .iter()
                .map(|&column| remap(&map, column))
                .collect::<Result<_>>()?;
            let columns: Vec<AggregateColumn> = kept_aggregates
                .into_iter()
                .map(|aggregate| {
                    Ok(AggregateColumn {
                        column: aggregate
                            .column
                            .map(|column| remap(&map, column))
                            .transpose()?,
                        ..aggregate
                    })
                })
                .collect::<Result<_>>()?;
            Ok((
                Arc::new(Provider::aggregate(child, group_by, columns)?),
                kept,
            ))
        }
        ProviderKind::RowNumber { source, name } => {
            let number = provider.header().arity() - 1;
            if !required.contains(&number) {
                // Nothing reads the appended column, so the node is a
                // no-op and vanishes with it.
                return prune(source, required);
            }
            let need: BTreeSet<usize> = required
                .iter()
                .copied()
                .filter(|&column| column != number)
                .collect();
            let (child, child_kept) = prune(source, &need)?;
            let mut kept = child_kept.clone();
            kept.push(number);
            if unchanged(source, &child, &child_kept) {
                return Ok((provider.clone(), kept));
            }
            Ok((Arc::new(Provider::row_number(child, name.clone())), kept))
        }
        ProviderKind::Distinct { .. }
        | ProviderKind::Concat { .. }
        | ProviderKind::Union { .. }
        | ProviderKind::Intersect { .. }
        | ProviderKind::Except { .. }
        | ProviderKind::Apply { .. }
        | ProviderKind::Range { .. }
        | ProviderKind::RangeSet { .. } => prune_barrier(provider),
    }
}

/// Keep every column of a barrier node, still descending so subtrees
/// below it narrow where they can.
fn prune_barrier(provider: &Arc<Provider>) -> Result<(Arc<Provider>, Vec<usize>)> {
    let children: Vec<Arc<Provider>> = provider
        .sources()
        .into_iter()
        .map(|child| {
            let full: BTreeSet<usize> = (0..child.header().arity()).collect();
            Ok(prune(child, &full)?.0)
        })
        .collect::<Result<_>>()?;
    let node = super::reuse_or_rebuild(provider, children)?;
    Ok((node, all_columns(provider)))
}

fn all_columns(provider: &Provider) -> Vec<usize> {
    (0..provider.header().arity()).collect()
}

fn unchanged(original: &Arc<Provider>, pruned: &Arc<Provider>, kept: &[usize]) -> bool {
    kept.len() == original.header().arity() && Arc::ptr_eq(original, pruned)
}

fn position_map(kept: &[usize]) -> HashMap<usize, usize> {
    kept.iter()
        .enumerate()
        .map(|(position, &column)| (column, position))
        .collect()
}

fn remap(map: &HashMap<usize, usize>, column: usize) -> Result<usize> {
    map.get(&column).copied().ok_or_else(|| {
        Error::InvalidPlan(format!("column {column} pruned while still required"))
    })
}
