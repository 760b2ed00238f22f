//! Index range optimization.
//!
//! Rewrites a filter sitting directly over an index scan into the same
//! filter over a range seek, when the predicate pins the index's key
//! column to a workable set of key ranges. Extraction never fails: a
//! predicate shape it does not recognize degrades to the full range,
//! which simply leaves the scan unrestricted.

use std::sync::Arc;

use tracing::debug;

use crate::error::Result;
use crate::expr::{CompareOp, Expr};
use crate::provider::{Provider, ProviderKind};
use crate::range::{Bound, RangeSetExpr};

use super::reuse_or_rebuild;

/// Widest symbolic range tree worth carrying; anything bigger scans.
const MAX_RANGE_LEAVES: usize = 32;

pub(super) fn optimize(provider: &Arc<Provider>) -> Result<Arc<Provider>> {
    let children: Vec<Arc<Provider>> = provider
        .sources()
        .into_iter()
        .map(optimize)
        .collect::<Result<_>>()?;
    if let ProviderKind::Filter { predicate, .. } = provider.kind() {
        if let Some(child) = children.first() {
            if let ProviderKind::IndexScan { source, .. } = child.kind() {
                let ranges = extract(predicate, source.key_column());
                if worth_seeking(&ranges) {
                    debug!(leaves = ranges.leaf_count(), "Restricted index scan to key ranges");
                    let seek = Arc::new(Provider::range_set(child.clone(), ranges)?);
                    // The predicate stays above the seek: the ranges
                    // overapproximate it, and a range reaching negative
                    // infinity admits null keys the comparison itself
                    // rejects.
                    return Ok(Arc::new(Provider::filter(seek, predicate.clone())?));
                }
            }
        }
    }
    reuse_or_rebuild(provider, children)
}

fn worth_seeking(ranges: &RangeSetExpr) -> bool {
    !matches!(ranges, RangeSetExpr::Full) && ranges.leaf_count() <= MAX_RANGE_LEAVES
}

/// Derive the key ranges a predicate confines the key column to.
/// Conjunctions intersect, disjunctions union, and anything else
/// degrades to the full range, never an error. The result always
/// covers at least the rows the predicate accepts.
pub(super) fn extract(predicate: &Expr, key: usize) -> RangeSetExpr {
    match predicate {
        Expr::And(left, right) => {
            RangeSetExpr::intersect(vec![extract(left, key), extract(right, key)])
        }
        Expr::Or(left, right) => {
            RangeSetExpr::union(vec![extract(left, key), extract(right, key)])
        }
        Expr::Compare { op, left, right } => {
            comparison(*op, left, right, key).unwrap_or(RangeSetExpr::Full)
        }
        _ => RangeSetExpr::Full,
    }
}

/// Recognize `key <op> operand` and its commuted form. The key side
/// must be the bare column; any further operation on it falls back.
fn comparison(op: CompareOp, left: &Expr, right: &Expr, key: usize) -> Option<RangeSetExpr> {
    match (left, right) {
        (Expr::Column(column), operand) if *column == key => {
            bound(operand).map(|operand| RangeSetExpr::Compare { op, operand })
        }
        (operand, Expr::Column(column)) if *column == key => bound(operand).map(|operand| {
            RangeSetExpr::Compare {
                op: op.commute(),
                operand,
            }
        }),
        _ => None,
    }
}

fn bound(operand: &Expr) -> Option<Bound> {
    match operand {
        Expr::Literal(value) => Some(Bound::Literal(value.clone())),
        Expr::Parameter(index) => Some(Bound::Parameter(*index)),
        _ => None,
    }
}
