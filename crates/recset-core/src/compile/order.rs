//! Ordering correction.
//!
//! Two rewrites, applied bottom-up. A sort whose input already arrives
//! in the requested order is dropped. The two inputs of an explicitly
//! merge-hinted join are sorted into one shared key order when they do
//! not already agree, which is what lets the later join selection honor
//! the hint; an automatic join never forces a sort and simply picks a
//! different algorithm. Every other node passes through with its
//! corrected children.

use std::sync::Arc;

use crate::error::{Error, Result};
use crate::header::{Direction, SortOrder};
use crate::provider::{JoinHint, Provider, ProviderKind};

use super::reuse_or_rebuild;

pub(super) fn correct(provider: &Arc<Provider>) -> Result<Arc<Provider>> {
    let children: Vec<Arc<Provider>> = provider
        .sources()
        .into_iter()
        .map(correct)
        .collect::<Result<_>>()?;
    match provider.kind() {
        ProviderKind::Sort { order, .. } => {
            let child = single(children)?;
            if child.header().order().satisfies(order) {
                return Ok(child);
            }
            reuse_or_rebuild(provider, vec![child])
        }
        ProviderKind::Join {
            hint: JoinHint::Merge,
            pairs,
            ..
        } => {
            let (left, right) = pair(children)?;
            let left_columns: Vec<usize> = pairs.iter().map(|&(l, _)| l).collect();
            let right_columns: Vec<usize> = pairs.iter().map(|&(_, r)| r).collect();
            let left_profile = left.header().order().direction_profile(&left_columns);
            let right_profile = right.header().order().direction_profile(&right_columns);
            let (left, right) = match (left_profile, right_profile) {
                (Some(a), Some(b)) if a == b => (left, right),
                // One side already ordered: sort the other to match it.
                (Some(a), _) => {
                    let sorted = sort_side(right, &right_columns, &a)?;
                    (left, sorted)
                }
                (_, Some(b)) => {
                    let sorted = sort_side(left, &left_columns, &b)?;
                    (sorted, right)
                }
                (None, None) => {
                    let ascending = vec![Direction::Asc; pairs.len()];
                    (
                        sort_side(left, &left_columns, &ascending)?,
                        sort_side(right, &right_columns, &ascending)?,
                    )
                }
            };
            reuse_or_rebuild(provider, vec![left, right])
        }
        _ => reuse_or_rebuild(provider, children),
    }
}

fn sort_side(
    side: Arc<Provider>,
    columns: &[usize],
    directions: &[Direction],
) -> Result<Arc<Provider>> {
    let keys = columns
        .iter()
        .copied()
        .zip(directions.iter().copied())
        .collect();
    Ok(Arc::new(Provider::sort(side, SortOrder::new(keys))?))
}

fn single(children: Vec<Arc<Provider>>) -> Result<Arc<Provider>> {
    let mut children = children.into_iter();
    children
        .next()
        .ok_or_else(|| Error::InvalidPlan("ordering correction lost a child node".into()))
}

fn pair(children: Vec<Arc<Provider>>) -> Result<(Arc<Provider>, Arc<Provider>)> {
    let mut children = children.into_iter();
    let left = children
        .next()
        .ok_or_else(|| Error::InvalidPlan("ordering correction lost a child node".into()))?;
    let right = children
        .next()
        .ok_or_else(|| Error::InvalidPlan("ordering correction lost a child node".into()))?;
    Ok((left, right))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Column;
    use crate::provider::JoinKind;
    use crate::source::{MemoryIndex, MemorySource};
    use recset_tuple::{FieldType, ValueType};

    fn header() -> crate::header::Header {
        crate::header::Header::new(vec![
            Column::new("id", FieldType::scalar(ValueType::Int32)),
            Column::new("name", FieldType::scalar(ValueType::Str)),
        ])
    }

    fn scan() -> Arc<Provider> {
        let source = MemorySource::new(header(), Vec::new()).unwrap();
        Arc::new(Provider::scan("rows", source.into_source()))
    }

    fn index_scan() -> Arc<Provider> {
        let source = MemoryIndex::new(header(), 0, Vec::new()).unwrap();
        Arc::new(Provider::index_scan("rows_by_id", source.into_source()))
    }

    #[test]
    fn test_redundant_sort_dropped() {
        let plan = Arc::new(Provider::sort(index_scan(), SortOrder::ascending(&[0])).unwrap());
        let corrected = correct(&plan).unwrap();
        assert_eq!(corrected.name(), "IndexScan");
    }

    #[test]
    fn test_needed_sort_stays() {
        let plan = Arc::new(Provider::sort(scan(), SortOrder::ascending(&[0])).unwrap());
        let corrected = correct(&plan).unwrap();
        assert!(Arc::ptr_eq(&corrected, &plan));
    }

    #[test]
    fn test_merge_hint_sorts_both_unordered_sides() {
        let plan = Arc::new(
            Provider::join(scan(), scan(), JoinKind::Inner, JoinHint::Merge, vec![(0, 0)])
                .unwrap(),
        );
        let corrected = correct(&plan).unwrap();
        let sides = corrected.sources();
        assert_eq!(sides[0].name(), "Sort");
        assert_eq!(sides[1].name(), "Sort");
        assert!(sides[0]
            .header()
            .order()
            .satisfies(&SortOrder::ascending(&[0])));
    }

    #[test]
    fn test_merge_hint_matches_existing_side_order() {
        let plan = Arc::new(
            Provider::join(
                index_scan(),
                scan(),
                JoinKind::Inner,
                JoinHint::Merge,
                vec![(0, 0)],
            )
            .unwrap(),
        );
        let corrected = correct(&plan).unwrap();
        let sides = corrected.sources();
        assert_eq!(sides[0].name(), "IndexScan");
        assert_eq!(sides[1].name(), "Sort");
        assert_eq!(
            sides[1].header().order().direction_profile(&[0]),
            Some(vec![Direction::Asc])
        );
    }

    #[test]
    fn test_auto_join_left_alone() {
        let plan = Arc::new(
            Provider::join(scan(), scan(), JoinKind::Inner, JoinHint::Auto, vec![(0, 0)])
                .unwrap(),
        );
        let corrected = correct(&plan).unwrap();
        assert!(Arc::ptr_eq(&corrected, &plan));
    }
}
