//! Grouped and global aggregation.
//!
//! Grouping projects each input row to a key tuple and folds the
//! aggregate functions per group. A global aggregate is the arity-zero
//! key: every row lands in one group, and an empty input still yields
//! that single group's row. Groups are emitted in first-seen order, so
//! output is deterministic for a given input order.

use std::collections::HashMap;
use std::sync::Arc;

use recset_tuple::{PackedTuple, Tuple, TupleDescriptor, TupleTransform, Value};

use crate::error::{Error, Result};
use crate::exec::node::{copy_fields, iter_rows, memo_key, ExecNode};
use crate::exec::EnumerationContext;
use crate::expr::compare_keys;
use crate::provider::{AggregateColumn, AggregateFn, Provider};
use crate::source::TupleIter;

/// Grouping layout fixed at compile time.
pub(crate) struct GroupingSpec {
    /// Projects an input row to its group key. Arity zero for a global
    /// aggregate.
    pub group_key: TupleTransform,
    pub columns: Vec<AggregateColumn>,
    /// Output shape: group columns first, then one column per
    /// aggregate.
    pub output: TupleDescriptor,
}

pub(crate) fn enumerate_aggregate<'a>(
    origin: &'a Arc<Provider>,
    child: &'a ExecNode,
    spec: &'a GroupingSpec,
    correlated: bool,
    ctx: &'a EnumerationContext,
) -> Result<TupleIter<'a>> {
    if correlated {
        let rows: Arc<[PackedTuple]> = compute_groups(child, spec, ctx)?.into();
        return Ok(iter_rows(rows));
    }
    let key = memo_key(origin);
    if let Some(rows) = ctx.cached_rows(key) {
        return Ok(iter_rows(rows));
    }
    let rows: Arc<[PackedTuple]> = compute_groups(child, spec, ctx)?.into();
    ctx.store_rows(key, rows.clone());
    Ok(iter_rows(rows))
}

fn compute_groups(
    child: &ExecNode,
    spec: &GroupingSpec,
    ctx: &EnumerationContext,
) -> Result<Vec<PackedTuple>> {
    let mut index: HashMap<PackedTuple, usize> = HashMap::new();
    let mut groups: Vec<(PackedTuple, Vec<Accumulator>)> = Vec::new();
    for item in child.enumerate(ctx)? {
        let row = item?;
        let key = spec.group_key.apply(&row)?;
        let slot = match index.get(&key) {
            Some(&slot) => slot,
            None => {
                let accumulators = spec.columns.iter().map(Accumulator::new).collect();
                groups.push((key.clone(), accumulators));
                index.insert(key, groups.len() - 1);
                groups.len() - 1
            }
        };
        let (_, accumulators) = &mut groups[slot];
        for (accumulator, column) in accumulators.iter_mut().zip(&spec.columns) {
            accumulator.update(&row, column)?;
        }
    }
    // An ungrouped aggregate over no rows still yields its single row.
    if groups.is_empty() && spec.group_key.target().arity() == 0 {
        let accumulators = spec.columns.iter().map(Accumulator::new).collect();
        groups.push((
            PackedTuple::new(spec.group_key.target().clone()),
            accumulators,
        ));
    }
    let group_arity = spec.group_key.target().arity();
    let mut out = Vec::with_capacity(groups.len());
    for (key, accumulators) in groups {
        let mut row = PackedTuple::new(spec.output.clone());
        copy_fields(&mut row, 0, &key)?;
        for (offset, accumulator) in accumulators.into_iter().enumerate() {
            row.set(group_arity + offset, accumulator.finish())?;
        }
        out.push(row);
    }
    Ok(out)
}

/// Running state of one aggregate function within one group.
enum Accumulator {
    Count { n: i64 },
    Sum { acc: Option<SumAcc> },
    Avg { sum: f64, n: i64 },
    Min { best: Option<Value> },
    Max { best: Option<Value> },
}

impl Accumulator {
    fn new(column: &AggregateColumn) -> Accumulator {
        match column.function {
            AggregateFn::Count => Accumulator::Count { n: 0 },
            AggregateFn::Sum => Accumulator::Sum { acc: None },
            AggregateFn::Avg => Accumulator::Avg { sum: 0.0, n: 0 },
            AggregateFn::Min => Accumulator::Min { best: None },
            AggregateFn::Max => Accumulator::Max { best: None },
        }
    }

    /// Fold one row in. Null inputs never contribute, except to a
    /// column-less `Count`, which counts rows.
    fn update(&mut self, row: &PackedTuple, column: &AggregateColumn) -> Result<()> {
        let value = match column.column {
            Some(index) => row.get(index)?,
            None => None,
        };
        match self {
            Accumulator::Count { n } => {
                if column.column.is_none() || value.is_some() {
                    *n += 1;
                }
            }
            Accumulator::Sum { acc } => {
                if let Some(value) = value {
                    match acc {
                        None => *acc = Some(SumAcc::start(&value)?),
                        Some(sum) => sum.add(&value)?,
                    }
                }
            }
            Accumulator::Avg { sum, n } => {
                if let Some(value) = value {
                    *sum += numeric_f64(&value)?;
                    *n += 1;
                }
            }
            Accumulator::Min { best } => {
                if let Some(value) = value {
                    let replace = match best {
                        Some(current) => {
                            compare_keys(Some(&value), Some(current)).is_lt()
                        }
                        None => true,
                    };
                    if replace {
                        *best = Some(value);
                    }
                }
            }
            Accumulator::Max { best } => {
                if let Some(value) = value {
                    let replace = match best {
                        Some(current) => {
                            compare_keys(Some(&value), Some(current)).is_gt()
                        }
                        None => true,
                    };
                    if replace {
                        *best = Some(value);
                    }
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Option<Value> {
        match self {
            Accumulator::Count { n } => Some(Value::Int64(n)),
            Accumulator::Sum { acc } => acc.map(SumAcc::finish),
            Accumulator::Avg { sum, n } => (n > 0).then(|| Value::Float64(sum / n as f64)),
            Accumulator::Min { best } => best,
            Accumulator::Max { best } => best,
        }
    }
}

/// Sum running total, widened to the column type family's widest kind.
enum SumAcc {
    Int(i64),
    UInt(u64),
    Float(f64),
    Interval(i64),
}

impl SumAcc {
    fn start(value: &Value) -> Result<SumAcc> {
        if let Value::Interval(v) = value {
            return Ok(SumAcc::Interval(*v));
        }
        if let Some(v) = value.as_i64() {
            return Ok(SumAcc::Int(v));
        }
        if let Some(v) = value.as_u64() {
            return Ok(SumAcc::UInt(v));
        }
        if let Some(v) = value.as_f64() {
            return Ok(SumAcc::Float(v));
        }
        Err(Error::ExprType(format!(
            "cannot sum over {:?} value",
            value.value_type()
        )))
    }

    fn add(&mut self, value: &Value) -> Result<()> {
        match self {
            SumAcc::Int(acc) => {
                let v = value.as_i64().ok_or_else(|| mixed_sum(value))?;
                *acc = acc
                    .checked_add(v)
                    .ok_or_else(|| Error::ExprType("integer overflow in sum".into()))?;
            }
            SumAcc::UInt(acc) => {
                let v = value.as_u64().ok_or_else(|| mixed_sum(value))?;
                *acc = acc
                    .checked_add(v)
                    .ok_or_else(|| Error::ExprType("integer overflow in sum".into()))?;
            }
            SumAcc::Float(acc) => {
                let v = value.as_f64().ok_or_else(|| mixed_sum(value))?;
                *acc += v;
            }
            SumAcc::Interval(acc) => {
                let Value::Interval(v) = value else {
                    return Err(mixed_sum(value));
                };
                *acc = acc
                    .checked_add(*v)
                    .ok_or_else(|| Error::ExprType("interval overflow in sum".into()))?;
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self {
            SumAcc::Int(v) => Value::Int64(v),
            SumAcc::UInt(v) => Value::UInt64(v),
            SumAcc::Float(v) => Value::Float64(v),
            SumAcc::Interval(v) => Value::Interval(v),
        }
    }
}

fn mixed_sum(value: &Value) -> Error {
    Error::ExprType(format!(
        "mixed value kinds in sum: unexpected {:?}",
        value.value_type()
    ))
}

fn numeric_f64(value: &Value) -> Result<f64> {
    if let Value::Interval(v) = value {
        return Ok(*v as f64);
    }
    if let Some(v) = value.as_i64() {
        return Ok(v as f64);
    }
    if let Some(v) = value.as_u64() {
        return Ok(v as f64);
    }
    if let Some(v) = value.as_f64() {
        return Ok(v);
    }
    Err(Error::ExprType(format!(
        "cannot average over {:?} value",
        value.value_type()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use recset_tuple::{FieldType, ValueType};

    fn input() -> TupleDescriptor {
        TupleDescriptor::intern(&[FieldType::optional(ValueType::Int32)])
    }

    fn row(value: Option<i32>) -> PackedTuple {
        let mut row = PackedTuple::new(input());
        row.set(0, value.map(Value::Int32)).unwrap();
        row
    }

    fn fold(column: AggregateColumn, values: &[Option<i32>]) -> Option<Value> {
        let mut accumulator = Accumulator::new(&column);
        for &value in values {
            accumulator.update(&row(value), &column).unwrap();
        }
        accumulator.finish()
    }

    #[test]
    fn test_count_rows_versus_values() {
        let values = [Some(1), None, Some(3)];
        let rows = AggregateColumn::new(AggregateFn::Count, None, "n");
        assert_eq!(fold(rows, &values), Some(Value::Int64(3)));
        let non_null = AggregateColumn::new(AggregateFn::Count, Some(0), "n");
        assert_eq!(fold(non_null, &values), Some(Value::Int64(2)));
    }

    #[test]
    fn test_sum_widens_and_skips_nulls() {
        let column = AggregateColumn::new(AggregateFn::Sum, Some(0), "total");
        assert_eq!(
            fold(column.clone(), &[Some(1), None, Some(2)]),
            Some(Value::Int64(3))
        );
        // All-null and empty inputs sum to null.
        assert_eq!(fold(column.clone(), &[None, None]), None);
        assert_eq!(fold(column, &[]), None);
    }

    #[test]
    fn test_sum_overflow_is_an_error() {
        let column = AggregateColumn::new(AggregateFn::Sum, Some(0), "total");
        let mut accumulator = Accumulator::new(&column);
        let descriptor = TupleDescriptor::intern(&[FieldType::scalar(ValueType::Int64)]);
        let mut big = PackedTuple::new(descriptor);
        big.set(0, Some(Value::Int64(i64::MAX))).unwrap();
        accumulator.update(&big, &column).unwrap();
        let err = accumulator.update(&big, &column).unwrap_err();
        assert!(matches!(err, Error::ExprType(_)));
    }

    #[test]
    fn test_avg() {
        let column = AggregateColumn::new(AggregateFn::Avg, Some(0), "mean");
        assert_eq!(
            fold(column.clone(), &[Some(1), Some(2), None]),
            Some(Value::Float64(1.5))
        );
        assert_eq!(fold(column, &[None]), None);
    }

    #[test]
    fn test_min_max_skip_nulls() {
        let values = [None, Some(7), Some(-2), Some(4)];
        let min = AggregateColumn::new(AggregateFn::Min, Some(0), "lo");
        assert_eq!(fold(min, &values), Some(Value::Int32(-2)));
        let max = AggregateColumn::new(AggregateFn::Max, Some(0), "hi");
        assert_eq!(fold(max, &values), Some(Value::Int32(7)));
    }

    #[test]
    fn test_interval_sum_keeps_interval_type() {
        let column = AggregateColumn::new(AggregateFn::Sum, Some(0), "elapsed");
        let descriptor = TupleDescriptor::intern(&[FieldType::optional(ValueType::Interval)]);
        let mut accumulator = Accumulator::new(&column);
        for ticks in [1_000_000_i64, 500_000] {
            let mut row = PackedTuple::new(descriptor.clone());
            row.set(0, Some(Value::Interval(ticks))).unwrap();
            accumulator.update(&row, &column).unwrap();
        }
        assert_eq!(accumulator.finish(), Some(Value::Interval(1_500_000)));
    }
}
