//! Predicate and scalar expressions evaluated against tuple rows.

use std::cmp::Ordering;
use std::collections::HashSet;

use recset_tuple::{PackedTuple, Tuple, Value};

use crate::error::{Error, Result};
use crate::exec::EnumerationContext;

/// Comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CompareOp {
    /// The operator after swapping operand sides: `a < b` holds exactly
    /// when `b > a`, equality is side-agnostic.
    pub fn commute(self) -> CompareOp {
        match self {
            CompareOp::Lt => CompareOp::Gt,
            CompareOp::Gt => CompareOp::Lt,
            CompareOp::Le => CompareOp::Ge,
            CompareOp::Ge => CompareOp::Le,
            CompareOp::Eq => CompareOp::Eq,
            CompareOp::Ne => CompareOp::Ne,
        }
    }

    fn accepts(self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Ne => ordering != Ordering::Equal,
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Le => ordering != Ordering::Greater,
            CompareOp::Gt => ordering == Ordering::Greater,
            CompareOp::Ge => ordering != Ordering::Less,
        }
    }
}

/// Arithmetic operators usable inside scalar expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArithOp {
    Add,
    Sub,
    Mul,
}

/// A scalar or boolean expression over one row.
///
/// `Column` reads the current row, `Outer` reads the row bound by the
/// nearest enclosing apply operator, `Parameter` reads the enumeration
/// context's bindings. Evaluation yields `None` for null, and predicates
/// treat null as no-match.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Field of the current row.
    Column(usize),
    /// Field of the row bound by the nearest enclosing apply.
    Outer(usize),
    /// Parameter bound at enumeration time.
    Parameter(usize),
    /// Constant value.
    Literal(Value),
    /// Comparison of two scalars.
    Compare {
        op: CompareOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    /// Arithmetic over two scalars of the same numeric type.
    Arith {
        op: ArithOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Not(Box<Expr>),
    /// True when the operand evaluates to null.
    IsNull(Box<Expr>),
}

impl Expr {
    pub fn column(index: usize) -> Expr {
        Expr::Column(index)
    }

    pub fn literal(value: Value) -> Expr {
        Expr::Literal(value)
    }

    pub fn parameter(index: usize) -> Expr {
        Expr::Parameter(index)
    }

    pub fn compare(op: CompareOp, left: Expr, right: Expr) -> Expr {
        Expr::Compare {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Eq, left, right)
    }

    pub fn gt(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Gt, left, right)
    }

    pub fn lt(left: Expr, right: Expr) -> Expr {
        Expr::compare(CompareOp::Lt, left, right)
    }

    pub fn and(self, other: Expr) -> Expr {
        Expr::And(Box::new(self), Box::new(other))
    }

    pub fn or(self, other: Expr) -> Expr {
        Expr::Or(Box::new(self), Box::new(other))
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Expr {
        Expr::Not(Box::new(self))
    }

    /// Evaluate against one row. `None` means null.
    pub fn evaluate(
        &self,
        row: &PackedTuple,
        ctx: &EnumerationContext,
    ) -> Result<Option<Value>> {
        match self {
            Expr::Column(index) => Ok(row.get(*index)?),
            Expr::Outer(index) => ctx.outer_field(*index),
            Expr::Parameter(index) => ctx.param(*index).map(Some),
            Expr::Literal(value) => Ok(Some(value.clone())),
            Expr::Compare { op, left, right } => {
                let left = left.evaluate(row, ctx)?;
                let right = right.evaluate(row, ctx)?;
                let (Some(left), Some(right)) = (left, right) else {
                    return Ok(None);
                };
                let holds = match op {
                    CompareOp::Eq => values_equal(&left, &right),
                    CompareOp::Ne => !values_equal(&left, &right),
                    op => compare_values(&left, &right)
                        .map(|ordering| op.accepts(ordering))
                        .unwrap_or(false),
                };
                Ok(Some(Value::Bool(holds)))
            }
            Expr::Arith { op, left, right } => {
                let left = left.evaluate(row, ctx)?;
                let right = right.evaluate(row, ctx)?;
                let (Some(left), Some(right)) = (left, right) else {
                    return Ok(None);
                };
                arith(*op, &left, &right).map(Some)
            }
            Expr::And(left, right) => {
                let left = self::truth(left.evaluate(row, ctx)?)?;
                let right = self::truth(right.evaluate(row, ctx)?)?;
                Ok(match (left, right) {
                    (Some(false), _) | (_, Some(false)) => Some(Value::Bool(false)),
                    (Some(true), Some(true)) => Some(Value::Bool(true)),
                    _ => None,
                })
            }
            Expr::Or(left, right) => {
                let left = self::truth(left.evaluate(row, ctx)?)?;
                let right = self::truth(right.evaluate(row, ctx)?)?;
                Ok(match (left, right) {
                    (Some(true), _) | (_, Some(true)) => Some(Value::Bool(true)),
                    (Some(false), Some(false)) => Some(Value::Bool(false)),
                    _ => None,
                })
            }
            Expr::Not(inner) => Ok(self::truth(inner.evaluate(row, ctx)?)?
                .map(|b| Value::Bool(!b))),
            Expr::IsNull(inner) => Ok(Some(Value::Bool(
                inner.evaluate(row, ctx)?.is_none(),
            ))),
        }
    }

    /// Evaluate as a predicate: true only when the result is boolean true.
    /// Null results never match.
    pub fn matches(&self, row: &PackedTuple, ctx: &EnumerationContext) -> Result<bool> {
        match self.evaluate(row, ctx)? {
            Some(Value::Bool(b)) => Ok(b),
            None => Ok(false),
            Some(other) => Err(Error::ExprType(format!(
                "predicate evaluated to non-boolean {:?}",
                other.value_type()
            ))),
        }
    }

    /// Collect the current-row columns this expression reads.
    pub fn collect_columns(&self, out: &mut HashSet<usize>) {
        match self {
            Expr::Column(index) => {
                out.insert(*index);
            }
            Expr::Outer(_) | Expr::Parameter(_) | Expr::Literal(_) => {}
            Expr::Compare { left, right, .. } | Expr::Arith { left, right, .. } => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.collect_columns(out);
                right.collect_columns(out);
            }
            Expr::Not(inner) | Expr::IsNull(inner) => inner.collect_columns(out),
        }
    }

    /// Check whether the expression reads any outer-row field.
    pub fn references_outer(&self) -> bool {
        match self {
            Expr::Outer(_) => true,
            Expr::Column(_) | Expr::Parameter(_) | Expr::Literal(_) => false,
            Expr::Compare { left, right, .. } | Expr::Arith { left, right, .. } => {
                left.references_outer() || right.references_outer()
            }
            Expr::And(left, right) | Expr::Or(left, right) => {
                left.references_outer() || right.references_outer()
            }
            Expr::Not(inner) | Expr::IsNull(inner) => inner.references_outer(),
        }
    }

    /// Rewrite current-row column references through a projection map
    /// (old index -> new index). Fails when the expression reads a column
    /// the projection dropped.
    pub fn remap_columns(&self, map: &dyn Fn(usize) -> Option<usize>) -> Result<Expr> {
        Ok(match self {
            Expr::Column(index) => Expr::Column(map(*index).ok_or_else(|| {
                Error::InvalidPlan(format!("expression reads pruned column {index}"))
            })?),
            Expr::Outer(index) => Expr::Outer(*index),
            Expr::Parameter(index) => Expr::Parameter(*index),
            Expr::Literal(value) => Expr::Literal(value.clone()),
            Expr::Compare { op, left, right } => Expr::Compare {
                op: *op,
                left: Box::new(left.remap_columns(map)?),
                right: Box::new(right.remap_columns(map)?),
            },
            Expr::Arith { op, left, right } => Expr::Arith {
                op: *op,
                left: Box::new(left.remap_columns(map)?),
                right: Box::new(right.remap_columns(map)?),
            },
            Expr::And(left, right) => Expr::And(
                Box::new(left.remap_columns(map)?),
                Box::new(right.remap_columns(map)?),
            ),
            Expr::Or(left, right) => Expr::Or(
                Box::new(left.remap_columns(map)?),
                Box::new(right.remap_columns(map)?),
            ),
            Expr::Not(inner) => Expr::Not(Box::new(inner.remap_columns(map)?)),
            Expr::IsNull(inner) => Expr::IsNull(Box::new(inner.remap_columns(map)?)),
        })
    }
}

fn truth(value: Option<Value>) -> Result<Option<bool>> {
    match value {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(b)),
        Some(other) => Err(Error::ExprType(format!(
            "expected boolean operand, got {:?}",
            other.value_type()
        ))),
    }
}

fn arith(op: ArithOp, left: &Value, right: &Value) -> Result<Value> {
    let overflow = || Error::ExprType("integer overflow in arithmetic".into());
    match (left, right) {
        (Value::Int32(a), Value::Int32(b)) => {
            let r = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
            };
            r.map(Value::Int32).ok_or_else(overflow)
        }
        (Value::Int64(a), Value::Int64(b)) => {
            let r = match op {
                ArithOp::Add => a.checked_add(*b),
                ArithOp::Sub => a.checked_sub(*b),
                ArithOp::Mul => a.checked_mul(*b),
            };
            r.map(Value::Int64).ok_or_else(overflow)
        }
        (Value::Float64(a), Value::Float64(b)) => Ok(Value::Float64(match op {
            ArithOp::Add => a + b,
            ArithOp::Sub => a - b,
            ArithOp::Mul => a * b,
        })),
        (a, b) => Err(Error::ExprType(format!(
            "arithmetic over {:?} and {:?} is not supported",
            a.value_type(),
            b.value_type()
        ))),
    }
}

/// Value equality with numeric widening; mismatched kinds are unequal.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    compare_values(a, b) == Some(Ordering::Equal)
}

/// Compare two values, widening within the signed, unsigned, and float
/// families. `None` when the values are incomparable (or NaN is involved).
pub(crate) fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
        (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
        (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Interval(a), Value::Interval(b)) => Some(a.cmp(b)),
        (Value::Float32(_) | Value::Float64(_), Value::Float32(_) | Value::Float64(_)) => {
            let a = a.as_f64()?;
            let b = b.as_f64()?;
            a.partial_cmp(&b)
        }
        _ => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return Some(a.cmp(&b));
            }
            if let (Some(a), Some(b)) = (a.as_u64(), b.as_u64()) {
                return Some(a.cmp(&b));
            }
            None
        }
    }
}

/// Total order used by sort buffers and merge cursors: null/unavailable
/// fields sort first, NaN sorts by its IEEE total order.
pub(crate) fn compare_keys(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(Value::Float32(a)), Some(Value::Float32(b))) => a.total_cmp(b),
        (Some(Value::Float64(a)), Some(Value::Float64(b))) => a.total_cmp(b),
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{Column, Header};
    use recset_tuple::{FieldType, ValueType};

    fn row(values: &[Option<Value>]) -> (PackedTuple, EnumerationContext) {
        let header = Header::new(vec![
            Column::new("a", FieldType::optional(ValueType::Int32)),
            Column::new("b", FieldType::scalar(ValueType::Str)),
            Column::new("c", FieldType::optional(ValueType::Bool)),
        ]);
        let mut tuple = PackedTuple::new(header.descriptor().clone());
        for (i, v) in values.iter().enumerate() {
            tuple.set(i, v.clone()).unwrap();
        }
        (tuple, EnumerationContext::new())
    }

    #[test]
    fn test_compare_column_to_literal() {
        let (row, ctx) = row(&[
            Some(Value::Int32(10)),
            Some(Value::Str("x".into())),
            Some(Value::Bool(true)),
        ]);
        let gt = Expr::gt(Expr::column(0), Expr::literal(Value::Int32(5)));
        assert!(gt.matches(&row, &ctx).unwrap());
        let lt = Expr::lt(Expr::column(0), Expr::literal(Value::Int32(5)));
        assert!(!lt.matches(&row, &ctx).unwrap());
    }

    #[test]
    fn test_null_never_matches() {
        let (row, ctx) = row(&[None, Some(Value::Str("x".into())), None]);
        let eq = Expr::eq(Expr::column(0), Expr::literal(Value::Int32(1)));
        assert!(!eq.matches(&row, &ctx).unwrap());
        let ne = Expr::compare(
            CompareOp::Ne,
            Expr::column(0),
            Expr::literal(Value::Int32(1)),
        );
        assert!(!ne.matches(&row, &ctx).unwrap());
    }

    #[test]
    fn test_is_null() {
        let (row, ctx) = row(&[None, Some(Value::Str("x".into())), Some(Value::Bool(false))]);
        assert!(Expr::IsNull(Box::new(Expr::column(0)))
            .matches(&row, &ctx)
            .unwrap());
        assert!(!Expr::IsNull(Box::new(Expr::column(1)))
            .matches(&row, &ctx)
            .unwrap());
    }

    #[test]
    fn test_boolean_connectives() {
        let (row, ctx) = row(&[
            Some(Value::Int32(10)),
            Some(Value::Str("x".into())),
            Some(Value::Bool(true)),
        ]);
        let t = Expr::literal(Value::Bool(true));
        let f = Expr::literal(Value::Bool(false));
        assert!(t.clone().and(t.clone()).matches(&row, &ctx).unwrap());
        assert!(!t.clone().and(f.clone()).matches(&row, &ctx).unwrap());
        assert!(t.clone().or(f.clone()).matches(&row, &ctx).unwrap());
        assert!(!f.clone().not().not().matches(&row, &ctx).unwrap());
        // Null conjuncts never make a predicate match.
        let (null_row, ctx2) =
            self::row(&[None, Some(Value::Str("x".into())), Some(Value::Bool(true))]);
        let null_bool = Expr::eq(Expr::column(0), Expr::literal(Value::Int32(1)));
        assert!(!null_bool.clone().and(t).matches(&null_row, &ctx2).unwrap());
        assert!(!null_bool.and(f).matches(&null_row, &ctx2).unwrap());
    }

    #[test]
    fn test_parameter_binding() {
        let (row, _) = row(&[
            Some(Value::Int32(7)),
            Some(Value::Str("x".into())),
            Some(Value::Bool(true)),
        ]);
        let ctx = EnumerationContext::with_params(vec![Value::Int32(7)]);
        let eq = Expr::eq(Expr::column(0), Expr::parameter(0));
        assert!(eq.matches(&row, &ctx).unwrap());

        let unbound = Expr::eq(Expr::column(0), Expr::parameter(3));
        assert_eq!(
            unbound.matches(&row, &ctx).unwrap_err(),
            Error::MissingParameter(3)
        );
    }

    #[test]
    fn test_arithmetic() {
        let (row, ctx) = row(&[
            Some(Value::Int32(6)),
            Some(Value::Str("x".into())),
            Some(Value::Bool(true)),
        ]);
        let doubled = Expr::Arith {
            op: ArithOp::Mul,
            left: Box::new(Expr::column(0)),
            right: Box::new(Expr::literal(Value::Int32(2))),
        };
        assert_eq!(
            doubled.evaluate(&row, &ctx).unwrap(),
            Some(Value::Int32(12))
        );

        let bad = Expr::Arith {
            op: ArithOp::Add,
            left: Box::new(Expr::column(0)),
            right: Box::new(Expr::literal(Value::Str("y".into()))),
        };
        assert!(matches!(bad.evaluate(&row, &ctx), Err(Error::ExprType(_))));
    }

    #[test]
    fn test_collect_columns() {
        let expr = Expr::gt(Expr::column(2), Expr::literal(Value::Int32(1)))
            .and(Expr::eq(Expr::column(0), Expr::Outer(5)));
        let mut out = HashSet::new();
        expr.collect_columns(&mut out);
        let mut cols: Vec<usize> = out.into_iter().collect();
        cols.sort_unstable();
        assert_eq!(cols, vec![0, 2]);
        assert!(expr.references_outer());
    }

    #[test]
    fn test_remap_columns() {
        let expr = Expr::gt(Expr::column(3), Expr::literal(Value::Int32(1)));
        let remapped = expr
            .remap_columns(&|c| if c == 3 { Some(0) } else { None })
            .unwrap();
        assert_eq!(
            remapped,
            Expr::gt(Expr::column(0), Expr::literal(Value::Int32(1)))
        );
        assert!(expr.remap_columns(&|_| None).is_err());
    }

    #[test]
    fn test_commute() {
        assert_eq!(CompareOp::Lt.commute(), CompareOp::Gt);
        assert_eq!(CompareOp::Ge.commute(), CompareOp::Le);
        assert_eq!(CompareOp::Eq.commute(), CompareOp::Eq);
        assert_eq!(CompareOp::Ne.commute(), CompareOp::Ne);
    }

    #[test]
    fn test_cross_width_comparison() {
        assert_eq!(
            compare_values(&Value::Int32(5), &Value::Int64(5)),
            Some(Ordering::Equal)
        );
        assert_eq!(
            compare_values(&Value::Float32(0.5), &Value::Float64(1.0)),
            Some(Ordering::Less)
        );
        assert_eq!(compare_values(&Value::Int32(1), &Value::Str("1".into())), None);
        assert_eq!(compare_values(&Value::Float64(f64::NAN), &Value::Float64(1.0)), None);
    }
}
