//! Logical query plan nodes.
//!
//! A [`Provider`] is an immutable description of one relational
//! transform plus the derived [`Header`] of its output. Trees are built
//! bottom-up by the mapping layer, rewritten by the pre-compilation
//! passes, and compiled into executable operators. Providers carry no
//! execution state: the same tree can be compiled and enumerated any
//! number of times.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use recset_tuple::{FieldType, ValueType};

use crate::error::{Error, Result};
use crate::expr::Expr;
use crate::header::{Column, Direction, Header, SortOrder};
use crate::range::{RangeExpr, RangeSetExpr};
use crate::source::{IndexSource, TupleSource};

/// Inner or left-outer variant of a join or apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JoinKind {
    Inner,
    /// Every left row appears at least once; unmatched rows pair with a
    /// blank right side whose fields are all unassigned.
    LeftOuter,
}

/// Requested join algorithm. The selector honors a hint when the
/// compiled children can support it and falls back otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum JoinHint {
    /// No preference: merge when both sides are compatibly ordered,
    /// else loop when the right side supports ordered lookup, else
    /// nested-loop.
    #[default]
    Auto,
    NestedLoop,
    Hash,
    Loop,
    Merge,
}

/// Aggregate functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateFn {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

/// One aggregate output column.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateColumn {
    pub function: AggregateFn,
    /// Source column the function folds over. `None` only for `Count`,
    /// which then counts rows instead of non-null values.
    pub column: Option<usize>,
    pub name: String,
}

impl AggregateColumn {
    pub fn new(function: AggregateFn, column: Option<usize>, name: impl Into<String>) -> Self {
        AggregateColumn {
            function,
            column,
            name: name.into(),
        }
    }

    /// The output column this aggregate produces over the given input.
    /// Everything but `Count` is nullable: a group of nulls sums to
    /// null, an empty ungrouped input has no minimum.
    fn result_column(&self, source: &Header) -> Result<Column> {
        let input = match self.column {
            Some(column) => {
                source.check_column(column)?;
                Some(source.columns()[column].field_type.value_type())
            }
            None => None,
        };
        let field_type = match self.function {
            AggregateFn::Count => FieldType::scalar(ValueType::Int64),
            AggregateFn::Sum => FieldType::optional(sum_type(self.require_input(input)?)?),
            AggregateFn::Avg => {
                let input = self.require_input(input)?;
                sum_type(input)?;
                FieldType::optional(ValueType::Float64)
            }
            AggregateFn::Min | AggregateFn::Max => {
                FieldType::optional(self.require_input(input)?)
            }
        };
        Ok(Column::new(self.name.clone(), field_type))
    }

    fn require_input(&self, input: Option<ValueType>) -> Result<ValueType> {
        input.ok_or_else(|| {
            Error::InvalidPlan(format!(
                "aggregate {:?} requires a source column",
                self.function
            ))
        })
    }
}

fn sum_type(input: ValueType) -> Result<ValueType> {
    match input {
        ValueType::Int8 | ValueType::Int16 | ValueType::Int32 | ValueType::Int64 => {
            Ok(ValueType::Int64)
        }
        ValueType::UInt8 | ValueType::UInt16 | ValueType::UInt32 | ValueType::UInt64 => {
            Ok(ValueType::UInt64)
        }
        ValueType::Float32 | ValueType::Float64 => Ok(ValueType::Float64),
        ValueType::Interval => Ok(ValueType::Interval),
        other => Err(Error::ExprType(format!(
            "cannot sum over {other:?} column"
        ))),
    }
}

/// Ordering behavior of one operator kind, consulted by the ordering
/// correction pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderingProfile {
    /// The operator's output depends on the order its input arrives in.
    pub is_order_sensitive: bool,
    /// Input order carries through to the output unchanged.
    pub preserves_order: bool,
    /// Output order is unspecified no matter how the input is ordered.
    pub is_order_breaker: bool,
}

impl OrderingProfile {
    const fn new(sensitive: bool, preserves: bool, breaks: bool) -> Self {
        OrderingProfile {
            is_order_sensitive: sensitive,
            preserves_order: preserves,
            is_order_breaker: breaks,
        }
    }
}

/// One relational operation.
pub enum ProviderKind {
    /// Leaf over an unordered row supplier.
    Scan {
        name: String,
        source: Arc<dyn TupleSource>,
    },
    /// Leaf over an ordered row supplier.
    IndexScan {
        name: String,
        source: Arc<dyn IndexSource>,
    },
    Filter {
        source: Arc<Provider>,
        predicate: Expr,
    },
    /// Column projection, possibly reordering.
    Select {
        source: Arc<Provider>,
        columns: Vec<usize>,
    },
    Sort {
        source: Arc<Provider>,
        order: SortOrder,
    },
    /// Keeps the first occurrence of each distinct row.
    Distinct { source: Arc<Provider> },
    /// Left rows then right rows, duplicates kept.
    Concat {
        left: Arc<Provider>,
        right: Arc<Provider>,
    },
    /// Distinct rows present in either input.
    Union {
        left: Arc<Provider>,
        right: Arc<Provider>,
    },
    /// Distinct left rows also present in the right input.
    Intersect {
        left: Arc<Provider>,
        right: Arc<Provider>,
    },
    /// Distinct left rows absent from the right input.
    Except {
        left: Arc<Provider>,
        right: Arc<Provider>,
    },
    /// Equi-join over column pairs. Output is left columns then right
    /// columns.
    Join {
        left: Arc<Provider>,
        right: Arc<Provider>,
        kind: JoinKind,
        hint: JoinHint,
        /// (left column, right column) pairs the join equates.
        pairs: Vec<(usize, usize)>,
    },
    /// Correlated join: the right side is re-enumerated per left row
    /// with that row bound as the outer row.
    Apply {
        left: Arc<Provider>,
        right: Arc<Provider>,
        kind: JoinKind,
    },
    /// Grouped aggregation. Output is the group columns then one column
    /// per aggregate.
    Aggregate {
        source: Arc<Provider>,
        group_by: Vec<usize>,
        columns: Vec<AggregateColumn>,
    },
    /// Appends a one-based row number column.
    RowNumber {
        source: Arc<Provider>,
        name: String,
    },
    /// Restricts an ordered source to one key range on its leading sort
    /// column.
    Range {
        source: Arc<Provider>,
        range: RangeExpr,
    },
    /// Restricts an ordered source to a union of key ranges on its
    /// leading sort column.
    RangeSet {
        source: Arc<Provider>,
        ranges: RangeSetExpr,
    },
}

/// A logical plan node: one operation plus its derived output header.
pub struct Provider {
    header: Header,
    kind: ProviderKind,
}

impl Provider {
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn kind(&self) -> &ProviderKind {
        &self.kind
    }

    /// Operator name for diagnostics and plan rendering.
    pub fn name(&self) -> &'static str {
        match &self.kind {
            ProviderKind::Scan { .. } => "Scan",
            ProviderKind::IndexScan { .. } => "IndexScan",
            ProviderKind::Filter { .. } => "Filter",
            ProviderKind::Select { .. } => "Select",
            ProviderKind::Sort { .. } => "Sort",
            ProviderKind::Distinct { .. } => "Distinct",
            ProviderKind::Concat { .. } => "Concat",
            ProviderKind::Union { .. } => "Union",
            ProviderKind::Intersect { .. } => "Intersect",
            ProviderKind::Except { .. } => "Except",
            ProviderKind::Join { .. } => "Join",
            ProviderKind::Apply { .. } => "Apply",
            ProviderKind::Aggregate { .. } => "Aggregate",
            ProviderKind::RowNumber { .. } => "RowNumber",
            ProviderKind::Range { .. } => "Range",
            ProviderKind::RangeSet { .. } => "RangeSet",
        }
    }

    /// Child nodes, left to right.
    pub fn sources(&self) -> Vec<&Arc<Provider>> {
        match &self.kind {
            ProviderKind::Scan { .. } | ProviderKind::IndexScan { .. } => Vec::new(),
            ProviderKind::Filter { source, .. }
            | ProviderKind::Select { source, .. }
            | ProviderKind::Sort { source, .. }
            | ProviderKind::Distinct { source }
            | ProviderKind::Aggregate { source, .. }
            | ProviderKind::RowNumber { source, .. }
            | ProviderKind::Range { source, .. }
            | ProviderKind::RangeSet { source, .. } => vec![source],
            ProviderKind::Concat { left, right }
            | ProviderKind::Union { left, right }
            | ProviderKind::Intersect { left, right }
            | ProviderKind::Except { left, right }
            | ProviderKind::Join { left, right, .. }
            | ProviderKind::Apply { left, right, .. } => vec![left, right],
        }
    }

    pub fn ordering_profile(&self) -> OrderingProfile {
        match &self.kind {
            ProviderKind::Scan { .. }
            | ProviderKind::IndexScan { .. }
            | ProviderKind::Filter { .. }
            | ProviderKind::Select { .. }
            | ProviderKind::Distinct { .. }
            | ProviderKind::Intersect { .. }
            | ProviderKind::Except { .. }
            | ProviderKind::Join { .. }
            | ProviderKind::Apply { .. } => OrderingProfile::new(false, true, false),
            ProviderKind::Sort { .. } => OrderingProfile::new(false, false, false),
            ProviderKind::Concat { .. }
            | ProviderKind::Union { .. }
            | ProviderKind::Aggregate { .. } => OrderingProfile::new(false, false, true),
            ProviderKind::RowNumber { .. } | ProviderKind::Range { .. }
            | ProviderKind::RangeSet { .. } => OrderingProfile::new(true, true, false),
        }
    }

    // ---- constructors ----

    pub fn scan(name: impl Into<String>, source: Arc<dyn TupleSource>) -> Provider {
        Provider {
            header: source.header().clone(),
            kind: ProviderKind::Scan {
                name: name.into(),
                source,
            },
        }
    }

    pub fn index_scan(name: impl Into<String>, source: Arc<dyn IndexSource>) -> Provider {
        Provider {
            header: source.header().clone(),
            kind: ProviderKind::IndexScan {
                name: name.into(),
                source,
            },
        }
    }

    pub fn filter(source: impl Into<Arc<Provider>>, predicate: Expr) -> Result<Provider> {
        let source = source.into();
        let mut columns = HashSet::new();
        predicate.collect_columns(&mut columns);
        for column in columns {
            source.header.check_column(column)?;
        }
        Ok(Provider {
            header: source.header.clone(),
            kind: ProviderKind::Filter { source, predicate },
        })
    }

    pub fn select(source: impl Into<Arc<Provider>>, columns: Vec<usize>) -> Result<Provider> {
        let source = source.into();
        let header = source.header.select(&columns)?;
        Ok(Provider {
            header,
            kind: ProviderKind::Select { source, columns },
        })
    }

    pub fn sort(source: impl Into<Arc<Provider>>, order: SortOrder) -> Result<Provider> {
        let source = source.into();
        for &(column, _) in order.keys() {
            source.header.check_column(column)?;
        }
        let header = source.header.clone().with_order(order.clone());
        Ok(Provider {
            header,
            kind: ProviderKind::Sort { source, order },
        })
    }

    pub fn distinct(source: impl Into<Arc<Provider>>) -> Provider {
        let source = source.into();
        Provider {
            header: source.header.clone(),
            kind: ProviderKind::Distinct { source },
        }
    }

    pub fn concat(
        left: impl Into<Arc<Provider>>,
        right: impl Into<Arc<Provider>>,
    ) -> Result<Provider> {
        let (left, right) = (left.into(), right.into());
        let header = compatible_header(&left.header, &right.header)?;
        Ok(Provider {
            header,
            kind: ProviderKind::Concat { left, right },
        })
    }

    pub fn union(
        left: impl Into<Arc<Provider>>,
        right: impl Into<Arc<Provider>>,
    ) -> Result<Provider> {
        let (left, right) = (left.into(), right.into());
        let header = compatible_header(&left.header, &right.header)?;
        Ok(Provider {
            header,
            kind: ProviderKind::Union { left, right },
        })
    }

    pub fn intersect(
        left: impl Into<Arc<Provider>>,
        right: impl Into<Arc<Provider>>,
    ) -> Result<Provider> {
        let (left, right) = (left.into(), right.into());
        let header = compatible_header(&left.header, &right.header)?;
        Ok(Provider {
            header,
            kind: ProviderKind::Intersect { left, right },
        })
    }

    pub fn except(
        left: impl Into<Arc<Provider>>,
        right: impl Into<Arc<Provider>>,
    ) -> Result<Provider> {
        let (left, right) = (left.into(), right.into());
        let header = compatible_header(&left.header, &right.header)?;
        Ok(Provider {
            header,
            kind: ProviderKind::Except { left, right },
        })
    }

    pub fn join(
        left: impl Into<Arc<Provider>>,
        right: impl Into<Arc<Provider>>,
        kind: JoinKind,
        hint: JoinHint,
        pairs: Vec<(usize, usize)>,
    ) -> Result<Provider> {
        let (left, right) = (left.into(), right.into());
        for &(l, r) in &pairs {
            left.header.check_column(l)?;
            right.header.check_column(r)?;
            let lt = left.header.columns()[l].field_type.value_type();
            let rt = right.header.columns()[r].field_type.value_type();
            if lt != rt {
                return Err(Error::HeaderMismatch(format!(
                    "join key types differ: {lt:?} vs {rt:?}"
                )));
            }
        }
        let header = left.header.join(&right.header);
        Ok(Provider {
            header,
            kind: ProviderKind::Join {
                left,
                right,
                kind,
                hint,
                pairs,
            },
        })
    }

    pub fn apply(
        left: impl Into<Arc<Provider>>,
        right: impl Into<Arc<Provider>>,
        kind: JoinKind,
    ) -> Result<Provider> {
        let (left, right) = (left.into(), right.into());
        let mut outer = HashSet::new();
        collect_outer_columns(&right, &mut outer);
        for column in outer {
            left.header.check_column(column)?;
        }
        let header = left.header.join(&right.header);
        Ok(Provider {
            header,
            kind: ProviderKind::Apply { left, right, kind },
        })
    }

    pub fn aggregate(
        source: impl Into<Arc<Provider>>,
        group_by: Vec<usize>,
        columns: Vec<AggregateColumn>,
    ) -> Result<Provider> {
        let source = source.into();
        let mut out = Vec::with_capacity(group_by.len() + columns.len());
        for &column in &group_by {
            source.header.check_column(column)?;
            out.push(source.header.columns()[column].clone());
        }
        for aggregate in &columns {
            out.push(aggregate.result_column(&source.header)?);
        }
        Ok(Provider {
            header: Header::new(out),
            kind: ProviderKind::Aggregate {
                source,
                group_by,
                columns,
            },
        })
    }

    pub fn row_number(source: impl Into<Arc<Provider>>, name: impl Into<String>) -> Provider {
        let source = source.into();
        let name = name.into();
        let mut columns: Vec<Column> = source.header.columns().to_vec();
        columns.push(Column::new(name.clone(), FieldType::scalar(ValueType::Int64)));
        let order = source.header.order().clone();
        let header = Header::new(columns).with_order(order);
        Provider {
            header,
            kind: ProviderKind::RowNumber { source, name },
        }
    }

    pub fn range(source: impl Into<Arc<Provider>>, range: RangeExpr) -> Result<Provider> {
        let source = source.into();
        check_seekable(&source)?;
        Ok(Provider {
            header: source.header.clone(),
            kind: ProviderKind::Range { source, range },
        })
    }

    pub fn range_set(
        source: impl Into<Arc<Provider>>,
        ranges: RangeSetExpr,
    ) -> Result<Provider> {
        let source = source.into();
        check_seekable(&source)?;
        Ok(Provider {
            header: source.header.clone(),
            kind: ProviderKind::RangeSet { source, ranges },
        })
    }
}

/// A range restriction needs a source ordered ascending on its leading
/// column.
fn check_seekable(source: &Provider) -> Result<()> {
    match source.header.order().keys().first() {
        Some((_, Direction::Asc)) => Ok(()),
        _ => Err(Error::InvalidPlan(format!(
            "range restriction over unordered {} node",
            source.name()
        ))),
    }
}

/// Output header of a set operation: column types must match, names
/// come from the left, nullability widens to cover both sides.
fn compatible_header(left: &Header, right: &Header) -> Result<Header> {
    if left.arity() != right.arity() {
        return Err(Error::HeaderMismatch(format!(
            "set operation arity differs: {} vs {}",
            left.arity(),
            right.arity()
        )));
    }
    let mut columns = Vec::with_capacity(left.arity());
    for (l, r) in left.columns().iter().zip(right.columns()) {
        let lt = l.field_type.value_type();
        let rt = r.field_type.value_type();
        if lt != rt {
            return Err(Error::HeaderMismatch(format!(
                "set operation column types differ: {lt:?} vs {rt:?}"
            )));
        }
        let field_type = if l.field_type.is_nullable() || r.field_type.is_nullable() {
            FieldType::optional(lt)
        } else {
            l.field_type
        };
        columns.push(Column::new(l.name.clone(), field_type));
    }
    Ok(Header::new(columns))
}

/// Outer columns the subtree reads from its nearest enclosing apply.
/// Stops at nested applies: their right sides bind to their own left.
pub(crate) fn collect_outer_columns(provider: &Provider, out: &mut HashSet<usize>) {
    if let ProviderKind::Filter { predicate, .. } = &provider.kind {
        collect_outer_from_expr(predicate, out);
    }
    match &provider.kind {
        ProviderKind::Apply { left, .. } => collect_outer_columns(left, out),
        _ => {
            for child in provider.sources() {
                collect_outer_columns(child, out);
            }
        }
    }
}

fn collect_outer_from_expr(expr: &Expr, out: &mut HashSet<usize>) {
    match expr {
        Expr::Outer(index) => {
            out.insert(*index);
        }
        Expr::Column(_) | Expr::Parameter(_) | Expr::Literal(_) => {}
        Expr::Compare { left, right, .. } | Expr::Arith { left, right, .. } => {
            collect_outer_from_expr(left, out);
            collect_outer_from_expr(right, out);
        }
        Expr::And(left, right) | Expr::Or(left, right) => {
            collect_outer_from_expr(left, out);
            collect_outer_from_expr(right, out);
        }
        Expr::Not(inner) | Expr::IsNull(inner) => collect_outer_from_expr(inner, out),
    }
}

impl fmt::Debug for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tuple = f.debug_tuple(self.name());
        for child in self.sources() {
            tuple.field(child);
        }
        tuple.finish()
    }
}
