//! Key ranges over an ordered column.
//!
//! Endpoints use the `Entire` model: a concrete key, a key shifted
//! infinitesimally before or after itself, or an infinity. Shifted
//! endpoints let strict and non-strict comparisons share one closed
//! interval representation, so `x > 5` becomes `[after 5, +inf]` and
//! `x >= 5` becomes `[5, +inf]` without per-range inclusivity flags.

use std::cmp::Ordering;

use recset_tuple::Value;

use crate::error::{Error, Result};
use crate::expr::{compare_values, CompareOp};

/// Which side of its key a shifted endpoint sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Shift {
    /// Infinitesimally below the key. Excludes the key from an upper
    /// bound, admits everything below it.
    Before,
    /// Infinitesimally above the key.
    After,
}

/// A range endpoint.
///
/// For one key value `k` the endpoint positions order as
/// `before k < k < after k`, with infinities at the extremes. No
/// concrete key ever compares equal to a shifted endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum Entire {
    NegativeInfinity,
    PositiveInfinity,
    /// The key itself. A closed bound.
    Exact(Value),
    /// The key shifted infinitesimally. An open bound.
    Shifted(Value, Shift),
}

impl Entire {
    fn key(&self) -> Option<&Value> {
        match self {
            Entire::Exact(v) | Entire::Shifted(v, _) => Some(v),
            Entire::NegativeInfinity | Entire::PositiveInfinity => None,
        }
    }

    /// Rank of the endpoint among the positions sharing its key.
    fn shift_rank(&self) -> i8 {
        match self {
            Entire::Shifted(_, Shift::Before) => -1,
            Entire::Exact(_) => 0,
            Entire::Shifted(_, Shift::After) => 1,
            Entire::NegativeInfinity | Entire::PositiveInfinity => 0,
        }
    }

    /// Total order over endpoints. Callers only mix endpoints of a
    /// single key column, so keys are mutually comparable.
    pub fn compare(&self, other: &Entire) -> Ordering {
        use Entire::{NegativeInfinity, PositiveInfinity};
        match (self, other) {
            (NegativeInfinity, NegativeInfinity) => Ordering::Equal,
            (PositiveInfinity, PositiveInfinity) => Ordering::Equal,
            (NegativeInfinity, _) => Ordering::Less,
            (_, NegativeInfinity) => Ordering::Greater,
            (PositiveInfinity, _) => Ordering::Greater,
            (_, PositiveInfinity) => Ordering::Less,
            (a, b) => {
                let (Some(ka), Some(kb)) = (a.key(), b.key()) else {
                    return Ordering::Equal;
                };
                compare_values(ka, kb)
                    .unwrap_or(Ordering::Equal)
                    .then(a.shift_rank().cmp(&b.shift_rank()))
            }
        }
    }

    /// Where this endpoint sits relative to a concrete key.
    pub fn compare_key(&self, key: &Value) -> Ordering {
        match self {
            Entire::NegativeInfinity => Ordering::Less,
            Entire::PositiveInfinity => Ordering::Greater,
            Entire::Exact(bound) => compare_values(bound, key).unwrap_or(Ordering::Equal),
            Entire::Shifted(bound, shift) => {
                match compare_values(bound, key).unwrap_or(Ordering::Equal) {
                    Ordering::Equal => match shift {
                        Shift::Before => Ordering::Less,
                        Shift::After => Ordering::Greater,
                    },
                    other => other,
                }
            }
        }
    }
}

/// A closed interval in endpoint space over one key column.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyRange {
    pub low: Entire,
    pub high: Entire,
}

impl KeyRange {
    pub fn new(low: Entire, high: Entire) -> KeyRange {
        KeyRange { low, high }
    }

    pub fn full() -> KeyRange {
        KeyRange::new(Entire::NegativeInfinity, Entire::PositiveInfinity)
    }

    /// True when the endpoints are inverted and nothing can fall inside.
    pub fn is_empty(&self) -> bool {
        self.low.compare(&self.high) == Ordering::Greater
    }

    pub fn is_full(&self) -> bool {
        self.low == Entire::NegativeInfinity && self.high == Entire::PositiveInfinity
    }

    /// Check whether a possibly-null key falls inside the interval.
    /// Null keys sit above negative infinity but below every concrete
    /// key, so they fall inside exactly the ranges whose low endpoint
    /// is negative infinity and whose high endpoint is anything else.
    pub fn contains(&self, key: Option<&Value>) -> bool {
        let Some(key) = key else {
            return self.low == Entire::NegativeInfinity
                && self.high != Entire::NegativeInfinity;
        };
        self.low.compare_key(key) != Ordering::Greater
            && self.high.compare_key(key) != Ordering::Less
    }

    fn intersect(&self, other: &KeyRange) -> Option<KeyRange> {
        let low = if self.low.compare(&other.low) == Ordering::Less {
            other.low.clone()
        } else {
            self.low.clone()
        };
        let high = if self.high.compare(&other.high) == Ordering::Greater {
            other.high.clone()
        } else {
            self.high.clone()
        };
        let range = KeyRange::new(low, high);
        (!range.is_empty()).then_some(range)
    }
}

/// Check whether `low` starts exactly where `high` ends, with no
/// concrete key between them. Only the exact/shifted positions of one
/// key are zero-gap neighbors; `before k` to `after k` skips `k` itself.
fn touches(high: &Entire, low: &Entire) -> bool {
    match (high, low) {
        (Entire::Shifted(a, Shift::Before), Entire::Exact(b))
        | (Entire::Exact(a), Entire::Shifted(b, Shift::After)) => {
            compare_values(a, b) == Some(Ordering::Equal)
        }
        _ => false,
    }
}

/// A sorted, non-overlapping union of key ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeSet {
    ranges: Vec<KeyRange>,
}

impl RangeSet {
    /// The set covering every key.
    pub fn full() -> RangeSet {
        RangeSet {
            ranges: vec![KeyRange::full()],
        }
    }

    /// The set covering no key.
    pub fn empty() -> RangeSet {
        RangeSet { ranges: Vec::new() }
    }

    /// Build from arbitrary ranges: drops empties, sorts by lower
    /// endpoint, merges overlapping and zero-gap neighbors.
    pub fn from_ranges(mut ranges: Vec<KeyRange>) -> RangeSet {
        ranges.retain(|r| !r.is_empty());
        ranges.sort_by(|a, b| a.low.compare(&b.low).then(a.high.compare(&b.high)));
        let mut merged: Vec<KeyRange> = Vec::with_capacity(ranges.len());
        for range in ranges {
            match merged.last_mut() {
                Some(last)
                    if range.low.compare(&last.high) != Ordering::Greater
                        || touches(&last.high, &range.low) =>
                {
                    if range.high.compare(&last.high) == Ordering::Greater {
                        last.high = range.high;
                    }
                }
                _ => merged.push(range),
            }
        }
        RangeSet { ranges: merged }
    }

    pub fn ranges(&self) -> &[KeyRange] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ranges.len() == 1 && self.ranges[0].is_full()
    }

    pub fn contains(&self, key: Option<&Value>) -> bool {
        self.ranges.iter().any(|r| r.contains(key))
    }

    pub fn union(&self, other: &RangeSet) -> RangeSet {
        let mut ranges = self.ranges.clone();
        ranges.extend(other.ranges.iter().cloned());
        RangeSet::from_ranges(ranges)
    }

    pub fn intersect(&self, other: &RangeSet) -> RangeSet {
        let mut out = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                if let Some(r) = a.intersect(b) {
                    out.push(r);
                }
            }
        }
        RangeSet::from_ranges(out)
    }
}

/// An endpoint operand whose value may only be known at enumeration
/// time.
#[derive(Debug, Clone, PartialEq)]
pub enum Bound {
    Literal(Value),
    Parameter(usize),
}

impl Bound {
    fn resolve(&self, params: &[Value]) -> Result<Value> {
        match self {
            Bound::Literal(v) => Ok(v.clone()),
            Bound::Parameter(index) => params
                .get(*index)
                .cloned()
                .ok_or(Error::MissingParameter(*index)),
        }
    }
}

/// A symbolic endpoint whose key may be a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum EntireBound {
    NegativeInfinity,
    PositiveInfinity,
    Exact(Bound),
    Shifted(Bound, Shift),
}

impl EntireBound {
    fn resolve(&self, params: &[Value]) -> Result<Entire> {
        Ok(match self {
            EntireBound::NegativeInfinity => Entire::NegativeInfinity,
            EntireBound::PositiveInfinity => Entire::PositiveInfinity,
            EntireBound::Exact(bound) => Entire::Exact(bound.resolve(params)?),
            EntireBound::Shifted(bound, shift) => {
                Entire::Shifted(bound.resolve(params)?, *shift)
            }
        })
    }
}

/// One symbolic contiguous key range, the single-range counterpart of
/// [`RangeSetExpr`].
#[derive(Debug, Clone, PartialEq)]
pub struct RangeExpr {
    pub low: EntireBound,
    pub high: EntireBound,
}

impl RangeExpr {
    pub fn new(low: EntireBound, high: EntireBound) -> RangeExpr {
        RangeExpr { low, high }
    }

    pub fn full() -> RangeExpr {
        RangeExpr::new(EntireBound::NegativeInfinity, EntireBound::PositiveInfinity)
    }

    pub fn evaluate(&self, params: &[Value]) -> Result<KeyRange> {
        Ok(KeyRange::new(
            self.low.resolve(params)?,
            self.high.resolve(params)?,
        ))
    }

    /// The equivalent comparison form. Low and high bounds admit the
    /// same concrete keys as `>=`/`>` and `<=`/`<` on their keys, so
    /// the pair translates to an intersection of at most two
    /// comparisons.
    pub fn as_set_expr(&self) -> RangeSetExpr {
        let mut parts = Vec::new();
        match &self.low {
            EntireBound::NegativeInfinity => {}
            EntireBound::PositiveInfinity => return RangeSetExpr::Empty,
            EntireBound::Exact(bound) | EntireBound::Shifted(bound, Shift::Before) => {
                parts.push(RangeSetExpr::Compare {
                    op: CompareOp::Ge,
                    operand: bound.clone(),
                });
            }
            EntireBound::Shifted(bound, Shift::After) => parts.push(RangeSetExpr::Compare {
                op: CompareOp::Gt,
                operand: bound.clone(),
            }),
        }
        match &self.high {
            EntireBound::PositiveInfinity => {}
            EntireBound::NegativeInfinity => return RangeSetExpr::Empty,
            EntireBound::Exact(bound) | EntireBound::Shifted(bound, Shift::After) => {
                parts.push(RangeSetExpr::Compare {
                    op: CompareOp::Le,
                    operand: bound.clone(),
                });
            }
            EntireBound::Shifted(bound, Shift::Before) => parts.push(RangeSetExpr::Compare {
                op: CompareOp::Lt,
                operand: bound.clone(),
            }),
        }
        RangeSetExpr::intersect(parts)
    }
}

/// A symbolic range set over the leading key column, built at compile
/// time and evaluated against parameter bindings per enumeration.
#[derive(Debug, Clone, PartialEq)]
pub enum RangeSetExpr {
    /// Every key. What unmappable predicates degrade to.
    Full,
    /// No key. A detected contradiction.
    Empty,
    /// One comparison of the key column against an operand.
    Compare { op: CompareOp, operand: Bound },
    Union(Vec<RangeSetExpr>),
    Intersect(Vec<RangeSetExpr>),
}

impl RangeSetExpr {
    /// Combine subexpressions as a union, collapsing trivial cases.
    pub fn union(parts: Vec<RangeSetExpr>) -> RangeSetExpr {
        if parts.iter().any(|p| matches!(p, RangeSetExpr::Full)) {
            return RangeSetExpr::Full;
        }
        let mut parts: Vec<RangeSetExpr> = parts
            .into_iter()
            .filter(|p| !matches!(p, RangeSetExpr::Empty))
            .collect();
        match parts.len() {
            0 => RangeSetExpr::Empty,
            1 => parts.pop().unwrap_or(RangeSetExpr::Empty),
            _ => RangeSetExpr::Union(parts),
        }
    }

    /// Combine subexpressions as an intersection, collapsing trivial
    /// cases.
    pub fn intersect(parts: Vec<RangeSetExpr>) -> RangeSetExpr {
        if parts.iter().any(|p| matches!(p, RangeSetExpr::Empty)) {
            return RangeSetExpr::Empty;
        }
        let mut parts: Vec<RangeSetExpr> = parts
            .into_iter()
            .filter(|p| !matches!(p, RangeSetExpr::Full))
            .collect();
        match parts.len() {
            0 => RangeSetExpr::Full,
            1 => parts.pop().unwrap_or(RangeSetExpr::Full),
            _ => RangeSetExpr::Intersect(parts),
        }
    }

    /// Number of comparison leaves, the cost measure capped during
    /// extraction.
    pub fn leaf_count(&self) -> usize {
        match self {
            RangeSetExpr::Full | RangeSetExpr::Empty => 0,
            RangeSetExpr::Compare { .. } => 1,
            RangeSetExpr::Union(parts) | RangeSetExpr::Intersect(parts) => {
                parts.iter().map(RangeSetExpr::leaf_count).sum()
            }
        }
    }

    /// Evaluate to a concrete normalized range set.
    pub fn evaluate(&self, params: &[Value]) -> Result<RangeSet> {
        match self {
            RangeSetExpr::Full => Ok(RangeSet::full()),
            RangeSetExpr::Empty => Ok(RangeSet::empty()),
            RangeSetExpr::Compare { op, operand } => {
                let key = operand.resolve(params)?;
                Ok(comparison_ranges(*op, key))
            }
            RangeSetExpr::Union(parts) => {
                let mut acc = RangeSet::empty();
                for part in parts {
                    acc = acc.union(&part.evaluate(params)?);
                }
                Ok(acc)
            }
            RangeSetExpr::Intersect(parts) => {
                let mut acc = RangeSet::full();
                for part in parts {
                    acc = acc.intersect(&part.evaluate(params)?);
                }
                Ok(acc)
            }
        }
    }
}

/// The primitive range set of one comparison against a known key.
fn comparison_ranges(op: CompareOp, key: Value) -> RangeSet {
    let ranges = match op {
        CompareOp::Eq => vec![KeyRange::new(
            Entire::Shifted(key.clone(), Shift::Before),
            Entire::Shifted(key, Shift::After),
        )],
        CompareOp::Ne => vec![
            KeyRange::new(
                Entire::NegativeInfinity,
                Entire::Shifted(key.clone(), Shift::Before),
            ),
            KeyRange::new(Entire::Shifted(key, Shift::After), Entire::PositiveInfinity),
        ],
        CompareOp::Lt => vec![KeyRange::new(
            Entire::NegativeInfinity,
            Entire::Shifted(key, Shift::Before),
        )],
        CompareOp::Le => vec![KeyRange::new(Entire::NegativeInfinity, Entire::Exact(key))],
        CompareOp::Gt => vec![KeyRange::new(
            Entire::Shifted(key, Shift::After),
            Entire::PositiveInfinity,
        )],
        CompareOp::Ge => vec![KeyRange::new(Entire::Exact(key), Entire::PositiveInfinity)],
    };
    RangeSet::from_ranges(ranges)
}
