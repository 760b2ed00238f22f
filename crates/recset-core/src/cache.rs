//! Compiled plan cache.
//!
//! Compiling a provider tree runs the rewrite passes and allocates the
//! operator tree; callers that enumerate the same logical query
//! repeatedly can skip that work by keying compiled plans on a
//! structural fingerprint of the tree.
//!
//! Literal values take part in the fingerprint because they are baked
//! into the compiled predicates and key ranges. Parameter slots hash by
//! index only, so a parameterized plan is fingerprint-stable across
//! bindings; parameters are the mechanism for sharing one plan across
//! values. Leaf sources hash by identity: two scans are the same scan
//! only when they read the same source object.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::mem::discriminant;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use recset_tuple::Value;

use crate::compile;
use crate::error::Result;
use crate::exec::Executable;
use crate::expr::Expr;
use crate::provider::{Provider, ProviderKind};
use crate::range::{Bound, EntireBound, RangeSetExpr};

/// Structural fingerprint of a provider tree.
///
/// Equal trees over the same leaf sources produce equal fingerprints.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PlanFingerprint {
    hash: u64,
}

impl PlanFingerprint {
    pub fn from_provider(provider: &Provider) -> Self {
        let mut hasher = DefaultHasher::new();
        hash_provider(provider, &mut hasher);
        PlanFingerprint {
            hash: hasher.finish(),
        }
    }
}

fn hash_provider<H: Hasher>(provider: &Provider, hasher: &mut H) {
    let kind = provider.kind();
    discriminant(kind).hash(hasher);
    match kind {
        ProviderKind::Scan { name, source } => {
            name.hash(hasher);
            (Arc::as_ptr(source) as *const () as usize).hash(hasher);
        }
        ProviderKind::IndexScan { name, source } => {
            name.hash(hasher);
            (Arc::as_ptr(source) as *const () as usize).hash(hasher);
        }
        ProviderKind::Filter { source, predicate } => {
            hash_provider(source, hasher);
            hash_expr(predicate, hasher);
        }
        ProviderKind::Select { source, columns } => {
            hash_provider(source, hasher);
            columns.hash(hasher);
        }
        ProviderKind::Sort { source, order } => {
            hash_provider(source, hasher);
            order.keys().hash(hasher);
        }
        ProviderKind::Distinct { source } => hash_provider(source, hasher),
        ProviderKind::Concat { left, right }
        | ProviderKind::Union { left, right }
        | ProviderKind::Intersect { left, right }
        | ProviderKind::Except { left, right } => {
            hash_provider(left, hasher);
            hash_provider(right, hasher);
        }
        ProviderKind::Join {
            left,
            right,
            kind,
            hint,
            pairs,
        } => {
            hash_provider(left, hasher);
            hash_provider(right, hasher);
            kind.hash(hasher);
            hint.hash(hasher);
            pairs.hash(hasher);
        }
        ProviderKind::Apply { left, right, kind } => {
            hash_provider(left, hasher);
            hash_provider(right, hasher);
            kind.hash(hasher);
        }
        ProviderKind::Aggregate {
            source,
            group_by,
            columns,
        } => {
            hash_provider(source, hasher);
            group_by.hash(hasher);
            for column in columns {
                column.function.hash(hasher);
                column.column.hash(hasher);
                column.name.hash(hasher);
            }
        }
        ProviderKind::RowNumber { source, name } => {
            hash_provider(source, hasher);
            name.hash(hasher);
        }
        ProviderKind::Range { source, range } => {
            hash_provider(source, hasher);
            hash_endpoint(&range.low, hasher);
            hash_endpoint(&range.high, hasher);
        }
        ProviderKind::RangeSet { source, ranges } => {
            hash_provider(source, hasher);
            hash_range_set(ranges, hasher);
        }
    }
}

fn hash_expr<H: Hasher>(expr: &Expr, hasher: &mut H) {
    discriminant(expr).hash(hasher);
    match expr {
        Expr::Column(index) | Expr::Outer(index) | Expr::Parameter(index) => {
            index.hash(hasher);
        }
        Expr::Literal(value) => hash_value(value, hasher),
        Expr::Compare { op, left, right } => {
            op.hash(hasher);
            hash_expr(left, hasher);
            hash_expr(right, hasher);
        }
        Expr::Arith { op, left, right } => {
            op.hash(hasher);
            hash_expr(left, hasher);
            hash_expr(right, hasher);
        }
        Expr::And(left, right) | Expr::Or(left, right) => {
            hash_expr(left, hasher);
            hash_expr(right, hasher);
        }
        Expr::Not(inner) | Expr::IsNull(inner) => hash_expr(inner, hasher),
    }
}

fn hash_value<H: Hasher>(value: &Value, hasher: &mut H) {
    discriminant(value).hash(hasher);
    match value {
        Value::Bool(v) => v.hash(hasher),
        Value::Int8(v) => v.hash(hasher),
        Value::Int16(v) => v.hash(hasher),
        Value::Int32(v) => v.hash(hasher),
        Value::Int64(v) => v.hash(hasher),
        Value::UInt8(v) => v.hash(hasher),
        Value::UInt16(v) => v.hash(hasher),
        Value::UInt32(v) => v.hash(hasher),
        Value::UInt64(v) => v.hash(hasher),
        Value::Float32(v) => v.to_bits().hash(hasher),
        Value::Float64(v) => v.to_bits().hash(hasher),
        Value::Timestamp(v) | Value::Interval(v) => v.hash(hasher),
        Value::Str(v) => v.hash(hasher),
        Value::Bytes(v) => v.hash(hasher),
        Value::Uuid(v) => v.hash(hasher),
    }
}

fn hash_bound<H: Hasher>(bound: &Bound, hasher: &mut H) {
    discriminant(bound).hash(hasher);
    match bound {
        Bound::Literal(value) => hash_value(value, hasher),
        Bound::Parameter(index) => index.hash(hasher),
    }
}

fn hash_endpoint<H: Hasher>(endpoint: &EntireBound, hasher: &mut H) {
    discriminant(endpoint).hash(hasher);
    match endpoint {
        EntireBound::NegativeInfinity | EntireBound::PositiveInfinity => {}
        EntireBound::Exact(bound) => hash_bound(bound, hasher),
        EntireBound::Shifted(bound, shift) => {
            hash_bound(bound, hasher);
            shift.hash(hasher);
        }
    }
}

fn hash_range_set<H: Hasher>(set: &RangeSetExpr, hasher: &mut H) {
    discriminant(set).hash(hasher);
    match set {
        RangeSetExpr::Full | RangeSetExpr::Empty => {}
        RangeSetExpr::Compare { op, operand } => {
            op.hash(hasher);
            hash_bound(operand, hasher);
        }
        RangeSetExpr::Union(parts) | RangeSetExpr::Intersect(parts) => {
            parts.len().hash(hasher);
            for part in parts {
                hash_range_set(part, hasher);
            }
        }
    }
}

/// A cached compiled plan with its usage count.
struct CachedPlan {
    plan: Arc<Executable>,
    hit_count: AtomicU64,
}

impl CachedPlan {
    fn new(plan: Arc<Executable>) -> Self {
        CachedPlan {
            plan,
            hit_count: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hit_count.fetch_add(1, AtomicOrdering::Relaxed);
    }

    fn hits(&self) -> u64 {
        self.hit_count.load(AtomicOrdering::Relaxed)
    }
}

/// Thread-safe cache of compiled plans keyed by [`PlanFingerprint`].
///
/// At capacity the entry with the fewest hits is evicted. Cached plans
/// capture their leaf sources, so callers must [`invalidate`] when a
/// source's contents are replaced.
///
/// [`invalidate`]: PlanCache::invalidate
pub struct PlanCache {
    cache: RwLock<HashMap<PlanFingerprint, CachedPlan>>,
    max_entries: usize,
    stats: CacheStats,
}

impl PlanCache {
    pub fn new(max_entries: usize) -> Self {
        PlanCache {
            cache: RwLock::new(HashMap::new()),
            max_entries,
            stats: CacheStats::default(),
        }
    }

    /// Check for a cached plan without touching the counters.
    pub fn contains(&self, fingerprint: &PlanFingerprint) -> bool {
        self.cache.read().contains_key(fingerprint)
    }

    /// Look up a compiled plan.
    pub fn get(&self, fingerprint: &PlanFingerprint) -> Option<Arc<Executable>> {
        let guard = self.cache.read();
        if let Some(cached) = guard.get(fingerprint) {
            cached.record_hit();
            self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
            return Some(cached.plan.clone());
        }
        self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
        None
    }

    /// Insert a compiled plan, evicting the least-used entry when full.
    pub fn insert(&self, fingerprint: PlanFingerprint, plan: Arc<Executable>) {
        let mut guard = self.cache.write();
        if guard.len() >= self.max_entries && !guard.contains_key(&fingerprint) {
            self.evict_least_used(&mut guard);
        }
        guard.insert(fingerprint, CachedPlan::new(plan));
    }

    /// Fetch the compiled form of a provider tree, compiling on miss.
    pub fn get_or_compile(&self, provider: &Arc<Provider>) -> Result<Arc<Executable>> {
        let fingerprint = PlanFingerprint::from_provider(provider);
        if let Some(plan) = self.get(&fingerprint) {
            return Ok(plan);
        }
        let plan = Arc::new(compile::compile(provider)?);
        self.insert(fingerprint, plan.clone());
        debug!(
            fingerprint = fingerprint.hash,
            entries = self.len(),
            "Cached compiled plan"
        );
        Ok(plan)
    }

    /// Drop every cached plan. Required when an underlying source's
    /// contents are replaced, since plans capture their sources.
    pub fn invalidate(&self) {
        self.cache.write().clear();
    }

    fn evict_least_used(&self, cache: &mut HashMap<PlanFingerprint, CachedPlan>) {
        let coldest = cache
            .iter()
            .min_by_key(|(_, cached)| cached.hits())
            .map(|(key, _)| *key);
        if let Some(key) = coldest {
            cache.remove(&key);
            self.stats.evictions.fetch_add(1, AtomicOrdering::Relaxed);
            debug!(fingerprint = key.hash, "Evicted cached plan");
        }
    }

    pub fn len(&self) -> usize {
        self.cache.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Point-in-time counters for reporting.
    pub fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            entries: self.len(),
            hits: self.stats.hits(),
            misses: self.stats.misses(),
            evictions: self.stats.evictions(),
            hit_rate: self.stats.hit_rate(),
        }
    }
}

/// Running cache counters.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    pub fn evictions(&self) -> u64 {
        self.evictions.load(AtomicOrdering::Relaxed)
    }

    /// Hit rate in `0.0..=1.0`; zero before any lookup.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// Serializable view of the cache counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub hit_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::EnumerationContext;
    use crate::header::{Column, Header};
    use crate::source::{MemorySource, TupleSource};
    use recset_tuple::{FieldType, PackedTuple, Tuple, ValueType};

    fn shared_source() -> Arc<dyn TupleSource> {
        let header = Header::new(vec![Column::new(
            "id",
            FieldType::scalar(ValueType::Int32),
        )]);
        let rows = [1, 2, 3]
            .iter()
            .map(|&id| {
                let mut row = PackedTuple::new(header.descriptor().clone());
                row.set(0, Some(Value::Int32(id))).unwrap();
                row
            })
            .collect();
        MemorySource::new(header, rows).unwrap().into_source()
    }

    fn filtered(source: &Arc<dyn TupleSource>, threshold: i32) -> Arc<Provider> {
        Arc::new(
            Provider::filter(
                Provider::scan("rows", source.clone()),
                Expr::gt(Expr::column(0), Expr::literal(Value::Int32(threshold))),
            )
            .unwrap(),
        )
    }

    #[test]
    fn test_fingerprint_structural_equality() {
        let source = shared_source();
        let a = filtered(&source, 1);
        let b = filtered(&source, 1);
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(
            PlanFingerprint::from_provider(&a),
            PlanFingerprint::from_provider(&b)
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_literals() {
        let source = shared_source();
        assert_ne!(
            PlanFingerprint::from_provider(&filtered(&source, 1)),
            PlanFingerprint::from_provider(&filtered(&source, 2))
        );
    }

    #[test]
    fn test_fingerprint_distinguishes_sources() {
        let a = filtered(&shared_source(), 1);
        let b = filtered(&shared_source(), 1);
        assert_ne!(
            PlanFingerprint::from_provider(&a),
            PlanFingerprint::from_provider(&b)
        );
    }

    #[test]
    fn test_fingerprint_parameter_slots() {
        let source = shared_source();
        let by_slot = |slot| {
            Arc::new(
                Provider::filter(
                    Provider::scan("rows", source.clone()),
                    Expr::gt(Expr::column(0), Expr::parameter(slot)),
                )
                .unwrap(),
            )
        };
        assert_eq!(
            PlanFingerprint::from_provider(&by_slot(0)),
            PlanFingerprint::from_provider(&by_slot(0))
        );
        assert_ne!(
            PlanFingerprint::from_provider(&by_slot(0)),
            PlanFingerprint::from_provider(&by_slot(1))
        );
        assert_ne!(
            PlanFingerprint::from_provider(&by_slot(0)),
            PlanFingerprint::from_provider(&filtered(&source, 0))
        );
    }

    #[test]
    fn test_get_or_compile_shares_one_plan() {
        let cache = PlanCache::new(8);
        let source = shared_source();
        let plan = filtered(&source, 1);

        let first = cache.get_or_compile(&plan).unwrap();
        let second = cache.get_or_compile(&plan).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().misses(), 1);
        assert_eq!(cache.stats().hits(), 1);

        // The cached plan still enumerates correctly.
        let ctx = EnumerationContext::new();
        let rows: Vec<PackedTuple> = second
            .enumerate(&ctx)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn test_eviction_prefers_cold_plans() {
        let cache = PlanCache::new(2);
        let source = shared_source();
        let hot = filtered(&source, 1);
        let cold = filtered(&source, 2);
        let newcomer = filtered(&source, 3);

        cache.get_or_compile(&hot).unwrap();
        cache.get_or_compile(&cold).unwrap();
        cache.get_or_compile(&hot).unwrap();
        cache.get_or_compile(&newcomer).unwrap();

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.stats().evictions(), 1);
        assert!(cache
            .get(&PlanFingerprint::from_provider(&hot))
            .is_some());
        assert!(cache
            .get(&PlanFingerprint::from_provider(&cold))
            .is_none());
    }

    #[test]
    fn test_invalidate_clears_everything() {
        let cache = PlanCache::new(8);
        let source = shared_source();
        cache.get_or_compile(&filtered(&source, 1)).unwrap();
        assert_eq!(cache.len(), 1);

        cache.invalidate();
        assert!(cache.is_empty());

        let snapshot = cache.snapshot();
        assert_eq!(snapshot.entries, 0);
        assert_eq!(snapshot.misses, 1);
    }
}
