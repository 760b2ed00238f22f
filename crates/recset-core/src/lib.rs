//! Record set execution core.
//!
//! Logical plan trees built from [`Provider`] nodes are compiled into
//! physical operator trees and enumerated lazily against bit-packed
//! tuples. Compilation runs the rewrite passes (ordering correction,
//! index range restriction, redundant column elimination), selects a
//! join algorithm per join from the capabilities of its compiled
//! sides, and produces an immutable [`Executable`] that can be
//! enumerated any number of times with different parameter bindings.
//!
//! # Modules
//!
//! - [`provider`] - Logical plan nodes and their derived headers
//! - [`expr`] - Predicate and scalar expressions over rows
//! - [`header`] - Output shape and ordering metadata
//! - [`range`] - Key ranges, endpoint algebra, and symbolic range sets
//! - [`source`] - Row suppliers behind plan leaves
//! - [`compile`] - Rewrite passes and operator compilation
//! - [`exec`] - Physical operators and pull-based enumeration
//! - [`cache`] - Compiled plan cache keyed by structural fingerprint
//! - [`explain`] - Plan explanation without execution
//! - [`error`] - Error types

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod cache;
pub mod compile;
pub mod error;
pub mod exec;
pub mod explain;
pub mod expr;
pub mod header;
pub mod provider;
pub mod range;
pub mod source;

pub use cache::{CacheSnapshot, CacheStats, PlanCache, PlanFingerprint};
pub use compile::compile;
pub use error::{Error, Result};
pub use exec::{select_join_algorithm, EnumerationContext, Executable, JoinAlgorithm, JoinSideCaps};
pub use explain::{ExplainNode, ExplainService, OrderSummary, PlanExplanation};
pub use expr::{ArithOp, CompareOp, Expr};
pub use header::{Column, Direction, Header, SortOrder};
pub use provider::{
    AggregateColumn, AggregateFn, JoinHint, JoinKind, Provider, ProviderKind,
};
pub use range::{Bound, Entire, EntireBound, KeyRange, RangeExpr, RangeSet, RangeSetExpr, Shift};
pub use source::{IndexSource, MemoryIndex, MemorySource, TupleIter, TupleSource};

/// Re-export the tuple crate.
pub use recset_tuple as tuple;
