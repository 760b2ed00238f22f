//! Physical operators and their enumeration.
//!
//! Compilation turns a logical [`crate::provider::Provider`] tree into
//! an [`Executable`] whose nodes pull rows from their children one at a
//! time. All per-enumeration state (sort buffers, hash tables, the
//! outer-row stack of correlated subqueries) lives in an
//! [`EnumerationContext`] passed explicitly to every call, so one
//! compiled plan can serve any number of enumerations with different
//! parameter bindings.

mod aggregate;
mod context;
mod join;
mod node;

pub use context::EnumerationContext;
pub use join::{select_join_algorithm, JoinAlgorithm, JoinSideCaps};
pub use node::Executable;

pub(crate) use aggregate::GroupingSpec;
pub(crate) use join::{JoinSpec, JoinTable};
pub(crate) use node::ExecNode;
