//! Per-enumeration state.

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

use recset_tuple::{PackedTuple, Tuple, Value};

use crate::error::{Error, Result};
use crate::exec::JoinTable;

/// Everything one enumeration of a compiled plan mutates.
///
/// A context is created fresh per enumeration and discarded afterwards;
/// it is never shared between concurrent enumerations. Materialized
/// buffers and join tables are memoized here keyed by the identity of
/// the logical node that produced them, which lets a subtree shared
/// within one plan materialize once, and lets uncorrelated subtrees
/// under an apply survive re-enumeration per outer row.
pub struct EnumerationContext {
    params: Box<[Value]>,
    rows: RefCell<HashMap<usize, Arc<[PackedTuple]>>>,
    tables: RefCell<HashMap<usize, Arc<JoinTable>>>,
    outer: RefCell<Vec<PackedTuple>>,
}

impl EnumerationContext {
    pub fn new() -> EnumerationContext {
        EnumerationContext::with_params(Vec::new())
    }

    /// A context with positional parameter bindings.
    pub fn with_params(params: Vec<Value>) -> EnumerationContext {
        EnumerationContext {
            params: params.into(),
            rows: RefCell::new(HashMap::new()),
            tables: RefCell::new(HashMap::new()),
            outer: RefCell::new(Vec::new()),
        }
    }

    pub fn params(&self) -> &[Value] {
        &self.params
    }

    pub(crate) fn param(&self, index: usize) -> Result<Value> {
        self.params
            .get(index)
            .cloned()
            .ok_or(Error::MissingParameter(index))
    }

    /// Field of the row bound by the nearest enclosing apply.
    pub(crate) fn outer_field(&self, index: usize) -> Result<Option<Value>> {
        let outer = self.outer.borrow();
        let row = outer.last().ok_or_else(|| {
            Error::InvalidPlan("outer column referenced outside an apply".into())
        })?;
        Ok(row.get(index)?)
    }

    pub(crate) fn push_outer(&self, row: PackedTuple) {
        self.outer.borrow_mut().push(row);
    }

    pub(crate) fn pop_outer(&self) {
        self.outer.borrow_mut().pop();
    }

    pub(crate) fn cached_rows(&self, key: usize) -> Option<Arc<[PackedTuple]>> {
        self.rows.borrow().get(&key).cloned()
    }

    pub(crate) fn store_rows(&self, key: usize, rows: Arc<[PackedTuple]>) {
        self.rows.borrow_mut().insert(key, rows);
    }

    pub(crate) fn cached_table(&self, key: usize) -> Option<Arc<JoinTable>> {
        self.tables.borrow().get(&key).cloned()
    }

    pub(crate) fn store_table(&self, key: usize, table: Arc<JoinTable>) {
        self.tables.borrow_mut().insert(key, table);
    }
}

impl Default for EnumerationContext {
    fn default() -> Self {
        EnumerationContext::new()
    }
}
