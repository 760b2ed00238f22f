//! Row suppliers behind the leaf providers.
//!
//! A [`TupleSource`] hands out rows in whatever order it stores them; an
//! [`IndexSource`] additionally supports ordered access over one key
//! column. The in-memory implementations here back tests, benches, and
//! any caller that materializes rows before querying them.

use std::cmp::Ordering;
use std::sync::Arc;

use recset_tuple::{PackedTuple, Tuple, Value};

use crate::error::{Error, Result};
use crate::expr::compare_keys;
use crate::header::{Header, SortOrder};
use crate::range::{Entire, RangeSet};

/// Boxed fallible row stream.
pub type TupleIter<'a> = Box<dyn Iterator<Item = Result<PackedTuple>> + 'a>;

/// A row supplier enumerated front to back.
pub trait TupleSource: Send + Sync {
    /// Header of the produced rows, including any ordering the source
    /// guarantees.
    fn header(&self) -> &Header;

    /// Enumerate every row.
    fn scan(&self) -> Result<TupleIter<'_>>;
}

/// A row supplier with ordered access over a leading key column.
pub trait IndexSource: TupleSource {
    /// The column the rows are ordered by.
    fn key_column(&self) -> usize;

    /// Enumerate the rows whose key falls inside the set, in key order.
    fn scan_ranges(&self, ranges: &RangeSet) -> Result<TupleIter<'_>>;

    /// Enumerate the rows whose key equals the probe, in key order.
    /// A null probe returns the null-keyed rows, matching the tuple
    /// equality the other join algorithms use.
    fn lookup(&self, key: Option<&Value>) -> Result<TupleIter<'_>>;
}

fn check_rows(header: &Header, rows: &[PackedTuple]) -> Result<()> {
    for row in rows {
        if *row.descriptor() != *header.descriptor() {
            return Err(Error::HeaderMismatch(
                "row descriptor does not match source header".into(),
            ));
        }
    }
    Ok(())
}

/// An unordered in-memory row supplier.
pub struct MemorySource {
    header: Header,
    rows: Vec<PackedTuple>,
}

impl MemorySource {
    pub fn new(header: Header, rows: Vec<PackedTuple>) -> Result<MemorySource> {
        check_rows(&header, &rows)?;
        Ok(MemorySource { header, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Share as a leaf-ready trait object.
    pub fn into_source(self) -> Arc<dyn TupleSource> {
        Arc::new(self)
    }
}

impl TupleSource for MemorySource {
    fn header(&self) -> &Header {
        &self.header
    }

    fn scan(&self) -> Result<TupleIter<'_>> {
        Ok(Box::new(self.rows.iter().cloned().map(Ok)))
    }
}

/// An in-memory row supplier kept sorted ascending by one key column,
/// nulls first.
pub struct MemoryIndex {
    header: Header,
    key_column: usize,
    rows: Vec<PackedTuple>,
}

impl MemoryIndex {
    pub fn new(header: Header, key_column: usize, mut rows: Vec<PackedTuple>) -> Result<MemoryIndex> {
        header.check_column(key_column)?;
        check_rows(&header, &rows)?;
        rows.sort_by(|a, b| {
            compare_keys(
                key_of(a, key_column).as_ref(),
                key_of(b, key_column).as_ref(),
            )
        });
        let header = header.with_order(SortOrder::ascending(&[key_column]));
        Ok(MemoryIndex {
            header,
            key_column,
            rows,
        })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Share as a leaf-ready trait object.
    pub fn into_source(self) -> Arc<dyn IndexSource> {
        Arc::new(self)
    }

    /// Index bounds of the rows inside one endpoint pair, found by
    /// binary search over the sorted rows.
    fn bounds(&self, low: &Entire, high: &Entire) -> (usize, usize) {
        let key = self.key_column;
        let start = self
            .rows
            .partition_point(|row| endpoint_position(low, key_of(row, key).as_ref()) == Ordering::Greater);
        let len = self.rows[start..]
            .partition_point(|row| endpoint_position(high, key_of(row, key).as_ref()) != Ordering::Less);
        (start, start + len)
    }
}

fn key_of(row: &PackedTuple, column: usize) -> Option<Value> {
    // The column index is validated at construction.
    row.get(column).ok().flatten()
}

/// Where an endpoint sits relative to a possibly-null key. Null keys
/// sort below every concrete key, above only negative infinity.
fn endpoint_position(endpoint: &Entire, key: Option<&Value>) -> Ordering {
    match key {
        Some(key) => endpoint.compare_key(key),
        None => match endpoint {
            Entire::NegativeInfinity => Ordering::Less,
            _ => Ordering::Greater,
        },
    }
}

impl TupleSource for MemoryIndex {
    fn header(&self) -> &Header {
        &self.header
    }

    fn scan(&self) -> Result<TupleIter<'_>> {
        Ok(Box::new(self.rows.iter().cloned().map(Ok)))
    }
}

impl IndexSource for MemoryIndex {
    fn key_column(&self) -> usize {
        self.key_column
    }

    fn scan_ranges(&self, ranges: &RangeSet) -> Result<TupleIter<'_>> {
        // Ranges are sorted and non-overlapping, so concatenating the
        // per-range slices preserves key order.
        let spans: Vec<(usize, usize)> = ranges
            .ranges()
            .iter()
            .map(|r| self.bounds(&r.low, &r.high))
            .collect();
        Ok(Box::new(spans.into_iter().flat_map(move |(start, end)| {
            self.rows[start..end].iter().cloned().map(Ok)
        })))
    }

    fn lookup(&self, key: Option<&Value>) -> Result<TupleIter<'_>> {
        let (start, end) = match key {
            Some(key) => self.bounds(&Entire::Exact(key.clone()), &Entire::Exact(key.clone())),
            // Null keys are the sorted prefix.
            None => {
                let end = self
                    .rows
                    .partition_point(|row| key_of(row, self.key_column).is_none());
                (0, end)
            }
        };
        Ok(Box::new(self.rows[start..end].iter().cloned().map(Ok)))
    }
}
