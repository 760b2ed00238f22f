//! Output headers: ordered columns, their types, and known sort order.

use recset_tuple::{FieldType, TupleDescriptor};

use crate::error::{Error, Result};

/// Sort direction of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

/// Known sort order of a row sequence: `(column index, direction)` pairs,
/// outermost key first. Empty means no guaranteed order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct SortOrder {
    keys: Vec<(usize, Direction)>,
}

impl SortOrder {
    /// No guaranteed order.
    pub fn unordered() -> Self {
        SortOrder { keys: Vec::new() }
    }

    /// Order by the given keys, outermost first.
    pub fn new(keys: Vec<(usize, Direction)>) -> Self {
        SortOrder { keys }
    }

    /// Ascending order over the given columns.
    pub fn ascending(columns: &[usize]) -> Self {
        SortOrder {
            keys: columns.iter().map(|&c| (c, Direction::Asc)).collect(),
        }
    }

    pub fn keys(&self) -> &[(usize, Direction)] {
        &self.keys
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// The order surviving a projection: the longest prefix whose columns
    /// are all picked, remapped to the projected indices.
    pub fn project(&self, columns: &[usize]) -> SortOrder {
        let mut keys = Vec::new();
        for &(column, direction) in &self.keys {
            match columns.iter().position(|&c| c == column) {
                Some(remapped) => keys.push((remapped, direction)),
                None => break,
            }
        }
        SortOrder { keys }
    }

    /// Check whether the leading keys cover exactly `columns`, in order,
    /// ignoring directions.
    pub fn starts_with_columns(&self, columns: &[usize]) -> bool {
        columns.len() <= self.keys.len()
            && columns
                .iter()
                .zip(&self.keys)
                .all(|(&want, &(have, _))| want == have)
    }

    /// Directions of the leading keys when they cover exactly `columns`
    /// in order, `None` otherwise.
    pub fn direction_profile(&self, columns: &[usize]) -> Option<Vec<Direction>> {
        if !self.starts_with_columns(columns) {
            return None;
        }
        Some(self.keys[..columns.len()].iter().map(|&(_, d)| d).collect())
    }

    /// Check whether rows ordered by `self` are also ordered by `wanted`.
    pub fn satisfies(&self, wanted: &SortOrder) -> bool {
        wanted.keys.len() <= self.keys.len()
            && wanted.keys.iter().zip(&self.keys).all(|(w, h)| w == h)
    }
}

/// One output column: a name for diagnostics plus its field type.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Column {
    pub name: String,
    pub field_type: FieldType,
}

impl Column {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Column {
            name: name.into(),
            field_type,
        }
    }
}

/// Derived output shape of a provider: ordered columns, the tuple
/// descriptor they induce, and any known sort order.
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    columns: Box<[Column]>,
    descriptor: TupleDescriptor,
    order: SortOrder,
}

impl Header {
    /// Build a header with no known order.
    pub fn new(columns: Vec<Column>) -> Self {
        let fields: Vec<FieldType> = columns.iter().map(|c| c.field_type).collect();
        Header {
            descriptor: TupleDescriptor::intern(&fields),
            columns: columns.into_boxed_slice(),
            order: SortOrder::unordered(),
        }
    }

    /// Replace the known sort order.
    pub fn with_order(mut self, order: SortOrder) -> Self {
        self.order = order;
        self
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn arity(&self) -> usize {
        self.columns.len()
    }

    pub fn descriptor(&self) -> &TupleDescriptor {
        &self.descriptor
    }

    pub fn order(&self) -> &SortOrder {
        &self.order
    }

    /// Bounds-check a column reference against this header.
    pub fn check_column(&self, column: usize) -> Result<()> {
        if column >= self.columns.len() {
            return Err(Error::ColumnOutOfRange {
                column,
                arity: self.columns.len(),
            });
        }
        Ok(())
    }

    /// The header a projection of `columns` produces, with the surviving
    /// order remapped.
    pub fn select(&self, columns: &[usize]) -> Result<Header> {
        let mut picked = Vec::with_capacity(columns.len());
        for &column in columns {
            self.check_column(column)?;
            picked.push(self.columns[column].clone());
        }
        let order = self.order.project(columns);
        Ok(Header::new(picked).with_order(order))
    }

    /// The header of a join output: left columns then right columns, left
    /// order preserved (every join implementation streams the left side in
    /// order).
    pub fn join(&self, right: &Header) -> Header {
        let mut columns = self.columns.to_vec();
        columns.extend(right.columns.iter().cloned());
        Header::new(columns).with_order(self.order.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use recset_tuple::ValueType;

    fn header() -> Header {
        Header::new(vec![
            Column::new("id", FieldType::scalar(ValueType::Int64)),
            Column::new("name", FieldType::scalar(ValueType::Str)),
            Column::new("age", FieldType::scalar(ValueType::Int32)),
        ])
    }

    #[test]
    fn test_header_descriptor_matches_columns() {
        let h = header();
        assert_eq!(h.arity(), 3);
        assert_eq!(h.descriptor().arity(), 3);
        assert_eq!(
            h.descriptor().fields()[1],
            FieldType::scalar(ValueType::Str)
        );
    }

    #[test]
    fn test_select_remaps_order() {
        let h = header().with_order(SortOrder::new(vec![
            (2, Direction::Asc),
            (0, Direction::Desc),
        ]));
        let picked = h.select(&[2, 1]).unwrap();
        assert_eq!(picked.arity(), 2);
        assert_eq!(picked.columns()[0].name, "age");
        // Only the first key survives; column 0 was dropped.
        assert_eq!(picked.order().keys(), &[(0, Direction::Asc)]);
    }

    #[test]
    fn test_select_out_of_range() {
        assert!(matches!(
            header().select(&[3]),
            Err(Error::ColumnOutOfRange { column: 3, .. })
        ));
    }

    #[test]
    fn test_join_concatenates_and_keeps_left_order() {
        let left = header().with_order(SortOrder::ascending(&[0]));
        let right = Header::new(vec![Column::new(
            "score",
            FieldType::scalar(ValueType::Float64),
        )]);
        let joined = left.join(&right);
        assert_eq!(joined.arity(), 4);
        assert_eq!(joined.columns()[3].name, "score");
        assert_eq!(joined.order().keys(), &[(0, Direction::Asc)]);
    }

    #[test]
    fn test_order_satisfies() {
        let order = SortOrder::new(vec![(0, Direction::Asc), (1, Direction::Desc)]);
        assert!(order.satisfies(&SortOrder::ascending(&[0])));
        assert!(order.satisfies(&order));
        assert!(!order.satisfies(&SortOrder::ascending(&[1])));
        assert!(!SortOrder::unordered().satisfies(&SortOrder::ascending(&[0])));
        assert!(order.satisfies(&SortOrder::unordered()));
    }

    #[test]
    fn test_direction_profile() {
        let order = SortOrder::new(vec![(1, Direction::Desc), (0, Direction::Asc)]);
        assert_eq!(
            order.direction_profile(&[1, 0]),
            Some(vec![Direction::Desc, Direction::Asc])
        );
        assert_eq!(order.direction_profile(&[0]), None);
        assert_eq!(order.direction_profile(&[1]), Some(vec![Direction::Desc]));
    }
}
