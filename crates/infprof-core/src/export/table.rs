//! Column-union table built from flattened rows.

use std::collections::HashMap;

use super::flatten::Row;
use crate::model::Value;

/// Rows over the union of their columns, in first-seen column order.
///
/// A row that lacks a column has a null cell there.
#[derive(Debug, Clone, Default)]
pub struct Table {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<Option<Value>>>,
}

/// Storage type of a column, inferred from its non-null cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Int,
    Float,
    Text,
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rows(rows: impl IntoIterator<Item = Row>) -> Self {
        let mut table = Self::new();
        for row in rows {
            table.push_row(row);
        }
        table
    }

    /// Appends a row; unseen columns are added at the end.
    /// A repeated key within one row keeps its last value.
    pub fn push_row(&mut self, row: Row) {
        let mut cells: Vec<Option<Value>> = Vec::new();
        for (key, value) in row {
            let idx = match self.index.get(&key) {
                Some(&idx) => idx,
                None => {
                    let idx = self.columns.len();
                    self.index.insert(key.clone(), idx);
                    self.columns.push(key);
                    idx
                }
            };
            if cells.len() <= idx {
                cells.resize(idx + 1, None);
            }
            cells[idx] = Some(value);
        }
        self.rows.push(cells);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn cell(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row)?.get(column)?.as_ref()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&Value> {
        self.cell(row, *self.index.get(column)?)
    }

    /// Cells of one column across all rows, nulls included.
    pub fn column(&self, column: usize) -> impl Iterator<Item = Option<&Value>> + '_ {
        (0..self.rows.len()).map(move |r| self.cell(r, column))
    }

    /// All ints -> `Int`; any float among numbers -> `Float`; anything
    /// textual (or an all-null column) -> `Text`.
    pub fn column_kind(&self, column: usize) -> ColumnKind {
        let mut kind = None;
        for value in self.column(column).flatten() {
            kind = match (kind, value) {
                (_, Value::Text(_)) => return ColumnKind::Text,
                (None | Some(ColumnKind::Int), Value::Int(_)) => Some(ColumnKind::Int),
                _ => Some(ColumnKind::Float),
            };
        }
        kind.unwrap_or(ColumnKind::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, Value)]) -> Row {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_union_of_columns_with_nulls() {
        let table = Table::from_rows(vec![
            row(&[("timestamp", Value::Int(1)), ("a", Value::Int(10))]),
            row(&[("timestamp", Value::Int(2)), ("b", Value::from("x"))]),
            row(&[
                ("timestamp", Value::Int(3)),
                ("b", Value::from("y")),
                ("a", Value::Int(30)),
            ]),
        ]);

        assert_eq!(table.columns(), ["timestamp", "a", "b"]);
        assert_eq!(table.len(), 3);
        assert_eq!(table.get(0, "b"), None);
        assert_eq!(table.get(1, "a"), None);
        assert_eq!(table.get(2, "a"), Some(&Value::Int(30)));
        assert_eq!(table.get(2, "b"), Some(&Value::from("y")));
        assert_eq!(table.get(0, "missing"), None);
    }

    #[test]
    fn test_column_kind_inference() {
        let table = Table::from_rows(vec![
            row(&[
                ("i", Value::Int(1)),
                ("f", Value::Int(1)),
                ("t", Value::Float(1.0)),
                ("n", Value::Int(1)),
            ]),
            row(&[
                ("i", Value::Int(2)),
                ("f", Value::Float(2.5)),
                ("t", Value::from("x")),
            ]),
        ]);
        assert_eq!(table.column_kind(0), ColumnKind::Int);
        assert_eq!(table.column_kind(1), ColumnKind::Float);
        assert_eq!(table.column_kind(2), ColumnKind::Text);
        assert_eq!(table.column_kind(3), ColumnKind::Int);
    }
}
