//! Row, table, and result-set containers.
//!
//! One execution yields a [`ResultSet`]: an ordered run of [`Table`]s,
//! one per result set the statement produced, each an ordered run of
//! name-keyed [`Row`]s. All three are immutable once handed to the
//! caller and serialize into plain JSON arrays/objects.

use std::collections::HashMap;
use std::ops::Index;

use serde::Serialize;

use crate::value::Value;

/// One decoded row, keyed by column name.
///
/// If a statement ever reports two columns with the same name, the
/// later one wins; the protocol leaves that case undefined.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Row {
    cells: HashMap<String, Value>,
}

impl Row {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, name: String, value: Value) {
        self.cells.insert(name, value);
    }

    /// Look a cell up by column name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.cells.get(name)
    }

    /// Boolean cell by name.
    pub fn get_bool(&self, name: &str) -> Option<bool> {
        self.get(name)?.as_bool()
    }

    /// Integer cell by name.
    pub fn get_i64(&self, name: &str) -> Option<i64> {
        self.get(name)?.as_i64()
    }

    /// Float cell by name; integers widen.
    pub fn get_f64(&self, name: &str) -> Option<f64> {
        self.get(name)?.as_f64()
    }

    /// Text cell by name.
    pub fn get_str(&self, name: &str) -> Option<&str> {
        self.get(name)?.as_str()
    }

    /// Binary or image cell by name.
    pub fn get_bytes(&self, name: &str) -> Option<&[u8]> {
        self.get(name)?.as_bytes()
    }

    /// True if the cell is SQL null or the column does not exist.
    pub fn is_null(&self, name: &str) -> bool {
        self.get(name).map(Value::is_null).unwrap_or(true)
    }

    /// Number of columns in the row.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// True if the row has no columns.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Column names, in no particular order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.cells.keys().map(String::as_str)
    }
}

impl Index<&str> for Row {
    type Output = Value;

    /// Panics if the column does not exist; use [`Row::get`] to probe.
    fn index(&self, name: &str) -> &Value {
        self.cells
            .get(name)
            .unwrap_or_else(|| panic!("no column named '{name}'"))
    }
}

/// One result set's rows, in fetch order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Table {
    rows: Vec<Row>,
}

impl Table {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// The rows as a slice.
    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// Iterate over the rows.
    pub fn iter(&self) -> std::slice::Iter<'_, Row> {
        self.rows.iter()
    }

    /// First row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// Row by position.
    pub fn get(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl IntoIterator for Table {
    type Item = Row;
    type IntoIter = std::vec::IntoIter<Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.into_iter()
    }
}

impl<'a> IntoIterator for &'a Table {
    type Item = &'a Row;
    type IntoIter = std::slice::Iter<'a, Row>;

    fn into_iter(self) -> Self::IntoIter {
        self.rows.iter()
    }
}

/// Everything one execution returned: a table per result set, in
/// statement order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ResultSet {
    tables: Vec<Table>,
}

impl ResultSet {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, table: Table) {
        self.tables.push(table);
    }

    /// The tables as a slice.
    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    /// Iterate over the tables.
    pub fn iter(&self) -> std::slice::Iter<'_, Table> {
        self.tables.iter()
    }

    /// First table, if any.
    pub fn first(&self) -> Option<&Table> {
        self.tables.first()
    }

    /// Table by position.
    pub fn get(&self, index: usize) -> Option<&Table> {
        self.tables.get(index)
    }

    /// Number of tables.
    pub fn len(&self) -> usize {
        self.tables.len()
    }

    /// True if the execution produced no result sets.
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl Index<usize> for ResultSet {
    type Output = Table;

    fn index(&self, index: usize) -> &Table {
        &self.tables[index]
    }
}

impl IntoIterator for ResultSet {
    type Item = Table;
    type IntoIter = std::vec::IntoIter<Table>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultSet {
    type Item = &'a Table;
    type IntoIter = std::slice::Iter<'a, Table>;

    fn into_iter(self) -> Self::IntoIter {
        self.tables.iter()
    }
}
