/// Buffered Result Module
///
/// This module provides the buffered tabular result types produced by
/// driver-native bulk fills: a single `Table` of columns and rows, and a
/// `DataSet` of several tables. Both keep rows in cursor order.
use std::collections::BTreeMap;

use crate::core::Result;
use crate::driver::Value;

/// A buffered, named table of columns and rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<impl Into<String>>) -> Self {
        Table {
            name: name.into(),
            columns: columns.into_iter().map(Into::into).collect(),
            rows: Vec::new(),
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    /// Finds a column's ordinal by name (case-insensitive).
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    /// Reads a cell by row and column ordinal.
    pub fn value(&self, row: usize, column: usize) -> Option<&Value> {
        self.rows.get(row).and_then(|r| r.get(column))
    }

    /// Splits the table into its parts. Drivers use this to hand the rows
    /// to a cursor without copying.
    pub fn into_parts(self) -> (Vec<String>, Vec<Vec<Value>>) {
        (self.columns, self.rows)
    }

    /// Renders the table as a simple string with headers and rows.
    pub fn render(&self) -> String {
        let mut output = String::new();
        if !self.columns.is_empty() {
            output.push_str(&self.columns.join(" | "));
            output.push('\n');
            let underline: Vec<String> = self
                .columns
                .iter()
                .map(|c| "-".repeat(c.len() + 2))
                .collect();
            output.push_str(&underline.join("-|-"));
            output.push('\n');
        }
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(|v| v.to_string()).collect();
            output.push_str(&cells.join(" | "));
            output.push('\n');
        }
        output
    }

    /// Exports the table rows as a JSON array of objects keyed by column
    /// name.
    pub fn to_json(&self) -> Result<String> {
        let mut rows = Vec::with_capacity(self.rows.len());
        for row in &self.rows {
            let mut object = BTreeMap::new();
            for (i, cell) in row.iter().enumerate() {
                if let Some(column) = self.columns.get(i) {
                    object.insert(column.clone(), json_value(cell));
                }
            }
            rows.push(object);
        }
        Ok(serde_json::to_string(&rows)?)
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Integer(i) => serde_json::Value::from(*i),
        Value::Real(r) => serde_json::Value::from(*r),
        Value::Text(t) => serde_json::Value::from(t.as_str()),
        Value::Bool(b) => serde_json::Value::from(*b),
        Value::Timestamp(ts) => {
            serde_json::Value::from(ts.format("%Y-%m-%d %H:%M:%S").to_string())
        }
        Value::Blob(b) => serde_json::Value::from(format!("<BLOB: {} bytes>", b.len())),
    }
}

/// A buffered multi-table result.
#[derive(Debug, Clone, Default)]
pub struct DataSet {
    tables: Vec<Table>,
}

impl DataSet {
    pub fn new() -> Self {
        DataSet { tables: Vec::new() }
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn push_table(&mut self, table: Table) {
        self.tables.push(table);
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }
}
