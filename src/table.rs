//! In-memory dataset table: ordered rows of text cells addressed by column name.

use crate::error::{BatchError, Result};

/// Ordered rows sharing one column set.
///
/// Rows are addressed by position and mutated cell by cell. Every row always
/// holds exactly one cell per column; short rows are padded with empty text.
/// Column names are unique: a repeated header becomes `Name.1`, `Name.2`, ...
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DatasetTable {
    columns: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl DatasetTable {
    /// Cells past the last column are dropped; loaders reject such rows
    /// before they get here.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let columns = unique_columns(columns);
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }

    /// Header order as loaded: the default input-field list
    pub fn input_fields(&self) -> Vec<String> {
        self.columns.clone()
    }

    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let col = self.column_index(column)?;
        self.rows.get(row).map(|r| r[col].as_str())
    }

    /// Append a column filled with empty text. No-op if it already exists.
    pub fn add_column(&mut self, name: &str) -> usize {
        if let Some(idx) = self.column_index(name) {
            return idx;
        }
        self.columns.push(name.to_string());
        for row in &mut self.rows {
            row.push(String::new());
        }
        self.columns.len() - 1
    }

    /// Append the declared output columns after the original ones.
    ///
    /// Columns that already exist keep their position and contents, so
    /// repeated initialization never duplicates columns or clears results.
    pub fn init_output_columns(&mut self, output_fields: &[String]) {
        for field in output_fields {
            self.add_column(field);
        }
    }

    /// Write one cell. Returns `UnknownColumn` if the column does not exist.
    pub fn set(&mut self, row: usize, column: &str, value: impl Into<String>) -> Result<()> {
        let col = self
            .column_index(column)
            .ok_or_else(|| BatchError::UnknownColumn(column.to_string()))?;
        let cells = self
            .rows
            .get_mut(row)
            .ok_or(BatchError::RowOutOfRange(row))?;
        cells[col] = value.into();
        Ok(())
    }

    /// Check that every input field names an existing column
    pub fn validate_fields(&self, fields: &[String]) -> Result<()> {
        match fields.iter().find(|f| !self.has_column(f)) {
            Some(missing) => Err(BatchError::UnknownColumn(missing.clone())),
            None => Ok(()),
        }
    }

    /// Tab-join the row's values in `fields` order.
    ///
    /// A field missing from the table serializes as an empty segment so the
    /// segment count always equals `fields.len()`.
    pub fn serialize_row(&self, row: usize, fields: &[String]) -> Option<String> {
        let cells = self.rows.get(row)?;
        let values: Vec<&str> = fields
            .iter()
            .map(|f| match self.column_index(f) {
                Some(col) => cells[col].as_str(),
                None => "",
            })
            .collect();
        Some(values.join("\t"))
    }
}

/// Suffix repeated names with `.1`, `.2`, ... in header order
fn unique_columns(columns: Vec<String>) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(columns.len());
    for name in columns {
        let mut candidate = name.clone();
        let mut n = 0;
        while unique.contains(&candidate) {
            n += 1;
            candidate = format!("{}.{}", name, n);
        }
        if candidate != name {
            tracing::warn!("duplicate column '{}' renamed to '{}'", name, candidate);
        }
        unique.push(candidate);
    }
    unique
}
