use std::sync::Arc;

use crate::error::StoreError;
use crate::types::RowValues;

/// A row from a bulk read, handed to the caller's item builder.
///
/// Builders map rows positionally: the value at index `i` is the `i`-th selected column.
#[derive(Debug, Clone)]
pub struct DbRow {
    /// The column names for this row (shared across all rows of one read)
    pub column_names: Arc<Vec<String>>,
    /// The values for this row
    pub values: Vec<RowValues>,
}

impl DbRow {
    #[must_use]
    pub fn new(column_names: Arc<Vec<String>>, values: Vec<RowValues>) -> Self {
        Self {
            column_names,
            values,
        }
    }

    /// Number of columns in this row.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Get a value from the row by column index
    #[must_use]
    pub fn get_by_index(&self, index: usize) -> Option<&RowValues> {
        self.values.get(index)
    }

    /// Get a value from the row by column name
    #[must_use]
    pub fn get(&self, column_name: &str) -> Option<&RowValues> {
        self.column_names
            .iter()
            .position(|col| col == column_name)
            .and_then(|idx| self.values.get(idx))
    }

    /// Positional text column, as item builders usually want it.
    ///
    /// # Errors
    /// Returns [`StoreError::ExecutionError`] if the column is missing or not text.
    pub fn text(&self, index: usize) -> Result<&str, StoreError> {
        self.get_by_index(index)
            .and_then(RowValues::as_text)
            .ok_or_else(|| self.column_error(index, "text"))
    }

    /// Positional integer column.
    ///
    /// # Errors
    /// Returns [`StoreError::ExecutionError`] if the column is missing or not an integer.
    pub fn int(&self, index: usize) -> Result<i64, StoreError> {
        self.get_by_index(index)
            .and_then(RowValues::as_int)
            .copied()
            .ok_or_else(|| self.column_error(index, "integer"))
    }

    /// Positional boolean column (stored as 0/1).
    ///
    /// # Errors
    /// Returns [`StoreError::ExecutionError`] if the column is missing or not 0/1.
    pub fn bool(&self, index: usize) -> Result<bool, StoreError> {
        self.get_by_index(index)
            .and_then(RowValues::as_bool)
            .ok_or_else(|| self.column_error(index, "boolean"))
    }

    /// Positional blob column; NULL reads as empty.
    ///
    /// # Errors
    /// Returns [`StoreError::ExecutionError`] if the column is missing or holds another type.
    pub fn blob(&self, index: usize) -> Result<Vec<u8>, StoreError> {
        match self.get_by_index(index) {
            Some(RowValues::Blob(bytes)) => Ok(bytes.clone()),
            Some(RowValues::Null) => Ok(Vec::new()),
            _ => Err(self.column_error(index, "blob")),
        }
    }

    fn column_error(&self, index: usize, expected: &str) -> StoreError {
        let name = self
            .column_names
            .get(index)
            .map_or("<missing>", String::as_str);
        StoreError::ExecutionError(format!(
            "column {index} ({name}) is not a readable {expected}"
        ))
    }
}
