//! The batched command a single flush builds, and the parameter names it binds.

use std::collections::HashSet;
use std::fmt::Write;

use rusqlite::types::Value;

use crate::error::StoreError;
use crate::types::RowValues;

/// Mints placeholder names that are unique across one batch.
///
/// Scoped to a single flush; a fresh generator is created for every batch.
#[derive(Debug, Default)]
pub struct ParameterGenerator {
    next: u64,
}

impl ParameterGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the next placeholder, e.g. `:p0`, `:p1`, ...
    pub fn next_name(&mut self) -> String {
        let name = format!(":p{}", self.next);
        self.next += 1;
        name
    }

    /// How many names have been handed out.
    #[must_use]
    pub fn issued(&self) -> u64 {
        self.next
    }
}

/// One statement of a batch with its named parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchStatement {
    pub sql: String,
    pub params: Vec<(String, Value)>,
}

/// An ordered list of statements that commits as one transaction.
#[derive(Debug, Default)]
pub struct BatchCommand {
    statements: Vec<BatchStatement>,
    names: HashSet<String>,
}

impl BatchCommand {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement whose placeholders are bound by name.
    ///
    /// # Errors
    /// Returns [`StoreError::ParameterError`] if a name is reused within the batch or does not
    /// appear in `sql`.
    pub fn push(
        &mut self,
        sql: impl Into<String>,
        params: Vec<(String, RowValues)>,
    ) -> Result<(), StoreError> {
        let sql = sql.into();
        let mut bound = Vec::with_capacity(params.len());
        for (name, value) in params {
            if !sql.contains(name.as_str()) {
                return Err(StoreError::ParameterError(format!(
                    "parameter {name} is not referenced by its statement"
                )));
            }
            if !self.names.insert(name.clone()) {
                return Err(StoreError::ParameterError(format!(
                    "parameter {name} already bound in this batch"
                )));
            }
            bound.push((name, value.to_sqlite_value()));
        }
        self.statements.push(BatchStatement { sql, params: bound });
        Ok(())
    }

    #[must_use]
    pub fn statements(&self) -> &[BatchStatement] {
        &self.statements
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Textual form of the whole transaction, parameters left as placeholders.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::from("BEGIN;\n");
        for stmt in &self.statements {
            let _ = writeln!(out, "{};", stmt.sql.trim_end_matches(';'));
        }
        out.push_str("COMMIT;");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generator_is_strictly_increasing() {
        let mut names = ParameterGenerator::new();
        assert_eq!(names.next_name(), ":p0");
        assert_eq!(names.next_name(), ":p1");
        assert_eq!(names.issued(), 2);
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let mut batch = BatchCommand::new();
        batch
            .push("DELETE FROM t WHERE k = :p0", vec![(":p0".into(), RowValues::Int(1))])
            .unwrap();
        let err = batch
            .push("DELETE FROM t WHERE k = :p0", vec![(":p0".into(), RowValues::Int(2))])
            .unwrap_err();
        assert!(matches!(err, StoreError::ParameterError(_)));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn render_wraps_statements_in_one_transaction() {
        let mut batch = BatchCommand::new();
        batch
            .push("INSERT INTO t (k) VALUES (:p0)", vec![(":p0".into(), RowValues::Int(1))])
            .unwrap();
        batch
            .push("DELETE FROM t WHERE k = :p1;", vec![(":p1".into(), RowValues::Int(1))])
            .unwrap();
        assert_eq!(
            batch.render(),
            "BEGIN;\nINSERT INTO t (k) VALUES (:p0);\nDELETE FROM t WHERE k = :p1;\nCOMMIT;"
        );
    }
}
