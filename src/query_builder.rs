use rusqlite::types::Value;

use crate::batch::ParameterGenerator;
use crate::error::StoreError;
use crate::escape::identifier;
use crate::types::RowValues;

/// Fluent builder for the bulk-read SELECT.
///
/// Tables and columns go through [`identifier`]; condition values are bound as
/// named parameters. Conditions are equality tests joined with `AND`.
///
/// ```rust
/// use sandbox_store::prelude::*;
///
/// let query = SelectQuery::new(["files"])?
///     .columns(["key", "value"])
///     .condition("kind", RowValues::Int(2));
/// let (sql, params) = query.build();
/// assert_eq!(sql, "SELECT key, value FROM files WHERE kind = :p0");
/// assert_eq!(params.len(), 1);
/// # Ok::<(), StoreError>(())
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    tables: Vec<String>,
    columns: Vec<String>,
    conditions: Vec<(String, RowValues)>,
}

impl SelectQuery {
    /// Start a query over `tables`.
    ///
    /// # Errors
    /// Returns [`StoreError::ConfigError`] when no table is given.
    pub fn new<I, S>(tables: I) -> Result<Self, StoreError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let tables: Vec<String> = tables
            .into_iter()
            .map(|t| t.as_ref().trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if tables.is_empty() {
            return Err(StoreError::ConfigError(
                "a select needs at least one table".into(),
            ));
        }
        Ok(Self {
            tables,
            columns: Vec::new(),
            conditions: Vec::new(),
        })
    }

    /// Columns to select, in result order. None selects `*`.
    #[must_use]
    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.columns
            .extend(columns.into_iter().map(|c| c.as_ref().to_string()));
        self
    }

    /// Add an equality condition.
    #[must_use]
    pub fn condition(mut self, column: impl Into<String>, value: RowValues) -> Self {
        self.conditions.push((column.into(), value));
        self
    }

    /// Add several equality conditions in iteration order.
    #[must_use]
    pub fn conditions<I, S>(mut self, conditions: I) -> Self
    where
        I: IntoIterator<Item = (S, RowValues)>,
        S: Into<String>,
    {
        self.conditions
            .extend(conditions.into_iter().map(|(c, v)| (c.into(), v)));
        self
    }

    /// Render the SQL text and its named parameters.
    #[must_use]
    pub fn build(&self) -> (String, Vec<(String, Value)>) {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            join_identifiers(&self.columns)
        };
        let mut sql = format!("SELECT {columns} FROM {}", join_identifiers(&self.tables));

        let mut names = ParameterGenerator::new();
        let mut params = Vec::with_capacity(self.conditions.len());
        for (idx, (column, value)) in self.conditions.iter().enumerate() {
            let name = names.next_name();
            sql.push_str(if idx == 0 { " WHERE " } else { " AND " });
            sql.push_str(&identifier(column));
            sql.push_str(" = ");
            sql.push_str(&name);
            params.push((name, value.to_sqlite_value()));
        }
        (sql, params)
    }
}

fn join_identifiers(identifiers: &[String]) -> String {
    identifiers
        .iter()
        .map(|id| identifier(id).into_owned())
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_columns_selects_everything() {
        let (sql, params) = SelectQuery::new(["t"]).unwrap().build();
        assert_eq!(sql, "SELECT * FROM t");
        assert!(params.is_empty());
    }

    #[test]
    fn conditions_are_and_conjoined() {
        let (sql, params) = SelectQuery::new(["t"])
            .unwrap()
            .conditions([("k1", RowValues::Int(1)), ("k2", RowValues::Text("v2".into()))])
            .build();
        assert_eq!(sql, "SELECT * FROM t WHERE k1 = :p0 AND k2 = :p1");
        assert_eq!(
            params,
            vec![
                (":p0".to_string(), Value::Integer(1)),
                (":p1".to_string(), Value::Text("v2".into()))
            ]
        );
    }

    #[test]
    fn empty_table_list_is_a_config_error() {
        let err = SelectQuery::new(Vec::<String>::new()).unwrap_err();
        assert!(matches!(err, StoreError::ConfigError(_)));
        assert!(SelectQuery::new(["  "]).is_err());
    }

    #[test]
    fn identifier_metacharacters_are_escaped() {
        let (sql, _) = SelectQuery::new(["t(x)"]).unwrap().columns(["a's"]).build();
        assert_eq!(sql, r#"SELECT "a~sq~s" FROM "t~lp~x~rp~""#);
    }
}
