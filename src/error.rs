use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Pool(#[from] r2d2::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Schema error: {0}")]
    SchemaError(String),

    #[error("Parameter error: {0}")]
    ParameterError(String),

    #[error("SQL execution error: {0}")]
    ExecutionError(String),

    #[error("Database has been closed")]
    Closed,
}

impl StoreError {
    /// True when the underlying SQLite error reports a missing table.
    ///
    /// The schema guard relies on this to tell "table absent" apart from every other failure
    /// of its probe query.
    #[must_use]
    pub fn is_no_such_table(&self) -> bool {
        match self {
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(_, Some(msg))) => {
                msg.starts_with("no such table")
            }
            _ => false,
        }
    }
}
