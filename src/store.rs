//! The physical store: pooled rusqlite connections behind one reader/writer lock.
//!
//! Readers (bulk reads, schema probes) share the lock; a committing flush holds it exclusively,
//! so no reader ever observes a half-applied batch.
//!
//! Every path checks a connection out of the pool before it takes the lock, never after.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{RwLock, RwLockUpgradableReadGuard};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::types::Value;
use rusqlite::{OpenFlags, ToSql};
use tracing::{debug, info, warn};

use crate::batch::BatchCommand;
use crate::config::{ConnectionDescriptor, DataSource, DatabaseOptions};
use crate::error::StoreError;
use crate::escape::identifier;
use crate::query_builder::SelectQuery;
use crate::results::DbRow;
use crate::types::RowValues;

type SqlitePool = Pool<SqliteConnectionManager>;

pub struct Store {
    pool: SqlitePool,
    lock: RwLock<()>,
    descriptor: ConnectionDescriptor,
}

impl Store {
    /// Open the pool described by `descriptor` and smoke-test one connection.
    ///
    /// # Errors
    /// Returns [`StoreError::Pool`] if no connection can be established.
    pub fn open(
        descriptor: ConnectionDescriptor,
        options: &DatabaseOptions,
    ) -> Result<Self, StoreError> {
        let busy_timeout = descriptor
            .busy_timeout()
            .unwrap_or_else(|| options.busy_timeout());
        let read_only = descriptor.read_only();

        let pool = match descriptor.data_source() {
            // A private in-memory database lives exactly as long as its one connection, so the
            // pool is pinned to a single connection that never expires.
            DataSource::Memory => Pool::builder()
                .max_size(1)
                .min_idle(Some(1))
                .idle_timeout(None)
                .max_lifetime(None)
                .build(SqliteConnectionManager::memory().with_init(move |conn| {
                    conn.busy_timeout(busy_timeout)
                }))?,
            DataSource::File(path) => {
                let access = if read_only {
                    OpenFlags::SQLITE_OPEN_READ_ONLY
                } else {
                    OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
                };
                let flags = access | OpenFlags::SQLITE_OPEN_NO_MUTEX | OpenFlags::SQLITE_OPEN_URI;
                let manager = SqliteConnectionManager::file(path)
                    .with_flags(flags)
                    .with_init(move |conn| init_file_connection(conn, busy_timeout, read_only));
                Pool::builder()
                    .max_size(options.pool_size)
                    .build(manager)?
            }
        };

        {
            let conn = pool.get()?;
            conn.execute_batch("SELECT 1;")?;
        }
        info!(connection = %descriptor, "store opened");

        Ok(Self {
            pool,
            lock: RwLock::new(()),
            descriptor,
        })
    }

    #[must_use]
    pub fn descriptor(&self) -> &ConnectionDescriptor {
        &self.descriptor
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.pool.get()?)
    }

    /// Apply `batch` as one transaction under the exclusive store lock.
    ///
    /// Nothing is applied if any statement fails.
    ///
    /// # Errors
    /// Returns the first SQLite error; the transaction is rolled back.
    pub fn commit_batch(&self, batch: &BatchCommand) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection()?;
        let _guard = self.lock.write();
        let tx = conn.transaction()?;
        for stmt in batch.statements() {
            let mut prepared = tx.prepare_cached(&stmt.sql)?;
            let params = named_params(&stmt.params);
            prepared.execute(params.as_slice())?;
        }
        tx.commit()?;
        debug!(statements = batch.len(), "batch committed");
        Ok(())
    }

    /// Ensure `table` exists, creating or clearing it as asked.
    ///
    /// Returns whether the table already existed. A failed clear is logged and ignored; a failed
    /// creation is a [`StoreError::SchemaError`].
    ///
    /// # Errors
    /// Returns an error if the probe fails for a reason other than a missing table, or if the
    /// creation query fails.
    pub fn verify_table(
        &self,
        table: &str,
        creation_query: Option<&str>,
        clear_if_exists: bool,
    ) -> Result<bool, StoreError> {
        let table = identifier(table);
        let conn = self.connection()?;
        let guard = self.lock.upgradable_read();

        match probe_table(&conn, &table) {
            Ok(()) => {
                if clear_if_exists {
                    let _write = RwLockUpgradableReadGuard::upgrade(guard);
                    match conn.execute(&format!("DELETE FROM {table}"), []) {
                        Ok(rows) => debug!(%table, rows, "table cleared"),
                        Err(err) => warn!(%table, error = %err, "failed to clear table"),
                    }
                }
                Ok(true)
            }
            Err(err) if err.is_no_such_table() => {
                let Some(creation_query) = creation_query else {
                    debug!(%table, "table missing and no creation query supplied");
                    return Ok(false);
                };
                let _write = RwLockUpgradableReadGuard::upgrade(guard);
                conn.execute_batch(creation_query).map_err(|e| {
                    StoreError::SchemaError(format!("failed to create table {table}: {e}"))
                })?;
                info!(%table, "table created");
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Run `query` under the shared store lock and map each row through `builder`, in result
    /// order.
    ///
    /// # Errors
    /// Propagates SQLite errors and any error returned by `builder`.
    pub fn read_rows<I, F>(&self, query: &SelectQuery, mut builder: F) -> Result<Vec<I>, StoreError>
    where
        F: FnMut(&DbRow) -> Result<I, StoreError>,
    {
        let (sql, params) = query.build();
        let conn = self.connection()?;
        let _guard = self.lock.read();
        let mut stmt = conn.prepare(&sql)?;
        let column_names: Arc<Vec<String>> = Arc::new(
            stmt.column_names()
                .into_iter()
                .map(str::to_string)
                .collect(),
        );
        let column_count = column_names.len();

        let params = named_params(&params);
        let mut rows = stmt.query(params.as_slice())?;
        let mut items = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(column_count);
            for idx in 0..column_count {
                let value: Value = row.get(idx)?;
                values.push(RowValues::from(value));
            }
            items.push(builder(&DbRow::new(Arc::clone(&column_names), values))?);
        }
        Ok(items)
    }

    /// Run a statement that returns no rows under the exclusive store lock.
    ///
    /// # Errors
    /// Propagates the SQLite error.
    pub fn execute_batch(&self, sql: &str) -> Result<(), StoreError> {
        let conn = self.connection()?;
        let _guard = self.lock.write();
        conn.execute_batch(sql)?;
        Ok(())
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("descriptor", &self.descriptor.to_string())
            .field("pool", &self.pool.state())
            .finish_non_exhaustive()
    }
}

fn init_file_connection(
    conn: &mut rusqlite::Connection,
    busy_timeout: Duration,
    read_only: bool,
) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(busy_timeout)?;
    if !read_only {
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
    }
    Ok(())
}

/// Trivial bounded read; fails with "no such table" when the table is absent.
fn probe_table(conn: &rusqlite::Connection, table: &str) -> Result<(), StoreError> {
    let mut stmt = conn.prepare(&format!("SELECT 1 FROM {table} LIMIT 1"))?;
    let _ = stmt.exists([])?;
    Ok(())
}

fn named_params(params: &[(String, Value)]) -> Vec<(&str, &dyn ToSql)> {
    params
        .iter()
        .map(|(name, value)| (name.as_str(), value as &dyn ToSql))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ParameterGenerator;

    fn memory_store() -> Store {
        let descriptor = ConnectionDescriptor::parse("data source=:memory:").unwrap();
        Store::open(descriptor, &DatabaseOptions::default()).unwrap()
    }

    const CREATE_T: &str = "CREATE TABLE t (k INTEGER PRIMARY KEY, v TEXT);";

    #[test]
    fn verify_table_creates_then_preserves_then_clears() {
        let store = memory_store();
        assert!(!store.verify_table("t", Some(CREATE_T), false).unwrap());
        store
            .execute_batch("INSERT INTO t (k, v) VALUES (1, 'a');")
            .unwrap();

        assert!(store.verify_table("t", Some(CREATE_T), false).unwrap());
        let count = |store: &Store| {
            store
                .read_rows(&SelectQuery::new(["t"]).unwrap(), |_| Ok(()))
                .unwrap()
                .len()
        };
        assert_eq!(count(&store), 1);

        assert!(store.verify_table("t", Some(CREATE_T), true).unwrap());
        assert_eq!(count(&store), 0);
    }

    #[test]
    fn missing_table_without_creation_query_stays_missing() {
        let store = memory_store();
        assert!(!store.verify_table("absent", None, false).unwrap());
        assert!(!store.verify_table("absent", None, true).unwrap());
    }

    #[test]
    fn broken_creation_query_is_a_schema_error() {
        let store = memory_store();
        let err = store
            .verify_table("t", Some("CREATE TABLE t (k INTEGER"), false)
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaError(_)));
    }

    #[test]
    fn failed_batch_applies_nothing() {
        let store = memory_store();
        store.verify_table("t", Some(CREATE_T), false).unwrap();

        let mut names = ParameterGenerator::new();
        let mut batch = BatchCommand::new();
        for k in [1, 1] {
            let name = names.next_name();
            batch
                .push(format!("INSERT INTO t (k) VALUES ({name})"), vec![(name, RowValues::Int(k))])
                .unwrap();
        }
        assert!(store.commit_batch(&batch).is_err());

        let rows = store
            .read_rows(&SelectQuery::new(["t"]).unwrap(), |row| row.int(0))
            .unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn read_rows_maps_positionally_with_filters() {
        let store = memory_store();
        store.verify_table("t", Some(CREATE_T), false).unwrap();
        store
            .execute_batch("INSERT INTO t VALUES (1, 'a'); INSERT INTO t VALUES (2, 'b');")
            .unwrap();

        let query = SelectQuery::new(["t"])
            .unwrap()
            .columns(["v", "k"])
            .condition("k", RowValues::Int(2));
        let rows = store
            .read_rows(&query, |row| Ok((row.text(0)?.to_string(), row.int(1)?)))
            .unwrap();
        assert_eq!(rows, vec![("b".to_string(), 2)]);
    }
}
