use serde::{Deserialize, Serialize};

use crate::batch::{BatchCommand, ParameterGenerator};
use crate::config::DatabaseOptions;
use crate::database::{Database, SandboxDatabase};
use crate::error::StoreError;
use crate::escape::identifier;
use crate::query_builder::SelectQuery;
use crate::results::DbRow;
use crate::synthesis::QuerySynthesis;
use crate::types::RowValues;

use super::unknown_code;

pub const DEFAULT_REGISTRY_TABLE: &str = "registry";

const COLUMNS: [&str; 5] = ["key", "value_name", "value_kind", "data", "deleted"];

/// Registry value types, stored by their native type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryValueKind {
    None,
    String,
    ExpandString,
    Binary,
    DWord,
    MultiString,
    QWord,
}

impl RegistryValueKind {
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            RegistryValueKind::None => 0,
            RegistryValueKind::String => 1,
            RegistryValueKind::ExpandString => 2,
            RegistryValueKind::Binary => 3,
            RegistryValueKind::DWord => 4,
            RegistryValueKind::MultiString => 7,
            RegistryValueKind::QWord => 11,
        }
    }

    /// # Errors
    /// [`StoreError::ExecutionError`] for an unknown code.
    pub fn from_code(code: i64) -> Result<Self, StoreError> {
        match code {
            0 => Ok(RegistryValueKind::None),
            1 => Ok(RegistryValueKind::String),
            2 => Ok(RegistryValueKind::ExpandString),
            3 => Ok(RegistryValueKind::Binary),
            4 => Ok(RegistryValueKind::DWord),
            7 => Ok(RegistryValueKind::MultiString),
            11 => Ok(RegistryValueKind::QWord),
            other => Err(unknown_code("registry value kind", other)),
        }
    }
}

/// One registry value captured in the overlay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    /// Full key path, e.g. `HKEY_CURRENT_USER\Software\Vendor`.
    pub key: String,
    /// Empty for the key's default value.
    pub value_name: String,
    pub value_kind: RegistryValueKind,
    pub data: Vec<u8>,
    pub deleted: bool,
}

impl RegistryEntry {
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        value_name: impl Into<String>,
        value_kind: RegistryValueKind,
        data: Vec<u8>,
    ) -> Self {
        Self {
            key: key.into(),
            value_name: value_name.into(),
            value_kind,
            data,
            deleted: false,
        }
    }

    /// A `DWord` value in its little-endian wire form.
    #[must_use]
    pub fn dword(key: impl Into<String>, value_name: impl Into<String>, value: u32) -> Self {
        Self::new(
            key,
            value_name,
            RegistryValueKind::DWord,
            value.to_le_bytes().to_vec(),
        )
    }

    /// # Errors
    /// [`StoreError::ExecutionError`] when a column is missing or malformed.
    pub fn from_row(row: &DbRow) -> Result<Self, StoreError> {
        Ok(Self {
            key: row.text(0)?.to_string(),
            value_name: row.text(1)?.to_string(),
            value_kind: RegistryValueKind::from_code(row.int(2)?)?,
            data: row.blob(3)?,
            deleted: row.bool(4)?,
        })
    }
}

/// Query synthesis for the registry table. Rows are keyed by `(key, value_name)`.
#[derive(Debug, Clone)]
pub struct RegistryTable {
    table: String,
}

impl Default for RegistryTable {
    fn default() -> Self {
        Self::new(DEFAULT_REGISTRY_TABLE)
    }
}

impl RegistryTable {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
        }
    }

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn creation_query(&self) -> String {
        format!(
            "CREATE TABLE {} (
                key TEXT NOT NULL COLLATE NOCASE,
                value_name TEXT NOT NULL COLLATE NOCASE,
                value_kind INTEGER NOT NULL,
                data BLOB,
                deleted INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (key, value_name)
            );",
            identifier(&self.table)
        )
    }

    fn bind_all(names: &mut ParameterGenerator, item: &RegistryEntry) -> Vec<(String, RowValues)> {
        [
            RowValues::Text(item.key.clone()),
            RowValues::Text(item.value_name.clone()),
            RowValues::Int(item.value_kind.code()),
            RowValues::Blob(item.data.clone()),
            RowValues::Bool(item.deleted),
        ]
        .into_iter()
        .map(|value| (names.next_name(), value))
        .collect()
    }
}

impl QuerySynthesis for RegistryTable {
    type Item = RegistryEntry;

    fn append_insert(
        &self,
        batch: &mut BatchCommand,
        names: &mut ParameterGenerator,
        item: &RegistryEntry,
    ) -> Result<(), StoreError> {
        let params = Self::bind_all(names, item);
        let placeholders: Vec<&str> = params.iter().map(|(n, _)| n.as_str()).collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            identifier(&self.table),
            COLUMNS.join(", "),
            placeholders.join(", ")
        );
        batch.push(sql, params)
    }

    fn append_update(
        &self,
        batch: &mut BatchCommand,
        names: &mut ParameterGenerator,
        item: &RegistryEntry,
    ) -> Result<(), StoreError> {
        let params = Self::bind_all(names, item);
        let assignments: Vec<String> = COLUMNS
            .iter()
            .zip(&params)
            .skip(2)
            .map(|(column, (name, _))| format!("{column} = {name}"))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE key = {} AND value_name = {}",
            identifier(&self.table),
            assignments.join(", "),
            params[0].0,
            params[1].0
        );
        batch.push(sql, params)
    }

    fn append_delete(
        &self,
        batch: &mut BatchCommand,
        names: &mut ParameterGenerator,
        item: &RegistryEntry,
    ) -> Result<(), StoreError> {
        let key = names.next_name();
        let value_name = names.next_name();
        let sql = format!(
            "DELETE FROM {} WHERE key = {key} AND value_name = {value_name}",
            identifier(&self.table)
        );
        batch.push(
            sql,
            vec![
                (key, RowValues::Text(item.key.clone())),
                (value_name, RowValues::Text(item.value_name.clone())),
            ],
        )
    }
}

/// The registry overlay database of one sandbox.
#[derive(Debug)]
pub struct RegistryDatabase {
    db: Database<RegistryTable>,
}

impl RegistryDatabase {
    /// # Errors
    /// See [`Database::open`].
    pub fn open(connection: &str, options: &DatabaseOptions) -> Result<Self, StoreError> {
        Self::open_with_table(connection, DEFAULT_REGISTRY_TABLE, options)
    }

    /// # Errors
    /// See [`Database::open`].
    pub fn open_with_table(
        connection: &str,
        table: &str,
        options: &DatabaseOptions,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open(connection, RegistryTable::new(table), options)?,
        })
    }

    fn select(&self) -> Result<SelectQuery, StoreError> {
        Ok(SelectQuery::new([self.db.synthesis().table()])?.columns(COLUMNS))
    }

    /// Every value stored under `key`, default value included.
    ///
    /// # Errors
    /// Propagates read errors.
    pub fn values_under(&self, key: &str) -> Result<Vec<RegistryEntry>, StoreError> {
        let query = self
            .select()?
            .condition("key", RowValues::Text(key.to_string()));
        self.db.read_rows(&query, RegistryEntry::from_row)
    }

    /// # Errors
    /// Propagates read errors.
    pub fn get(&self, key: &str, value_name: &str) -> Result<Option<RegistryEntry>, StoreError> {
        let query = self.select()?.conditions([
            ("key", RowValues::Text(key.to_string())),
            ("value_name", RowValues::Text(value_name.to_string())),
        ]);
        Ok(self
            .db
            .read_rows(&query, RegistryEntry::from_row)?
            .into_iter()
            .next())
    }

    /// # Errors
    /// See [`Database::close`].
    pub fn close(self) -> Result<(), StoreError> {
        self.db.close()
    }
}

impl SandboxDatabase for RegistryDatabase {
    type Synthesis = RegistryTable;

    fn database(&self) -> &Database<RegistryTable> {
        &self.db
    }

    fn initialize(&self, clear_existing: bool) -> Result<(), StoreError> {
        let synthesis = self.db.synthesis();
        self.db.verify_table(
            synthesis.table(),
            Some(&synthesis.creation_query()),
            clear_existing,
        )?;
        Ok(())
    }

    fn read_all(&self) -> Result<Vec<RegistryEntry>, StoreError> {
        self.db.read_rows(&self.select()?, RegistryEntry::from_row)
    }
}
