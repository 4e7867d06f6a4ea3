use chrono::NaiveDateTime;
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

pub const DEFAULT_FILE_TABLE: &str = "files";

/// Column order shared by every statement and by [`FileEntry::from_row`].
const COLUMNS: [&str; 6] = ["key", "value", "kind", "access", "deleted", "last_write"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    File,
    Directory,
    Executable,
}

impl FileKind {
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            FileKind::File => 0,
            FileKind::Directory => 1,
            FileKind::Executable => 2,
        }
    }

    /// # Errors
    /// [`StoreError::ExecutionError`] for an unknown code.
    pub fn from_code(code: i64) -> Result<Self, StoreError> {
        match code {
            0 => Ok(FileKind::File),
            1 => Ok(FileKind::Directory),
            2 => Ok(FileKind::Executable),
            other => Err(unknown_code("file kind", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileAccess {
    Read,
    Write,
    ReadWrite,
}

impl FileAccess {
    #[must_use]
    pub fn code(self) -> i64 {
        match self {
            FileAccess::Read => 1,
            FileAccess::Write => 2,
            FileAccess::ReadWrite => 3,
        }
    }

    /// # Errors
    /// [`StoreError::ExecutionError`] for an unknown code.
    pub fn from_code(code: i64) -> Result<Self, StoreError> {
        match code {
            1 => Ok(FileAccess::Read),
            2 => Ok(FileAccess::Write),
            3 => Ok(FileAccess::ReadWrite),
            other => Err(unknown_code("file access", other)),
        }
    }
}

/// One row of the file table: a guest-visible path and where the overlay keeps it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEntry {
    /// Guest-visible path; the primary key, compared case-insensitively.
    pub key: String,
    /// Overlay path the guest's accesses are redirected to.
    pub value: String,
    pub kind: FileKind,
    pub access: FileAccess,
    /// Tombstone: the guest deleted this path.
    pub deleted: bool,
    pub last_write: NaiveDateTime,
}

impl FileEntry {
    #[must_use]
    pub fn new(key: impl Into<String>, value: impl Into<String>, kind: FileKind) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            kind,
            access: FileAccess::ReadWrite,
            deleted: false,
            last_write: chrono::Utc::now().naive_utc(),
        }
    }

    /// The path reported for an observed executable.
    ///
    /// This is always the `key`, i.e. the path as the guest process saw it, never the overlay
    /// `value` it was redirected to. Consumers that need the overlay location read `value`.
    #[must_use]
    pub fn executable_path(&self) -> &str {
        &self.key
    }

    /// Build an entry from a row selected in [`COLUMNS`] order.
    ///
    /// # Errors
    /// [`StoreError::ExecutionError`] when a column is missing or malformed.
    pub fn from_row(row: &DbRow) -> Result<Self, StoreError> {
        let last_write = row
            .get_by_index(5)
            .and_then(RowValues::as_timestamp)
            .ok_or_else(|| StoreError::ExecutionError("file row has no last_write".into()))?;
        Ok(Self {
            key: row.text(0)?.to_string(),
            value: row.text(1)?.to_string(),
            kind: FileKind::from_code(row.int(2)?)?,
            access: FileAccess::from_code(row.int(3)?)?,
            deleted: row.bool(4)?,
            last_write,
        })
    }
}

/// Query synthesis for the file table.
#[derive(Debug, Clone)]
pub struct FileTable {
    table: String,
}

impl Default for FileTable {
    fn default() -> Self {
        Self::new(DEFAULT_FILE_TABLE)
    }
}

impl FileTable {
    #[must_use]
    pub fn new(table: &str) -> Self {
        Self {
            table: table.to_string(),
        }
    }

    /// The table name as given; statements escape it through [`identifier`].
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn creation_query(&self) -> String {
        format!(
            "CREATE TABLE {} (
                key TEXT NOT NULL PRIMARY KEY COLLATE NOCASE,
                value TEXT NOT NULL,
                kind INTEGER NOT NULL,
                access INTEGER NOT NULL,
                deleted INTEGER NOT NULL DEFAULT 0,
                last_write TEXT NOT NULL
            );",
            identifier(&self.table)
        )
    }

    fn bind_all(
        names: &mut ParameterGenerator,
        item: &FileEntry,
    ) -> Vec<(String, RowValues)> {
        let values = [
            RowValues::Text(item.key.clone()),
            RowValues::Text(item.value.clone()),
            RowValues::Int(item.kind.code()),
            RowValues::Int(item.access.code()),
            RowValues::Bool(item.deleted),
            RowValues::Timestamp(item.last_write),
        ];
        values
            .into_iter()
            .map(|value| (names.next_name(), value))
            .collect()
    }
}

impl QuerySynthesis for FileTable {
    type Item = FileEntry;

    fn append_insert(
        &self,
        batch: &mut BatchCommand,
        names: &mut ParameterGenerator,
        item: &FileEntry,
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
        item: &FileEntry,
    ) -> Result<(), StoreError> {
        let params = Self::bind_all(names, item);
        let assignments: Vec<String> = COLUMNS
            .iter()
            .zip(&params)
            .skip(1)
            .map(|(column, (name, _))| format!("{column} = {name}"))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE key = {}",
            identifier(&self.table),
            assignments.join(", "),
            params[0].0
        );
        batch.push(sql, params)
    }

    fn append_delete(
        &self,
        batch: &mut BatchCommand,
        names: &mut ParameterGenerator,
        item: &FileEntry,
    ) -> Result<(), StoreError> {
        let key = names.next_name();
        let sql = format!("DELETE FROM {} WHERE key = {key}", identifier(&self.table));
        batch.push(sql, vec![(key, RowValues::Text(item.key.clone()))])
    }
}

/// The file-system overlay database of one sandbox.
#[derive(Debug)]
pub struct FileSystemDatabase {
    db: Database<FileTable>,
}

impl FileSystemDatabase {
    /// # Errors
    /// See [`Database::open`].
    pub fn open(connection: &str, options: &DatabaseOptions) -> Result<Self, StoreError> {
        Self::open_with_table(connection, DEFAULT_FILE_TABLE, options)
    }

    /// # Errors
    /// See [`Database::open`].
    pub fn open_with_table(
        connection: &str,
        table: &str,
        options: &DatabaseOptions,
    ) -> Result<Self, StoreError> {
        Ok(Self {
            db: Database::open(connection, FileTable::new(table), options)?,
        })
    }

    fn select(&self) -> Result<SelectQuery, StoreError> {
        Ok(SelectQuery::new([self.db.synthesis().table()])?.columns(COLUMNS))
    }

    /// Look up one path.
    ///
    /// # Errors
    /// Propagates read errors.
    pub fn get(&self, key: &str) -> Result<Option<FileEntry>, StoreError> {
        let query = self.select()?.condition("key", RowValues::Text(key.to_string()));
        Ok(self.db.read_rows(&query, FileEntry::from_row)?.into_iter().next())
    }

    /// Entries of kind [`FileKind::Executable`], in table order.
    ///
    /// # Errors
    /// Propagates read errors.
    pub fn executables(&self) -> Result<Vec<FileEntry>, StoreError> {
        let query = self
            .select()?
            .condition("kind", RowValues::Int(FileKind::Executable.code()));
        self.db.read_rows(&query, FileEntry::from_row)
    }

    /// Guest-visible paths of every observed executable; see [`FileEntry::executable_path`].
    ///
    /// # Errors
    /// Propagates read errors.
    pub fn executable_paths(&self) -> Result<Vec<String>, StoreError> {
        Ok(self
            .executables()?
            .iter()
            .map(|entry| entry.executable_path().to_string())
            .collect())
    }

    /// # Errors
    /// See [`Database::close`].
    pub fn close(self) -> Result<(), StoreError> {
        self.db.close()
    }
}

impl SandboxDatabase for FileSystemDatabase {
    type Synthesis = FileTable;

    fn database(&self) -> &Database<FileTable> {
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

    fn read_all(&self) -> Result<Vec<FileEntry>, StoreError> {
        self.db.read_rows(&self.select()?, FileEntry::from_row)
    }
}
