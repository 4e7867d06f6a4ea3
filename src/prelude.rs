//! Convenient imports for common functionality.
//!
//! This module re-exports the types needed to open a sandbox database, define an entity, and
//! enqueue and read actions.

pub use crate::batch::{BatchCommand, BatchStatement, ParameterGenerator};
pub use crate::config::{
    ConnectionDescriptor, DataSource, DatabaseOptions, DatabaseOptionsBuilder, FlushMode,
};
pub use crate::database::{Database, FlushOutcome, SandboxDatabase};
pub use crate::entities::{
    FileAccess, FileEntry, FileKind, FileSystemDatabase, FileTable, RegistryDatabase,
    RegistryEntry, RegistryTable, RegistryValueKind,
};
pub use crate::error::StoreError;
pub use crate::escape::{escape, identifier, unescape};
pub use crate::query_builder::SelectQuery;
pub use crate::results::DbRow;
pub use crate::synthesis::QuerySynthesis;
pub use crate::types::{Action, ActionKind, RowValues};
