//! Concrete entity kinds persisted by the sandbox: the file table and the registry table.

pub mod files;
pub mod registry;

pub use files::{FileAccess, FileEntry, FileKind, FileSystemDatabase, FileTable};
pub use registry::{RegistryDatabase, RegistryEntry, RegistryTable, RegistryValueKind};

use crate::error::StoreError;

/// Error for an integer column that holds no known enum code.
pub(crate) fn unknown_code(what: &str, code: i64) -> StoreError {
    StoreError::ExecutionError(format!("unknown {what} code {code}"))
}
