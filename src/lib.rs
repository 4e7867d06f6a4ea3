//! Queued write-back persistence for sandbox overlays.
//!
//! Interception threads describe every captured file-system or registry mutation as an
//! [`Action`](types::Action) and hand it to a [`Database`](database::Database). The database
//! buffers actions in arrival order and commits them to an embedded SQLite store in batched
//! transactions, one flush at a time, so producers never wait on the store and readers never
//! see a half-applied batch.
//!
//! ```rust,no_run
//! use sandbox_store::prelude::*;
//!
//! let files = FileSystemDatabase::open("data source=sandbox.db", &DatabaseOptions::default())?;
//! files.initialize(false)?;
//! files.enqueue_action(Action::insert(FileEntry::new(
//!     r"C:\Tools\app.exe",
//!     r"D:\overlay\0001",
//!     FileKind::Executable,
//! )));
//! files.close()?;
//! # Ok::<(), StoreError>(())
//! ```

pub mod batch;
pub mod config;
pub mod database;
pub mod entities;
pub mod error;
pub mod escape;
pub mod prelude;
pub mod query_builder;
pub mod queue;
pub mod results;
pub mod synthesis;
pub mod types;

mod store;
mod worker;

pub use database::{Database, FlushOutcome, SandboxDatabase};
pub use error::StoreError;
