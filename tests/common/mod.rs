#![allow(dead_code)]

use std::path::Path;

use chrono::NaiveDateTime;
use sandbox_store::prelude::*;

/// Descriptor for a file-backed store at `path`.
pub fn connection(path: &Path) -> String {
    format!("data source={}", path.display())
}

pub fn file(key: &str, kind: FileKind) -> FileEntry {
    let mut entry = FileEntry::new(key, format!("/overlay/{key}"), kind);
    entry.last_write =
        NaiveDateTime::parse_from_str("2024-05-01 12:00:00", "%Y-%m-%d %H:%M:%S").unwrap();
    entry
}

pub fn keys(entries: &[FileEntry]) -> Vec<String> {
    let mut keys: Vec<String> = entries.iter().map(|e| e.key.clone()).collect();
    keys.sort();
    keys
}
