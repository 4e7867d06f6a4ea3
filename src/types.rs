use std::fmt;

use chrono::NaiveDateTime;
use rusqlite::types::Value;

const TIMESTAMP_FORMAT: &str = "%F %T%.f";

/// Values bound as query parameters or read back from a row.
///
/// Concrete entity strategies convert their fields into this enum when they append a statement
/// to a batch, and item builders read it back out of a [`DbRow`](crate::results::DbRow):
/// ```rust
/// use sandbox_store::prelude::*;
///
/// let params = vec![
///     RowValues::Text(r"c:\windows\notepad.exe".into()),
///     RowValues::Int(2),
///     RowValues::Bool(false),
/// ];
/// # let _ = params;
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RowValues {
    /// Integer value (64-bit)
    Int(i64),
    /// Floating point value (64-bit)
    Float(f64),
    /// Text/string value
    Text(String),
    /// Boolean value, stored as 0/1
    Bool(bool),
    /// Timestamp value, stored as text
    Timestamp(NaiveDateTime),
    /// NULL value
    Null,
    /// Binary data
    Blob(Vec<u8>),
}

impl RowValues {
    /// Check if this value is NULL
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    #[must_use]
    pub fn as_int(&self) -> Option<&i64> {
        if let RowValues::Int(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        if let RowValues::Text(value) = self {
            Some(value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            RowValues::Bool(value) => Some(*value),
            RowValues::Int(1) => Some(true),
            RowValues::Int(0) => Some(false),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_timestamp(&self) -> Option<NaiveDateTime> {
        if let RowValues::Timestamp(value) = self {
            return Some(*value);
        } else if let Some(s) = self.as_text() {
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT) {
                return Some(dt);
            }
            // Try "YYYY-MM-DD HH:MM:SS"
            if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
                return Some(dt);
            }
        }
        None
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        if let RowValues::Float(value) = self {
            Some(*value)
        } else {
            None
        }
    }

    #[must_use]
    pub fn as_blob(&self) -> Option<&[u8]> {
        if let RowValues::Blob(bytes) = self {
            Some(bytes)
        } else {
            None
        }
    }

    /// Convert into the value rusqlite binds.
    #[must_use]
    pub fn to_sqlite_value(&self) -> Value {
        match self {
            RowValues::Int(i) => Value::Integer(*i),
            RowValues::Float(f) => Value::Real(*f),
            RowValues::Text(s) => Value::Text(s.clone()),
            RowValues::Bool(b) => Value::Integer(i64::from(*b)),
            RowValues::Timestamp(dt) => Value::Text(dt.format(TIMESTAMP_FORMAT).to_string()),
            RowValues::Null => Value::Null,
            RowValues::Blob(bytes) => Value::Blob(bytes.clone()),
        }
    }
}

impl From<Value> for RowValues {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RowValues::Null,
            Value::Integer(i) => RowValues::Int(i),
            Value::Real(f) => RowValues::Float(f),
            Value::Text(s) => RowValues::Text(s),
            Value::Blob(b) => RowValues::Blob(b),
        }
    }
}

/// The kind of mutation an [`Action`] carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Insert,
    Update,
    Delete,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::Insert => "insert",
            ActionKind::Update => "update",
            ActionKind::Delete => "delete",
        };
        f.write_str(name)
    }
}

/// One buffered mutation awaiting persistence.
///
/// Immutable once created; consumed exactly once by a flush.
#[derive(Debug, Clone, PartialEq)]
pub struct Action<T> {
    kind: ActionKind,
    item: T,
}

impl<T> Action<T> {
    #[must_use]
    pub fn new(kind: ActionKind, item: T) -> Self {
        Self { kind, item }
    }

    #[must_use]
    pub fn insert(item: T) -> Self {
        Self::new(ActionKind::Insert, item)
    }

    #[must_use]
    pub fn update(item: T) -> Self {
        Self::new(ActionKind::Update, item)
    }

    #[must_use]
    pub fn delete(item: T) -> Self {
        Self::new(ActionKind::Delete, item)
    }

    #[must_use]
    pub fn kind(&self) -> ActionKind {
        self.kind
    }

    #[must_use]
    pub fn item(&self) -> &T {
        &self.item
    }

    #[must_use]
    pub fn into_item(self) -> T {
        self.item
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamp_survives_sqlite_text_form() {
        let dt = NaiveDateTime::parse_from_str("2024-01-03 10:30:00.250", "%Y-%m-%d %H:%M:%S%.f")
            .unwrap();
        let stored = RowValues::from(RowValues::Timestamp(dt).to_sqlite_value());
        assert_eq!(stored.as_timestamp(), Some(dt));
    }

    #[test]
    fn bools_are_stored_as_integers() {
        assert_eq!(RowValues::Bool(true).to_sqlite_value(), Value::Integer(1));
        assert_eq!(RowValues::Int(0).as_bool(), Some(false));
        assert_eq!(RowValues::Int(7).as_bool(), None);
    }
}
