use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use clap::ValueEnum;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;

use crate::error::StoreError;

lazy_static! {
    // `key = value` with the key allowed to contain inner spaces ("data source").
    static ref PAIR: Regex = Regex::new(r"^\s*([A-Za-z][A-Za-z0-9 _]*?)\s*=\s*(.*?)\s*$")
        .unwrap_or_else(|err| panic!("connection descriptor pattern: {err}"));
}

const DATA_SOURCE_KEYS: [&str; 3] = ["data source", "datasource", "filename"];
const MEMORY_SOURCE: &str = ":memory:";

/// Where the store lives once a descriptor has been parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// A private in-memory store.
    Memory,
    /// A database file on disk.
    File(PathBuf),
}

/// A validated, normalized connection string.
///
/// Keys are case-insensitive and stored lower case; values keep their case because they are
/// usually file-system paths. Never mutated after parsing.
///
/// ```rust
/// use sandbox_store::config::{ConnectionDescriptor, DataSource};
///
/// let descriptor = ConnectionDescriptor::parse("Data Source=/tmp/Overlay.db; Read Only=False")?;
/// assert_eq!(descriptor.to_string(), "data source=/tmp/Overlay.db;read only=false");
/// assert!(matches!(descriptor.data_source(), DataSource::File(_)));
/// # Ok::<(), sandbox_store::StoreError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pairs: Vec<(String, String)>,
    data_source: DataSource,
    read_only: bool,
    busy_timeout: Option<Duration>,
}

impl ConnectionDescriptor {
    /// Parse and normalize a `key=value;key=value` connection string.
    ///
    /// # Errors
    /// Returns [`StoreError::ConfigError`] when a segment is not a `key=value` pair, when no data
    /// source is named, or when a recognised option carries an invalid value.
    pub fn parse(raw: &str) -> Result<Self, StoreError> {
        let mut pairs: Vec<(String, String)> = Vec::new();
        for segment in raw.split(';').filter(|s| !s.trim().is_empty()) {
            let caps = PAIR.captures(segment).ok_or_else(|| {
                StoreError::ConfigError(format!("malformed connection segment '{segment}'"))
            })?;
            let key = normalize_key(&caps[1]);
            let value = caps[2].to_string();
            match pairs.iter_mut().find(|(k, _)| *k == key) {
                Some(existing) => existing.1 = value,
                None => pairs.push((key, value)),
            }
        }

        let source = pairs
            .iter()
            .find(|(k, _)| DATA_SOURCE_KEYS.contains(&k.as_str()))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                StoreError::ConfigError("connection string names no data source".into())
            })?;
        let data_source = if source.eq_ignore_ascii_case(MEMORY_SOURCE) {
            DataSource::Memory
        } else {
            DataSource::File(PathBuf::from(source))
        };

        let mut read_only = false;
        let mut busy_timeout = None;
        for (key, value) in &mut pairs {
            match key.as_str() {
                "read only" => {
                    *value = value.to_ascii_lowercase();
                    read_only = parse_bool(value)?;
                }
                "busy timeout" => {
                    let ms = value.parse::<u64>().map_err(|_| {
                        StoreError::ConfigError(format!("invalid busy timeout '{value}'"))
                    })?;
                    busy_timeout = Some(Duration::from_millis(ms));
                }
                _ => {}
            }
        }

        Ok(Self {
            pairs,
            data_source,
            read_only,
            busy_timeout,
        })
    }

    #[must_use]
    pub fn data_source(&self) -> &DataSource {
        &self.data_source
    }

    #[must_use]
    pub fn read_only(&self) -> bool {
        self.read_only
    }

    /// Busy timeout from the descriptor, if it named one.
    #[must_use]
    pub fn busy_timeout(&self) -> Option<Duration> {
        self.busy_timeout
    }

    /// Look up a normalized option by key (case-insensitive).
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        let key = normalize_key(key);
        self.pairs
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v.as_str())
    }
}

impl fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, (key, value)) in self.pairs.iter().enumerate() {
            if idx > 0 {
                f.write_str(";")?;
            }
            write!(f, "{key}={value}")?;
        }
        Ok(())
    }
}

impl std::str::FromStr for ConnectionDescriptor {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

fn normalize_key(key: &str) -> String {
    key.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

fn parse_bool(value: &str) -> Result<bool, StoreError> {
    match value {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(StoreError::ConfigError(format!(
            "invalid boolean '{other}' in connection string"
        ))),
    }
}

/// How an enqueue hands off its flush request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FlushMode {
    /// Attempt a single-flight flush on the producer thread.
    #[default]
    Inline,
    /// Post a flush request to a dedicated worker thread.
    Background,
}

/// Options for opening a [`Database`](crate::database::Database).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseOptions {
    /// Bounded wait on the drain lock before a flush attempt is abandoned.
    pub drain_timeout_ms: u64,
    pub flush_mode: FlushMode,
    /// Maximum pooled connections (file-backed stores only).
    pub pool_size: u32,
    /// SQLite busy timeout applied to every pooled connection.
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        Self {
            drain_timeout_ms: 25,
            flush_mode: FlushMode::Inline,
            pool_size: 4,
            busy_timeout_ms: 5000,
        }
    }
}

impl DatabaseOptions {
    #[must_use]
    pub fn builder() -> DatabaseOptionsBuilder {
        DatabaseOptionsBuilder::new()
    }

    /// Load options from a JSON document; missing fields take their defaults.
    ///
    /// # Errors
    /// Returns [`StoreError::ConfigError`] if the document is not valid JSON for these options.
    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| StoreError::ConfigError(format!("invalid database options: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    #[must_use]
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }

    /// # Errors
    /// Returns [`StoreError::ConfigError`] for a zero drain timeout or an empty pool.
    pub fn validate(&self) -> Result<(), StoreError> {
        if self.drain_timeout_ms == 0 {
            return Err(StoreError::ConfigError(
                "drain timeout must be non-zero".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(StoreError::ConfigError("pool size must be at least 1".into()));
        }
        Ok(())
    }
}

/// Fluent builder for [`DatabaseOptions`].
#[derive(Debug, Clone, Default)]
pub struct DatabaseOptionsBuilder {
    opts: DatabaseOptions,
}

impl DatabaseOptionsBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.opts.drain_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    #[must_use]
    pub fn flush_mode(mut self, mode: FlushMode) -> Self {
        self.opts.flush_mode = mode;
        self
    }

    #[must_use]
    pub fn pool_size(mut self, size: u32) -> Self {
        self.opts.pool_size = size;
        self
    }

    #[must_use]
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.opts.busy_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// # Errors
    /// Returns [`StoreError::ConfigError`] if the options fail validation.
    pub fn finish(self) -> Result<DatabaseOptions, StoreError> {
        self.opts.validate()?;
        Ok(self.opts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_normalized_and_values_keep_case() {
        let d = ConnectionDescriptor::parse("  DATA   Source = C:/Sandbox/Files.DB ;Busy Timeout=250")
            .unwrap();
        assert_eq!(d.to_string(), "data source=C:/Sandbox/Files.DB;busy timeout=250");
        assert_eq!(d.get("Data Source"), Some("C:/Sandbox/Files.DB"));
        assert_eq!(d.busy_timeout(), Some(Duration::from_millis(250)));
        assert!(!d.read_only());
    }

    #[test]
    fn missing_data_source_is_rejected() {
        for raw in ["", "version=3", "data source=", "data source"] {
            let err = ConnectionDescriptor::parse(raw).unwrap_err();
            assert!(matches!(err, StoreError::ConfigError(_)), "{raw}: {err}");
        }
    }

    #[test]
    fn memory_source_is_recognised() {
        let d: ConnectionDescriptor = "filename=:MEMORY:".parse().unwrap();
        assert_eq!(d.data_source(), &DataSource::Memory);
    }

    #[test]
    fn options_from_json_fill_defaults() {
        let opts = DatabaseOptions::from_json(r#"{"flush_mode":"background"}"#).unwrap();
        assert_eq!(opts.flush_mode, FlushMode::Background);
        assert_eq!(opts.pool_size, 4);
        assert!(DatabaseOptions::from_json(r#"{"pool_size":0}"#).is_err());
    }

    #[test]
    fn builder_rejects_zero_drain_timeout() {
        let err = DatabaseOptions::builder()
            .drain_timeout(Duration::ZERO)
            .finish()
            .unwrap_err();
        assert!(matches!(err, StoreError::ConfigError(_)));
    }
}
