//! Storage capability interface consumed by the agent core.
//!
//! The agent never talks to a storage engine directly. Every tool goes
//! through [`KvStore`], a synchronous, blocking trait with typed errors.
//! Callers on an async runtime move these calls onto a blocking thread.
//!
//! Submodules:
//! - `stats`: value type detection and per-column-family statistics types
//! - `memory`: `BTreeMap`-backed reference implementation

pub mod memory;
pub mod stats;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::MemoryStore;
pub use stats::{CfStats, DataType, DatabaseStats};

/// Column family used whenever a caller does not name one.
pub const DEFAULT_COLUMN_FAMILY: &str = "default";

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Errors returned by storage-layer calls.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("key not found: '{key}'")]
    KeyNotFound { key: String },

    #[error("column family not found: '{name}'")]
    ColumnFamilyNotFound { name: String },

    #[error("column family already exists: '{name}'")]
    ColumnFamilyExists { name: String },

    /// A write was attempted against a read-only store.
    #[error("database is in read-only mode")]
    ReadOnly,

    #[error("column family is empty: '{name}'")]
    ColumnFamilyEmpty { name: String },

    /// A search pattern failed to compile.
    #[error("invalid search pattern: {reason}")]
    InvalidPattern { reason: String },

    #[error("database is closed")]
    Closed,
}

// ─── Request / Response Types ───────────────────────────────────────────────

/// A single key-value pair returned by scans and queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Bounds for a range scan. Empty bounds are open.
///
/// The range is half-open: `start <= key < end`.
#[derive(Debug, Clone, Default)]
pub struct ScanOptions {
    pub start: String,
    pub end: String,
    /// Maximum number of entries; `0` means no limit.
    pub limit: usize,
    pub reverse: bool,
}

/// Options for a fuzzy key/value search.
#[derive(Debug, Clone, Default)]
pub struct SearchOptions {
    pub key_pattern: String,
    pub value_pattern: String,
    pub use_regex: bool,
    pub case_sensitive: bool,
    /// Maximum number of matches; `0` means no limit.
    pub limit: usize,
    /// Omit values from the results.
    pub keys_only: bool,
    /// Cursor: only keys strictly greater than this are considered.
    pub after: String,
}

/// A single search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchHit {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    /// Which of `"key"` / `"value"` matched.
    pub matched_fields: Vec<String>,
}

/// One page of search results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResults {
    pub results: Vec<SearchHit>,
    pub count: usize,
    /// Last key of this page when more results exist.
    pub next_cursor: String,
    pub has_more: bool,
}

// ─── KvStore ────────────────────────────────────────────────────────────────

/// The storage operations the agent's tools are allowed to perform.
pub trait KvStore: Send + Sync {
    fn get(&self, cf: &str, key: &str) -> Result<String, StorageError>;

    fn put(&self, cf: &str, key: &str, value: &str) -> Result<(), StorageError>;

    /// The entry with the greatest key in `cf`.
    fn get_last(&self, cf: &str) -> Result<KeyValue, StorageError>;

    fn prefix_scan(&self, cf: &str, prefix: &str, limit: usize)
        -> Result<Vec<KeyValue>, StorageError>;

    fn scan_range(&self, cf: &str, opts: &ScanOptions) -> Result<Vec<KeyValue>, StorageError>;

    fn search(&self, cf: &str, opts: &SearchOptions) -> Result<SearchResults, StorageError>;

    /// Entries whose value is a JSON object with `field` equal to `value`.
    fn json_query(&self, cf: &str, field: &str, value: &str)
        -> Result<Vec<KeyValue>, StorageError>;

    fn list_column_families(&self) -> Result<Vec<String>, StorageError>;

    fn column_family_stats(&self, cf: &str) -> Result<CfStats, StorageError>;

    fn is_read_only(&self) -> bool;

    /// Aggregate statistics across every column family.
    ///
    /// Column families whose stats cannot be read are skipped.
    fn database_stats(&self) -> Result<DatabaseStats, StorageError> {
        let names = self.list_column_families()?;
        let mut stats = DatabaseStats {
            column_family_count: names.len(),
            last_updated: chrono::Utc::now(),
            ..DatabaseStats::default()
        };

        for name in &names {
            match self.column_family_stats(name) {
                Ok(cf) => {
                    stats.total_key_count += cf.key_count;
                    stats.total_size += cf.total_key_size + cf.total_value_size;
                    stats.column_families.push(cf);
                }
                Err(e) => {
                    tracing::warn!(cf = %name, error = %e, "skipping column family in stats");
                }
            }
        }

        Ok(stats)
    }
}
