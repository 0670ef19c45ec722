//! Database tools exposed to the model.
//!
//! The tool set is closed: [`DbTool`] enumerates every capability, and each
//! variant maps one JSON argument object onto exactly one [`KvStore`] call,
//! returning a JSON envelope.

pub mod registry;

use serde_json::{json, Value};
use thiserror::Error;

use crate::storage::{KvStore, ScanOptions, SearchOptions, StorageError, DEFAULT_COLUMN_FAMILY};

pub use registry::ToolRegistry;

/// Limit applied when a caller omits one or passes a non-positive value.
pub const DEFAULT_LIMIT: usize = 10;

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Errors produced while validating or executing a tool call.
#[derive(Debug, Error)]
pub enum ToolError {
    /// Tool name is not part of the registry.
    #[error("unknown tool: '{name}'")]
    UnknownTool { name: String },

    /// Arguments failed schema validation.
    #[error("invalid arguments for '{tool}': {reason}")]
    InvalidArguments { tool: String, reason: String },

    /// The storage layer rejected the call.
    #[error("{tool} failed: {source}")]
    Storage {
        tool: String,
        #[source]
        source: StorageError,
    },

    /// A write tool was called while the registry is read-only.
    #[error("'{tool}' is not available in read-only mode")]
    WriteBlocked { tool: String },

    #[error("tool call '{tool}' timed out after {timeout_ms}ms")]
    Timeout { tool: String, timeout_ms: u64 },

    /// The blocking task running the call panicked or was cancelled.
    #[error("tool call '{tool}' aborted: {reason}")]
    Aborted { tool: String, reason: String },
}

// ─── DbTool ─────────────────────────────────────────────────────────────────

/// Every database capability the agent can invoke.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbTool {
    GetValue,
    PutValue,
    ScanRange,
    PrefixScan,
    ListColumnFamilies,
    GetLast,
    JsonQuery,
    GetStats,
    Search,
}

impl DbTool {
    /// Registration order.
    pub const ALL: [DbTool; 9] = [
        DbTool::GetValue,
        DbTool::PutValue,
        DbTool::ScanRange,
        DbTool::PrefixScan,
        DbTool::ListColumnFamilies,
        DbTool::GetLast,
        DbTool::JsonQuery,
        DbTool::GetStats,
        DbTool::Search,
    ];

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.name() == name)
    }

    pub fn name(&self) -> &'static str {
        match self {
            DbTool::GetValue => "get_value_by_key",
            DbTool::PutValue => "put_value",
            DbTool::ScanRange => "scan_keys_in_range",
            DbTool::PrefixScan => "scan_keys_with_prefix",
            DbTool::ListColumnFamilies => "list_column_families",
            DbTool::GetLast => "get_last_entry_in_column_family",
            DbTool::JsonQuery => "query_json_field",
            DbTool::GetStats => "get_database_stats",
            DbTool::Search => "search_keys_and_values",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            DbTool::GetValue => {
                "Get the value stored under an exact key. \
                 Returns JSON {key, value, column_family}."
            }
            DbTool::PutValue => {
                "Store a value under a key (fails when the database is read-only). \
                 Returns JSON {key, value, column_family, success}."
            }
            DbTool::ScanRange => {
                "Scan keys in the half-open range [start_key, end_key). Leave both bounds \
                 empty to walk the whole column family. Returns JSON {results, count, ...}."
            }
            DbTool::PrefixScan => {
                "List keys that start with a specific prefix, e.g. 'user:'. \
                 Returns JSON {results, count, prefix, column_family}."
            }
            DbTool::ListColumnFamilies => {
                "List every column family in the database. Returns JSON {column_families, count}."
            }
            DbTool::GetLast => {
                "Get the entry with the greatest key in a column family. \
                 Returns JSON {key, value, column_family}."
            }
            DbTool::JsonQuery => {
                "Find entries whose JSON value has a field equal to the given value. \
                 Returns JSON {results, count, field, value, column_family}."
            }
            DbTool::GetStats => {
                "Get database statistics: key counts, sizes, data types and common prefixes \
                 per column family. Returns JSON {stats}."
            }
            DbTool::Search => {
                "Fuzzy search over keys and/or values with optional regex and cursor \
                 pagination. Returns JSON {results, count, next_cursor, has_more}."
            }
        }
    }

    /// JSON Schema for the tool's arguments.
    pub fn parameters(&self) -> Value {
        let cf = json!({
            "type": "string",
            "description": "Column family name (default: \"default\")"
        });
        let limit = json!({
            "type": "integer",
            "description": "Maximum number of results (default: 10)"
        });

        match self {
            DbTool::GetValue => json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Exact key to read"},
                    "column_family": cf,
                },
                "required": ["key"]
            }),
            DbTool::PutValue => json!({
                "type": "object",
                "properties": {
                    "key": {"type": "string", "description": "Key to write"},
                    "value": {"type": "string", "description": "Value to store"},
                    "column_family": cf,
                },
                "required": ["key", "value"]
            }),
            DbTool::ScanRange => json!({
                "type": "object",
                "properties": {
                    "start_key": {"type": "string", "description": "Inclusive lower bound"},
                    "end_key": {"type": "string", "description": "Exclusive upper bound"},
                    "column_family": cf,
                    "limit": limit,
                    "reverse": {"type": "boolean", "description": "Scan in descending order"},
                },
                "required": []
            }),
            DbTool::PrefixScan => json!({
                "type": "object",
                "properties": {
                    "prefix": {"type": "string", "description": "Key prefix, e.g. \"user:\""},
                    "column_family": cf,
                    "limit": limit,
                },
                "required": ["prefix"]
            }),
            DbTool::ListColumnFamilies | DbTool::GetStats => json!({
                "type": "object",
                "properties": {},
                "required": []
            }),
            DbTool::GetLast => json!({
                "type": "object",
                "properties": {"column_family": cf},
                "required": []
            }),
            DbTool::JsonQuery => json!({
                "type": "object",
                "properties": {
                    "field": {"type": "string", "description": "Top-level JSON field name"},
                    "value": {"type": "string", "description": "Value to compare against"},
                    "column_family": cf,
                },
                "required": ["field", "value"]
            }),
            DbTool::Search => json!({
                "type": "object",
                "properties": {
                    "key_pattern": {"type": "string", "description": "Pattern matched against keys"},
                    "value_pattern": {"type": "string", "description": "Pattern matched against values"},
                    "regex": {"type": "boolean", "description": "Treat patterns as regular expressions"},
                    "column_family": cf,
                    "limit": limit,
                    "after": {"type": "string", "description": "Cursor from a previous page"},
                },
                "required": []
            }),
        }
    }

    /// Whether the tool mutates the store.
    pub fn is_write(&self) -> bool {
        matches!(self, DbTool::PutValue)
    }

    /// Execute the tool against a store. Blocking.
    pub fn call(&self, store: &dyn KvStore, args: &Value) -> Result<Value, ToolError> {
        let storage_err = |source: StorageError| ToolError::Storage {
            tool: self.name().to_string(),
            source,
        };
        let cf = arg_str(args, "column_family").unwrap_or(DEFAULT_COLUMN_FAMILY);

        match self {
            DbTool::GetValue => {
                let key = self.required_str(args, "key")?;
                let value = store.get(cf, key).map_err(storage_err)?;
                Ok(json!({"key": key, "value": value, "column_family": cf}))
            }
            DbTool::PutValue => {
                let key = self.required_str(args, "key")?;
                let value = self.required_str(args, "value")?;
                store.put(cf, key, value).map_err(storage_err)?;
                Ok(json!({"key": key, "value": value, "column_family": cf, "success": true}))
            }
            DbTool::ScanRange => {
                let opts = ScanOptions {
                    start: arg_str(args, "start_key").unwrap_or_default().to_string(),
                    end: arg_str(args, "end_key").unwrap_or_default().to_string(),
                    limit: arg_limit(args),
                    reverse: arg_bool(args, "reverse"),
                };
                let results = store.scan_range(cf, &opts).map_err(storage_err)?;
                Ok(json!({
                    "count": results.len(),
                    "results": results,
                    "start_key": opts.start,
                    "end_key": opts.end,
                    "column_family": cf,
                    "limit": opts.limit,
                    "reverse": opts.reverse,
                }))
            }
            DbTool::PrefixScan => {
                let prefix = self.required_str(args, "prefix")?;
                let limit = arg_limit(args);
                let results = store.prefix_scan(cf, prefix, limit).map_err(storage_err)?;
                Ok(json!({
                    "count": results.len(),
                    "results": results,
                    "prefix": prefix,
                    "column_family": cf,
                    "limit": limit,
                }))
            }
            DbTool::ListColumnFamilies => {
                let names = store.list_column_families().map_err(storage_err)?;
                Ok(json!({"count": names.len(), "column_families": names}))
            }
            DbTool::GetLast => {
                let entry = store.get_last(cf).map_err(storage_err)?;
                Ok(json!({"key": entry.key, "value": entry.value, "column_family": cf}))
            }
            DbTool::JsonQuery => {
                let field = self.required_str(args, "field")?;
                let value = self.required_str(args, "value")?;
                let results = store.json_query(cf, field, value).map_err(storage_err)?;
                Ok(json!({
                    "count": results.len(),
                    "results": results,
                    "field": field,
                    "value": value,
                    "column_family": cf,
                }))
            }
            DbTool::GetStats => {
                let stats = store.database_stats().map_err(storage_err)?;
                Ok(json!({"stats": stats}))
            }
            DbTool::Search => {
                let opts = SearchOptions {
                    key_pattern: arg_str(args, "key_pattern").unwrap_or_default().to_string(),
                    value_pattern: arg_str(args, "value_pattern").unwrap_or_default().to_string(),
                    use_regex: arg_bool(args, "regex"),
                    case_sensitive: false,
                    limit: arg_limit(args),
                    keys_only: false,
                    after: arg_str(args, "after").unwrap_or_default().to_string(),
                };
                if opts.key_pattern.is_empty() && opts.value_pattern.is_empty() {
                    return Err(ToolError::InvalidArguments {
                        tool: self.name().to_string(),
                        reason: "either key_pattern or value_pattern is required".into(),
                    });
                }
                let page = store.search(cf, &opts).map_err(storage_err)?;
                Ok(json!({
                    "results": page.results,
                    "count": page.count,
                    "next_cursor": page.next_cursor,
                    "has_more": page.has_more,
                    "column_family": cf,
                }))
            }
        }
    }

    fn required_str<'a>(&self, args: &'a Value, field: &str) -> Result<&'a str, ToolError> {
        arg_str(args, field).ok_or_else(|| ToolError::InvalidArguments {
            tool: self.name().to_string(),
            reason: format!("{field} parameter is required"),
        })
    }
}

// ─── Argument Helpers ───────────────────────────────────────────────────────

/// A non-empty string argument.
fn arg_str<'a>(args: &'a Value, field: &str) -> Option<&'a str> {
    args.get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

/// Boolean argument; also accepts `"true"` as a string, since small models
/// frequently quote booleans.
fn arg_bool(args: &Value, field: &str) -> bool {
    match args.get(field) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// `limit` argument, falling back to [`DEFAULT_LIMIT`] when absent or non-positive.
fn arg_limit(args: &Value) -> usize {
    let raw = match args.get("limit") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    match raw {
        Some(n) if n > 0 => n as usize,
        _ => DEFAULT_LIMIT,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
