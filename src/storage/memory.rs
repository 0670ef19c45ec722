//! In-memory `KvStore` backed by one ordered map per column family.
//!
//! Keys are kept in byte order, so scans and "last entry" behave like an
//! LSM store's iterators.

use std::collections::BTreeMap;
use std::ops::Bound;

use parking_lot::RwLock;
use regex::Regex;

use super::stats::CfStats;
use super::{
    KeyValue, KvStore, ScanOptions, SearchHit, SearchOptions, SearchResults, StorageError,
    DEFAULT_COLUMN_FAMILY,
};

type ColumnFamily = BTreeMap<String, String>;

/// Thread-safe in-memory store.
pub struct MemoryStore {
    families: RwLock<BTreeMap<String, ColumnFamily>>,
    read_only: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create a writable store containing only the default column family.
    pub fn new() -> Self {
        let mut families = BTreeMap::new();
        families.insert(DEFAULT_COLUMN_FAMILY.to_string(), ColumnFamily::new());
        Self {
            families: RwLock::new(families),
            read_only: false,
        }
    }

    /// Freeze the store: every later write fails with `ReadOnly`.
    pub fn into_read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn create_column_family(&self, name: &str) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let mut families = self.families.write();
        if families.contains_key(name) {
            return Err(StorageError::ColumnFamilyExists {
                name: name.to_string(),
            });
        }
        families.insert(name.to_string(), ColumnFamily::new());
        Ok(())
    }

    /// Run `f` against a column family under the read lock.
    fn with_cf<T>(
        &self,
        cf: &str,
        f: impl FnOnce(&ColumnFamily) -> Result<T, StorageError>,
    ) -> Result<T, StorageError> {
        let families = self.families.read();
        let family = families
            .get(cf)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound {
                name: cf.to_string(),
            })?;
        f(family)
    }
}

fn compile_pattern(pattern: &str, case_sensitive: bool) -> Result<Regex, StorageError> {
    let source = if case_sensitive {
        pattern.to_string()
    } else {
        format!("(?i){pattern}")
    };
    Regex::new(&source).map_err(|e| StorageError::InvalidPattern {
        reason: e.to_string(),
    })
}

/// Substring or regex match, depending on whether a compiled pattern is given.
fn matches(text: &str, pattern: &str, regex: Option<&Regex>, case_sensitive: bool) -> bool {
    match regex {
        Some(re) => re.is_match(text),
        None if case_sensitive => text.contains(pattern),
        None => text.to_lowercase().contains(&pattern.to_lowercase()),
    }
}

/// Compare a JSON field against the textual value supplied by a caller.
fn json_field_matches(field: &serde_json::Value, expected: &str) -> bool {
    use serde_json::Value;
    match field {
        Value::String(s) => s == expected,
        Value::Number(n) => match (n.as_f64(), expected.parse::<f64>()) {
            (Some(a), Ok(b)) => a == b,
            _ => false,
        },
        Value::Bool(b) => expected.parse::<bool>().map(|e| e == *b).unwrap_or(false),
        Value::Null => expected == "null",
        other => other.to_string() == expected,
    }
}

impl KvStore for MemoryStore {
    fn get(&self, cf: &str, key: &str) -> Result<String, StorageError> {
        self.with_cf(cf, |family| {
            family
                .get(key)
                .cloned()
                .ok_or_else(|| StorageError::KeyNotFound {
                    key: key.to_string(),
                })
        })
    }

    fn put(&self, cf: &str, key: &str, value: &str) -> Result<(), StorageError> {
        if self.read_only {
            return Err(StorageError::ReadOnly);
        }
        let mut families = self.families.write();
        let family = families
            .get_mut(cf)
            .ok_or_else(|| StorageError::ColumnFamilyNotFound {
                name: cf.to_string(),
            })?;
        family.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_last(&self, cf: &str) -> Result<KeyValue, StorageError> {
        self.with_cf(cf, |family| {
            family
                .iter()
                .next_back()
                .map(|(k, v)| KeyValue::new(k, v))
                .ok_or_else(|| StorageError::ColumnFamilyEmpty {
                    name: cf.to_string(),
                })
        })
    }

    fn prefix_scan(
        &self,
        cf: &str,
        prefix: &str,
        limit: usize,
    ) -> Result<Vec<KeyValue>, StorageError> {
        self.with_cf(cf, |family| {
            let iter = family
                .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, v)| KeyValue::new(k, v));
            Ok(match limit {
                0 => iter.collect(),
                n => iter.take(n).collect(),
            })
        })
    }

    fn scan_range(&self, cf: &str, opts: &ScanOptions) -> Result<Vec<KeyValue>, StorageError> {
        self.with_cf(cf, |family| {
            let lower = if opts.start.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Included(opts.start.as_str())
            };
            let upper = if opts.end.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Excluded(opts.end.as_str())
            };
            if let (Bound::Included(s), Bound::Excluded(e)) = (lower, upper) {
                if s >= e {
                    return Ok(Vec::new());
                }
            }

            let range = family.range::<str, _>((lower, upper));
            let take = if opts.limit == 0 { usize::MAX } else { opts.limit };
            let out: Vec<KeyValue> = if opts.reverse {
                range.rev().take(take).map(|(k, v)| KeyValue::new(k, v)).collect()
            } else {
                range.take(take).map(|(k, v)| KeyValue::new(k, v)).collect()
            };
            Ok(out)
        })
    }

    fn search(&self, cf: &str, opts: &SearchOptions) -> Result<SearchResults, StorageError> {
        let key_re = match (opts.use_regex, opts.key_pattern.is_empty()) {
            (true, false) => Some(compile_pattern(&opts.key_pattern, opts.case_sensitive)?),
            _ => None,
        };
        let value_re = match (opts.use_regex, opts.value_pattern.is_empty()) {
            (true, false) => Some(compile_pattern(&opts.value_pattern, opts.case_sensitive)?),
            _ => None,
        };

        self.with_cf(cf, |family| {
            let lower = if opts.after.is_empty() {
                Bound::Unbounded
            } else {
                Bound::Excluded(opts.after.as_str())
            };

            let mut results = SearchResults::default();
            for (key, value) in family.range::<str, _>((lower, Bound::Unbounded)) {
                let mut matched_fields = Vec::new();
                let key_ok = !opts.key_pattern.is_empty()
                    && matches(key, &opts.key_pattern, key_re.as_ref(), opts.case_sensitive);
                let value_ok = !opts.value_pattern.is_empty()
                    && matches(value, &opts.value_pattern, value_re.as_ref(), opts.case_sensitive);
                if key_ok {
                    matched_fields.push("key".to_string());
                }
                if value_ok {
                    matched_fields.push("value".to_string());
                }

                let include = match (opts.key_pattern.is_empty(), opts.value_pattern.is_empty()) {
                    (false, false) => key_ok && value_ok,
                    (false, true) => key_ok,
                    (true, false) => value_ok,
                    (true, true) => false,
                };
                if !include {
                    continue;
                }

                if opts.limit > 0 && results.results.len() >= opts.limit {
                    results.has_more = true;
                    break;
                }
                results.results.push(SearchHit {
                    key: key.clone(),
                    value: (!opts.keys_only).then(|| value.clone()),
                    matched_fields,
                });
            }

            results.count = results.results.len();
            if results.has_more {
                if let Some(last) = results.results.last() {
                    results.next_cursor = last.key.clone();
                }
            }
            Ok(results)
        })
    }

    fn json_query(
        &self,
        cf: &str,
        field: &str,
        value: &str,
    ) -> Result<Vec<KeyValue>, StorageError> {
        self.with_cf(cf, |family| {
            Ok(family
                .iter()
                .filter(|(_, raw)| {
                    serde_json::from_str::<serde_json::Value>(raw)
                        .ok()
                        .and_then(|doc| doc.get(field).map(|f| json_field_matches(f, value)))
                        .unwrap_or(false)
                })
                .map(|(k, v)| KeyValue::new(k, v))
                .collect())
        })
    }

    fn list_column_families(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.families.read().keys().cloned().collect())
    }

    fn column_family_stats(&self, cf: &str) -> Result<CfStats, StorageError> {
        self.with_cf(cf, |family| {
            Ok(CfStats::collect(
                cf,
                family.iter().map(|(k, v)| (k.as_str(), v.as_str())),
            ))
        })
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
