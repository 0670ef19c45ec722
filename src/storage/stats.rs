//! Value type detection and statistics types.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Number of sample keys kept per column family.
const MAX_SAMPLE_KEYS: usize = 10;

/// Longest prefix considered when grouping keys.
const MAX_PREFIX_LEN: usize = 10;

/// Separators that end a key prefix, in priority order.
const PREFIX_SEPARATORS: [char; 5] = [':', '/', '-', '_', '.'];

// ─── DataType ───────────────────────────────────────────────────────────────

/// Coarse classification of a stored value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Json,
    Number,
    Timestamp,
    String,
    Binary,
    Empty,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Json => "json",
            DataType::Number => "number",
            DataType::Timestamp => "timestamp",
            DataType::String => "string",
            DataType::Binary => "binary",
            DataType::Empty => "empty",
        }
    }
}

/// Guess the type of a stored value.
///
/// Integers in plausible Unix-epoch ranges (seconds, or milli/micro/nano
/// seconds) are reported as timestamps before the generic number check.
pub fn detect_data_type(value: &str) -> DataType {
    if value.is_empty() {
        return DataType::Empty;
    }

    let trimmed = value.trim();
    let looks_structured = (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'));
    if looks_structured && serde_json::from_str::<serde_json::Value>(trimmed).is_ok() {
        return DataType::Json;
    }

    if let Ok(ts) = value.parse::<i64>() {
        if (100_000_000..2_000_000_000).contains(&ts)
            || (1_000_000_000_000..2_000_000_000_000_000_000).contains(&ts)
        {
            return DataType::Timestamp;
        }
        return DataType::Number;
    }

    if value.parse::<f64>().is_ok() {
        return DataType::Number;
    }

    if value
        .bytes()
        .any(|b| b < 32 && b != b'\t' && b != b'\n' && b != b'\r')
    {
        return DataType::Binary;
    }

    DataType::String
}

/// Extract a grouping prefix from a key.
///
/// The first separator within [`MAX_PREFIX_LEN`] characters ends the prefix
/// (separator included). Otherwise the first `MAX_PREFIX_LEN` characters are used.
pub fn key_prefix(key: &str) -> String {
    for sep in PREFIX_SEPARATORS {
        if let Some(idx) = key.find(sep) {
            if idx > 0 && key[..idx].chars().count() <= MAX_PREFIX_LEN {
                return key[..idx + sep.len_utf8()].to_string();
            }
        }
    }
    key.chars().take(MAX_PREFIX_LEN).collect()
}

/// Human-readable bucket for a byte length.
pub fn length_bucket(len: usize) -> &'static str {
    match len {
        0 => "empty",
        1..=10 => "tiny (<=10)",
        11..=100 => "small (11-100)",
        101..=1_000 => "medium (101-1K)",
        1_001..=10_000 => "large (1K-10K)",
        10_001..=100_000 => "very large (10K-100K)",
        _ => "huge (>100K)",
    }
}

// ─── Stats Types ────────────────────────────────────────────────────────────

/// Statistics for a single column family.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CfStats {
    pub name: String,
    pub key_count: u64,
    pub total_key_size: u64,
    pub total_value_size: u64,
    pub average_key_size: f64,
    pub average_value_size: f64,
    pub data_type_distribution: BTreeMap<DataType, u64>,
    pub key_length_distribution: BTreeMap<String, u64>,
    pub value_length_distribution: BTreeMap<String, u64>,
    pub common_prefixes: BTreeMap<String, u64>,
    pub sample_keys: Vec<String>,
    pub last_updated: DateTime<Utc>,
}

impl CfStats {
    /// Build stats by walking every entry of a column family once.
    pub fn collect<'a, I>(name: &str, entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut stats = CfStats {
            name: name.to_string(),
            last_updated: Utc::now(),
            ..CfStats::default()
        };

        for (key, value) in entries {
            stats.key_count += 1;
            stats.total_key_size += key.len() as u64;
            stats.total_value_size += value.len() as u64;

            *stats
                .data_type_distribution
                .entry(detect_data_type(value))
                .or_insert(0) += 1;
            *stats
                .key_length_distribution
                .entry(length_bucket(key.len()).to_string())
                .or_insert(0) += 1;
            *stats
                .value_length_distribution
                .entry(length_bucket(value.len()).to_string())
                .or_insert(0) += 1;
            *stats.common_prefixes.entry(key_prefix(key)).or_insert(0) += 1;

            if stats.sample_keys.len() < MAX_SAMPLE_KEYS {
                stats.sample_keys.push(key.to_string());
            }
        }

        if stats.key_count > 0 {
            stats.average_key_size = stats.total_key_size as f64 / stats.key_count as f64;
            stats.average_value_size = stats.total_value_size as f64 / stats.key_count as f64;
        }

        stats
    }
}

/// Aggregate statistics across all column families.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseStats {
    pub column_families: Vec<CfStats>,
    pub total_key_count: u64,
    pub total_size: u64,
    pub column_family_count: usize,
    pub last_updated: DateTime<Utc>,
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_data_type_basic_kinds() {
        assert_eq!(detect_data_type(""), DataType::Empty);
        assert_eq!(detect_data_type(r#"{"name":"alice"}"#), DataType::Json);
        assert_eq!(detect_data_type("[1, 2, 3]"), DataType::Json);
        assert_eq!(detect_data_type("42"), DataType::Number);
        assert_eq!(detect_data_type("3.14"), DataType::Number);
        assert_eq!(detect_data_type("hello world"), DataType::String);
        assert_eq!(detect_data_type("bin\u{1}ary"), DataType::Binary);
    }

    #[test]
    fn test_detect_data_type_timestamps() {
        assert_eq!(detect_data_type("1700000000"), DataType::Timestamp);
        assert_eq!(detect_data_type("1700000000000"), DataType::Timestamp);
        assert_eq!(detect_data_type("99"), DataType::Number);
    }

    #[test]
    fn test_detect_data_type_braces_without_json() {
        assert_eq!(detect_data_type("{not json}"), DataType::String);
    }

    #[test]
    fn test_key_prefix_separator() {
        assert_eq!(key_prefix("user:1"), "user:");
        assert_eq!(key_prefix("logs/2024/01"), "logs/");
        assert_eq!(key_prefix("order-77"), "order-");
    }

    #[test]
    fn test_key_prefix_without_separator() {
        assert_eq!(key_prefix("short"), "short");
        assert_eq!(key_prefix("averyveryverylongkey"), "averyveryv");
    }

    #[test]
    fn test_length_bucket_edges() {
        assert_eq!(length_bucket(0), "empty");
        assert_eq!(length_bucket(10), "tiny (<=10)");
        assert_eq!(length_bucket(11), "small (11-100)");
        assert_eq!(length_bucket(100_001), "huge (>100K)");
    }

    #[test]
    fn test_collect_cf_stats() {
        let entries = [
            ("user:1", r#"{"name":"alice"}"#),
            ("user:2", r#"{"name":"bob"}"#),
            ("count", "7"),
        ];
        let stats = CfStats::collect("default", entries.iter().map(|(k, v)| (*k, *v)));

        assert_eq!(stats.key_count, 3);
        assert_eq!(stats.data_type_distribution.get(&DataType::Json), Some(&2));
        assert_eq!(stats.data_type_distribution.get(&DataType::Number), Some(&1));
        assert_eq!(stats.common_prefixes.get("user:"), Some(&2));
        assert_eq!(stats.sample_keys.len(), 3);
        assert!(stats.average_key_size > 0.0);
    }

    #[test]
    fn test_collect_cf_stats_empty() {
        let stats = CfStats::collect("empty", std::iter::empty());
        assert_eq!(stats.key_count, 0);
        assert_eq!(stats.average_value_size, 0.0);
    }
}
