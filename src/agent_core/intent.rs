//! Intent classification.
//!
//! Maps free-text queries onto a closed set of intent labels with ordered,
//! case-insensitive patterns. More specific patterns are listed first so
//! that, e.g., "list column families" is not swallowed by the key-scan rule.

use std::sync::LazyLock;

use regex::Regex;

/// Label used when no pattern matches.
pub const DEFAULT_INTENT: &str = "general_query";

/// Closed set of query intents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intent {
    GetValue,
    ScanKeys,
    StoreData,
    ListColumnFamilies,
    QueryJson,
    GetStats,
    General,
}

impl Intent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::GetValue => "get_value",
            Intent::ScanKeys => "scan_keys",
            Intent::StoreData => "store_data",
            Intent::ListColumnFamilies => "list_cf",
            Intent::QueryJson => "query_json",
            Intent::GetStats => "get_stats",
            Intent::General => DEFAULT_INTENT,
        }
    }

    /// Tools a small model should be offered for this intent.
    ///
    /// An empty slice means "no restriction".
    pub fn relevant_tools(&self) -> &'static [&'static str] {
        match self {
            Intent::GetValue => &["get_value_by_key"],
            Intent::ScanKeys => &["scan_keys_in_range", "scan_keys_with_prefix"],
            Intent::StoreData => &["put_value"],
            Intent::ListColumnFamilies => &["list_column_families"],
            Intent::QueryJson => &["query_json_field"],
            Intent::GetStats => &["get_database_stats"],
            Intent::General => &[],
        }
    }
}

impl std::fmt::Display for Intent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluation order matters: first match wins.
static INTENT_PATTERNS: LazyLock<Vec<(Intent, Regex)>> = LazyLock::new(|| {
    let patterns = [
        (Intent::ListColumnFamilies, r"(?i)\b(list|show)\s+.*\b(column\s+famil|cf)"),
        (Intent::QueryJson, r"(?i)\bjson\b.*\b(query|search|find)\b"),
        (Intent::ScanKeys, r"(?i)\b(list|show|scan|all)\s+.*\b(keys?|entries)\b"),
        (Intent::GetValue, r"(?i)\b(get|fetch|retrieve|show|find)\s+.*\b(key|value|data)\b"),
        (Intent::StoreData, r"(?i)\b(put|set|store|save|insert|add)\b"),
        (Intent::GetStats, r"(?i)\b(stats?|statistics|info|status)\b"),
    ];
    patterns
        .iter()
        .filter_map(|(intent, p)| Regex::new(p).ok().map(|re| (*intent, re)))
        .collect()
});

/// Classify a query. Never fails; unmatched text is [`Intent::General`].
pub fn classify_intent(query: &str) -> Intent {
    INTENT_PATTERNS
        .iter()
        .find(|(_, re)| re.is_match(query))
        .map(|(intent, _)| *intent)
        .unwrap_or(Intent::General)
}
