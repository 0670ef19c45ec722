//! Rule-based fast path.
//!
//! A handful of anchored patterns answer common, unambiguous queries with a
//! single direct tool call and no model round-trip. Rules are tried in a
//! fixed order so specific forms win over broad ones ("scan prefix x" before
//! anything that might also match it).

use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::tools::registry::ToolCallResult;
use crate::tools::DbTool;

use super::types::QueryResult;

/// Row cap for "show all keys".
const ALL_KEYS_LIMIT: usize = 1000;
/// Row cap for "scan prefix X".
const PREFIX_SCAN_LIMIT: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RuleKind {
    PrefixScan,
    Get,
    AllKeys,
    ColumnFamilies,
    Stats,
}

static RULES: LazyLock<Vec<(RuleKind, Regex)>> = LazyLock::new(|| {
    let rules = [
        (RuleKind::PrefixScan, r"(?i)^scan\s+prefix\s+(.+)$"),
        (RuleKind::Get, r"(?i)^get\s+(.+)$"),
        (RuleKind::AllKeys, r"(?i)^(?:show|list)\s+all\s+keys?$"),
        (RuleKind::ColumnFamilies, r"(?i)^list\s+column\s+famil(?:y|ies)$"),
        (RuleKind::Stats, r"(?i)^stats?$"),
    ];
    rules
        .iter()
        .filter_map(|(kind, p)| Regex::new(p).ok().map(|re| (*kind, re)))
        .collect()
});

/// A matched rule, ready to run.
#[derive(Debug, Clone, PartialEq)]
pub struct RulePlan {
    pub tool: DbTool,
    pub arguments: Value,
    pub explanation: String,
    /// Field of the tool's JSON envelope returned as the result payload.
    projection: &'static str,
}

/// Match a query against the rules. Captured keys keep their original case.
pub fn match_rule(query: &str) -> Option<RulePlan> {
    let query = query.trim();
    let (kind, caps) = RULES
        .iter()
        .find_map(|(kind, re)| re.captures(query).map(|caps| (*kind, caps)))?;
    let captured = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();

    let plan = match kind {
        RuleKind::PrefixScan => RulePlan {
            tool: DbTool::PrefixScan,
            arguments: json!({"prefix": captured, "limit": PREFIX_SCAN_LIMIT}),
            explanation: format!("Scanned keys with prefix: {captured}"),
            projection: "results",
        },
        RuleKind::Get => RulePlan {
            tool: DbTool::GetValue,
            arguments: json!({"key": captured}),
            explanation: format!("Retrieved value for key: {captured}"),
            projection: "value",
        },
        RuleKind::AllKeys => RulePlan {
            tool: DbTool::ScanRange,
            arguments: json!({"start_key": "", "end_key": "", "limit": ALL_KEYS_LIMIT}),
            explanation: "Retrieved all keys from database".to_string(),
            projection: "results",
        },
        RuleKind::ColumnFamilies => RulePlan {
            tool: DbTool::ListColumnFamilies,
            arguments: json!({}),
            explanation: "Listed all column families".to_string(),
            projection: "column_families",
        },
        RuleKind::Stats => RulePlan {
            tool: DbTool::GetStats,
            arguments: json!({}),
            explanation: "Retrieved database statistics".to_string(),
            projection: "stats",
        },
    };
    Some(plan)
}

impl RulePlan {
    /// Turn the tool outcome into a result.
    ///
    /// Returns `None` when the tool failed, so the caller can fall back to
    /// the model loop.
    pub fn to_result(&self, outcome: &ToolCallResult, intent: &str) -> Option<QueryResult> {
        if !outcome.success {
            tracing::debug!(
                tool = self.tool.name(),
                error = outcome.error.as_deref().unwrap_or(""),
                "rule handler failed, falling back to model"
            );
            return None;
        }
        let data = outcome
            .result
            .as_ref()
            .and_then(|r| r.get(self.projection))
            .cloned()
            .unwrap_or(Value::Null);
        Some(QueryResult::success(
            data,
            self.explanation.clone(),
            vec![self.tool.name().to_string()],
            intent,
        ))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvStore, MemoryStore};
    use crate::tools::ToolRegistry;
    use std::sync::Arc;

    async fn run(registry: &ToolRegistry, query: &str, intent: &str) -> Option<QueryResult> {
        let plan = match_rule(query)?;
        let outcome = registry.execute(plan.tool.name(), &plan.arguments).await;
        plan.to_result(&outcome, intent)
    }

    #[test]
    fn test_all_rules_compile() {
        assert_eq!(RULES.len(), 5);
    }

    #[test]
    fn test_get_preserves_key_case() {
        let plan = match_rule("GET User:ABC").unwrap();
        assert_eq!(plan.tool, DbTool::GetValue);
        assert_eq!(plan.arguments["key"], "User:ABC");
    }

    #[test]
    fn test_prefix_scan_not_shadowed() {
        let plan = match_rule("scan prefix user:").unwrap();
        assert_eq!(plan.tool, DbTool::PrefixScan);
        assert_eq!(plan.arguments["prefix"], "user:");
        assert_eq!(plan.arguments["limit"], 100);
    }

    #[test]
    fn test_other_rules() {
        assert_eq!(match_rule("show all keys").unwrap().tool, DbTool::ScanRange);
        assert_eq!(match_rule("list all key").unwrap().tool, DbTool::ScanRange);
        assert_eq!(
            match_rule("  list column families ").unwrap().tool,
            DbTool::ListColumnFamilies
        );
        assert_eq!(match_rule("stats").unwrap().tool, DbTool::GetStats);
        assert_eq!(match_rule("STAT").unwrap().tool, DbTool::GetStats);
    }

    #[test]
    fn test_no_match() {
        assert!(match_rule("what is the newest order?").is_none());
        assert!(match_rule("show all keys in users please").is_none());
        assert!(match_rule("").is_none());
    }

    #[tokio::test]
    async fn test_execute_get_projects_value() {
        let store = MemoryStore::new();
        store.put("default", "user:1", "alice").unwrap();
        let registry = ToolRegistry::new(Arc::new(store));

        let result = run(&registry, "get user:1", "get_value").await.unwrap();
        assert!(result.success);
        assert_eq!(result.data, json!("alice"));
        assert_eq!(result.tools_used, vec!["get_value_by_key"]);
        assert_eq!(result.explanation, "Retrieved value for key: user:1");
    }

    #[tokio::test]
    async fn test_execute_missing_key_falls_through() {
        let registry = ToolRegistry::new(Arc::new(MemoryStore::new()));
        assert!(run(&registry, "get nope", "get_value").await.is_none());
    }

    #[tokio::test]
    async fn test_execute_list_column_families() {
        let registry = ToolRegistry::new(Arc::new(MemoryStore::new()));
        let result = run(&registry, "list column families", "list_cf").await.unwrap();
        assert_eq!(result.data, json!(["default"]));
    }
}
