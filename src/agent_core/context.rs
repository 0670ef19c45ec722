//! Context Manager — snapshot of database shape for prompt grounding.
//!
//! The snapshot is replaced wholesale on every refresh and handed out by
//! value. Refreshing is the caller's job; `should_update_context` only says
//! when it is due.

use chrono::Utc;
use parking_lot::RwLock;

use super::tokens::{estimate_tokens, truncate_utf8};
use super::types::DatabaseContext;
use crate::config::ContextConfig;
use crate::storage::DatabaseStats;

/// Prefixes listed in the summary.
const SUMMARY_PREFIX_LIMIT: usize = 5;

pub struct ContextManager {
    config: ContextConfig,
    context: RwLock<DatabaseContext>,
}

impl ContextManager {
    pub fn new(config: ContextConfig) -> Self {
        Self {
            config,
            context: RwLock::new(DatabaseContext::default()),
        }
    }

    /// Copy of the current snapshot.
    pub fn get_context(&self) -> DatabaseContext {
        self.context.read().clone()
    }

    /// Replace the snapshot from fresh statistics.
    pub fn update_database_stats(&self, stats: &DatabaseStats) {
        let mut snapshot = DatabaseContext {
            column_families: stats.column_families.iter().map(|cf| cf.name.clone()).collect(),
            total_keys: stats.total_key_count,
            total_size: stats.total_size,
            last_updated: Some(Utc::now()),
            ..DatabaseContext::default()
        };

        for cf in &stats.column_families {
            for (data_type, count) in &cf.data_type_distribution {
                *snapshot
                    .data_type_stats
                    .entry(data_type.as_str().to_string())
                    .or_insert(0) += count;
            }
            snapshot.key_prefixes.extend(cf.common_prefixes.keys().cloned());
        }

        tracing::debug!(
            column_families = snapshot.column_families.len(),
            total_keys = snapshot.total_keys,
            "database context refreshed"
        );
        *self.context.write() = snapshot;
    }

    /// True when auto-discovery is on and the snapshot is missing or stale.
    pub fn should_update_context(&self) -> bool {
        if !self.config.enable_auto_discovery {
            return false;
        }
        match self.context.read().last_updated {
            None => true,
            Some(at) => {
                let elapsed = (Utc::now() - at).to_std().unwrap_or_default();
                elapsed > self.config_interval()
            }
        }
    }

    fn config_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.update_interval_secs)
    }

    /// Short text block for prompts, capped at `max_context_size` tokens.
    pub fn context_summary(&self) -> String {
        let ctx = self.get_context();
        let mut summary = String::from("Database Context:\n");
        summary.push_str(&format!(
            "- Column Families: {} ({})\n",
            ctx.column_families.len(),
            ctx.column_families.join(", ")
        ));
        summary.push_str(&format!("- Total Keys: {}\n", ctx.total_keys));
        summary.push_str(&format!("- Total Size: {} bytes\n", ctx.total_size));
        if let Some(at) = ctx.last_updated {
            summary.push_str(&format!("- Last Updated: {}\n", at.to_rfc3339()));
        }
        if !ctx.key_prefixes.is_empty() {
            let shown: Vec<&str> = ctx
                .key_prefixes
                .iter()
                .take(SUMMARY_PREFIX_LIMIT)
                .map(String::as_str)
                .collect();
            summary.push_str(&format!("- Common Key Prefixes: {}\n", shown.join(", ")));
        }
        if !ctx.data_type_stats.is_empty() {
            summary.push_str("- Data Type Distribution:\n");
            for (data_type, count) in &ctx.data_type_stats {
                summary.push_str(&format!("  - {data_type}: {count}\n"));
            }
        }

        let max_tokens = self.config.max_context_size;
        if estimate_tokens(&summary) > max_tokens {
            // 3 bytes per token keeps the estimate under the cap.
            let cut = truncate_utf8(&summary, max_tokens as usize * 3).to_string();
            return cut;
        }
        summary
    }

    #[cfg(test)]
    pub(crate) fn backdate(&self, by: chrono::Duration) {
        let mut ctx = self.context.write();
        ctx.last_updated = ctx.last_updated.map(|t| t - by);
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{CfStats, DataType};

    fn cf(name: &str, json: u64, prefixes: &[&str]) -> CfStats {
        let mut stats = CfStats {
            name: name.into(),
            key_count: json,
            ..CfStats::default()
        };
        stats.data_type_distribution.insert(DataType::Json, json);
        for p in prefixes {
            stats.common_prefixes.insert(p.to_string(), 1);
        }
        stats
    }

    fn config() -> ContextConfig {
        ContextConfig {
            enable_auto_discovery: true,
            update_interval_secs: 300,
            max_context_size: 4096,
        }
    }

    #[test]
    fn test_data_types_summed_across_column_families() {
        let manager = ContextManager::new(config());
        let stats = DatabaseStats {
            column_families: vec![cf("users", 3, &["user:"]), cf("orders", 4, &["order:", "tmp:"])],
            total_key_count: 7,
            total_size: 100,
            column_family_count: 2,
            last_updated: Utc::now(),
        };
        manager.update_database_stats(&stats);

        let ctx = manager.get_context();
        assert_eq!(ctx.data_type_stats.get("json"), Some(&7));
        assert_eq!(ctx.column_families, vec!["users", "orders"]);
        assert_eq!(ctx.total_keys, 7);
        let mut prefixes = ctx.key_prefixes.clone();
        prefixes.sort();
        assert_eq!(prefixes, vec!["order:", "tmp:", "user:"]);
    }

    #[test]
    fn test_empty_stats_yield_empty_snapshot() {
        let manager = ContextManager::new(config());
        manager.update_database_stats(&DatabaseStats::default());
        let ctx = manager.get_context();
        assert!(ctx.column_families.is_empty());
        assert!(ctx.data_type_stats.is_empty());
        assert!(ctx.key_prefixes.is_empty());
        assert!(ctx.last_updated.is_some());
    }

    #[test]
    fn test_refresh_replaces_rather_than_merges() {
        let manager = ContextManager::new(config());
        manager.update_database_stats(&DatabaseStats {
            column_families: vec![cf("a", 1, &["x:"])],
            ..DatabaseStats::default()
        });
        manager.update_database_stats(&DatabaseStats {
            column_families: vec![cf("b", 2, &[])],
            ..DatabaseStats::default()
        });
        let ctx = manager.get_context();
        assert_eq!(ctx.column_families, vec!["b"]);
        assert!(ctx.key_prefixes.is_empty());
        assert_eq!(ctx.data_type_stats.get("json"), Some(&2));
    }

    #[test]
    fn test_should_update_context() {
        let manager = ContextManager::new(config());
        assert!(manager.should_update_context());

        manager.update_database_stats(&DatabaseStats::default());
        assert!(!manager.should_update_context());

        manager.backdate(chrono::Duration::seconds(301));
        assert!(manager.should_update_context());

        let disabled = ContextManager::new(ContextConfig {
            enable_auto_discovery: false,
            ..config()
        });
        assert!(!disabled.should_update_context());
    }

    #[test]
    fn test_summary_lists_at_most_five_prefixes() {
        let manager = ContextManager::new(config());
        let prefixes = ["a:", "b:", "c:", "d:", "e:", "f:", "g:"];
        manager.update_database_stats(&DatabaseStats {
            column_families: vec![cf("default", 7, &prefixes)],
            total_key_count: 7,
            ..DatabaseStats::default()
        });
        let summary = manager.context_summary();
        assert!(summary.contains("- Column Families: 1 (default)"));
        assert!(summary.contains("- Common Key Prefixes: a:, b:, c:, d:, e:\n"));
        assert!(summary.contains("  - json: 7"));
    }

    #[test]
    fn test_summary_capped_by_token_budget() {
        let manager = ContextManager::new(ContextConfig {
            max_context_size: 10,
            ..config()
        });
        let names: Vec<CfStats> = (0..50).map(|i| cf(&format!("family_{i}"), 1, &[])).collect();
        manager.update_database_stats(&DatabaseStats {
            column_families: names,
            ..DatabaseStats::default()
        });
        let summary = manager.context_summary();
        assert!(estimate_tokens(&summary) <= 10);
    }
}
