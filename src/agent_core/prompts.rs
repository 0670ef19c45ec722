//! Capability-tiered prompt construction.
//!
//! The model is bucketed once, by name, into a [`CapabilityTier`]. The tier
//! bounds the tool-calling loop and decides how much scaffolding the prompt
//! carries: small models get one tool hint and a squeezed history, large
//! models get the full memory and worked examples.

use serde::Serialize;

use crate::inference::types::{ChatMessage, ToolDefinition};
use crate::tools::{DbTool, ToolRegistry};

use super::intent::Intent;
use super::memory::{ConversationMemory, MemoryVariables};

const SMALL_TOKENS: &[&str] = &["7b", "mini", "tiny", "phi", "small", "lite"];
const LARGE_TOKENS: &[&str] = &["70b", "65b", "175b", "gpt-4", "claude-3", "large"];

/// Token budget for history in small-tier prompts.
pub const SMALL_HISTORY_BUDGET: u32 = 64;

/// Turns of history shown to medium-tier models.
pub const MEDIUM_HISTORY_TURNS: i64 = 5;

// ─── CapabilityTier ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTier {
    Small,
    Medium,
    Large,
}

impl CapabilityTier {
    /// Case-insensitive substring match; small indicators are checked first.
    pub fn classify(model_name: &str) -> Self {
        let name = model_name.to_lowercase();
        if SMALL_TOKENS.iter().any(|t| name.contains(t)) {
            CapabilityTier::Small
        } else if LARGE_TOKENS.iter().any(|t| name.contains(t)) {
            CapabilityTier::Large
        } else {
            CapabilityTier::Medium
        }
    }

    /// Loop bound for this tier given the configured maximum.
    pub fn max_iterations(&self, configured: u32) -> u32 {
        match self {
            CapabilityTier::Small => configured.min(3),
            CapabilityTier::Medium => configured.min(5),
            CapabilityTier::Large => configured,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CapabilityTier::Small => "small",
            CapabilityTier::Medium => "medium",
            CapabilityTier::Large => "large",
        }
    }
}

// ─── Prompt Builder ─────────────────────────────────────────────────────────

/// Everything a prompt may draw on for one query.
pub struct PromptContext<'a> {
    pub query: &'a str,
    pub intent: Intent,
    pub memory: Option<&'a ConversationMemory>,
    /// Rendered database context; empty when unavailable.
    pub database_summary: &'a str,
}

/// Tool schemas offered to the model. Small models only see tools relevant
/// to the classified intent, unless none of those is offered.
pub fn tool_definitions(
    tier: CapabilityTier,
    intent: Intent,
    registry: &ToolRegistry,
) -> Vec<ToolDefinition> {
    if tier == CapabilityTier::Small {
        let relevant = registry.to_tool_definitions_filtered(intent.relevant_tools());
        if !relevant.is_empty() {
            return relevant;
        }
    }
    registry.to_tool_definitions()
}

/// Initial message list for the tool-calling loop.
pub fn build_messages(
    tier: CapabilityTier,
    ctx: &PromptContext<'_>,
    registry: &ToolRegistry,
) -> Vec<ChatMessage> {
    match tier {
        CapabilityTier::Small => vec![
            ChatMessage::system(small_system_prompt(ctx, registry)),
            ChatMessage::user(ctx.query),
        ],
        CapabilityTier::Medium => vec![
            ChatMessage::system(medium_system_prompt(ctx, registry)),
            ChatMessage::user(ctx.query),
        ],
        CapabilityTier::Large => large_messages(ctx),
    }
}

fn small_system_prompt(ctx: &PromptContext<'_>, registry: &ToolRegistry) -> String {
    let relevant: Vec<String> = ctx
        .intent
        .relevant_tools()
        .iter()
        .filter_map(|name| DbTool::from_name(name))
        .filter(|t| registry.offers(*t))
        .map(|t| format!("- {}: {}", t.name(), t.description()))
        .collect();
    let tool_lines = if relevant.is_empty() {
        registry.capability_summary()
    } else {
        relevant.join("\n")
    };

    let mut prompt = String::new();
    if let Some(memory) = ctx.memory {
        let history = memory.history_within_budget(SMALL_HISTORY_BUDGET);
        if !history.is_empty() {
            prompt.push_str("Recent context:\n");
            prompt.push_str(&history);
            prompt.push_str("\n\n");
        }
    }
    prompt.push_str(&format!(
        "You are a key-value database assistant. Answer using ONE tool only.

Available tools:
{tool_lines}

Examples:
- \"get user:123\" -> get_value_by_key with key=\"user:123\"
- \"show all keys\" -> scan_keys_in_range with start_key=\"\", end_key=\"\"
- \"keys starting with user:\" -> scan_keys_with_prefix with prefix=\"user:\"

Choose the best tool and provide exact parameters."
    ));
    prompt
}

/// One-line hints for the medium-tier guide, in display order.
const MEDIUM_TOOL_GUIDE: &[(DbTool, &str)] = &[
    (DbTool::GetValue, "retrieve the value stored under a specific key"),
    (DbTool::ScanRange, "list keys in a range, or all keys with empty bounds"),
    (DbTool::PrefixScan, "find keys starting with a prefix"),
    (DbTool::PutValue, "store a key-value pair"),
    (DbTool::ListColumnFamilies, "show the available column families"),
    (DbTool::GetLast, "fetch the newest entry of a column family"),
    (DbTool::JsonQuery, "find JSON values whose field equals a value"),
    (DbTool::Search, "fuzzy or regex search over keys and values"),
    (DbTool::GetStats, "show database statistics"),
];

fn medium_system_prompt(ctx: &PromptContext<'_>, registry: &ToolRegistry) -> String {
    let guide = MEDIUM_TOOL_GUIDE
        .iter()
        .filter(|(tool, _)| registry.offers(*tool))
        .map(|(tool, hint)| format!("- {}: {hint}", tool.name()))
        .collect::<Vec<_>>()
        .join("\n");

    let mut prompt = String::new();
    if let Some(memory) = ctx.memory {
        let recent = memory.get_recent_history(MEDIUM_HISTORY_TURNS);
        if !recent.is_empty() {
            let lines: Vec<String> = recent
                .iter()
                .map(|t| format!("User: {}\nAssistant: {}", t.user_query, t.agent_response))
                .collect();
            prompt.push_str("Conversation history:\n");
            prompt.push_str(&lines.join("\n"));
            prompt.push_str("\n\n");
        }
    }
    prompt.push_str(&format!(
        "You are a key-value database assistant. Use your tools to answer the user's question.

Detected intent: {intent}

Tool selection guide:
{guide}

Extract the column family from phrases like \"in users\" or \"from users\"; use \"default\" when none is given.
Call only one tool unless its result needs a follow-up, then explain the answer clearly.",
        intent = ctx.intent
    ));
    append_database_summary(&mut prompt, ctx.database_summary);
    prompt
}

fn large_messages(ctx: &PromptContext<'_>) -> Vec<ChatMessage> {
    let mut prompt = format!(
        "You are a key-value database assistant. Use your available tools to answer the user's question.

Detected intent: {intent}

[Tool selection examples]
User question: Show all keys in users
Tool: scan_keys_in_range, start_key=\"\", end_key=\"\", column_family=\"users\"

User question: Show all keys starting with user:
Tool: scan_keys_with_prefix, prefix=\"user:\"

User question: Get the value for key user:123
Tool: get_value_by_key, key=\"user:123\"

User question: Which orders have status shipped?
Tool: query_json_field, field=\"status\", value=\"shipped\", column_family=\"orders\"

[Important]
- Understand the question as a whole; do not split it into words and handle each separately.
- Pick the single most appropriate tool and parameters for the overall meaning.
- Respond in the same language as the question.",
        intent = ctx.intent
    );
    append_database_summary(&mut prompt, ctx.database_summary);

    let memory = ctx.memory.map(ConversationMemory::load_memory_variables);
    let mut messages = Vec::new();
    match memory {
        Some(MemoryVariables::History(history)) if !history.is_empty() => {
            prompt.push_str("\n\nConversation history:\n");
            prompt.push_str(&history);
            prompt.push_str(
                "\n\nAnswer the current question in the context of the conversation history.",
            );
            messages.push(ChatMessage::system(prompt));
        }
        Some(MemoryVariables::Messages(history)) => {
            messages.push(ChatMessage::system(prompt));
            messages.extend(history);
        }
        _ => messages.push(ChatMessage::system(prompt)),
    }
    messages.push(ChatMessage::user(ctx.query));
    messages
}

fn append_database_summary(prompt: &mut String, summary: &str) {
    if !summary.is_empty() {
        prompt.push_str("\n\n");
        prompt.push_str(summary.trim_end());
    }
}

/// Prompt for the one extra no-tool call after the loop ran out of rounds.
pub const SUMMARIZE_INSTRUCTION: &str =
    "Using only the tool results above, answer the original question concisely.";

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::Role;
    use crate::storage::MemoryStore;
    use std::sync::Arc;

    fn registry() -> ToolRegistry {
        ToolRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn ctx<'a>(memory: Option<&'a ConversationMemory>, intent: Intent) -> PromptContext<'a> {
        PromptContext {
            query: "get user:1",
            intent,
            memory,
            database_summary: "Database Context:\n- Total Keys: 3\n",
        }
    }

    #[test]
    fn test_classify_tiers() {
        assert_eq!(CapabilityTier::classify("llama2-7b"), CapabilityTier::Small);
        assert_eq!(CapabilityTier::classify("gpt-4o-mini"), CapabilityTier::Small);
        assert_eq!(CapabilityTier::classify("GPT-4"), CapabilityTier::Large);
        assert_eq!(CapabilityTier::classify("llama2-70b"), CapabilityTier::Large);
        assert_eq!(CapabilityTier::classify("mistral-medium"), CapabilityTier::Medium);
        assert_eq!(CapabilityTier::classify(""), CapabilityTier::Medium);
    }

    #[test]
    fn test_max_iterations_by_tier() {
        assert_eq!(CapabilityTier::Small.max_iterations(10), 3);
        assert_eq!(CapabilityTier::Small.max_iterations(2), 2);
        assert_eq!(CapabilityTier::Medium.max_iterations(10), 5);
        assert_eq!(CapabilityTier::Large.max_iterations(10), 10);
    }

    #[test]
    fn test_small_tier_restricts_tools() {
        let registry = registry();
        let defs = tool_definitions(CapabilityTier::Small, Intent::GetValue, &registry);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, "get_value_by_key");

        let all = tool_definitions(CapabilityTier::Small, Intent::General, &registry);
        assert_eq!(all.len(), registry.len());
        let large = tool_definitions(CapabilityTier::Large, Intent::GetValue, &registry);
        assert_eq!(large.len(), registry.len());
    }

    #[test]
    fn test_small_prompt_has_single_tool_hint_and_short_history() {
        let memory = ConversationMemory::new(50, false);
        for i in 0..20 {
            memory.add_custom_turn(format!("question {i} {}", "x".repeat(80)), "answer", chrono::Utc::now());
        }
        let messages = build_messages(CapabilityTier::Small, &ctx(Some(&memory), Intent::GetValue), &registry());
        assert_eq!(messages.len(), 2);
        let system = messages[0].content.as_deref().unwrap();
        assert!(system.contains("ONE tool only"));
        assert!(system.contains("- get_value_by_key:"));
        assert!(!system.contains("- put_value:"));
        assert!(system.starts_with("Recent context:"));
        assert!(!system.contains("question 0 "));
    }

    #[test]
    fn test_medium_prompt_has_guide_and_recent_history() {
        let memory = ConversationMemory::new(50, false);
        for i in 0..8 {
            memory.add_custom_turn(format!("q{i}"), format!("a{i}"), chrono::Utc::now());
        }
        let messages = build_messages(CapabilityTier::Medium, &ctx(Some(&memory), Intent::GetValue), &registry());
        let system = messages[0].content.as_deref().unwrap();
        assert!(system.contains("Tool selection guide"));
        assert!(system.contains("Detected intent: get_value"));
        assert!(system.contains("User: q7\nAssistant: a7"));
        assert!(system.contains("User: q3"));
        assert!(!system.contains("User: q2"));
        assert!(system.contains("Total Keys: 3"));
        assert_eq!(messages[1].content.as_deref(), Some("get user:1"));
    }

    #[test]
    fn test_large_prompt_injects_message_history() {
        let memory = ConversationMemory::new(50, true);
        memory.add_custom_turn("hi", "hello", chrono::Utc::now());
        let messages = build_messages(CapabilityTier::Large, &ctx(Some(&memory), Intent::General), &registry());
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant, Role::User]);
        assert!(messages[0].content.as_deref().unwrap().contains("[Tool selection examples]"));
    }

    #[test]
    fn test_large_prompt_injects_string_history() {
        let memory = ConversationMemory::new(50, false);
        memory.add_custom_turn("hi", "hello", chrono::Utc::now());
        let messages = build_messages(CapabilityTier::Large, &ctx(Some(&memory), Intent::General), &registry());
        assert_eq!(messages.len(), 2);
        assert!(messages[0]
            .content
            .as_deref()
            .unwrap()
            .contains("Conversation history:\nHuman: hi\nAssistant: hello"));
    }

    #[test]
    fn test_read_only_registry_drops_write_tool_everywhere() {
        let registry = registry().with_read_only(true);
        let defs = tool_definitions(CapabilityTier::Small, Intent::StoreData, &registry);
        assert_eq!(defs.len(), registry.len() - 1);
        assert!(defs.iter().all(|d| d.function.name != "put_value"));

        for tier in [CapabilityTier::Small, CapabilityTier::Medium] {
            let messages = build_messages(tier, &ctx(None, Intent::StoreData), &registry);
            let system = messages[0].content.as_deref().unwrap();
            assert!(!system.contains("put_value"), "{tier:?}");
        }

        let writable = build_messages(CapabilityTier::Medium, &ctx(None, Intent::General), &self::registry());
        let system = writable[0].content.as_deref().unwrap();
        assert!(system.contains("- put_value: store a key-value pair"));
    }

    #[test]
    fn test_prompts_without_memory() {
        for tier in [CapabilityTier::Small, CapabilityTier::Medium, CapabilityTier::Large] {
            let messages = build_messages(tier, &ctx(None, Intent::GetStats), &registry());
            assert_eq!(messages.len(), 2);
            assert_eq!(messages[0].role, Role::System);
        }
    }
}
