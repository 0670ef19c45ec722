//! Sliding-window conversation memory.
//!
//! Holds at most `max_size` turns, oldest dropped first. Reads come in one of
//! two shapes fixed at construction: a structured message list for chat
//! models, or a flattened `Human:/Assistant:` transcript.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use serde_json::Value;

use crate::inference::types::ChatMessage;

use super::errors::AgentError;
use super::tokens::{format_turn, summarize_turn, CharHeuristic, TokenEstimator};
use super::types::ConversationTurn;

/// Used when a non-positive size is configured.
pub const DEFAULT_MEMORY_SIZE: usize = 100;

const INPUT_KEYS: &[&str] = &["input", "user_input", "query"];
const OUTPUT_KEYS: &[&str] = &["output", "text", "response"];
const EXECUTION_TIME_KEY: &str = "execution_time";

const SUMMARY_HEADER: &str = "Earlier conversation (summarized):";

/// Result of [`ConversationMemory::load_memory_variables`].
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryVariables {
    /// Alternating user/assistant messages, empty sides skipped.
    Messages(Vec<ChatMessage>),
    /// Turns rendered as `Human: X\nAssistant: Y`, joined by blank lines.
    History(String),
}

impl MemoryVariables {
    pub fn is_empty(&self) -> bool {
        match self {
            MemoryVariables::Messages(m) => m.is_empty(),
            MemoryVariables::History(h) => h.is_empty(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemoryStats {
    pub total_turns: usize,
    pub max_size: usize,
    pub total_chars: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
    /// Fill level in percent.
    pub usage_percent: f64,
}

pub struct ConversationMemory {
    history: RwLock<VecDeque<ConversationTurn>>,
    max_size: usize,
    return_messages: bool,
    estimator: Arc<dyn TokenEstimator>,
}

impl ConversationMemory {
    /// `max_size` of zero falls back to [`DEFAULT_MEMORY_SIZE`].
    pub fn new(max_size: usize, return_messages: bool) -> Self {
        let max_size = if max_size == 0 {
            DEFAULT_MEMORY_SIZE
        } else {
            max_size
        };
        Self {
            history: RwLock::new(VecDeque::with_capacity(max_size.min(1024))),
            max_size,
            return_messages,
            estimator: Arc::new(CharHeuristic),
        }
    }

    /// Swap in a different token estimator for budget trimming.
    pub fn with_estimator(mut self, estimator: Arc<dyn TokenEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn returns_messages(&self) -> bool {
        self.return_messages
    }

    /// Record one exchange from loosely-shaped input/output maps.
    ///
    /// The first non-empty string under a known key wins on each side. A
    /// call where both sides are empty is ignored.
    pub fn save_context(&self, inputs: &Value, outputs: &Value) -> Result<(), AgentError> {
        let (Some(inputs), Some(outputs)) = (inputs.as_object(), outputs.as_object()) else {
            return Err(AgentError::MemoryError {
                reason: "memory inputs and outputs must be JSON objects".to_string(),
            });
        };

        let user_query = first_string(inputs, INPUT_KEYS);
        let agent_response = first_string(outputs, OUTPUT_KEYS);
        if user_query.is_empty() && agent_response.is_empty() {
            return Ok(());
        }

        let execution_time = outputs
            .get(EXECUTION_TIME_KEY)
            .and_then(Value::as_u64)
            .map(std::time::Duration::from_millis);

        self.push(ConversationTurn {
            user_query,
            agent_response,
            timestamp: Utc::now(),
            execution_time,
        });
        Ok(())
    }

    /// Append a turn with an explicit timestamp (imports, tests).
    pub fn add_custom_turn(
        &self,
        user_query: impl Into<String>,
        agent_response: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) {
        self.push(ConversationTurn {
            user_query: user_query.into(),
            agent_response: agent_response.into(),
            timestamp,
            execution_time: None,
        });
    }

    fn push(&self, turn: ConversationTurn) {
        let mut history = self.history.write();
        history.push_back(turn);
        while history.len() > self.max_size {
            history.pop_front();
        }
    }

    /// Read the whole history in the configured shape.
    pub fn load_memory_variables(&self) -> MemoryVariables {
        let history = self.history.read();
        if self.return_messages {
            let mut messages = Vec::with_capacity(history.len() * 2);
            for turn in history.iter() {
                if !turn.user_query.is_empty() {
                    messages.push(ChatMessage::user(turn.user_query.clone()));
                }
                if !turn.agent_response.is_empty() {
                    messages.push(ChatMessage::assistant(turn.agent_response.clone()));
                }
            }
            MemoryVariables::Messages(messages)
        } else {
            let rendered: Vec<String> = history.iter().map(format_turn).collect();
            MemoryVariables::History(rendered.join("\n\n"))
        }
    }

    /// Last `min(n, len)` turns in chronological order; empty for `n <= 0`.
    pub fn get_recent_history(&self, n: i64) -> Vec<ConversationTurn> {
        if n <= 0 {
            return Vec::new();
        }
        let history = self.history.read();
        let n = usize::try_from(n).unwrap_or(usize::MAX).min(history.len());
        history.iter().skip(history.len() - n).cloned().collect()
    }

    pub fn get_history(&self) -> Vec<ConversationTurn> {
        self.history.read().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.history.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.history.write().clear();
    }

    pub fn stats(&self) -> MemoryStats {
        let history = self.history.read();
        MemoryStats {
            total_turns: history.len(),
            max_size: self.max_size,
            total_chars: history
                .iter()
                .map(|t| t.user_query.len() + t.agent_response.len())
                .sum(),
            oldest: history.front().map(|t| t.timestamp),
            newest: history.back().map(|t| t.timestamp),
            usage_percent: history.len() as f64 / self.max_size as f64 * 100.0,
        }
    }

    /// Transcript that fits in roughly `budget_tokens`.
    ///
    /// The newest turns are kept verbatim while they fit. Older turns are
    /// folded into one summary line each, newest first, until the budget is
    /// spent. Output is always chronological.
    pub fn history_within_budget(&self, budget_tokens: u32) -> String {
        let history = self.history.read();
        let est = self.estimator.as_ref();

        let mut used = 0u32;
        let mut split = history.len();
        for (i, turn) in history.iter().enumerate().rev() {
            // +1 for the blank-line separator.
            let cost = est.estimate(&format_turn(turn)) + 1;
            if used + cost > budget_tokens {
                break;
            }
            used += cost;
            split = i;
        }

        let mut summary_lines = Vec::new();
        if split > 0 {
            let mut remaining = budget_tokens
                .saturating_sub(used)
                .saturating_sub(est.estimate(SUMMARY_HEADER));
            for turn in history.range(..split).rev() {
                let line = summarize_turn(turn);
                let cost = est.estimate(&line) + 1;
                if cost > remaining {
                    break;
                }
                remaining -= cost;
                summary_lines.push(line);
            }
            summary_lines.reverse();
        }

        let verbatim: Vec<String> = history.range(split..).map(format_turn).collect();
        let mut out = String::new();
        if !summary_lines.is_empty() {
            out.push_str(SUMMARY_HEADER);
            out.push('\n');
            out.push_str(&summary_lines.join("\n"));
            if !verbatim.is_empty() {
                out.push_str("\n\n");
            }
        }
        out.push_str(&verbatim.join("\n\n"));
        out
    }
}

fn first_string(map: &serde_json::Map<String, Value>, keys: &[&str]) -> String {
    keys.iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::types::Role;
    use serde_json::json;

    fn save(memory: &ConversationMemory, q: &str, a: &str) {
        memory
            .save_context(&json!({"input": q}), &json!({"output": a}))
            .unwrap();
    }

    #[test]
    fn test_sliding_window_keeps_most_recent() {
        let memory = ConversationMemory::new(3, false);
        for i in 0..5 {
            save(&memory, &format!("q{i}"), &format!("a{i}"));
        }
        let history = memory.get_history();
        assert_eq!(history.len(), 3);
        let queries: Vec<_> = history.iter().map(|t| t.user_query.as_str()).collect();
        assert_eq!(queries, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn test_zero_size_uses_default() {
        let memory = ConversationMemory::new(0, false);
        assert_eq!(memory.max_size(), DEFAULT_MEMORY_SIZE);
    }

    #[test]
    fn test_save_context_alternate_keys() {
        let memory = ConversationMemory::new(10, false);
        memory
            .save_context(
                &json!({"input": "", "query": "from query"}),
                &json!({"response": "from response", "execution_time": 42}),
            )
            .unwrap();
        let turn = &memory.get_history()[0];
        assert_eq!(turn.user_query, "from query");
        assert_eq!(turn.agent_response, "from response");
        assert_eq!(turn.execution_time, Some(std::time::Duration::from_millis(42)));
    }

    #[test]
    fn test_save_context_ignores_empty_exchange() {
        let memory = ConversationMemory::new(10, false);
        memory.save_context(&json!({}), &json!({"output": ""})).unwrap();
        assert!(memory.is_empty());
    }

    #[test]
    fn test_save_context_rejects_non_objects() {
        let memory = ConversationMemory::new(10, false);
        let err = memory.save_context(&json!("text"), &json!({})).unwrap_err();
        assert!(matches!(err, AgentError::MemoryError { .. }));
    }

    #[test]
    fn test_recent_history_bounds() {
        let memory = ConversationMemory::new(10, false);
        for i in 0..4 {
            save(&memory, &format!("q{i}"), "a");
        }
        assert!(memory.get_recent_history(0).is_empty());
        assert!(memory.get_recent_history(-3).is_empty());
        let recent = memory.get_recent_history(2);
        assert_eq!(recent[0].user_query, "q2");
        assert_eq!(recent[1].user_query, "q3");
        assert_eq!(memory.get_recent_history(100).len(), 4);
    }

    #[test]
    fn test_string_mode_format() {
        let memory = ConversationMemory::new(10, false);
        save(&memory, "X", "Y");
        save(&memory, "P", "Q");
        assert_eq!(
            memory.load_memory_variables(),
            MemoryVariables::History("Human: X\nAssistant: Y\n\nHuman: P\nAssistant: Q".into())
        );
    }

    #[test]
    fn test_message_mode_skips_empty_sides() {
        let memory = ConversationMemory::new(10, true);
        save(&memory, "hello", "");
        save(&memory, "again", "answer");
        let MemoryVariables::Messages(messages) = memory.load_memory_variables() else {
            panic!("expected message mode");
        };
        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
    }

    #[test]
    fn test_stats_and_clear() {
        let memory = ConversationMemory::new(4, false);
        let earlier = Utc::now() - chrono::Duration::minutes(5);
        memory.add_custom_turn("ab", "cde", earlier);
        save(&memory, "f", "g");

        let stats = memory.stats();
        assert_eq!(stats.total_turns, 2);
        assert_eq!(stats.total_chars, 7);
        assert_eq!(stats.oldest, Some(earlier));
        assert!((stats.usage_percent - 50.0).abs() < f64::EPSILON);

        memory.clear();
        assert!(memory.is_empty());
        assert_eq!(memory.stats().oldest, None);
    }

    #[test]
    fn test_history_within_budget_fits_everything() {
        let memory = ConversationMemory::new(10, false);
        save(&memory, "a", "b");
        save(&memory, "c", "d");
        assert_eq!(
            memory.history_within_budget(1000),
            "Human: a\nAssistant: b\n\nHuman: c\nAssistant: d"
        );
    }

    #[test]
    fn test_history_within_budget_summarizes_older_turns() {
        let memory = ConversationMemory::new(20, false);
        let answer = "y".repeat(300);
        for i in 0..10 {
            save(&memory, &format!("question number {i} {}", "x".repeat(40)), &answer);
        }
        // Two verbatim turns (~119 tokens each) plus one summary line fit.
        let budget = 300;
        let out = memory.history_within_budget(budget);

        assert!(out.starts_with(SUMMARY_HEADER));
        assert!(out.ends_with(&answer));
        assert!(out.contains("Human: question number 9"));
        assert!(out.contains("Human: question number 8"));
        assert!(out.contains("- asked \"question number 7"));
        assert!(!out.contains("Human: question number 7"));
        assert!(CharHeuristic.estimate(&out) <= budget + 4);
        // Oldest turn is dropped entirely, not cut mid-turn.
        assert!(!out.contains("question number 0"));
    }

    #[test]
    fn test_history_within_budget_custom_estimator() {
        let memory = ConversationMemory::new(10, false)
            .with_estimator(Arc::new(|s: &str| s.split_whitespace().count() as u32));
        save(&memory, "one", "two");
        // "Human: one\nAssistant: two" = 4 words + 1 separator
        assert_eq!(memory.history_within_budget(5), "Human: one\nAssistant: two");
        assert_eq!(memory.history_within_budget(0), "");
    }

    #[test]
    fn test_concurrent_saves() {
        let memory = Arc::new(ConversationMemory::new(50, false));
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let memory = Arc::clone(&memory);
                std::thread::spawn(move || {
                    for i in 0..25 {
                        memory
                            .save_context(&json!({"input": format!("{t}-{i}")}), &json!({}))
                            .unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(memory.len(), 50);
    }
}
