//! Token estimation for prompt and history budgeting.
//!
//! Byte-length heuristics stand in for a tokenizer. Prose is counted at
//! 3.2 bytes per token and JSON at 2.8; both round up, so estimates err
//! on the high side. A real tokenizer can be plugged in through
//! [`TokenEstimator`].

use crate::inference::types::{ChatMessage, Role};

use super::types::ConversationTurn;

const PROSE_BYTES_PER_TOKEN: f64 = 3.2;
const JSON_BYTES_PER_TOKEN: f64 = 2.8;

/// Role marker and separators around every message.
const PER_MESSAGE_TOKENS: u32 = 4;

/// Function-call envelope around each requested tool call.
const PER_TOOL_CALL_TOKENS: u32 = 10;

/// Byte cap for each side of a summarized turn.
const TURN_PREVIEW_BYTES: usize = 60;

// ─── Estimator ──────────────────────────────────────────────────────────────

/// Pluggable token counter used by memory trimming and context capping.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> u32;
}

/// Default prose heuristic.
#[derive(Debug, Clone, Copy, Default)]
pub struct CharHeuristic;

impl TokenEstimator for CharHeuristic {
    fn estimate(&self, text: &str) -> u32 {
        estimate_tokens(text)
    }
}

impl<F> TokenEstimator for F
where
    F: Fn(&str) -> u32 + Send + Sync,
{
    fn estimate(&self, text: &str) -> u32 {
        self(text)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

/// Longest prefix of `s` that fits in `max_bytes` without splitting a char.
pub(crate) fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut cut = max_bytes;
    while !s.is_char_boundary(cut) {
        cut -= 1;
    }
    &s[..cut]
}

fn ratio(bytes: usize, per_token: f64) -> u32 {
    (bytes as f64 / per_token).ceil() as u32
}

pub fn estimate_tokens(text: &str) -> u32 {
    ratio(text.len(), PROSE_BYTES_PER_TOKEN)
}

pub fn estimate_json_tokens(json_text: &str) -> u32 {
    ratio(json_text.len(), JSON_BYTES_PER_TOKEN)
}

/// Cost of one chat message. Tool results are priced as JSON.
pub fn estimate_message_tokens(message: &ChatMessage) -> u32 {
    let body = message.content.as_deref().map_or(0, |text| match message.role {
        Role::Tool => estimate_json_tokens(text),
        _ => estimate_tokens(text),
    });

    let calls: u32 = message
        .tool_calls
        .iter()
        .flatten()
        .map(|call| {
            PER_TOOL_CALL_TOKENS
                + estimate_tokens(&call.function.name)
                + estimate_json_tokens(&call.function.arguments)
        })
        .sum();

    let id = message.tool_call_id.as_deref().map_or(0, estimate_tokens);

    PER_MESSAGE_TOKENS + body + calls + id
}

pub fn estimate_messages_tokens(messages: &[ChatMessage]) -> u32 {
    messages.iter().map(estimate_message_tokens).sum()
}

// ─── Turns ──────────────────────────────────────────────────────────────────

/// A turn as it appears in string-mode history. Empty sides are omitted.
pub fn format_turn(turn: &ConversationTurn) -> String {
    let human = (!turn.user_query.is_empty()).then(|| format!("Human: {}", turn.user_query));
    let assistant =
        (!turn.agent_response.is_empty()).then(|| format!("Assistant: {}", turn.agent_response));
    human.into_iter().chain(assistant).collect::<Vec<_>>().join("\n")
}

/// One-line lossy summary of a turn, used when history overflows a budget.
pub fn summarize_turn(turn: &ConversationTurn) -> String {
    fn preview(text: &str, placeholder: &'static str) -> String {
        if text.is_empty() {
            return placeholder.to_string();
        }
        let cut = truncate_utf8(text, TURN_PREVIEW_BYTES);
        if cut.len() < text.len() {
            format!("{cut}...")
        } else {
            cut.to_string()
        }
    }
    format!(
        "- asked \"{}\" -> \"{}\"",
        preview(&turn.user_query, "[empty]"),
        preview(&turn.agent_response, "[no answer]"),
    )
}
