//! Shared types for the agent core.
//!
//! Query results, conversation turns, audit events and the database context
//! snapshot passed between the Agent and its components.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{AgentError, ErrorKind};

// ─── Query Results ──────────────────────────────────────────────────────────

/// Outcome of one `process_query` call. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub success: bool,
    /// Payload: a tool result projection or the model's answer text.
    pub data: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    pub explanation: String,
    pub tools_used: Vec<String>,
    pub intent: String,
    #[serde(with = "duration_ms", rename = "execution_time_ms")]
    pub execution_time: Duration,
}

impl QueryResult {
    pub fn success(
        data: serde_json::Value,
        explanation: impl Into<String>,
        tools_used: Vec<String>,
        intent: impl Into<String>,
    ) -> Self {
        Self {
            success: true,
            data,
            error: None,
            error_kind: None,
            explanation: explanation.into(),
            tools_used,
            intent: intent.into(),
            execution_time: Duration::ZERO,
        }
    }

    pub fn failure(kind: ErrorKind, error: impl Into<String>, intent: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            data: serde_json::Value::Null,
            explanation: format!("Query failed: {error}"),
            error: Some(error),
            error_kind: Some(kind),
            tools_used: Vec::new(),
            intent: intent.into(),
            execution_time: Duration::ZERO,
        }
    }

    /// Failure carrying the error's kind and message.
    pub fn from_error(error: &AgentError, intent: impl Into<String>) -> Self {
        Self::failure(error.kind(), error.to_string(), intent)
    }

    pub fn with_tools(mut self, tools_used: Vec<String>) -> Self {
        self.tools_used = tools_used;
        self
    }

    pub fn with_execution_time(mut self, elapsed: Duration) -> Self {
        self.execution_time = elapsed;
        self
    }
}

// ─── Conversation ───────────────────────────────────────────────────────────

/// One remembered (query, answer) exchange. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_query: String,
    pub agent_response: String,
    pub timestamp: DateTime<Utc>,
    #[serde(with = "option_duration_ms", rename = "execution_time_ms", default)]
    pub execution_time: Option<Duration>,
}

// ─── Audit ──────────────────────────────────────────────────────────────────

/// Kinds of audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    QueryReceived,
    QueryCompleted,
    ToolExecuted,
    SecurityViolation,
}

impl AuditEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditEventType::QueryReceived => "query_received",
            AuditEventType::QueryCompleted => "query_completed",
            AuditEventType::ToolExecuted => "tool_executed",
            AuditEventType::SecurityViolation => "security_violation",
        }
    }
}

impl std::fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub query: String,
    pub success: bool,
    #[serde(with = "option_duration_ms", rename = "duration_ms", default)]
    pub duration: Option<Duration>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty", default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

// ─── Database Context ───────────────────────────────────────────────────────

/// Snapshot of the database's shape used to ground prompts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseContext {
    pub column_families: Vec<String>,
    pub total_keys: u64,
    pub total_size: u64,
    /// `None` until the first refresh.
    pub last_updated: Option<DateTime<Utc>>,
    pub key_prefixes: Vec<String>,
    /// Value type name → count, summed across column families.
    pub data_type_stats: BTreeMap<String, u64>,
}

// ─── Serde helpers ──────────────────────────────────────────────────────────

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}

mod option_duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
