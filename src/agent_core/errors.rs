//! Agent Core error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors that can occur during agent core operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Configuration could not be loaded or failed validation.
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// Durable audit store operation failed.
    #[error("database error: {reason}")]
    DatabaseError { reason: String },

    /// Audit log export or sink error.
    #[error("audit log error: {reason}")]
    AuditError { reason: String },

    /// Conversation memory rejected an update.
    #[error("memory error: {reason}")]
    MemoryError { reason: String },

    #[error("serialization error: {reason}")]
    SerializationError { reason: String },

    /// A deadline expired.
    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    /// Tool work failed and the model could not recover.
    #[error("tool execution failed: {reason}")]
    ToolError { reason: String },

    /// The model provider failed.
    #[error("model call failed: {reason}")]
    LlmError { reason: String },

    /// The query was rejected before any tool work.
    #[error("validation failed: {reason}")]
    ValidationError { reason: String },

    /// The agent was closed.
    #[error("agent is closed")]
    Closed,
}

impl AgentError {
    /// Map this error onto the caller-facing [`ErrorKind`].
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Timeout { .. } => ErrorKind::Timeout,
            AgentError::ToolError { .. } => ErrorKind::ToolError,
            AgentError::MemoryError { .. } => ErrorKind::MemoryError,
            AgentError::LlmError { .. } => ErrorKind::LlmError,
            AgentError::ValidationError { .. }
            | AgentError::Closed
            | AgentError::ConfigError { .. } => ErrorKind::ValidationError,
            AgentError::DatabaseError { .. }
            | AgentError::AuditError { .. }
            | AgentError::SerializationError { .. } => ErrorKind::ToolError,
        }
    }
}

impl From<rusqlite::Error> for AgentError {
    fn from(e: rusqlite::Error) -> Self {
        AgentError::DatabaseError {
            reason: e.to_string(),
        }
    }
}

impl From<serde_json::Error> for AgentError {
    fn from(e: serde_json::Error) -> Self {
        AgentError::SerializationError {
            reason: e.to_string(),
        }
    }
}

// ─── ErrorKind ──────────────────────────────────────────────────────────────

/// Failure category reported in a `QueryResult`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Timeout,
    ToolError,
    MemoryError,
    LlmError,
    ValidationError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::ToolError => "tool_error",
            ErrorKind::MemoryError => "memory_error",
            ErrorKind::LlmError => "llm_error",
            ErrorKind::ValidationError => "validation_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::ValidationError).unwrap();
        assert_eq!(json, "\"validation_error\"");
        assert_eq!(ErrorKind::ToolError.to_string(), "tool_error");
    }

    #[test]
    fn test_agent_error_kinds() {
        let timeout = AgentError::Timeout {
            operation: "query".into(),
            timeout_ms: 10,
        };
        assert_eq!(timeout.kind(), ErrorKind::Timeout);
        assert_eq!(AgentError::Closed.kind(), ErrorKind::ValidationError);
        assert_eq!(
            AgentError::LlmError { reason: "x".into() }.kind(),
            ErrorKind::LlmError
        );
    }

    #[test]
    fn test_from_serde_error() {
        let err: AgentError = serde_json::from_str::<serde_json::Value>("{")
            .unwrap_err()
            .into();
        assert!(matches!(err, AgentError::SerializationError { .. }));
    }

    #[test]
    fn test_from_rusqlite_error() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: AgentError = conn
            .execute("INSERT INTO missing_table VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, AgentError::DatabaseError { .. }));
        assert_eq!(err.kind(), ErrorKind::ToolError);
    }
}
