//! Tool registry — the fixed tool set bound to one store.
//!
//! Provides:
//! - Lookup by tool name
//! - Validation that a call carries the schema's required fields
//! - Read-only mode: write tools are neither offered nor executed
//! - Serialization into OpenAI function-calling definitions
//! - Timed execution on a blocking thread

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{DbTool, ToolError};
use crate::inference::types::{FunctionDefinition, ToolDefinition};
use crate::storage::KvStore;

/// Default wall-clock budget for a single tool call.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

/// Outcome of one executed tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallResult {
    pub tool_name: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: u64,
}

impl ToolCallResult {
    /// Text fed back to the model for this call.
    ///
    /// Failures are rendered as an `Error: ...` line so the model can decide
    /// whether to retry or report.
    pub fn to_model_content(&self) -> String {
        match (&self.result, &self.error) {
            (Some(result), _) if self.success => result.to_string(),
            (_, Some(err)) => format!("Error: {err}"),
            _ => "Error: tool returned no result".to_string(),
        }
    }
}

// ─── ToolRegistry ───────────────────────────────────────────────────────────

/// Registry of database tools, all bound to the same store.
pub struct ToolRegistry {
    store: Arc<dyn KvStore>,
    tools: Vec<DbTool>,
    timeout: Duration,
    read_only: bool,
}

impl ToolRegistry {
    /// Register every [`DbTool`] against `store`.
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self {
            store,
            tools: DbTool::ALL.to_vec(),
            timeout: DEFAULT_TOOL_TIMEOUT,
            read_only: false,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Hide and refuse write tools, regardless of the store's own mode.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether `tool` is registered and usable in the current mode.
    pub fn offers(&self, tool: DbTool) -> bool {
        self.tools.contains(&tool) && !(self.read_only && tool.is_write())
    }

    fn offered(&self) -> impl Iterator<Item = &DbTool> {
        self.tools.iter().filter(|t| self.offers(**t))
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn get_tool(&self, name: &str) -> Option<DbTool> {
        self.tools.iter().copied().find(|t| t.name() == name)
    }

    /// Tool names in registration order, including any hidden by read-only
    /// mode.
    pub fn tool_names(&self) -> Vec<&'static str> {
        self.tools.iter().map(DbTool::name).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Validate that a tool call references a known tool and carries every
    /// field listed in the schema's `required` array.
    ///
    /// Types are not checked here; tools coerce what they can.
    pub fn validate_tool_call(&self, tool_name: &str, arguments: &Value) -> Result<DbTool, ToolError> {
        let tool = self.get_tool(tool_name).ok_or_else(|| ToolError::UnknownTool {
            name: tool_name.to_string(),
        })?;

        if self.read_only && tool.is_write() {
            return Err(ToolError::WriteBlocked {
                tool: tool_name.to_string(),
            });
        }

        let schema = tool.parameters();
        if let Some(required) = schema.get("required").and_then(Value::as_array) {
            let args_obj = arguments.as_object();
            for field in required.iter().filter_map(Value::as_str) {
                let has_field = args_obj.map(|obj| obj.contains_key(field)).unwrap_or(false);
                if !has_field {
                    return Err(ToolError::InvalidArguments {
                        tool: tool_name.to_string(),
                        reason: format!("missing required field: '{field}'"),
                    });
                }
            }
        }

        Ok(tool)
    }

    /// Every offered tool as an OpenAI function definition.
    pub fn to_tool_definitions(&self) -> Vec<ToolDefinition> {
        self.offered().map(definition_for).collect()
    }

    /// Definitions for a subset of tools. Unknown and hidden names are skipped.
    pub fn to_tool_definitions_filtered(&self, names: &[&str]) -> Vec<ToolDefinition> {
        names
            .iter()
            .filter_map(|name| self.get_tool(name))
            .filter(|tool| self.offers(*tool))
            .map(|tool| definition_for(&tool))
            .collect()
    }

    /// One `name: description` line per offered tool.
    pub fn capability_summary(&self) -> String {
        self.offered()
            .map(|t| format!("- {}: {}", t.name(), t.description()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Validate and execute a tool call.
    ///
    /// Never returns an error: failures are captured in the result so the
    /// caller can hand them back to the model.
    pub async fn execute(&self, tool_name: &str, arguments: &Value) -> ToolCallResult {
        let start = Instant::now();

        let outcome = match self.validate_tool_call(tool_name, arguments) {
            Ok(tool) => self.run_blocking(tool, arguments.clone()).await,
            Err(e) => Err(e),
        };
        let elapsed = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(result) => {
                tracing::info!(tool = %tool_name, elapsed_ms = elapsed, "tool call succeeded");
                ToolCallResult {
                    tool_name: tool_name.to_string(),
                    success: true,
                    result: Some(result),
                    error: None,
                    execution_time_ms: elapsed,
                }
            }
            Err(e) => {
                tracing::warn!(tool = %tool_name, elapsed_ms = elapsed, error = %e, "tool call failed");
                ToolCallResult {
                    tool_name: tool_name.to_string(),
                    success: false,
                    result: None,
                    error: Some(e.to_string()),
                    execution_time_ms: elapsed,
                }
            }
        }
    }

    /// Run a storage call on the blocking pool under the tool timeout.
    ///
    /// On timeout the blocking task is abandoned; its result is discarded.
    async fn run_blocking(&self, tool: DbTool, arguments: Value) -> Result<Value, ToolError> {
        let store = Arc::clone(&self.store);
        let task = tokio::task::spawn_blocking(move || tool.call(store.as_ref(), &arguments));

        match tokio::time::timeout(self.timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ToolError::Aborted {
                tool: tool.name().to_string(),
                reason: join_err.to_string(),
            }),
            Err(_) => Err(ToolError::Timeout {
                tool: tool.name().to_string(),
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        }
    }
}

fn definition_for(tool: &DbTool) -> ToolDefinition {
    ToolDefinition {
        r#type: "function".to_string(),
        function: FunctionDefinition {
            name: tool.name().to_string(),
            description: tool.description().to_string(),
            parameters: tool.parameters(),
        },
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvStore, MemoryStore};
    use serde_json::json;

    fn registry() -> ToolRegistry {
        let store = MemoryStore::new();
        store.put("default", "user:1", "alice").unwrap();
        ToolRegistry::new(Arc::new(store))
    }

    #[test]
    fn test_registry_holds_all_tools() {
        let reg = registry();
        assert_eq!(reg.len(), 9);
        assert_eq!(reg.tool_names()[0], "get_value_by_key");
        assert!(reg.get_tool("put_value").is_some());
    }

    #[test]
    fn test_validate_unknown_tool() {
        let reg = registry();
        let err = reg.validate_tool_call("rm_rf", &json!({})).unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool { .. }));
    }

    #[test]
    fn test_validate_missing_required_field() {
        let reg = registry();
        let err = reg
            .validate_tool_call("put_value", &json!({"key": "k"}))
            .unwrap_err();
        assert!(err.to_string().contains("missing required field: 'value'"));
    }

    #[test]
    fn test_validate_non_object_arguments() {
        let reg = registry();
        assert!(reg.validate_tool_call("get_value_by_key", &json!("user:1")).is_err());
        assert!(reg.validate_tool_call("list_column_families", &Value::Null).is_ok());
    }

    #[test]
    fn test_definitions_filtered_skips_unknown() {
        let reg = registry();
        let defs = reg.to_tool_definitions_filtered(&["get_value_by_key", "bogus"]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0].function.name, "get_value_by_key");
        assert_eq!(defs[0].r#type, "function");
        assert_eq!(reg.to_tool_definitions().len(), 9);
    }

    #[test]
    fn test_capability_summary_lists_every_tool() {
        let summary = registry().capability_summary();
        assert_eq!(summary.lines().count(), 9);
        assert!(summary.contains("- search_keys_and_values:"));
    }

    #[tokio::test]
    async fn test_execute_success() {
        let reg = registry();
        let result = reg
            .execute("get_value_by_key", &json!({"key": "user:1"}))
            .await;
        assert!(result.success);
        assert_eq!(result.result.unwrap()["value"], "alice");
    }

    #[tokio::test]
    async fn test_execute_failure_is_captured() {
        let reg = registry();
        let result = reg
            .execute("get_value_by_key", &json!({"key": "ghost"}))
            .await;
        assert!(!result.success);
        assert!(result.to_model_content().starts_with("Error: "));
        assert!(result.to_model_content().contains("key not found"));
    }

    #[tokio::test]
    async fn test_read_only_hides_and_refuses_writes() {
        let store = Arc::new(MemoryStore::new());
        let reg = ToolRegistry::new(store.clone()).with_read_only(true);

        assert!(!reg.offers(DbTool::PutValue));
        assert!(reg.offers(DbTool::GetValue));
        assert_eq!(reg.to_tool_definitions().len(), 8);
        assert!(reg.to_tool_definitions_filtered(&["put_value"]).is_empty());
        assert!(!reg.capability_summary().contains("put_value"));
        assert_eq!(reg.tool_names().len(), 9);

        let result = reg
            .execute("put_value", &json!({"key": "greeting", "value": "hello"}))
            .await;
        assert!(!result.success);
        assert!(result.to_model_content().contains("read-only mode"));
        assert!(store.get("default", "greeting").is_err());
        assert!(matches!(
            reg.validate_tool_call("put_value", &json!({"key": "k", "value": "v"})),
            Err(ToolError::WriteBlocked { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute_unknown_tool_is_captured() {
        let result = registry().execute("bogus", &json!({})).await;
        assert!(!result.success);
        assert_eq!(result.tool_name, "bogus");
    }
}
