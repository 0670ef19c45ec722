//! OpenAI-compatible chat completion client.
//!
//! Every supported provider exposes an OpenAI-compatible endpoint, so one
//! non-streaming client covers them all. Only the default base URL and
//! whether an API key is mandatory differ per provider.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use serde::Deserialize;
use uuid::Uuid;

use super::errors::InferenceError;
use super::provider::{LlmProvider, ProviderKind};
use super::types::{
    ChatCompletionRequest, ChatMessage, Generation, GenerateOptions, ToolCall, ToolDefinition,
};
use crate::config::LlmConfig;

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── OpenAiCompatibleClient ─────────────────────────────────────────────────

/// Non-streaming client for `POST {base_url}/chat/completions`.
pub struct OpenAiCompatibleClient {
    http: HttpClient,
    base_url: String,
    model: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl OpenAiCompatibleClient {
    /// Create a client. Does NOT check connectivity.
    pub fn new(kind: ProviderKind, config: &LlmConfig) -> Result<Self, InferenceError> {
        let api_key = Some(config.api_key.trim().to_string()).filter(|k| !k.is_empty());
        if kind.requires_api_key() && api_key.is_none() {
            return Err(InferenceError::ConfigError {
                reason: format!("API key is required for provider '{}'", kind.as_str()),
            });
        }

        let base_url = config
            .base_url
            .as_deref()
            .filter(|u| !u.is_empty())
            .unwrap_or(kind.default_base_url())
            .trim_end_matches('/')
            .to_string();

        let timeout = Duration::from_secs(config.timeout_secs.max(1));
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: base_url.clone(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            http,
            base_url,
            model: config.model.clone(),
            api_key,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

#[async_trait]
impl LlmProvider for OpenAiCompatibleClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: &GenerateOptions,
    ) -> Result<Generation, InferenceError> {
        let url = format!("{}/chat/completions", self.base_url);
        let tools = tools.filter(|t| !t.is_empty()).map(<[ToolDefinition]>::to_vec);

        let body = ChatCompletionRequest {
            model: self.model.clone(),
            messages: messages.to_vec(),
            tool_choice: tools.as_ref().map(|_| "auto".to_string()),
            tools,
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            stream: false,
        };

        tracing::debug!(
            url = %url,
            model = %body.model,
            message_count = body.messages.len(),
            tool_count = body.tools.as_ref().map(|t| t.len()).unwrap_or(0),
            "=== LLM REQUEST ==="
        );

        let mut request = self.http.post(&url).json(&body);
        if let Some(ref key) = self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_secs: self.timeout.as_secs(),
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(InferenceError::HttpError {
                status: status.as_u16(),
                body: body_text,
            });
        }

        let body_text = response
            .text()
            .await
            .map_err(|e| InferenceError::ResponseError {
                reason: format!("failed to read response body: {e}"),
            })?;

        parse_chat_response(&body_text)
    }
}

// ─── Response Parsing ───────────────────────────────────────────────────────

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    tool_calls: Option<Vec<CompletionToolCall>>,
}

#[derive(Deserialize)]
struct CompletionToolCall {
    id: Option<String>,
    function: CompletionFunction,
}

#[derive(Deserialize)]
struct CompletionFunction {
    name: String,
    arguments: String,
}

/// Parse a non-streaming chat completion body.
///
/// Only the first tool call is honored; the agent executes one tool per round.
pub fn parse_chat_response(body: &str) -> Result<Generation, InferenceError> {
    let resp: CompletionResponse =
        serde_json::from_str(body).map_err(|e| InferenceError::ResponseError {
            reason: format!("failed to parse chat completion: {e}"),
        })?;

    let choice = resp
        .choices
        .into_iter()
        .next()
        .ok_or(InferenceError::ResponseError {
            reason: "empty choices array".into(),
        })?;

    let mut calls = choice.message.tool_calls.unwrap_or_default();
    if !calls.is_empty() {
        if calls.len() > 1 {
            tracing::warn!(
                count = calls.len(),
                "model returned several tool calls, executing the first"
            );
        }
        let tc = calls.swap_remove(0);
        let raw = tc.function.arguments;
        let arguments = if raw.trim().is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_str(&raw).map_err(|e| InferenceError::ToolCallParseError {
                raw_response: raw.clone(),
                reason: format!("invalid JSON: {e}"),
            })?
        };
        return Ok(Generation::ToolCall(ToolCall {
            id: tc.id.unwrap_or_else(|| format!("call_{}", Uuid::new_v4())),
            name: tc.function.name,
            arguments,
        }));
    }

    Ok(Generation::Text(choice.message.content.unwrap_or_default()))
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str, key: &str) -> LlmConfig {
        LlmConfig {
            provider: provider.into(),
            api_key: key.into(),
            ..LlmConfig::default()
        }
    }

    #[test]
    fn test_missing_api_key_rejected() {
        let result = OpenAiCompatibleClient::new(ProviderKind::OpenAi, &config("openai", "  "));
        assert!(matches!(result, Err(InferenceError::ConfigError { .. })));
    }

    #[test]
    fn test_default_base_url_and_trailing_slash() {
        let client =
            OpenAiCompatibleClient::new(ProviderKind::Ollama, &config("ollama", "")).unwrap();
        assert_eq!(client.base_url(), "http://localhost:11434/v1");

        let mut cfg = config("local", "");
        cfg.base_url = Some("http://127.0.0.1:9000/v1/".into());
        let client = OpenAiCompatibleClient::new(ProviderKind::Local, &cfg).unwrap();
        assert_eq!(client.base_url(), "http://127.0.0.1:9000/v1");
    }

    #[test]
    fn test_parse_text_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":"42 keys"},"finish_reason":"stop"}]}"#;
        assert_eq!(
            parse_chat_response(body).unwrap(),
            Generation::Text("42 keys".into())
        );
    }

    #[test]
    fn test_parse_tool_call_response() {
        let body = r#"{"choices":[{"message":{"role":"assistant","content":null,
            "tool_calls":[{"id":"call_9","type":"function",
            "function":{"name":"get_value_by_key","arguments":"{\"key\":\"user:1\"}"}}]}}]}"#;
        match parse_chat_response(body).unwrap() {
            Generation::ToolCall(call) => {
                assert_eq!(call.id, "call_9");
                assert_eq!(call.name, "get_value_by_key");
                assert_eq!(call.arguments["key"], "user:1");
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_tool_call_empty_arguments_and_missing_id() {
        let body = r#"{"choices":[{"message":{"tool_calls":[
            {"function":{"name":"get_database_stats","arguments":""}}]}}]}"#;
        match parse_chat_response(body).unwrap() {
            Generation::ToolCall(call) => {
                assert!(call.id.starts_with("call_"));
                assert!(call.arguments.as_object().unwrap().is_empty());
            }
            other => panic!("expected tool call, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_malformed_arguments() {
        let body = r#"{"choices":[{"message":{"tool_calls":[
            {"id":"c","function":{"name":"put_value","arguments":"{key: 1"}}]}}]}"#;
        assert!(matches!(
            parse_chat_response(body),
            Err(InferenceError::ToolCallParseError { .. })
        ));
    }

    #[test]
    fn test_parse_empty_choices() {
        assert!(matches!(
            parse_chat_response(r#"{"choices":[]}"#),
            Err(InferenceError::ResponseError { .. })
        ));
    }
}
