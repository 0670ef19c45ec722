//! Model provider seam.
//!
//! The agent only ever calls [`LlmProvider::generate`]. Concrete providers
//! are selected by name from configuration; tests inject their own.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;

use super::client::OpenAiCompatibleClient;
use super::errors::InferenceError;
use super::types::{ChatMessage, Generation, GenerateOptions, ToolDefinition};
use crate::config::LlmConfig;

/// A language model that can answer with text or a single tool call.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Declared model name, used for capability tiering.
    fn model_name(&self) -> &str;

    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        options: &GenerateOptions,
    ) -> Result<Generation, InferenceError>;
}

// ─── ProviderKind ───────────────────────────────────────────────────────────

/// Supported provider families.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    OpenAi,
    GoogleAi,
    Ollama,
    Anthropic,
    Local,
}

impl ProviderKind {
    pub const SUPPORTED: [&'static str; 5] = ["openai", "googleai", "ollama", "anthropic", "local"];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "openai",
            ProviderKind::GoogleAi => "googleai",
            ProviderKind::Ollama => "ollama",
            ProviderKind::Anthropic => "anthropic",
            ProviderKind::Local => "local",
        }
    }

    /// Hosted providers refuse unauthenticated requests.
    pub fn requires_api_key(&self) -> bool {
        matches!(
            self,
            ProviderKind::OpenAi | ProviderKind::GoogleAi | ProviderKind::Anthropic
        )
    }

    /// OpenAI-compatible endpoint used when no base URL is configured.
    pub fn default_base_url(&self) -> &'static str {
        match self {
            ProviderKind::OpenAi => "https://api.openai.com/v1",
            ProviderKind::GoogleAi => "https://generativelanguage.googleapis.com/v1beta/openai",
            ProviderKind::Ollama => "http://localhost:11434/v1",
            ProviderKind::Anthropic => "https://api.anthropic.com/v1",
            ProviderKind::Local => "http://localhost:8080/v1",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = InferenceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "openai" => Ok(ProviderKind::OpenAi),
            "googleai" => Ok(ProviderKind::GoogleAi),
            "ollama" => Ok(ProviderKind::Ollama),
            "anthropic" => Ok(ProviderKind::Anthropic),
            "local" => Ok(ProviderKind::Local),
            other => Err(InferenceError::ConfigError {
                reason: format!(
                    "unsupported LLM provider: '{other}' (supported: {})",
                    Self::SUPPORTED.join(", ")
                ),
            }),
        }
    }
}

/// Build the provider named in `config`.
pub fn from_config(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, InferenceError> {
    let kind: ProviderKind = config.provider.parse()?;
    let client = OpenAiCompatibleClient::new(kind, config)?;
    tracing::info!(
        provider = kind.as_str(),
        model = %config.model,
        base_url = %client.base_url(),
        "model provider ready"
    );
    Ok(Arc::new(client))
}
