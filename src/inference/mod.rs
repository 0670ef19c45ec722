//! Inference — the model provider interface used by the agent.
//!
//! - `provider`: the `LlmProvider` trait and provider selection by name
//! - `client`: OpenAI-compatible HTTP implementation shared by all providers
//! - `types`: chat messages, tool definitions and generation results
//! - `errors`: provider error types
//!
//! The wire format is the OpenAI Chat Completions API, which every
//! supported provider exposes. Switching providers is a config change.

pub mod client;
pub mod errors;
pub mod provider;
pub mod types;

// Re-exports for convenience
pub use client::OpenAiCompatibleClient;
pub use errors::InferenceError;
pub use provider::{LlmProvider, ProviderKind};
pub use types::{ChatMessage, Generation, GenerateOptions, Role, ToolCall, ToolDefinition};
