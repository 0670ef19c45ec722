//! The query agent: one natural-language query in, one `QueryResult` out.
//!
//! States, in order:
//! ```text
//! SecurityGate → CacheCheck → Classify → RuleBased | ModelLoop → Finalize
//! ```
//! The security gate is split around the cache. Read-only and pattern rules
//! run first, so a cached answer is never served for a query that policy
//! rejects. The complexity budget is charged only on a cache miss. Every terminal path produces a
//! well-formed `QueryResult`; `process_query` never panics or errors.
//!
//! Components own their own locks. Nothing is held across a model call, so a
//! slow provider never blocks cache reads for other queries.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context as _;
use serde_json::{json, Value};

use crate::config::{self, AgentConfig};
use crate::inference::provider;
use crate::inference::types::{ChatMessage, GenerateOptions, Generation, ToolDefinition};
use crate::inference::{InferenceError, LlmProvider};
use crate::storage::KvStore;
use crate::tools::registry::ToolCallResult;
use crate::tools::ToolRegistry;

use super::audit::AuditLogger;
use super::cache::{CacheStats, QueryCache};
use super::context::ContextManager;
use super::errors::AgentError;
use super::intent::{classify_intent, Intent, DEFAULT_INTENT};
use super::memory::ConversationMemory;
use super::prompts::{self, CapabilityTier, PromptContext, SUMMARIZE_INSTRUCTION};
use super::rules;
use super::security::{SecurityManager, SecurityReport, SecurityViolation};
use super::tokens::estimate_messages_tokens;
use super::types::{ConversationTurn, QueryResult};

/// Share of the query budget granted to each model call.
const MODEL_CALL_TIMEOUT_FRACTION: f64 = 0.7;

/// Explanation used when tools ran but no answer could be produced.
pub const TOOLS_WITHOUT_ANSWER: &str =
    "Successfully executed tools but could not generate final response";

// ─── Agent ──────────────────────────────────────────────────────────────────

pub struct Agent {
    provider: Arc<dyn LlmProvider>,
    registry: ToolRegistry,
    tier: CapabilityTier,
    max_iterations: u32,
    query_timeout: Duration,
    model_call_timeout: Duration,
    generate_options: GenerateOptions,
    cache: QueryCache,
    memory: Option<ConversationMemory>,
    security: SecurityManager,
    audit: AuditLogger,
    context: ContextManager,
    closed: AtomicBool,
}

impl Agent {
    /// Validate `config`, build its provider, and wire every component.
    pub fn initialize(config: AgentConfig, store: Arc<dyn KvStore>) -> Result<Self, AgentError> {
        config.validate()?;
        let provider =
            provider::from_config(&config.llm).map_err(|e| AgentError::ConfigError {
                reason: format!("failed to initialize LLM: {e}"),
            })?;
        Ok(Self::with_provider(config, store, provider))
    }

    /// Load `kvquery.yaml` (from `path`, or discovered from the working
    /// directory) and initialize.
    pub fn from_config_file(path: Option<&Path>, store: Arc<dyn KvStore>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => {
                let cwd = std::env::current_dir().context("cannot read working directory")?;
                config::find_config_path(&cwd)?
            }
        };
        let config = config::load_config(&path)
            .with_context(|| format!("loading {}", path.display()))?;
        Self::initialize(config, store).context("initializing agent")
    }

    /// Wire the agent around an already-built provider.
    pub fn with_provider(
        config: AgentConfig,
        store: Arc<dyn KvStore>,
        provider: Arc<dyn LlmProvider>,
    ) -> Self {
        let tier = CapabilityTier::classify(provider.model_name());
        let max_iterations = tier.max_iterations(config.agent.max_iterations);
        let memory = config.agent.enable_memory.then(|| {
            ConversationMemory::new(config.agent.memory_size, config.agent.memory_return_messages)
        });

        tracing::info!(
            model = %provider.model_name(),
            tier = tier.as_str(),
            max_iterations,
            memory = memory.is_some(),
            read_only = config.security.read_only,
            "agent initialized"
        );

        let query_timeout = config.query_timeout();
        Self {
            registry: ToolRegistry::new(store)
                .with_timeout(config.tool_timeout())
                .with_read_only(config.security.read_only),
            tier,
            max_iterations,
            query_timeout,
            model_call_timeout: query_timeout.mul_f64(MODEL_CALL_TIMEOUT_FRACTION),
            generate_options: GenerateOptions {
                temperature: config.llm.temperature,
                max_tokens: config.llm.max_tokens,
            },
            cache: QueryCache::new(config.cache.max_entries),
            memory,
            security: SecurityManager::new(&config.security),
            audit: AuditLogger::from_config(&config.security),
            context: ContextManager::new(config.context.clone()),
            closed: AtomicBool::new(false),
            provider,
        }
    }

    /// Override the overall query budget; model calls get the usual share.
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self.model_call_timeout = timeout.mul_f64(MODEL_CALL_TIMEOUT_FRACTION);
        self
    }

    // ─── Public API ─────────────────────────────────────────────────────

    /// Answer one query. Never fails: errors come back as `success == false`.
    pub async fn process_query(&self, query: &str) -> QueryResult {
        let start = Instant::now();

        if self.closed.load(Ordering::Acquire) {
            return QueryResult::from_error(&AgentError::Closed, DEFAULT_INTENT);
        }

        self.audit.log_query(query);

        // SecurityGate, stateless half. Cache hits never touch the budget.
        if let Err(violation) = self.security.check_policy(query) {
            return self.reject(query, &violation, start);
        }

        // CacheCheck
        if let Some(cached) = self.cache.get(query) {
            tracing::debug!(query = %query, "query cache hit");
            let result = cached.with_execution_time(start.elapsed());
            self.audit.log_query_result(
                query,
                result.success,
                result.execution_time,
                result.tools_used.clone(),
                None,
            );
            return result;
        }

        // SecurityGate, budget half.
        if let Err(violation) = self.security.charge_and_authorize(query) {
            return self.reject(query, &violation, start);
        }

        // Classify
        let intent = classify_intent(query);
        tracing::info!(query = %query, intent = intent.as_str(), "processing query");

        let result = match tokio::time::timeout(self.query_timeout, self.answer(query, intent)).await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(
                    query = %query,
                    timeout_ms = self.query_timeout.as_millis() as u64,
                    "query timed out"
                );
                QueryResult::from_error(&self.query_timeout_error(), intent.as_str())
            }
        }
        .with_execution_time(start.elapsed());

        self.finalize(query, &result);
        result
    }

    /// Names of every tool the agent can call.
    pub fn get_capabilities(&self) -> Vec<String> {
        self.registry
            .tool_names()
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    /// Stop accepting queries and close the durable audit sink.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.audit.close();
            tracing::info!("agent closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn tier(&self) -> CapabilityTier {
        self.tier
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn security_report(&self) -> SecurityReport {
        self.security.report()
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn context(&self) -> &ContextManager {
        &self.context
    }

    pub fn memory(&self) -> Option<&ConversationMemory> {
        self.memory.as_ref()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Last `n` remembered turns; empty when memory is disabled.
    pub fn conversation_history(&self, n: i64) -> Vec<ConversationTurn> {
        self.memory
            .as_ref()
            .map(|m| m.get_recent_history(n))
            .unwrap_or_default()
    }

    pub fn clear_memory(&self) {
        if let Some(memory) = &self.memory {
            memory.clear();
        }
    }

    // ─── State machine ──────────────────────────────────────────────────

    /// RuleBased, falling back to ModelLoop.
    async fn answer(&self, query: &str, intent: Intent) -> QueryResult {
        if let Some(plan) = rules::match_rule(query) {
            let outcome = self.execute_tool(plan.tool.name(), &plan.arguments).await;
            if let Some(result) = plan.to_result(&outcome, intent.as_str()) {
                tracing::info!(tool = plan.tool.name(), "answered by rule handler");
                return result;
            }
        }
        self.model_loop(query, intent).await
    }

    async fn model_loop(&self, query: &str, intent: Intent) -> QueryResult {
        self.refresh_context_if_due().await;

        let summary = if self.context.get_context().last_updated.is_some() {
            self.context.context_summary()
        } else {
            String::new()
        };
        let prompt_ctx = PromptContext {
            query,
            intent,
            memory: self.memory.as_ref(),
            database_summary: &summary,
        };
        let mut messages = prompts::build_messages(self.tier, &prompt_ctx, &self.registry);
        let tools = prompts::tool_definitions(self.tier, intent, &self.registry);

        let mut tools_used: Vec<String> = Vec::new();
        let mut failed_calls = 0usize;
        let mut last_tool_error: Option<String> = None;
        let mut answer: Option<String> = None;

        for round in 0..self.max_iterations {
            tracing::debug!(
                round,
                messages = messages.len(),
                prompt_tokens = estimate_messages_tokens(&messages),
                "model round"
            );
            match self.generate(&messages, Some(tools.as_slice())).await {
                Ok(Generation::Text(text)) => {
                    answer = Some(text).filter(|t| !t.trim().is_empty());
                    break;
                }
                Ok(Generation::ToolCall(call)) => {
                    tools_used.push(call.name.clone());
                    let outcome = self.execute_tool(&call.name, &call.arguments).await;
                    if !outcome.success {
                        failed_calls += 1;
                        last_tool_error = outcome.error.clone();
                    }
                    messages.push(ChatMessage::assistant_tool_call(&call));
                    messages.push(ChatMessage::tool_result(&call.id, outcome.to_model_content()));
                }
                Err(e) => return self.provider_failure(&e, tools_used, intent),
            }
        }

        let answer = match answer {
            Some(answer) => answer,
            None if tools_used.is_empty() => {
                let error = AgentError::LlmError {
                    reason: "model returned no answer".to_string(),
                };
                return QueryResult::from_error(&error, intent.as_str());
            }
            None => match self.summarize(&mut messages).await {
                Some(text) => text,
                None if failed_calls == tools_used.len() => {
                    let reason = last_tool_error.unwrap_or_else(|| "unknown error".to_string());
                    let error = AgentError::ToolError {
                        reason: format!("all tool calls failed: {reason}"),
                    };
                    return QueryResult::from_error(&error, intent.as_str()).with_tools(tools_used);
                }
                None => TOOLS_WITHOUT_ANSWER.to_string(),
            },
        };

        QueryResult::success(
            Value::String(answer.clone()),
            answer,
            tools_used,
            intent.as_str(),
        )
    }

    /// One extra call without tools, over the accumulated tool results.
    async fn summarize(&self, messages: &mut Vec<ChatMessage>) -> Option<String> {
        messages.push(ChatMessage::user(SUMMARIZE_INSTRUCTION));
        match self.generate(messages, None).await {
            Ok(Generation::Text(text)) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                tracing::warn!("summarization produced no text");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "summarization call failed");
                None
            }
        }
    }

    /// Finalize: cache and remember successes, audit everything.
    fn finalize(&self, query: &str, result: &QueryResult) {
        if result.success {
            self.cache.set(query, result.clone());
            if let Some(memory) = &self.memory {
                let outputs = json!({
                    "output": result.explanation,
                    "execution_time": result.execution_time.as_millis() as u64,
                });
                if let Err(e) = memory.save_context(&json!({ "input": query }), &outputs) {
                    tracing::warn!(error = %e, "failed to save conversation turn");
                }
            }
        }

        self.audit.log_query_result(
            query,
            result.success,
            result.execution_time,
            result.tools_used.clone(),
            result.error.as_deref(),
        );
        tracing::info!(
            success = result.success,
            error_kind = result.error_kind.map(|k| k.as_str()).unwrap_or(""),
            tools = result.tools_used.len(),
            elapsed_ms = result.execution_time.as_millis() as u64,
            "query finished"
        );
    }

    // ─── Helpers ────────────────────────────────────────────────────────

    async fn generate(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
    ) -> Result<Generation, InferenceError> {
        let call = self
            .provider
            .generate(messages, tools, &self.generate_options);
        match tokio::time::timeout(self.model_call_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => Err(InferenceError::Timeout {
                duration_secs: self.model_call_timeout.as_secs(),
            }),
        }
    }

    async fn execute_tool(&self, name: &str, arguments: &Value) -> ToolCallResult {
        let outcome = self.registry.execute(name, arguments).await;
        self.audit.log_tool_execution(
            name,
            arguments,
            outcome.success,
            Duration::from_millis(outcome.execution_time_ms),
            outcome.error.as_deref(),
        );
        outcome
    }

    async fn refresh_context_if_due(&self) {
        if !self.context.should_update_context() {
            return;
        }
        let store = Arc::clone(self.registry.store());
        match tokio::task::spawn_blocking(move || store.database_stats()).await {
            Ok(Ok(stats)) => self.context.update_database_stats(&stats),
            Ok(Err(e)) => tracing::warn!(error = %e, "database context refresh failed"),
            Err(e) => tracing::warn!(error = %e, "database context refresh aborted"),
        }
    }

    fn reject(&self, query: &str, violation: &SecurityViolation, start: Instant) -> QueryResult {
        self.audit
            .log_security_violation(query, &violation.to_string());
        let error = AgentError::ValidationError {
            reason: format!("query rejected by security policy: {violation}"),
        };
        QueryResult::from_error(&error, classify_intent(query).as_str())
            .with_execution_time(start.elapsed())
    }

    fn provider_failure(
        &self,
        error: &InferenceError,
        tools_used: Vec<String>,
        intent: Intent,
    ) -> QueryResult {
        let error = match provider_error(error) {
            AgentError::Timeout { .. } => self.query_timeout_error(),
            other => other,
        };
        tracing::warn!(error = %error, kind = error.kind().as_str(), "model call failed");
        QueryResult::from_error(&error, intent.as_str()).with_tools(tools_used)
    }

    fn query_timeout_error(&self) -> AgentError {
        AgentError::Timeout {
            operation: "query".to_string(),
            timeout_ms: self.query_timeout.as_millis() as u64,
        }
    }
}

/// Deadline-looking errors are timeouts, tool-looking errors are tool
/// errors, everything else is the model's fault.
pub fn provider_error(error: &InferenceError) -> AgentError {
    if let InferenceError::Timeout { duration_secs } = error {
        return AgentError::Timeout {
            operation: "model call".to_string(),
            timeout_ms: duration_secs.saturating_mul(1000),
        };
    }
    let reason = error.to_string();
    let text = reason.to_lowercase();
    if ["deadline", "timeout", "timed out"]
        .iter()
        .any(|needle| text.contains(needle))
    {
        AgentError::Timeout {
            operation: "model call".to_string(),
            timeout_ms: 0,
        }
    } else if text.contains("tool") {
        AgentError::ToolError { reason }
    } else {
        AgentError::LlmError { reason }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
