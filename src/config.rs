//! Agent configuration loading and validation.
//!
//! Reads `kvquery.yaml`, resolves `${VAR}` / `${VAR:-default}` references,
//! applies `KVQUERY_*` environment overrides and validates the result.
//! Every field has a default, so an empty file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent_core::errors::AgentError;
use crate::inference::ProviderKind;

/// File name searched for by [`find_config_path`].
pub const CONFIG_FILE_NAME: &str = "kvquery.yaml";

/// Environment variable pointing at an explicit config file.
pub const CONFIG_PATH_ENV: &str = "KVQUERY_CONFIG";

// ─── Public Types ────────────────────────────────────────────────────────────

/// Top-level configuration (mirrors `kvquery.yaml`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub agent: AgentSettings,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Model provider settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmConfig {
    /// One of `openai`, `googleai`, `ollama`, `anthropic`, `local`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub api_key: String,
    /// Overrides the provider's default endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Overall per-query budget in seconds.
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

/// Agent loop and memory settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentSettings {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enable_memory: bool,
    #[serde(default = "default_memory_size")]
    pub memory_size: usize,
    /// Expose memory as a message list instead of a flattened string.
    #[serde(default)]
    pub memory_return_messages: bool,
}

/// Security gate and audit settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityConfig {
    #[serde(default = "default_true")]
    pub enable_audit: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default = "default_max_query_complexity")]
    pub max_query_complexity: u32,
    #[serde(default = "default_allowed_operations")]
    pub allowed_operations: Vec<String>,
    /// SQLite file for the durable audit log. `None` uses the data directory.
    #[serde(default)]
    pub audit_log_path: Option<String>,
}

/// Database context discovery settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextConfig {
    #[serde(default = "default_true")]
    pub enable_auto_discovery: bool,
    #[serde(default = "default_update_interval_secs")]
    pub update_interval_secs: u64,
    /// Token cap for the context summary injected into prompts.
    #[serde(default = "default_max_context_size")]
    pub max_context_size: u32,
}

/// Query result cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
}

fn default_provider() -> String {
    "openai".into()
}
fn default_model() -> String {
    "gpt-4".into()
}
fn default_llm_timeout_secs() -> u64 {
    30
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    1024
}
fn default_max_iterations() -> u32 {
    10
}
fn default_tool_timeout_secs() -> u64 {
    10
}
fn default_true() -> bool {
    true
}
fn default_memory_size() -> usize {
    100
}
fn default_max_query_complexity() -> u32 {
    10
}
fn default_allowed_operations() -> Vec<String> {
    ["get", "scan", "prefix", "jsonquery", "search", "stats", "list", "last"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_update_interval_secs() -> u64 {
    300
}
fn default_max_context_size() -> u32 {
    4096
}
fn default_cache_entries() -> usize {
    100
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            base_url: None,
            timeout_secs: default_llm_timeout_secs(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
        }
    }
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            tool_timeout_secs: default_tool_timeout_secs(),
            enable_memory: true,
            memory_size: default_memory_size(),
            memory_return_messages: false,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            enable_audit: true,
            read_only: false,
            max_query_complexity: default_max_query_complexity(),
            allowed_operations: default_allowed_operations(),
            audit_log_path: None,
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            enable_auto_discovery: true,
            update_interval_secs: default_update_interval_secs(),
            max_context_size: default_max_context_size(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_cache_entries(),
        }
    }
}

// ─── Derived Settings ────────────────────────────────────────────────────────

impl AgentConfig {
    /// Overall budget for one `process_query` call.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.llm.timeout_secs)
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.agent.tool_timeout_secs)
    }

    pub fn context_update_interval(&self) -> Duration {
        Duration::from_secs(self.context.update_interval_secs)
    }

    /// Parse YAML text (after env interpolation). Overrides and validation
    /// are NOT applied.
    pub fn from_yaml_str(raw: &str) -> Result<Self, AgentError> {
        let interpolated = interpolate_env_vars(raw);
        if interpolated.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&interpolated).map_err(|e| AgentError::ConfigError {
            reason: format!("failed to parse config: {e}"),
        })
    }

    /// Apply `KVQUERY_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary variable source.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("KVQUERY_LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = get("KVQUERY_LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = get("KVQUERY_API_KEY") {
            self.llm.api_key = v;
        }
        if let Some(v) = get("KVQUERY_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = get("KVQUERY_READ_ONLY") {
            self.security.read_only = parse_flag(&v);
        }
        if let Some(v) = get("KVQUERY_ENABLE_AUDIT") {
            self.security.enable_audit = parse_flag(&v);
        }
    }

    /// Reject unknown providers, missing credentials and zero limits.
    pub fn validate(&self) -> Result<(), AgentError> {
        let kind: ProviderKind =
            self.llm
                .provider
                .parse()
                .map_err(|e: crate::inference::InferenceError| AgentError::ConfigError {
                    reason: e.to_string(),
                })?;

        if kind.requires_api_key() && self.llm.api_key.trim().is_empty() {
            return Err(AgentError::ConfigError {
                reason: format!("API key is required for provider '{}'", kind.as_str()),
            });
        }

        let positive = [
            ("llm.timeout_secs", self.llm.timeout_secs),
            ("agent.max_iterations", u64::from(self.agent.max_iterations)),
            ("agent.tool_timeout_secs", self.agent.tool_timeout_secs),
            ("agent.memory_size", self.agent.memory_size as u64),
            (
                "security.max_query_complexity",
                u64::from(self.security.max_query_complexity),
            ),
            (
                "context.max_context_size",
                u64::from(self.context.max_context_size),
            ),
            (
                "context.update_interval_secs",
                self.context.update_interval_secs,
            ),
            ("cache.max_entries", self.cache.max_entries as u64),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(AgentError::ConfigError {
                    reason: format!("{field} must be positive"),
                });
            }
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

// ─── Loading ─────────────────────────────────────────────────────────────────

/// Locate the config file.
///
/// Checks `KVQUERY_CONFIG` first, then walks upward from `start` looking
/// for `kvquery.yaml`.
pub fn find_config_path(start: &Path) -> Result<PathBuf, AgentError> {
    if let Ok(explicit) = std::env::var(CONFIG_PATH_ENV) {
        let candidate = PathBuf::from(expand_tilde(&explicit));
        if candidate.exists() {
            return Ok(candidate);
        }
    }

    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE_NAME);
        if candidate.exists() {
            return Ok(candidate);
        }
        if !dir.pop() {
            break;
        }
    }

    Err(AgentError::ConfigError {
        reason: format!("could not find {CONFIG_FILE_NAME}"),
    })
}

/// Load, override and validate the configuration at `path`.
pub fn load_config(path: &Path) -> Result<AgentConfig, AgentError> {
    let raw = std::fs::read_to_string(path).map_err(|e| AgentError::ConfigError {
        reason: format!("failed to read {}: {e}", path.display()),
    })?;

    let mut config = AgentConfig::from_yaml_str(&raw)?;
    config.apply_env_overrides();
    config.validate()?;

    tracing::info!(
        path = %path.display(),
        provider = %config.llm.provider,
        model = %config.llm.model,
        read_only = config.security.read_only,
        "loaded agent config"
    );
    Ok(config)
}

// ─── Env-var interpolation ───────────────────────────────────────────────────

/// Replace `${VAR}` and `${VAR:-default}` in a string.
///
/// An unterminated `${` is kept literally.
fn interpolate_env_vars(input: &str) -> String {
    let mut result = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        result.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                result.push_str(&resolve_var_expr(&after[..end]));
                rest = &after[end + 1..];
            }
            None => {
                result.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    result.push_str(rest);
    result
}

/// Resolve `VAR` or `VAR:-default`. Unset variables without a default become empty.
fn resolve_var_expr(expr: &str) -> String {
    match expr.split_once(":-") {
        Some((name, default)) => std::env::var(name).unwrap_or_else(|_| expand_tilde(default)),
        None => std::env::var(expr).unwrap_or_default(),
    }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix('~') {
        if let Some(home) = dirs::home_dir() {
            return format!("{}{rest}", home.display());
        }
    }
    path.to_string()
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid() -> AgentConfig {
        let mut config = AgentConfig::default();
        config.llm.api_key = "sk-test".into();
        config
    }

    #[test]
    fn test_defaults() {
        let config = AgentConfig::default();
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gpt-4");
        assert_eq!(config.query_timeout(), Duration::from_secs(30));
        assert_eq!(config.agent.max_iterations, 10);
        assert_eq!(config.agent.memory_size, 100);
        assert_eq!(config.security.max_query_complexity, 10);
        assert!(config.security.allowed_operations.contains(&"get".to_string()));
        assert_eq!(config.context_update_interval(), Duration::from_secs(300));
        assert_eq!(config.context.max_context_size, 4096);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        assert_eq!(AgentConfig::from_yaml_str("").unwrap(), AgentConfig::default());
    }

    #[test]
    fn test_partial_yaml_keeps_other_defaults() {
        let yaml = r#"
            llm:
              provider: ollama
              model: llama3:70b
            security:
              read_only: true
        "#;
        let config = AgentConfig::from_yaml_str(yaml).unwrap();
        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.timeout_secs, 30);
        assert!(config.security.read_only);
        assert_eq!(config.agent.max_iterations, 10);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_negative_limit_fails_to_parse() {
        let yaml = "agent:\n  max_iterations: -1\n";
        assert!(AgentConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_validate_unknown_provider() {
        let mut config = valid();
        config.llm.provider = "carrier-pigeon".into();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("unsupported LLM provider"));
    }

    #[test]
    fn test_validate_missing_api_key() {
        let mut config = valid();
        config.llm.provider = "anthropic".into();
        config.llm.api_key.clear();
        assert!(config.validate().is_err());

        config.llm.provider = "local".into();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_zero_limits() {
        let mut config = valid();
        config.agent.max_iterations = 0;
        assert!(config.validate().unwrap_err().to_string().contains("max_iterations"));

        let mut config = valid();
        config.security.max_query_complexity = 0;
        assert!(config.validate().is_err());

        let mut config = valid();
        config.context.max_context_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_zero_tool_timeout() {
        let mut config = valid();
        config.agent.tool_timeout_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AgentError::ConfigError { .. }));
        assert!(err.to_string().contains("agent.tool_timeout_secs must be positive"));
    }

    #[test]
    fn test_validate_zero_update_interval() {
        let mut config = valid();
        config.context.update_interval_secs = 0;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, AgentError::ConfigError { .. }));
        assert!(err.to_string().contains("context.update_interval_secs must be positive"));
    }

    #[test]
    fn test_overrides_take_precedence() {
        let vars: HashMap<&str, &str> = [
            ("KVQUERY_LLM_PROVIDER", "ollama"),
            ("KVQUERY_LLM_MODEL", "phi3:mini"),
            ("KVQUERY_BASE_URL", "http://gpu-box:11434/v1"),
            ("KVQUERY_READ_ONLY", "true"),
            ("KVQUERY_ENABLE_AUDIT", "0"),
            ("KVQUERY_API_KEY", ""),
        ]
        .into_iter()
        .collect();

        let mut config = AgentConfig::from_yaml_str("llm:\n  api_key: file-key\n").unwrap();
        config.apply_overrides_from(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.llm.provider, "ollama");
        assert_eq!(config.llm.model, "phi3:mini");
        assert_eq!(config.llm.base_url.as_deref(), Some("http://gpu-box:11434/v1"));
        assert_eq!(config.llm.api_key, "file-key", "empty override is ignored");
        assert!(config.security.read_only);
        assert!(!config.security.enable_audit);
    }

    #[test]
    fn test_interpolate_env_vars_with_default() {
        std::env::remove_var("__KVQUERY_TEST_UNSET__");
        let input = "model: ${__KVQUERY_TEST_UNSET__:-gpt-4o}";
        assert_eq!(interpolate_env_vars(input), "model: gpt-4o");
    }

    #[test]
    fn test_interpolate_env_vars_with_value() {
        std::env::set_var("__KVQUERY_TEST_KEY__", "sk-from-env");
        let input = "api_key: ${__KVQUERY_TEST_KEY__}";
        assert_eq!(interpolate_env_vars(input), "api_key: sk-from-env");
        std::env::remove_var("__KVQUERY_TEST_KEY__");
    }

    #[test]
    fn test_interpolate_unterminated() {
        assert_eq!(interpolate_env_vars("a ${OOPS"), "a ${OOPS");
        assert_eq!(interpolate_env_vars("plain"), "plain");
    }

    #[test]
    fn test_expand_tilde() {
        let result = expand_tilde("~/audit.db");
        assert!(!result.starts_with('~'));
        assert!(result.ends_with("/audit.db"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            "llm:\n  provider: local\n  model: tiny-llama\ncache:\n  max_entries: 5\n",
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.llm.model, "tiny-llama");
        assert_eq!(config.cache.max_entries, 5);
    }

    #[test]
    fn test_find_config_path_walks_upward() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "").unwrap();
        let nested = dir.path().join("a/b");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_config_path(&nested).unwrap();
        assert_eq!(found, dir.path().join(CONFIG_FILE_NAME));
    }
}
