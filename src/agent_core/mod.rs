//! Agent Core — query orchestration for the key-value agent.
//!
//! Submodules:
//! - `agent`: the per-query state machine (security, cache, rules, model loop)
//! - `intent`: keyword intent classification
//! - `rules`: regex fast path that bypasses the model
//! - `prompts`: capability tiers and prompt construction
//! - `cache`: bounded LRU of successful results
//! - `memory`: bounded conversation history
//! - `tokens`: token estimation for history budgets
//! - `security`: read-only, pattern, complexity and allow-list checks
//! - `audit`: in-memory audit ring with an optional SQLite sink
//! - `database`: SQLite persistence for audit events
//! - `context`: database shape snapshot for prompts
//! - `types`: shared result and event types
//! - `errors`: agent-level error types

pub mod agent;
pub mod audit;
pub mod cache;
pub mod context;
pub mod database;
pub mod errors;
pub mod intent;
pub mod memory;
pub mod prompts;
pub mod rules;
pub mod security;
pub mod tokens;
pub mod types;

// Re-exports for convenience
pub use agent::Agent;
pub use audit::{AuditLogger, AuditStatistics};
pub use cache::{CacheStats, QueryCache};
pub use context::ContextManager;
pub use errors::{AgentError, ErrorKind};
pub use intent::{classify_intent, Intent};
pub use memory::{ConversationMemory, MemoryStats, MemoryVariables};
pub use prompts::CapabilityTier;
pub use security::{SecurityManager, SecurityReport, SecurityViolation};
pub use types::{AuditEvent, AuditEventType, ConversationTurn, DatabaseContext, QueryResult};
