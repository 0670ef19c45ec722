//! Security Manager — per-query policy gate.
//!
//! Four checks, evaluated in order, first failure wins:
//! 1. Read-only mode blocks any query mentioning a write keyword.
//! 2. A fixed list of dangerous regex patterns.
//! 3. A rolling per-minute complexity budget.
//! 4. The operation allow-list.
//!
//! Checks 1-2 are stateless ([`SecurityManager::check_policy`]). Checks 3-4
//! ([`SecurityManager::charge_and_authorize`]) charge the score at step 3,
//! so an allow-list rejection still spends budget. An over-budget query
//! spends nothing.

use std::collections::BTreeSet;
use std::sync::LazyLock;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

use crate::config::SecurityConfig;

/// Length of the complexity window.
pub const COMPLEXITY_WINDOW: Duration = Duration::from_secs(60);

const WRITE_KEYWORDS: &[&str] = &[
    "put", "set", "insert", "update", "delete", "drop", "create", "modify", "alter", "write",
    "save", "store",
];

/// Operation keywords subject to the allow-list.
const OPERATION_KEYWORDS: &[&str] = &[
    "get", "put", "scan", "prefix", "search", "jsonquery", "list", "stats", "export", "create",
    "drop", "last",
];

/// Substring → complexity cost.
const COMPLEXITY_WEIGHTS: &[(&str, u32)] = &[
    ("scan", 3),
    ("search", 2),
    ("prefix", 2),
    ("json", 2),
    ("export", 4),
    ("stats", 2),
];

const DANGEROUS_PATTERNS: &[&str] = &[
    // Destructive statements
    r"(?i)(drop|delete|truncate)\s+(table|database|column)",
    r"(?i)(insert|update)\s+.*\s+(values|set)",
    r"(?i)exec(ute)?\s*\(",
    r"(?i)script\s*:",
    // Shell commands
    r"(?i)(rm\s+-rf|del\s+/|format\s+)",
    r"(?i)(shutdown|reboot|halt)",
    r"(?i)cmd\.exe|bash|sh\s+",
    // Credential exposure and path traversal
    r"(?i)(password|secret|token|key)\s*=",
    r"(?i)\.\./|\.\.\\",
    // Unbounded scans
    r"(?i)(scan|prefix)\s+.*\s+(limit\s+[1-9]\d{4,}|no\s+limit)",
];

static COMPILED_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    DANGEROUS_PATTERNS
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %p, error = %e, "invalid security pattern skipped");
                None
            }
        })
        .collect()
});

static LIMIT_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"limit\s+(\d+)").ok());

// ─── Violations ─────────────────────────────────────────────────────────────

/// Why a query was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityViolation {
    #[error("write operation '{keyword}' blocked in read-only mode")]
    WriteInReadOnly { keyword: String },

    #[error("dangerous pattern detected: {pattern}")]
    DangerousPattern { pattern: String },

    #[error("query complexity limit exceeded ({current} + {score} > {max})")]
    ComplexityExceeded { current: u32, score: u32, max: u32 },

    #[error("operation '{operation}' is not allowed")]
    OperationNotAllowed { operation: String },
}

impl SecurityViolation {
    /// Short machine-readable label for audit metadata.
    pub fn code(&self) -> &'static str {
        match self {
            SecurityViolation::WriteInReadOnly { .. } => "write_in_read_only",
            SecurityViolation::DangerousPattern { .. } => "dangerous_pattern",
            SecurityViolation::ComplexityExceeded { .. } => "complexity_exceeded",
            SecurityViolation::OperationNotAllowed { .. } => "operation_not_allowed",
        }
    }
}

// ─── Report ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SecurityReport {
    pub read_only_mode: bool,
    pub audit_enabled: bool,
    pub max_query_complexity: u32,
    pub current_complexity: u32,
    pub allowed_operations: Vec<String>,
    pub dangerous_patterns: usize,
    pub last_reset_time: DateTime<Utc>,
}

// ─── SecurityManager ────────────────────────────────────────────────────────

#[derive(Debug)]
struct ComplexityWindow {
    current: u32,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl ComplexityWindow {
    fn new() -> Self {
        Self {
            current: 0,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    fn roll_if_expired(&mut self) {
        if self.started.elapsed() > COMPLEXITY_WINDOW {
            *self = Self::new();
        }
    }
}

/// One instance per agent; never shared process-wide.
pub struct SecurityManager {
    read_only: bool,
    audit_enabled: bool,
    max_complexity: u32,
    /// Lowercased for comparison.
    allowed: BTreeSet<String>,
    configured_operations: Vec<String>,
    window: Mutex<ComplexityWindow>,
}

impl SecurityManager {
    pub fn new(config: &SecurityConfig) -> Self {
        Self {
            read_only: config.read_only,
            audit_enabled: config.enable_audit,
            max_complexity: config.max_query_complexity,
            allowed: config
                .allowed_operations
                .iter()
                .map(|op| op.to_lowercase())
                .collect(),
            configured_operations: config.allowed_operations.clone(),
            window: Mutex::new(ComplexityWindow::new()),
        }
    }

    /// Run every check in order: read-only, dangerous patterns, complexity
    /// budget, allow-list. The score is charged at the budget step, so a
    /// later allow-list rejection still consumes budget.
    pub fn check(&self, query: &str) -> Result<(), SecurityViolation> {
        self.check_policy(query)?;
        self.charge_and_authorize(query)
    }

    /// Stateless checks only: read-only keywords and dangerous patterns.
    ///
    /// Safe to run before a cache lookup; nothing is charged.
    pub fn check_policy(&self, query: &str) -> Result<(), SecurityViolation> {
        let lower = query.to_lowercase();

        if self.read_only {
            if let Some(keyword) = WRITE_KEYWORDS.iter().find(|k| lower.contains(*k)) {
                return Err(self.reject(
                    query,
                    SecurityViolation::WriteInReadOnly {
                        keyword: keyword.to_string(),
                    },
                ));
            }
        }

        if let Some(re) = COMPILED_PATTERNS.iter().find(|re| re.is_match(query)) {
            return Err(self.reject(
                query,
                SecurityViolation::DangerousPattern {
                    pattern: re.as_str().to_string(),
                },
            ));
        }

        Ok(())
    }

    /// Charge the query's score to the rolling window, then apply the
    /// allow-list. A query over budget is not charged.
    pub fn charge_and_authorize(&self, query: &str) -> Result<(), SecurityViolation> {
        let lower = query.to_lowercase();
        let score = query_complexity(&lower);

        {
            let mut window = self.window.lock();
            window.roll_if_expired();
            if window.current + score > self.max_complexity {
                let violation = SecurityViolation::ComplexityExceeded {
                    current: window.current,
                    score,
                    max: self.max_complexity,
                };
                drop(window);
                return Err(self.reject(query, violation));
            }
            window.current += score;
            tracing::debug!(score, current = window.current, "query complexity charged");
        }

        if let Some(op) = OPERATION_KEYWORDS
            .iter()
            .find(|op| lower.contains(*op) && !self.allowed.contains(**op))
        {
            return Err(self.reject(
                query,
                SecurityViolation::OperationNotAllowed {
                    operation: op.to_string(),
                },
            ));
        }

        Ok(())
    }

    /// Boolean projection of [`check`](Self::check).
    pub fn validate(&self, query: &str) -> bool {
        self.check(query).is_ok()
    }

    fn reject(&self, query: &str, violation: SecurityViolation) -> SecurityViolation {
        tracing::warn!(
            query = %query,
            violation = violation.code(),
            reason = %violation,
            "query rejected by security gate"
        );
        violation
    }

    pub fn is_operation_allowed(&self, operation: &str) -> bool {
        self.allowed.contains(&operation.to_lowercase())
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn current_complexity(&self) -> u32 {
        let mut window = self.window.lock();
        window.roll_if_expired();
        window.current
    }

    pub fn report(&self) -> SecurityReport {
        let window = self.window.lock();
        SecurityReport {
            read_only_mode: self.read_only,
            audit_enabled: self.audit_enabled,
            max_query_complexity: self.max_complexity,
            current_complexity: window.current,
            allowed_operations: self.configured_operations.clone(),
            dangerous_patterns: COMPILED_PATTERNS.len(),
            last_reset_time: window.started_at,
        }
    }

    /// Pretend the window opened `by` ago.
    #[cfg(test)]
    pub(crate) fn backdate_window(&self, by: Duration) {
        let mut window = self.window.lock();
        if let Some(started) = Instant::now().checked_sub(by) {
            window.started = started;
        }
    }
}

/// Score a lowercased query.
fn query_complexity(lower: &str) -> u32 {
    let mut score = 1;
    for (needle, weight) in COMPLEXITY_WEIGHTS {
        if lower.contains(needle) {
            score += weight;
        }
    }

    let limit = LIMIT_PATTERN
        .as_ref()
        .and_then(|re| re.captures(lower))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().parse::<u64>().unwrap_or(u64::MAX));
    match limit {
        Some(n) if n > 1000 => score += 3,
        Some(n) if n > 100 => score += 1,
        _ => {}
    }
    score
}

// ─── Tests ──────────────────────────────────────────────────────────────────
