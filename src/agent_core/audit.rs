//! Audit Logger — append-only record of queries, tool calls and rejections.
//!
//! Events land in a bounded in-memory ring (statistics and export read from
//! it) and, best-effort, in a durable SQLite sink that keeps everything the
//! ring evicts. A sink write failure is logged and never reaches the caller.

use std::collections::{BTreeMap, VecDeque};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;

use super::database::AuditDatabase;
use super::errors::AgentError;
use super::types::{AuditEvent, AuditEventType};
use crate::config::SecurityConfig;

/// Ring capacity used by [`AuditLogger::new`].
pub const DEFAULT_RING_SIZE: usize = 1000;

/// File name of the durable sink inside the data directory.
pub const AUDIT_DB_FILE: &str = "audit.db";

// ─── Statistics ─────────────────────────────────────────────────────────────

/// Aggregates over the in-memory ring.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditStatistics {
    pub total_events: usize,
    pub event_types: BTreeMap<String, usize>,
    pub success_count: usize,
    pub error_count: usize,
    /// `success_count / total_events`, 0.0 when the ring is empty.
    pub success_rate: f64,
    /// Mean duration over `query_completed` events; absent if there are none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub average_query_duration_ms: Option<f64>,
}

// ─── AuditLogger ────────────────────────────────────────────────────────────

pub struct AuditLogger {
    enabled: bool,
    events: RwLock<VecDeque<AuditEvent>>,
    max_size: usize,
    /// `Connection` is not `Sync`, so the sink lives behind its own mutex.
    sink: Mutex<Option<AuditDatabase>>,
}

impl AuditLogger {
    /// In-memory only logger.
    pub fn new(max_size: usize) -> Self {
        Self {
            enabled: true,
            events: RwLock::new(VecDeque::new()),
            max_size: max_size.max(1),
            sink: Mutex::new(None),
        }
    }

    /// Logger that records nothing.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(1)
        }
    }

    /// Attach a durable sink.
    pub fn with_sink(self, sink: AuditDatabase) -> Self {
        *self.sink.lock() = Some(sink);
        self
    }

    /// Open a logger with a durable sink at `path`, creating parent directories.
    pub fn open(path: &Path, max_size: usize) -> Result<Self, AgentError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| AgentError::AuditError {
                reason: format!("cannot create {}: {e}", parent.display()),
            })?;
        }
        let sink = AuditDatabase::open(&path.to_string_lossy())?;
        tracing::info!(path = %path.display(), "audit sink opened");
        Ok(Self::new(max_size).with_sink(sink))
    }

    /// Build the logger described by the security settings.
    ///
    /// A sink that cannot be opened degrades to in-memory auditing.
    pub fn from_config(config: &SecurityConfig) -> Self {
        if !config.enable_audit {
            return Self::disabled();
        }
        let path = config
            .audit_log_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| crate::data_dir().join(AUDIT_DB_FILE));
        match Self::open(&path, DEFAULT_RING_SIZE) {
            Ok(logger) => logger,
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "audit sink unavailable, keeping events in memory only"
                );
                Self::new(DEFAULT_RING_SIZE)
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn has_durable_sink(&self) -> bool {
        self.sink.lock().is_some()
    }

    // ─── Recording ──────────────────────────────────────────────────────

    pub fn log_query(&self, query: &str) {
        self.record(
            AuditEventType::QueryReceived,
            query,
            true,
            None,
            None,
            Vec::new(),
            Default::default(),
        );
    }

    pub fn log_query_result(
        &self,
        query: &str,
        success: bool,
        duration: Duration,
        tools: Vec<String>,
        error: Option<&str>,
    ) {
        self.record(
            AuditEventType::QueryCompleted,
            query,
            success,
            Some(duration),
            error.map(str::to_string),
            tools,
            Default::default(),
        );
    }

    pub fn log_tool_execution(
        &self,
        tool_name: &str,
        parameters: &serde_json::Value,
        success: bool,
        duration: Duration,
        error: Option<&str>,
    ) {
        let mut metadata = serde_json::Map::new();
        metadata.insert("tool_name".into(), tool_name.into());
        metadata.insert("parameters".into(), parameters.clone());
        self.record(
            AuditEventType::ToolExecuted,
            tool_name,
            success,
            Some(duration),
            error.map(str::to_string),
            Vec::new(),
            metadata,
        );
    }

    pub fn log_security_violation(&self, query: &str, reason: &str) {
        let mut metadata = serde_json::Map::new();
        metadata.insert("violation_reason".into(), reason.into());
        self.record(
            AuditEventType::SecurityViolation,
            query,
            false,
            None,
            Some(reason.to_string()),
            Vec::new(),
            metadata,
        );
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &self,
        event_type: AuditEventType,
        query: &str,
        success: bool,
        duration: Option<Duration>,
        error: Option<String>,
        tools: Vec<String>,
        metadata: serde_json::Map<String, serde_json::Value>,
    ) {
        if !self.enabled {
            return;
        }
        let event = AuditEvent {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            query: query.to_string(),
            success,
            duration,
            error,
            tools,
            metadata,
        };
        self.append(event);
    }

    fn append(&self, event: AuditEvent) {
        if event.event_type == AuditEventType::SecurityViolation || !event.success {
            tracing::warn!(
                event_type = %event.event_type,
                query = %event.query,
                error = event.error.as_deref().unwrap_or(""),
                "audit"
            );
        }

        // The sink guard spans both appends; durable and ring order must match.
        let sink = self.sink.lock();
        if let Some(sink) = sink.as_ref() {
            if let Err(e) = sink.append(&event) {
                tracing::warn!(error = %e, event_id = %event.id, "durable audit write failed");
            }
        }

        let mut events = self.events.write();
        events.push_back(event);
        while events.len() > self.max_size {
            events.pop_front();
        }
    }

    // ─── Queries ────────────────────────────────────────────────────────

    /// Last `limit` events, oldest first. `0` means all.
    pub fn get_events(&self, limit: usize) -> Vec<AuditEvent> {
        let events = self.events.read();
        let limit = if limit == 0 { events.len() } else { limit.min(events.len()) };
        events.iter().skip(events.len() - limit).cloned().collect()
    }

    /// Up to `limit` events of one type, newest first.
    pub fn get_events_by_type(&self, event_type: AuditEventType, limit: usize) -> Vec<AuditEvent> {
        self.newest_matching(limit, |e| e.event_type == event_type)
    }

    pub fn get_security_violations(&self, limit: usize) -> Vec<AuditEvent> {
        self.get_events_by_type(AuditEventType::SecurityViolation, limit)
    }

    /// Up to `limit` unsuccessful events, newest first.
    pub fn get_failed_queries(&self, limit: usize) -> Vec<AuditEvent> {
        self.newest_matching(limit, |e| !e.success)
    }

    fn newest_matching(&self, limit: usize, pred: impl Fn(&AuditEvent) -> bool) -> Vec<AuditEvent> {
        self.events
            .read()
            .iter()
            .rev()
            .filter(|e| pred(e))
            .take(limit)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_statistics(&self) -> AuditStatistics {
        let events = self.events.read();
        let mut event_types = BTreeMap::new();
        let mut success_count = 0;
        let mut query_total = Duration::ZERO;
        let mut query_count = 0u32;

        for event in events.iter() {
            *event_types.entry(event.event_type.as_str().to_string()).or_insert(0) += 1;
            if event.success {
                success_count += 1;
            }
            if event.event_type == AuditEventType::QueryCompleted {
                query_total += event.duration.unwrap_or_default();
                query_count += 1;
            }
        }

        let total = events.len();
        AuditStatistics {
            total_events: total,
            event_types,
            success_count,
            error_count: total - success_count,
            success_rate: if total == 0 {
                0.0
            } else {
                success_count as f64 / total as f64
            },
            average_query_duration_ms: (query_count > 0)
                .then(|| (query_total / query_count).as_nanos() as f64 / 1e6),
        }
    }

    /// Write ring events with `start < timestamp < end` to a new file as JSON lines.
    ///
    /// Returns the number of events written.
    pub fn export_events(
        &self,
        path: &Path,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<usize, AgentError> {
        let selected: Vec<AuditEvent> = self
            .events
            .read()
            .iter()
            .filter(|e| e.timestamp > start && e.timestamp < end)
            .cloned()
            .collect();

        let io_err = |e: std::io::Error| AgentError::AuditError {
            reason: format!("failed to export to {}: {e}", path.display()),
        };
        let file = std::fs::File::create(path).map_err(io_err)?;
        let mut writer = std::io::BufWriter::new(file);
        for event in &selected {
            serde_json::to_writer(&mut writer, event)?;
            writer.write_all(b"\n").map_err(io_err)?;
        }
        writer.flush().map_err(io_err)?;

        tracing::info!(path = %path.display(), count = selected.len(), "audit events exported");
        Ok(selected.len())
    }

    /// Read back from the durable sink, oldest first.
    pub fn durable_events(&self, limit: usize) -> Result<Vec<AuditEvent>, AgentError> {
        match self.sink.lock().as_ref() {
            Some(sink) => sink.recent(limit),
            None => Ok(Vec::new()),
        }
    }

    /// Drop the durable sink. In-memory events stay readable.
    pub fn close(&self) {
        if self.sink.lock().take().is_some() {
            tracing::info!("audit sink closed");
        }
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
