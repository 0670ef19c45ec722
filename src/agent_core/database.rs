//! SQLite sink for audit events.
//!
//! Every event appended to the in-memory ring is also written here, so the
//! durable log keeps events the ring has already evicted. Uses `rusqlite`
//! synchronously; WAL mode so exports and inspection can read while the
//! agent writes.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

use super::errors::AgentError;
use super::types::{AuditEvent, AuditEventType};

// ─── AuditDatabase ──────────────────────────────────────────────────────────

/// Append-only audit event store.
pub struct AuditDatabase {
    conn: Connection,
}

impl AuditDatabase {
    /// Open (or create) the audit database at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, AgentError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self { conn };
        db.create_tables()?;
        Ok(db)
    }

    fn create_tables(&self) -> Result<(), AgentError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS audit_events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                query TEXT NOT NULL,
                success INTEGER NOT NULL,
                duration_ms INTEGER,
                error TEXT,
                tools TEXT NOT NULL DEFAULT '[]',
                metadata TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX IF NOT EXISTS idx_audit_events_type
                ON audit_events(event_type, seq);
            ",
        )?;
        Ok(())
    }

    /// Append one event.
    pub fn append(&self, event: &AuditEvent) -> Result<i64, AgentError> {
        let tools = serde_json::to_string(&event.tools)?;
        let metadata = serde_json::to_string(&event.metadata)?;

        self.conn.execute(
            "INSERT INTO audit_events
             (id, timestamp, event_type, query, success, duration_ms, error, tools, metadata)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                event.id,
                event.timestamp.to_rfc3339(),
                event.event_type.as_str(),
                event.query,
                event.success as i32,
                event.duration.map(|d| d.as_millis() as i64),
                event.error,
                tools,
                metadata,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn count(&self) -> Result<u64, AgentError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM audit_events", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<AuditEvent>, AgentError> {
        self.select(
            "SELECT id, timestamp, event_type, query, success, duration_ms, error, tools, metadata
             FROM (SELECT * FROM audit_events ORDER BY seq DESC LIMIT ?1)
             ORDER BY seq ASC",
            params![limit as i64],
        )
    }

    /// Most recent `limit` events of one type, oldest first.
    pub fn recent_by_type(
        &self,
        event_type: AuditEventType,
        limit: usize,
    ) -> Result<Vec<AuditEvent>, AgentError> {
        self.select(
            "SELECT id, timestamp, event_type, query, success, duration_ms, error, tools, metadata
             FROM (SELECT * FROM audit_events WHERE event_type = ?1 ORDER BY seq DESC LIMIT ?2)
             ORDER BY seq ASC",
            params![event_type.as_str(), limit as i64],
        )
    }

    fn select(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<AuditEvent>, AgentError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(RawEvent {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                event_type: row.get(2)?,
                query: row.get(3)?,
                success: row.get::<_, i32>(4)? != 0,
                duration_ms: row.get(5)?,
                error: row.get(6)?,
                tools: row.get(7)?,
                metadata: row.get(8)?,
            })
        })?;

        let mut events = Vec::new();
        for row in rows {
            if let Some(event) = row?.into_event() {
                events.push(event);
            }
        }
        Ok(events)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

struct RawEvent {
    id: String,
    timestamp: String,
    event_type: String,
    query: String,
    success: bool,
    duration_ms: Option<i64>,
    error: Option<String>,
    tools: String,
    metadata: String,
}

impl RawEvent {
    /// Rows with an unknown type or malformed timestamp are skipped.
    fn into_event(self) -> Option<AuditEvent> {
        let event_type = parse_event_type(&self.event_type)?;
        let timestamp = DateTime::parse_from_rfc3339(&self.timestamp)
            .ok()?
            .with_timezone(&Utc);
        Some(AuditEvent {
            id: self.id,
            timestamp,
            event_type,
            query: self.query,
            success: self.success,
            duration: self
                .duration_ms
                .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            error: self.error,
            tools: serde_json::from_str(&self.tools).unwrap_or_default(),
            metadata: serde_json::from_str(&self.metadata).unwrap_or_default(),
        })
    }
}

fn parse_event_type(s: &str) -> Option<AuditEventType> {
    match s {
        "query_received" => Some(AuditEventType::QueryReceived),
        "query_completed" => Some(AuditEventType::QueryCompleted),
        "tool_executed" => Some(AuditEventType::ToolExecuted),
        "security_violation" => Some(AuditEventType::SecurityViolation),
        _ => None,
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
