//! SQLite persistence for finished executions and routing decisions.
//!
//! Uses `rusqlite` synchronously; the manager serializes access behind a mutex.
//! WAL mode is enabled so readers do not block the writer.

use rusqlite::{params, Connection, OptionalExtension};

use crate::agent_core::{AgentKind, RoutingDecision, TaskType};

use super::errors::IntegrationError;
use super::execution::{ExecutionRecord, ExecutionStatus};

// ─── ExecutionStore ─────────────────────────────────────────────────────────

pub struct ExecutionStore {
    conn: Connection,
}

/// Raw `executions` row, decoded outside the rusqlite closure.
struct ExecutionRow {
    id: String,
    workflow_id: String,
    status: String,
    current_step: Option<String>,
    progress: f64,
    start_time: String,
    end_time: Option<String>,
    result: Option<String>,
    error: Option<String>,
    logs: String,
}

impl ExecutionStore {
    /// Open (or create) the store at the given path.
    ///
    /// Pass `":memory:"` for an in-memory database (tests).
    pub fn open(path: &str) -> Result<Self, IntegrationError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let store = Self { conn };
        store.create_tables()?;
        Ok(store)
    }

    fn create_tables(&self) -> Result<(), IntegrationError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS executions (
                id TEXT PRIMARY KEY,
                workflow_id TEXT NOT NULL,
                status TEXT NOT NULL,
                current_step TEXT,
                progress REAL NOT NULL DEFAULT 0,
                start_time TEXT NOT NULL,
                end_time TEXT,
                result TEXT,
                error TEXT,
                logs TEXT NOT NULL DEFAULT '[]'
            );

            CREATE INDEX IF NOT EXISTS idx_executions_workflow
                ON executions(workflow_id, start_time);

            CREATE TABLE IF NOT EXISTS routing_decisions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                input TEXT NOT NULL,
                task_type TEXT NOT NULL,
                selected_agent TEXT NOT NULL,
                confidence REAL NOT NULL,
                fallback INTEGER NOT NULL DEFAULT 0,
                reasoning TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_routing_agent
                ON routing_decisions(selected_agent);
            ",
        )?;
        Ok(())
    }

    // ─── Executions ─────────────────────────────────────────────────────

    /// Insert or overwrite the record with the same id.
    pub fn save_execution(&self, record: &ExecutionRecord) -> Result<(), IntegrationError> {
        let result = record.result.as_ref().map(serde_json::to_string).transpose()?;
        let error = record.error.as_ref().map(serde_json::to_string).transpose()?;
        let logs = serde_json::to_string(&record.logs)?;

        self.conn.execute(
            "INSERT OR REPLACE INTO executions
                (id, workflow_id, status, current_step, progress, start_time, end_time, result, error, logs)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.workflow_id,
                record.status.as_str(),
                record.current_step,
                record.progress as f64,
                record.start_time,
                record.end_time,
                result,
                error,
                logs,
            ],
        )?;
        Ok(())
    }

    pub fn get_execution(&self, id: &str) -> Result<Option<ExecutionRecord>, IntegrationError> {
        let row = self
            .conn
            .query_row(
                "SELECT id, workflow_id, status, current_step, progress, start_time, end_time,
                        result, error, logs
                 FROM executions WHERE id = ?1",
                params![id],
                read_execution_row,
            )
            .optional()?;
        row.map(decode_execution).transpose()
    }

    /// Most recent first.
    pub fn list_executions(&self, limit: usize) -> Result<Vec<ExecutionRecord>, IntegrationError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, workflow_id, status, current_step, progress, start_time, end_time,
                    result, error, logs
             FROM executions ORDER BY start_time DESC, rowid DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], read_execution_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(decode_execution).collect()
    }

    // ─── Routing Decisions ──────────────────────────────────────────────

    pub fn insert_routing_decision(
        &self,
        input: &str,
        decision: &RoutingDecision,
    ) -> Result<(), IntegrationError> {
        self.conn.execute(
            "INSERT INTO routing_decisions
                (timestamp, input, task_type, selected_agent, confidence, fallback, reasoning)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                decision.timestamp,
                input,
                decision.task_type.as_str(),
                decision.selected_agent.as_str(),
                decision.confidence as f64,
                decision.fallback,
                decision.reasoning,
            ],
        )?;
        Ok(())
    }

    /// Most recent first.
    pub fn routing_decisions(&self, limit: usize) -> Result<Vec<RoutingDecision>, IntegrationError> {
        let mut stmt = self.conn.prepare(
            "SELECT task_type, selected_agent, confidence, fallback, reasoning, timestamp
             FROM routing_decisions ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(task_type, agent, confidence, fallback, reasoning, timestamp)| {
                let task_type: TaskType =
                    serde_json::from_value(serde_json::Value::String(task_type))?;
                Ok(RoutingDecision {
                    selected_agent: AgentKind::from(agent),
                    task_type,
                    confidence: confidence as f32,
                    reasoning,
                    fallback,
                    timestamp,
                })
            })
            .collect()
    }

    /// `(agent, count)` pairs, most used first.
    pub fn agent_usage(&self) -> Result<Vec<(String, u64)>, IntegrationError> {
        let mut stmt = self.conn.prepare(
            "SELECT selected_agent, COUNT(*) FROM routing_decisions
             GROUP BY selected_agent ORDER BY COUNT(*) DESC, selected_agent ASC",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)? as u64)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn read_execution_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ExecutionRow> {
    Ok(ExecutionRow {
        id: row.get(0)?,
        workflow_id: row.get(1)?,
        status: row.get(2)?,
        current_step: row.get(3)?,
        progress: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        result: row.get(7)?,
        error: row.get(8)?,
        logs: row.get(9)?,
    })
}

fn decode_execution(row: ExecutionRow) -> Result<ExecutionRecord, IntegrationError> {
    let status = ExecutionStatus::parse(&row.status).ok_or_else(|| IntegrationError::Database {
        reason: format!("unknown execution status '{}'", row.status),
    })?;
    Ok(ExecutionRecord {
        id: row.id,
        workflow_id: row.workflow_id,
        status,
        current_step: row.current_step,
        progress: row.progress as f32,
        start_time: row.start_time,
        end_time: row.end_time,
        result: row.result.as_deref().map(serde_json::from_str).transpose()?,
        error: row.error.as_deref().map(serde_json::from_str).transpose()?,
        logs: serde_json::from_str(&row.logs)?,
    })
}

// ─── Tests ──────────────────────────────────────────────────────────────────
