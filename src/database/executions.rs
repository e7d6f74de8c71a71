//! Execution history persistence

use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

use super::DatabaseResult;

/// Lifecycle status of one invocation. Created `Running`, finalized to
/// exactly one of the terminal states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Success,
    Error,
    Timeout,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Success => "success",
            ExecutionStatus::Error => "error",
            ExecutionStatus::Timeout => "timeout",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "running" => Some(ExecutionStatus::Running),
            "success" => Some(ExecutionStatus::Success),
            "error" => Some(ExecutionStatus::Error),
            "timeout" => Some(ExecutionStatus::Timeout),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One recorded invocation
#[derive(Debug, Clone, Serialize)]
pub struct Execution {
    pub id: i64,
    pub function_id: i64,
    pub status: ExecutionStatus,
    pub backend: String,
    /// Unix milliseconds
    pub start_time: i64,
    /// Unix milliseconds; derived as start_time + duration on finalization
    pub end_time: Option<i64>,
    pub duration_ms: Option<f64>,
    pub error_message: Option<String>,
    pub memory_used_mb: Option<f64>,
    pub cpu_percent: Option<f64>,
}

/// Execution store
pub struct ExecutionStore;

impl ExecutionStore {
    pub fn new() -> Self {
        Self
    }

    /// Insert a new execution in the `running` state, returning its id
    pub fn insert_running(
        &self,
        conn: &Connection,
        function_id: i64,
        backend: &str,
        start_time_ms: i64,
    ) -> DatabaseResult<i64> {
        conn.execute(
            "INSERT INTO executions (function_id, status, backend, start_time)
             VALUES (?1, 'running', ?2, ?3)",
            rusqlite::params![function_id, backend, start_time_ms],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// Transition a running execution to a terminal state.
    ///
    /// `end_time` is derived from the stored `start_time` plus the
    /// executor-measured duration so the two always agree. The `status`
    /// guard makes the transition idempotent: returns `false` if the row
    /// was already finalized (or does not exist).
    pub fn finalize(
        &self,
        conn: &Connection,
        id: i64,
        status: ExecutionStatus,
        duration_ms: f64,
        error_message: Option<&str>,
        memory_used_mb: Option<f64>,
        cpu_percent: Option<f64>,
    ) -> DatabaseResult<bool> {
        let updated = conn.execute(
            r#"
            UPDATE executions
            SET status = ?1,
                duration_ms = ?2,
                end_time = start_time + CAST(?2 AS INTEGER),
                error_message = ?3,
                memory_used_mb = ?4,
                cpu_percent = ?5
            WHERE id = ?6 AND status = 'running'
            "#,
            rusqlite::params![
                status.as_str(),
                duration_ms,
                error_message,
                memory_used_mb,
                cpu_percent,
                id,
            ],
        )?;

        Ok(updated > 0)
    }

    /// Get an execution by id
    pub fn get(&self, conn: &Connection, id: i64) -> DatabaseResult<Option<Execution>> {
        let execution = conn
            .query_row(
                "SELECT id, function_id, status, backend, start_time, end_time,
                        duration_ms, error_message, memory_used_mb, cpu_percent
                 FROM executions WHERE id = ?1",
                [id],
                row_to_execution,
            )
            .optional()?;

        Ok(execution)
    }

    /// List executions, most recent first
    pub fn list(&self, conn: &Connection, skip: usize, limit: usize) -> DatabaseResult<Vec<Execution>> {
        let mut stmt = conn.prepare(
            "SELECT id, function_id, status, backend, start_time, end_time,
                    duration_ms, error_message, memory_used_mb, cpu_percent
             FROM executions ORDER BY id DESC LIMIT ?1 OFFSET ?2",
        )?;

        let executions = stmt
            .query_map(rusqlite::params![limit as i64, skip as i64], row_to_execution)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(executions)
    }

    /// List executions for one function, most recent first
    pub fn list_for_function(
        &self,
        conn: &Connection,
        function_id: i64,
        skip: usize,
        limit: usize,
    ) -> DatabaseResult<Vec<Execution>> {
        let mut stmt = conn.prepare(
            "SELECT id, function_id, status, backend, start_time, end_time,
                    duration_ms, error_message, memory_used_mb, cpu_percent
             FROM executions WHERE function_id = ?1
             ORDER BY id DESC LIMIT ?2 OFFSET ?3",
        )?;

        let executions = stmt
            .query_map(
                rusqlite::params![function_id, limit as i64, skip as i64],
                row_to_execution,
            )?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(executions)
    }
}

impl Default for ExecutionStore {
    fn default() -> Self {
        Self::new()
    }
}

fn row_to_execution(row: &Row<'_>) -> rusqlite::Result<Execution> {
    let status_tag: String = row.get(2)?;

    Ok(Execution {
        id: row.get(0)?,
        function_id: row.get(1)?,
        status: ExecutionStatus::parse(&status_tag).unwrap_or(ExecutionStatus::Error),
        backend: row.get(3)?,
        start_time: row.get(4)?,
        end_time: row.get(5)?,
        duration_ms: row.get(6)?,
        error_message: row.get(7)?,
        memory_used_mb: row.get(8)?,
        cpu_percent: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE executions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                function_id INTEGER NOT NULL,
                status TEXT NOT NULL,
                backend TEXT NOT NULL,
                start_time INTEGER NOT NULL,
                end_time INTEGER,
                duration_ms REAL,
                error_message TEXT,
                memory_used_mb REAL,
                cpu_percent REAL
            );
            "#,
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_lifecycle() {
        let conn = setup_db();
        let store = ExecutionStore::new();

        let id = store.insert_running(&conn, 1, "standard", 1_000_000).unwrap();

        let execution = store.get(&conn, id).unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Running);
        assert!(execution.end_time.is_none());

        let finalized = store
            .finalize(&conn, id, ExecutionStatus::Success, 250.0, None, Some(12.5), Some(40.0))
            .unwrap();
        assert!(finalized);

        let execution = store.get(&conn, id).unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Success);
        assert_eq!(execution.duration_ms, Some(250.0));
        // end_time derives from start_time, not a second clock sample
        assert_eq!(execution.end_time, Some(1_000_250));
    }

    #[test]
    fn test_finalize_exactly_once() {
        let conn = setup_db();
        let store = ExecutionStore::new();

        let id = store.insert_running(&conn, 1, "sandbox", 0).unwrap();

        assert!(store
            .finalize(&conn, id, ExecutionStatus::Timeout, 2000.0, Some("deadline"), None, None)
            .unwrap());

        // Second terminal transition is a no-op
        assert!(!store
            .finalize(&conn, id, ExecutionStatus::Success, 1.0, None, None, None)
            .unwrap());

        let execution = store.get(&conn, id).unwrap().unwrap();
        assert_eq!(execution.status, ExecutionStatus::Timeout);
        assert_eq!(execution.error_message.as_deref(), Some("deadline"));
    }

    #[test]
    fn test_list_for_function() {
        let conn = setup_db();
        let store = ExecutionStore::new();

        store.insert_running(&conn, 1, "standard", 0).unwrap();
        store.insert_running(&conn, 2, "standard", 0).unwrap();
        store.insert_running(&conn, 1, "sandbox", 0).unwrap();

        let all = store.list(&conn, 0, 100).unwrap();
        assert_eq!(all.len(), 3);

        let for_one = store.list_for_function(&conn, 1, 0, 100).unwrap();
        assert_eq!(for_one.len(), 2);
        // Most recent first
        assert_eq!(for_one[0].backend, "sandbox");
    }
}
