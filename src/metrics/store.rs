//! Metric persistence and aggregation
//!
//! Separate SQLite database from the function store; the two stay
//! independently movable.

use std::path::Path;

use rusqlite::{Connection, Result as SqliteResult};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;

use crate::database::DatabaseResult;
use crate::executor::Backend;

/// One per-invocation telemetry record. Append-only.
#[derive(Debug, Clone, Serialize)]
pub struct MetricRecord {
    pub function_id: i64,
    pub execution_id: i64,
    /// Unix milliseconds
    pub timestamp: i64,
    pub backend: Backend,
    pub duration_ms: f64,
    pub memory_used_mb: f64,
    pub cpu_percent: f64,
    pub warm_start: bool,
    pub error: bool,
}

/// Aggregated metrics for one (function, backend) group
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedRow {
    pub function_id: i64,
    pub backend: String,
    pub avg_duration_ms: f64,
    pub min_duration_ms: f64,
    pub max_duration_ms: f64,
    pub avg_memory_used_mb: f64,
    pub avg_cpu_percent: f64,
    pub warm_starts: i64,
    pub cold_starts: i64,
    pub total_executions: i64,
    pub errors: i64,
    pub success_rate: f64,
}

/// Inclusive time window over record timestamps, in unix milliseconds
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRange {
    pub start_ms: Option<i64>,
    pub end_ms: Option<i64>,
}

/// SQLite-backed metric store
pub struct MetricStore {
    conn: Mutex<Connection>,
}

impl MetricStore {
    /// Open or create the metric database
    pub fn open(path: impl AsRef<Path>) -> DatabaseResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init_tables(&conn)?;

        info!("Metric database opened at {:?}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory store (for testing)
    pub fn open_in_memory() -> DatabaseResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_tables(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init_tables(conn: &Connection) -> SqliteResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS metrics (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                function_id INTEGER NOT NULL,
                execution_id INTEGER NOT NULL,
                timestamp INTEGER NOT NULL,
                backend TEXT NOT NULL,
                duration_ms REAL NOT NULL,
                memory_used_mb REAL NOT NULL,
                cpu_percent REAL NOT NULL,
                warm_start INTEGER NOT NULL,
                error INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_metrics_function
                ON metrics(function_id, timestamp);
            "#,
        )?;

        Ok(())
    }

    /// Write a batch of records in a single transaction
    pub async fn insert_batch(&self, records: &[MetricRecord]) -> DatabaseResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;

        {
            let mut stmt = tx.prepare(
                r#"
                INSERT INTO metrics
                    (function_id, execution_id, timestamp, backend, duration_ms,
                     memory_used_mb, cpu_percent, warm_start, error)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                "#,
            )?;

            for record in records {
                stmt.execute(rusqlite::params![
                    record.function_id,
                    record.execution_id,
                    record.timestamp,
                    record.backend.as_str(),
                    record.duration_ms,
                    record.memory_used_mb,
                    record.cpu_percent,
                    record.warm_start as i32,
                    record.error as i32,
                ])?;
            }
        }

        tx.commit()?;
        Ok(records.len())
    }

    /// Aggregate records grouped by (function, backend)
    pub async fn aggregated(
        &self,
        function_id: Option<i64>,
        range: TimeRange,
    ) -> DatabaseResult<Vec<AggregatedRow>> {
        let conn = self.conn.lock().await;

        let mut sql = String::from(
            r#"
            SELECT function_id, backend,
                   AVG(duration_ms), MIN(duration_ms), MAX(duration_ms),
                   AVG(memory_used_mb), AVG(cpu_percent),
                   SUM(warm_start), COUNT(id), SUM(error)
            FROM metrics
            WHERE 1=1
            "#,
        );
        let mut params: Vec<i64> = Vec::new();

        if let Some(id) = function_id {
            params.push(id);
            sql.push_str(&format!(" AND function_id = ?{}", params.len()));
        }
        if let Some(start) = range.start_ms {
            params.push(start);
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len()));
        }
        if let Some(end) = range.end_ms {
            params.push(end);
            sql.push_str(&format!(" AND timestamp <= ?{}", params.len()));
        }

        sql.push_str(" GROUP BY function_id, backend ORDER BY function_id, backend");

        let mut stmt = conn.prepare(&sql)?;

        let rows = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                let warm_starts: i64 = row.get(7)?;
                let total: i64 = row.get(8)?;
                let errors: i64 = row.get(9)?;

                Ok(AggregatedRow {
                    function_id: row.get(0)?,
                    backend: row.get(1)?,
                    avg_duration_ms: row.get(2)?,
                    min_duration_ms: row.get(3)?,
                    max_duration_ms: row.get(4)?,
                    avg_memory_used_mb: row.get(5)?,
                    avg_cpu_percent: row.get(6)?,
                    warm_starts,
                    cold_starts: total - warm_starts,
                    total_executions: total,
                    errors,
                    success_rate: if total > 0 {
                        (total - errors) as f64 / total as f64
                    } else {
                        0.0
                    },
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(rows)
    }

    /// Raw records for one function, oldest first
    pub async fn raw(
        &self,
        function_id: i64,
        range: TimeRange,
    ) -> DatabaseResult<Vec<MetricRecord>> {
        let conn = self.conn.lock().await;

        let mut sql = String::from(
            r#"
            SELECT function_id, execution_id, timestamp, backend, duration_ms,
                   memory_used_mb, cpu_percent, warm_start, error
            FROM metrics
            WHERE function_id = ?1
            "#,
        );
        let mut params: Vec<i64> = vec![function_id];

        if let Some(start) = range.start_ms {
            params.push(start);
            sql.push_str(&format!(" AND timestamp >= ?{}", params.len()));
        }
        if let Some(end) = range.end_ms {
            params.push(end);
            sql.push_str(&format!(" AND timestamp <= ?{}", params.len()));
        }

        sql.push_str(" ORDER BY timestamp ASC");

        let mut stmt = conn.prepare(&sql)?;

        let records = stmt
            .query_map(rusqlite::params_from_iter(params), |row| {
                let backend_tag: String = row.get(3)?;

                Ok(MetricRecord {
                    function_id: row.get(0)?,
                    execution_id: row.get(1)?,
                    timestamp: row.get(2)?,
                    backend: Backend::parse(&backend_tag).unwrap_or(Backend::Standard),
                    duration_ms: row.get(4)?,
                    memory_used_mb: row.get(5)?,
                    cpu_percent: row.get(6)?,
                    warm_start: row.get::<_, i32>(7)? != 0,
                    error: row.get::<_, i32>(8)? != 0,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(records)
    }

    /// Total stored records, for tests and diagnostics
    pub async fn count(&self) -> DatabaseResult<i64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM metrics", [], |row| row.get(0))?;
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(function_id: i64, execution_id: i64, backend: Backend) -> MetricRecord {
        MetricRecord {
            function_id,
            execution_id,
            timestamp: 1_000,
            backend,
            duration_ms: 100.0,
            memory_used_mb: 10.0,
            cpu_percent: 50.0,
            warm_start: false,
            error: false,
        }
    }

    #[tokio::test]
    async fn test_insert_batch_and_count() {
        let store = MetricStore::open_in_memory().unwrap();

        let records = vec![
            record(1, 1, Backend::Standard),
            record(1, 2, Backend::Standard),
            record(1, 3, Backend::Sandbox),
        ];

        assert_eq!(store.insert_batch(&records).await.unwrap(), 3);
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_aggregation_matches_direct_reduction() {
        let store = MetricStore::open_in_memory().unwrap();

        let mut records = Vec::new();
        for (i, duration) in [50.0, 100.0, 150.0].iter().enumerate() {
            let mut r = record(1, i as i64, Backend::Standard);
            r.duration_ms = *duration;
            r.warm_start = i > 0;
            records.push(r);
        }
        let mut err = record(1, 99, Backend::Standard);
        err.duration_ms = 100.0;
        err.error = true;
        records.push(err);

        store.insert_batch(&records).await.unwrap();

        let rows = store.aggregated(Some(1), TimeRange::default()).await.unwrap();
        assert_eq!(rows.len(), 1);

        let row = &rows[0];
        assert_eq!(row.backend, "standard");
        assert_eq!(row.total_executions, 4);
        assert_eq!(row.min_duration_ms, 50.0);
        assert_eq!(row.max_duration_ms, 150.0);
        assert_eq!(row.avg_duration_ms, 100.0);
        assert_eq!(row.warm_starts, 2);
        assert_eq!(row.cold_starts, 2);
        assert_eq!(row.errors, 1);
        assert_eq!(row.success_rate, 0.75);
    }

    #[tokio::test]
    async fn test_aggregation_groups_by_backend() {
        let store = MetricStore::open_in_memory().unwrap();

        store
            .insert_batch(&[
                record(1, 1, Backend::Standard),
                record(1, 2, Backend::Sandbox),
                record(2, 3, Backend::Standard),
            ])
            .await
            .unwrap();

        let rows = store.aggregated(Some(1), TimeRange::default()).await.unwrap();
        assert_eq!(rows.len(), 2);

        let all = store.aggregated(None, TimeRange::default()).await.unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn test_time_range_filter() {
        let store = MetricStore::open_in_memory().unwrap();

        let mut early = record(1, 1, Backend::Standard);
        early.timestamp = 100;
        let mut late = record(1, 2, Backend::Standard);
        late.timestamp = 10_000;

        store.insert_batch(&[early, late]).await.unwrap();

        let range = TimeRange {
            start_ms: Some(5_000),
            end_ms: None,
        };
        let rows = store.aggregated(Some(1), range).await.unwrap();
        assert_eq!(rows[0].total_executions, 1);

        let raw = store.raw(1, range).await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].execution_id, 2);
    }

    #[tokio::test]
    async fn test_aggregated_empty() {
        let store = MetricStore::open_in_memory().unwrap();
        let rows = store.aggregated(None, TimeRange::default()).await.unwrap();
        assert!(rows.is_empty());
    }
}
