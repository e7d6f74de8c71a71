//! Invocation telemetry pipeline
//!
//! The collector buffers per-invocation records in memory and a background
//! actor flushes them to the metric store. Telemetry is best-effort: a
//! failed flush drops the batch with a log, it never fails an invocation.

mod store;

pub use store::{AggregatedRow, MetricRecord, MetricStore, TimeRange};

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::database::DatabaseResult;
use crate::executor::{Backend, InvocationMetrics};

/// Thread-safe in-memory buffer of metric records, periodically flushed
/// to the persistent store
pub struct MetricsCollector {
    buffer: Mutex<Vec<MetricRecord>>,
    store: Arc<MetricStore>,
}

impl MetricsCollector {
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self {
            buffer: Mutex::new(Vec::new()),
            store,
        }
    }

    /// Append one record to the buffer. Never does I/O.
    pub fn collect(
        &self,
        function_id: i64,
        execution_id: i64,
        backend: Backend,
        metrics: &InvocationMetrics,
        error: bool,
    ) {
        let record = MetricRecord {
            function_id,
            execution_id,
            timestamp: chrono::Utc::now().timestamp_millis(),
            backend,
            duration_ms: metrics.duration_ms,
            memory_used_mb: metrics.memory_used_mb,
            cpu_percent: metrics.cpu_percent,
            warm_start: metrics.warm_start,
            error,
        };

        self.buffer.lock().push(record);
    }

    /// Swap the buffer for an empty one and persist the swapped batch in a
    /// single transaction. The lock is held only for the swap. On failure
    /// the batch is dropped with a log; records are never re-queued.
    pub async fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.buffer.lock());

        if batch.is_empty() {
            return 0;
        }

        match self.store.insert_batch(&batch).await {
            Ok(written) => {
                debug!("Flushed {} metric records", written);
                written
            }
            Err(e) => {
                warn!("Dropping {} metric records, flush failed: {}", batch.len(), e);
                0
            }
        }
    }

    /// Records currently buffered, for tests and diagnostics
    pub fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }

    /// Aggregated metrics grouped by (function, backend)
    pub async fn aggregated(
        &self,
        function_id: Option<i64>,
        range: TimeRange,
    ) -> DatabaseResult<Vec<AggregatedRow>> {
        self.store.aggregated(function_id, range).await
    }

    /// Raw records for one function
    pub async fn raw(
        &self,
        function_id: i64,
        range: TimeRange,
    ) -> DatabaseResult<Vec<MetricRecord>> {
        self.store.raw(function_id, range).await
    }
}

/// Background flush actor: flushes on an interval and once more on shutdown
pub fn spawn_flush_task(
    collector: Arc<MetricsCollector>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await; // skip the immediate tick

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    collector.flush().await;
                    debug!("Metric flush task stopped");
                    return;
                }
                _ = ticker.tick() => {
                    collector.flush().await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collector() -> (Arc<MetricStore>, MetricsCollector) {
        let store = Arc::new(MetricStore::open_in_memory().unwrap());
        let collector = MetricsCollector::new(store.clone());
        (store, collector)
    }

    fn sample_metrics(warm: bool) -> InvocationMetrics {
        InvocationMetrics {
            duration_ms: 42.0,
            memory_used_mb: 8.0,
            cpu_percent: 20.0,
            warm_start: warm,
            startup_time_ms: None,
        }
    }

    #[tokio::test]
    async fn test_collect_buffers_without_io() {
        let (store, collector) = collector();

        collector.collect(1, 1, Backend::Standard, &sample_metrics(true), false);
        collector.collect(1, 2, Backend::Standard, &sample_metrics(false), true);

        assert_eq!(collector.buffered(), 2);
        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_flush_swaps_and_persists() {
        let (store, collector) = collector();

        for i in 0..5 {
            collector.collect(1, i, Backend::Sandbox, &sample_metrics(false), false);
        }

        assert_eq!(collector.flush().await, 5);
        assert_eq!(collector.buffered(), 0);
        assert_eq!(store.count().await.unwrap(), 5);

        // Nothing left to flush
        assert_eq!(collector.flush().await, 0);
    }

    #[tokio::test]
    async fn test_flushed_records_match_collected() {
        let (_store, collector) = collector();

        collector.collect(3, 7, Backend::Standard, &sample_metrics(true), false);
        collector.flush().await;

        let raw = collector.raw(3, TimeRange::default()).await.unwrap();
        assert_eq!(raw.len(), 1);
        assert_eq!(raw[0].execution_id, 7);
        assert_eq!(raw[0].duration_ms, 42.0);
        assert!(raw[0].warm_start);
        assert!(!raw[0].error);
    }

    #[tokio::test]
    async fn test_error_bit_recorded() {
        let (_store, collector) = collector();

        collector.collect(1, 1, Backend::Standard, &sample_metrics(false), true);
        collector.flush().await;

        let rows = collector.aggregated(Some(1), TimeRange::default()).await.unwrap();
        assert_eq!(rows[0].errors, 1);
        assert_eq!(rows[0].success_rate, 0.0);
    }
}
