//! Invocation coordination
//!
//! Glues the execution subsystem together: creates the execution record,
//! dispatches to the backend executor, finalizes the record on every path,
//! and hands telemetry to the collector.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::database::{Database, DatabaseError, ExecutionStatus, Function};
use crate::executor::{Backend, ExecutorError, ExecutorRegistry, InvocationMetrics};
use crate::metrics::MetricsCollector;

/// Error type for coordinated invocations
#[derive(Debug, Error)]
pub enum InvokeError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// What the API layer gets back from a successful invocation
#[derive(Debug, Clone)]
pub struct InvokeOutcome {
    pub result: Value,
    pub execution_id: i64,
    pub duration_ms: f64,
}

/// Coordinates one invocation end to end
pub struct InvocationCoordinator {
    db: Arc<Database>,
    registry: Arc<ExecutorRegistry>,
    collector: Arc<MetricsCollector>,
}

impl InvocationCoordinator {
    pub fn new(
        db: Arc<Database>,
        registry: Arc<ExecutorRegistry>,
        collector: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            db,
            registry,
            collector,
        }
    }

    /// Run one invocation.
    ///
    /// The execution row is written in `running` before any container work
    /// and reaches its terminal state before this returns, on success and
    /// on every failure path. The metric record is buffered before return;
    /// persistence is asynchronous.
    pub async fn invoke(
        &self,
        function: &Function,
        backend: Backend,
        event: Value,
    ) -> Result<InvokeOutcome, InvokeError> {
        let start_ms = chrono::Utc::now().timestamp_millis();
        let execution_id = self
            .db
            .execution_store()
            .await
            .insert_running(function.id, backend.as_str(), start_ms)?;

        let started = Instant::now();
        let timeout = Duration::from_secs(function.timeout as u64);

        let result = match self.registry.get(backend) {
            Ok(executor) => executor.execute(function, event, timeout).await,
            Err(e) => Err(e),
        };

        let wall_ms = started.elapsed().as_secs_f64() * 1000.0;

        match result {
            Ok(output) => {
                let finalized = self.db.execution_store().await.finalize(
                    execution_id,
                    ExecutionStatus::Success,
                    wall_ms,
                    None,
                    Some(output.metrics.memory_used_mb),
                    Some(output.metrics.cpu_percent),
                )?;
                if !finalized {
                    warn!("Execution {} was already finalized", execution_id);
                }

                self.collector
                    .collect(function.id, execution_id, backend, &output.metrics, false);

                Ok(InvokeOutcome {
                    result: output.result,
                    execution_id,
                    duration_ms: wall_ms,
                })
            }
            Err(e) => {
                let status = match &e {
                    ExecutorError::Timeout(_) => ExecutionStatus::Timeout,
                    _ => ExecutionStatus::Error,
                };

                // The terminal update must not mask the original failure
                if let Err(db_err) = self.db.execution_store().await.finalize(
                    execution_id,
                    status,
                    wall_ms,
                    Some(&e.to_string()),
                    None,
                    None,
                ) {
                    error!(
                        "Failed to finalize execution {}: {}",
                        execution_id, db_err
                    );
                }

                // No envelope on this path; the wall clock is all we have
                let metrics = InvocationMetrics {
                    duration_ms: wall_ms,
                    ..Default::default()
                };
                self.collector
                    .collect(function.id, execution_id, backend, &metrics, true);

                Err(InvokeError::Executor(e))
            }
        }
    }

    /// Prepare the function's image in every registered backend
    pub async fn prepare_all(&self, function: &Function) -> Result<(), ExecutorError> {
        for executor in self.registry.all() {
            executor.prepare(function).await?;
        }
        Ok(())
    }

    /// Remove the function from every registered backend. Best-effort.
    pub async fn remove_all(&self, function: &Function) {
        for executor in self.registry.all() {
            executor.remove(function).await;
        }
    }
}
