//! Standard backend: default OCI runtime with a warm container pool

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use dashmap::DashMap;
use scopeguard::ScopeGuard;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::container::{self, ContainerSpec};
use super::{Backend, ExecutionOutput, Executor, ExecutorResult, InvocationMetrics};
use crate::builder::ImageBuilder;
use crate::config::{DockerConfiguration, PoolConfiguration};
use crate::database::Function;
use crate::pool::{spawn_eviction_task, ContainerPool, PooledContainer};

/// Prepared image bookkeeping, one entry per function
#[derive(Debug, Clone)]
struct PreparedImage {
    tag: String,
    /// `updated_at` of the function the image was built from
    code_version: i64,
}

/// Executor backed by the default container runtime.
///
/// Pre-warms the pool at prepare time so first invocations are served
/// image-warm, and returns cleanly exited containers to the pool.
pub struct StandardExecutor {
    docker: Docker,
    builder: ImageBuilder,
    images: DashMap<i64, PreparedImage>,
    pool: Arc<ContainerPool>,
    docker_config: DockerConfiguration,
    prewarm_count: usize,
    eviction_interval: Duration,
}

impl StandardExecutor {
    pub fn new(
        docker: Docker,
        docker_config: DockerConfiguration,
        pool_config: &PoolConfiguration,
    ) -> Self {
        let pool = Arc::new(ContainerPool::new(
            pool_config.max_size,
            Duration::from_secs(pool_config.idle_timeout_secs),
        ));

        Self {
            builder: ImageBuilder::new(docker.clone()),
            docker,
            images: DashMap::new(),
            pool,
            docker_config,
            prewarm_count: pool_config.prewarm_count,
            eviction_interval: Duration::from_secs(pool_config.eviction_interval_secs),
        }
    }

    /// Start the pool's idle-eviction actor. Drains the pool on shutdown.
    pub fn start_eviction(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        spawn_eviction_task(
            self.pool.clone(),
            self.docker.clone(),
            self.eviction_interval,
            shutdown,
        )
    }

    /// The warm pool, exposed for tests and diagnostics
    pub fn pool(&self) -> &ContainerPool {
        &self.pool
    }

    /// Build the image if missing or stale, returning its tag
    async fn ensure_prepared(&self, function: &Function) -> ExecutorResult<String> {
        if let Some(existing) = self.images.get(&function.id) {
            if existing.code_version == function.updated_at {
                return Ok(existing.tag.clone());
            }
        }

        let tag = self.builder.prepare(function, Backend::Standard).await?;

        self.images.insert(
            function.id,
            PreparedImage {
                tag: tag.clone(),
                code_version: function.updated_at,
            },
        );

        self.prewarm(function, &tag).await;

        Ok(tag)
    }

    /// Create a few containers ahead of traffic so the first invocations
    /// are served warm. Failures here degrade to cold starts.
    async fn prewarm(&self, function: &Function, image: &str) {
        for _ in 0..self.prewarm_count {
            let mut spec = ContainerSpec::for_function(Backend::Standard, function, image);
            spec.cpu_period_us = self.docker_config.cpu_period_us;
            spec.cpu_quota_us = self.docker_config.cpu_quota_us;

            match container::create_container(&self.docker, &spec).await {
                Ok(id) => {
                    if let Err(rejected) = self.pool.release(function.id, PooledContainer::new(id))
                    {
                        container::force_remove(&self.docker, &rejected.container_id).await;
                        break;
                    }
                }
                Err(e) => {
                    warn!("Pre-warm for function {} failed: {}", function.id, e);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl Executor for StandardExecutor {
    fn backend(&self) -> Backend {
        Backend::Standard
    }

    async fn prepare(&self, function: &Function) -> ExecutorResult<()> {
        self.ensure_prepared(function).await.map(|_| ())
    }

    async fn execute(
        &self,
        function: &Function,
        event: Value,
        timeout: Duration,
    ) -> ExecutorResult<ExecutionOutput> {
        let image = self.ensure_prepared(function).await?;
        let event_json = serde_json::to_string(&event)?;

        // A pooled container's environment is fixed at creation, so a warm
        // acquire swaps it for a fresh container carrying this event. The
        // image layers are hot; the swap is a cheap create call.
        let warm_start = match self.pool.acquire(function.id) {
            Some(pooled) => {
                let docker = self.docker.clone();
                tokio::spawn(async move {
                    container::force_remove(&docker, &pooled.container_id).await;
                });
                true
            }
            None => false,
        };

        let mut spec = ContainerSpec::for_function(Backend::Standard, function, &image);
        spec.input_data = Some(&event_json);
        spec.cpu_period_us = self.docker_config.cpu_period_us;
        spec.cpu_quota_us = self.docker_config.cpu_quota_us;

        let container_id = container::create_container(&self.docker, &spec).await?;

        // Every non-retain path below must destroy the container
        let discard = scopeguard::guard(
            (self.docker.clone(), container_id.clone()),
            |(docker, id)| {
                tokio::spawn(async move {
                    container::force_remove(&docker, &id).await;
                });
            },
        );

        let outcome = container::run_to_completion(&self.docker, &container_id, timeout).await?;
        let envelope = container::interpret(&outcome, timeout)?;

        // Clean exit: keep the container image-warm for the next invocation
        let (docker, id) = ScopeGuard::into_inner(discard);
        if let Err(rejected) = self.pool.release(function.id, PooledContainer::new(id)) {
            debug!("Pool full for function {}, discarding container", function.id);
            container::force_remove(&docker, &rejected.container_id).await;
        }

        Ok(ExecutionOutput {
            result: envelope.result,
            metrics: InvocationMetrics {
                duration_ms: envelope.metrics.duration_ms,
                memory_used_mb: envelope.metrics.memory_used_mb,
                cpu_percent: envelope.metrics.cpu_percent,
                warm_start,
                startup_time_ms: None,
            },
        })
    }

    async fn remove(&self, function: &Function) {
        self.images.remove(&function.id);

        while let Some(pooled) = self.pool.acquire(function.id) {
            container::force_remove(&self.docker, &pooled.container_id).await;
        }

        self.builder.remove(function.id, Backend::Standard).await;
    }
}
