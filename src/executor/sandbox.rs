//! Sandbox backend: user-space kernel runtime (gVisor)
//!
//! Every invocation is cold: no pre-warming, no pool, the container is
//! destroyed after each run. Cold-start overhead is made explicit through
//! the `startup_time_ms` metric.

use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use dashmap::DashMap;
use scopeguard::ScopeGuard;
use serde_json::Value;

use super::container::{self, ContainerSpec};
use super::{Backend, ExecutionOutput, Executor, ExecutorResult, InvocationMetrics};
use crate::builder::ImageBuilder;
use crate::config::DockerConfiguration;
use crate::database::Function;

#[derive(Debug, Clone)]
struct PreparedImage {
    tag: String,
    code_version: i64,
}

/// Executor backed by the user-space kernel sandbox runtime
pub struct SandboxExecutor {
    docker: Docker,
    builder: ImageBuilder,
    images: DashMap<i64, PreparedImage>,
    docker_config: DockerConfiguration,
}

impl SandboxExecutor {
    pub fn new(docker: Docker, docker_config: DockerConfiguration) -> Self {
        Self {
            builder: ImageBuilder::new(docker.clone()),
            docker,
            images: DashMap::new(),
            docker_config,
        }
    }

    async fn ensure_prepared(&self, function: &Function) -> ExecutorResult<String> {
        if let Some(existing) = self.images.get(&function.id) {
            if existing.code_version == function.updated_at {
                return Ok(existing.tag.clone());
            }
        }

        let tag = self.builder.prepare(function, Backend::Sandbox).await?;

        self.images.insert(
            function.id,
            PreparedImage {
                tag: tag.clone(),
                code_version: function.updated_at,
            },
        );

        Ok(tag)
    }
}

#[async_trait]
impl Executor for SandboxExecutor {
    fn backend(&self) -> Backend {
        Backend::Sandbox
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

        let mut spec = ContainerSpec::for_function(Backend::Sandbox, function, &image);
        spec.input_data = Some(&event_json);
        spec.runtime = Some(&self.docker_config.sandbox_runtime);
        spec.cpu_period_us = self.docker_config.cpu_period_us;
        spec.cpu_quota_us = self.docker_config.cpu_quota_us;

        let container_id = container::create_container(&self.docker, &spec).await?;

        // Single-use container: destroyed on every path
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

        let (docker, id) = ScopeGuard::into_inner(discard);
        container::force_remove(&docker, &id).await;

        // Sandbox boots its own kernel per container; surface that cost
        let startup_time_ms = (outcome.wall_ms - envelope.metrics.duration_ms).max(0.0);

        Ok(ExecutionOutput {
            result: envelope.result,
            metrics: InvocationMetrics {
                duration_ms: envelope.metrics.duration_ms,
                memory_used_mb: envelope.metrics.memory_used_mb,
                cpu_percent: envelope.metrics.cpu_percent,
                warm_start: false,
                startup_time_ms: Some(startup_time_ms),
            },
        })
    }

    async fn remove(&self, function: &Function) {
        self.images.remove(&function.id);
        self.builder.remove(function.id, Backend::Sandbox).await;
    }
}
