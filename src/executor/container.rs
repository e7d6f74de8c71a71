//! Container lifecycle operations shared by both backends
//!
//! Create, start, wait-under-deadline, log retrieval, kill and removal.
//! Removal helpers are best-effort: every discard path suppresses errors so
//! a runaway handler can never leak a container.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogsOptions, RemoveContainerOptions,
    WaitContainerOptions,
};
use bollard::models::HostConfig;
use bollard::Docker;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Backend, ExecutorError, ExecutorResult};
use crate::database::Function;

/// Label carrying the owning function id, for host-side auditing
pub const FUNCTION_LABEL: &str = "io.nimbus.function";

/// Label carrying the backend tag
pub const BACKEND_LABEL: &str = "io.nimbus.backend";

/// Slack allowed past the deadline before the defense-in-depth kill fires
pub const WAIT_GRACE: Duration = Duration::from_secs(2);

/// Everything needed to create one function container
pub struct ContainerSpec<'a> {
    pub backend: Backend,
    pub function_id: i64,
    pub image: &'a str,

    /// JSON-encoded event, exposed to the wrapper as `INPUT_DATA`.
    /// `None` for pre-warmed containers created ahead of any event.
    pub input_data: Option<&'a str>,

    /// Hard memory limit in MB
    pub memory_mb: u32,

    pub cpu_period_us: i64,
    pub cpu_quota_us: i64,

    /// Alternate OCI runtime (`runsc` for the sandbox backend)
    pub runtime: Option<&'a str>,
}

impl<'a> ContainerSpec<'a> {
    pub fn for_function(backend: Backend, function: &'a Function, image: &'a str) -> Self {
        Self {
            backend,
            function_id: function.id,
            image,
            input_data: None,
            memory_mb: function.memory,
            cpu_period_us: 100_000,
            cpu_quota_us: 100_000,
            runtime: None,
        }
    }
}

/// Outcome of driving one container to completion
#[derive(Debug)]
pub struct RunOutcome {
    pub exit_code: i64,
    pub timed_out: bool,
    pub oom_killed: bool,
    pub stdout: String,
    pub stderr: String,
    /// Wall time from start request to observed exit
    pub wall_ms: f64,
}

/// Create a container for one invocation (or for pre-warming)
pub async fn create_container(docker: &Docker, spec: &ContainerSpec<'_>) -> ExecutorResult<String> {
    let name = container_name(spec.backend, spec.function_id);

    let env = spec
        .input_data
        .map(|json| vec![format!("INPUT_DATA={}", json)]);

    let host_config = HostConfig {
        memory: Some(spec.memory_mb as i64 * 1024 * 1024),
        cpu_period: Some(spec.cpu_period_us),
        cpu_quota: Some(spec.cpu_quota_us),
        runtime: spec.runtime.map(str::to_string),
        ..Default::default()
    };

    let labels = [
        (FUNCTION_LABEL.to_string(), spec.function_id.to_string()),
        (BACKEND_LABEL.to_string(), spec.backend.as_str().to_string()),
    ]
    .into_iter()
    .collect();

    let config = Config {
        image: Some(spec.image.to_string()),
        env,
        labels: Some(labels),
        host_config: Some(host_config),
        ..Default::default()
    };

    let options = CreateContainerOptions {
        name: name.as_str(),
        platform: None,
    };

    let response = docker.create_container(Some(options), config).await?;

    debug!(
        "Created container {} for function {} ({})",
        name, spec.function_id, spec.backend
    );

    Ok(response.id)
}

/// Start the container and wait for it to exit, enforcing the deadline.
///
/// A deadline task force-kills the container at `start + timeout`; the wait
/// itself is additionally bounded by `timeout + WAIT_GRACE` in case the kill
/// is lost. Stdout/stderr are captured after exit.
pub async fn run_to_completion(
    docker: &Docker,
    container_id: &str,
    timeout: Duration,
) -> ExecutorResult<RunOutcome> {
    let started = Instant::now();

    docker
        .start_container::<String>(container_id, None)
        .await?;

    // Deadline action: fires once, marks the invocation timed out, kills.
    let timed_out = Arc::new(AtomicBool::new(false));
    let deadline_cancel = CancellationToken::new();
    {
        let docker = docker.clone();
        let id = container_id.to_string();
        let flag = timed_out.clone();
        let token = deadline_cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {}
                _ = tokio::time::sleep(timeout) => {
                    flag.store(true, Ordering::SeqCst);
                    debug!("Deadline crossed, killing container {}", id);
                    kill_container(&docker, &id).await;
                }
            }
        });
    }

    let exit_code = match tokio::time::timeout(
        timeout + WAIT_GRACE,
        wait_for_exit(docker, container_id),
    )
    .await
    {
        Ok(Ok(code)) => {
            deadline_cancel.cancel();
            code
        }
        Ok(Err(e)) => {
            deadline_cancel.cancel();
            return Err(e);
        }
        Err(_) => {
            // The deadline kill did not bring the container down in time
            deadline_cancel.cancel();
            warn!(
                "Container {} ignored deadline kill, forcing removal",
                container_id
            );
            kill_container(docker, container_id).await;
            return Err(ExecutorError::Timeout(timeout.as_secs()));
        }
    };

    let wall_ms = started.elapsed().as_secs_f64() * 1000.0;

    let oom_killed = inspect_oom(docker, container_id).await;
    let stdout = fetch_logs(docker, container_id, true, false).await;
    let stderr = fetch_logs(docker, container_id, false, true).await;

    Ok(RunOutcome {
        exit_code,
        timed_out: timed_out.load(Ordering::SeqCst),
        oom_killed,
        stdout,
        stderr,
        wall_ms,
    })
}

/// Classify a run outcome into an envelope or the matching error kind
pub fn interpret(outcome: &RunOutcome, timeout: Duration) -> ExecutorResult<super::Envelope> {
    if outcome.timed_out {
        return Err(ExecutorError::Timeout(timeout.as_secs()));
    }

    if outcome.oom_killed {
        return Err(ExecutorError::OutOfMemory);
    }

    if outcome.exit_code != 0 {
        // Non-zero exit is reserved for wrapper-level failure (corrupt
        // source, missing handler symbol), not handler errors.
        return Err(ExecutorError::Wrapper(format!(
            "wrapper exited with status {}: {}",
            outcome.exit_code,
            tail(&outcome.stderr, 500)
        )));
    }

    match super::envelope::parse(&outcome.stdout) {
        Ok(envelope) => match envelope.status {
            super::EnvelopeStatus::Error => Err(ExecutorError::Handler(
                envelope
                    .error
                    .unwrap_or_else(|| "handler failed without a message".to_string()),
            )),
            super::EnvelopeStatus::Success => Ok(envelope),
        },
        Err(reason) => Err(ExecutorError::Wrapper(reason)),
    }
}

/// Wait for the container to leave the running state, returning its exit code
async fn wait_for_exit(docker: &Docker, container_id: &str) -> ExecutorResult<i64> {
    let options = WaitContainerOptions {
        condition: "not-running",
    };

    let mut stream = docker.wait_container(container_id, Some(options));

    while let Some(result) = stream.next().await {
        match result {
            Ok(response) => return Ok(response.status_code),
            // bollard reports non-zero exits through this error variant
            Err(bollard::errors::Error::DockerContainerWaitError { code, .. }) => {
                return Ok(code);
            }
            Err(e) => return Err(ExecutorError::Docker(e)),
        }
    }

    // Stream ended without a response; the container is gone
    Ok(0)
}

/// Send SIGKILL, suppressing not-found and not-running responses
pub async fn kill_container(docker: &Docker, container_id: &str) {
    let options = KillContainerOptions { signal: "SIGKILL" };

    match docker.kill_container(container_id, Some(options)).await {
        Ok(_) => {}
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404 | 409,
            ..
        }) => {}
        Err(e) => warn!("Failed to kill container {}: {}", container_id, e),
    }
}

/// Force-remove a container, suppressing all errors
pub async fn force_remove(docker: &Docker, container_id: &str) {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };

    match docker.remove_container(container_id, Some(options)).await {
        Ok(_) => debug!("Destroyed container {}", container_id),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => {}
        Err(e) => warn!("Failed to remove container {}: {}", container_id, e),
    }
}

/// Whether the kernel OOM killer terminated the container
async fn inspect_oom(docker: &Docker, container_id: &str) -> bool {
    match docker.inspect_container(container_id, None).await {
        Ok(info) => info
            .state
            .and_then(|s| s.oom_killed)
            .unwrap_or(false),
        Err(_) => false,
    }
}

/// Fetch captured logs from an exited container
async fn fetch_logs(docker: &Docker, container_id: &str, stdout: bool, stderr: bool) -> String {
    let options = LogsOptions::<String> {
        stdout,
        stderr,
        tail: "all".to_string(),
        ..Default::default()
    };

    let mut stream = docker.logs(container_id, Some(options));
    let mut collected = String::new();

    while let Some(result) = stream.next().await {
        match result {
            Ok(output) => collected.push_str(&output.to_string()),
            Err(e) => {
                warn!("Error reading logs from {}: {}", container_id, e);
                break;
            }
        }
    }

    collected
}

/// Generate a unique container name for one invocation
pub fn container_name(backend: Backend, function_id: i64) -> String {
    format!(
        "fn-{}-{}-{}",
        backend.as_str(),
        function_id,
        uuid::Uuid::new_v4().simple()
    )
}

fn tail(s: &str, max: usize) -> &str {
    let trimmed = s.trim();
    match trimmed.char_indices().rev().nth(max.saturating_sub(1)) {
        Some((idx, _)) => &trimmed[idx..],
        None => trimmed,
    }
}
