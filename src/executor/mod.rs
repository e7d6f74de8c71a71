//! Function execution backends
//!
//! Each backend drives one isolation technology behind the same [`Executor`]
//! contract: get a container for the function's image, inject the event,
//! start it, wait under a deadline, parse the result envelope, and either
//! return the container to the pool or destroy it.

pub mod container;
pub mod envelope;
mod registry;
mod sandbox;
mod standard;

pub use envelope::{Envelope, EnvelopeStatus};
pub use registry::ExecutorRegistry;
pub use sandbox::SandboxExecutor;
pub use standard::StandardExecutor;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::database::Function;

/// An isolation backend behind the uniform execute contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Default OCI runtime
    Standard,
    /// User-space kernel sandbox runtime (gVisor)
    Sandbox,
}

impl Backend {
    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Standard => "standard",
            Backend::Sandbox => "sandbox",
        }
    }

    /// Parse a backend tag. Returns `None` for unknown tags.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "standard" => Some(Backend::Standard),
            "sandbox" => Some(Backend::Sandbox),
            _ => None,
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error type for execution operations
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Unknown backend: {0}")]
    UnknownBackend(String),

    #[error("{0}")]
    Handler(String),

    #[error("Wrapper failure: {0}")]
    Wrapper(String),

    #[error("Function execution timed out after {0}s")]
    Timeout(u64),

    #[error("Container killed: memory limit exceeded")]
    OutOfMemory,

    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    #[error(transparent)]
    Build(#[from] crate::builder::BuildError),

    #[error("Invalid event payload: {0}")]
    Event(#[from] serde_json::Error),
}

pub type ExecutorResult<T> = Result<T, ExecutorError>;

/// Per-invocation metrics assembled from the wrapper envelope and the
/// executor's own observations
#[derive(Debug, Clone, Default, Serialize)]
pub struct InvocationMetrics {
    /// Handler wall time measured inside the container
    pub duration_ms: f64,

    /// Resident memory delta sampled by the wrapper, in MB
    pub memory_used_mb: f64,

    /// CPU utilisation sampled by the wrapper
    pub cpu_percent: f64,

    /// Whether the invocation was served from the warm pool
    pub warm_start: bool,

    /// Cold-start overhead (wall time minus handler time); reported by
    /// backends that never pre-warm
    #[serde(skip_serializing_if = "Option::is_none")]
    pub startup_time_ms: Option<f64>,
}

/// Result of a successful invocation
#[derive(Debug, Clone)]
pub struct ExecutionOutput {
    pub result: Value,
    pub metrics: InvocationMetrics,
}

/// Trait defining the execution backend interface
///
/// Both backends satisfy the same contract and envelope format; the only
/// legitimate variation is cold-start behaviour (pre-warming and the
/// startup-time metric).
#[async_trait]
pub trait Executor: Send + Sync {
    /// Backend tag this executor serves
    fn backend(&self) -> Backend;

    /// Build (or refresh) the function's image in this backend.
    /// Idempotent per code version; safe to call on every create/update.
    async fn prepare(&self, function: &Function) -> ExecutorResult<()>;

    /// Run one invocation to completion
    async fn execute(
        &self,
        function: &Function,
        event: Value,
        timeout: Duration,
    ) -> ExecutorResult<ExecutionOutput>;

    /// Drop the function's image and any pooled containers. Best-effort;
    /// called on function deletion.
    async fn remove(&self, function: &Function);
}
