//! Configuration structures and loading

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

/// Main daemon configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Configuration {
    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// API server configuration
    #[serde(default)]
    pub api: ApiConfiguration,

    /// Function/execution store configuration
    #[serde(default)]
    pub database: DatabaseConfiguration,

    /// Docker runtime configuration
    #[serde(default)]
    pub docker: DockerConfiguration,

    /// Container pool configuration
    #[serde(default)]
    pub pool: PoolConfiguration,

    /// Metrics pipeline configuration
    #[serde(default)]
    pub metrics: MetricsConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file.
    ///
    /// A missing file is not fatal: the daemon starts with built-in defaults.
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        if !config_path.exists() {
            warn!("Config file {} not found, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config: Configuration =
            toml::from_str(&content).with_context(|| "Failed to parse configuration")?;

        Ok(config)
    }
}

/// API server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfiguration {
    /// Host to bind to
    #[serde(default = "default_api_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfiguration {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
        }
    }
}

fn default_api_host() -> String {
    "0.0.0.0".into()
}

fn default_api_port() -> u16 {
    8000
}

/// Function/execution store configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfiguration {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfiguration {
    fn default() -> Self {
        Self {
            path: default_database_path(),
        }
    }
}

fn default_database_path() -> PathBuf {
    PathBuf::from("data/nimbus.db")
}

/// Docker runtime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DockerConfiguration {
    /// OCI runtime name used by the sandbox backend
    #[serde(default = "default_sandbox_runtime")]
    pub sandbox_runtime: String,

    /// CPU period in microseconds applied to function containers
    #[serde(default = "default_cpu_period")]
    pub cpu_period_us: i64,

    /// CPU quota in microseconds per period (100_000/100_000 = one core)
    #[serde(default = "default_cpu_quota")]
    pub cpu_quota_us: i64,
}

impl Default for DockerConfiguration {
    fn default() -> Self {
        Self {
            sandbox_runtime: default_sandbox_runtime(),
            cpu_period_us: default_cpu_period(),
            cpu_quota_us: default_cpu_quota(),
        }
    }
}

fn default_sandbox_runtime() -> String {
    "runsc".into()
}

fn default_cpu_period() -> i64 {
    100_000
}

fn default_cpu_quota() -> i64 {
    100_000
}

/// Container pool configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PoolConfiguration {
    /// Maximum idle containers kept per function
    #[serde(default = "default_pool_max_size")]
    pub max_size: usize,

    /// Seconds an idle container may sit in the pool before eviction
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Containers created ahead of time when a function is prepared
    #[serde(default = "default_prewarm_count")]
    pub prewarm_count: usize,

    /// Interval between idle-eviction sweeps
    #[serde(default = "default_eviction_interval")]
    pub eviction_interval_secs: u64,
}

impl Default for PoolConfiguration {
    fn default() -> Self {
        Self {
            max_size: default_pool_max_size(),
            idle_timeout_secs: default_idle_timeout(),
            prewarm_count: default_prewarm_count(),
            eviction_interval_secs: default_eviction_interval(),
        }
    }
}

fn default_pool_max_size() -> usize {
    5
}

fn default_idle_timeout() -> u64 {
    300
}

fn default_prewarm_count() -> usize {
    2
}

fn default_eviction_interval() -> u64 {
    60
}

/// Metrics pipeline configuration
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfiguration {
    /// Path to the SQLite metrics database file
    #[serde(default = "default_metrics_path")]
    pub path: PathBuf,

    /// Seconds between background buffer flushes
    #[serde(default = "default_flush_interval")]
    pub flush_interval_secs: u64,
}

impl Default for MetricsConfiguration {
    fn default() -> Self {
        Self {
            path: default_metrics_path(),
            flush_interval_secs: default_flush_interval(),
        }
    }
}

fn default_metrics_path() -> PathBuf {
    PathBuf::from("data/nimbus_metrics.db")
}

fn default_flush_interval() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Configuration::default();
        assert_eq!(config.api.port, 8000);
        assert_eq!(config.pool.max_size, 5);
        assert_eq!(config.pool.idle_timeout_secs, 300);
        assert_eq!(config.docker.sandbox_runtime, "runsc");
        assert_eq!(config.metrics.flush_interval_secs, 10);
    }

    #[test]
    fn test_parse_partial() {
        let config: Configuration = toml::from_str(
            r#"
            debug = true

            [api]
            port = 9000

            [pool]
            max_size = 3
            "#,
        )
        .unwrap();

        assert!(config.debug);
        assert_eq!(config.api.port, 9000);
        assert_eq!(config.api.host, "0.0.0.0");
        assert_eq!(config.pool.max_size, 3);
        assert_eq!(config.pool.prewarm_count, 2);
    }
}
