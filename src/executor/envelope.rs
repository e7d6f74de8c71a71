//! Result envelope parsing
//!
//! The wrapper inside every function container emits exactly one line of
//! JSON on stdout. This is the single contract that decouples executors
//! from the handler language.

use serde::Deserialize;
use serde_json::Value;

/// Wrapper-reported outcome of one handler call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeStatus {
    Success,
    Error,
}

/// Metrics sampled by the wrapper around the handler call
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnvelopeMetrics {
    #[serde(default)]
    pub duration_ms: f64,

    #[serde(default)]
    pub memory_used_mb: f64,

    #[serde(default)]
    pub cpu_percent: f64,
}

/// The structured document a wrapper emits on stdout
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub result: Value,

    pub status: EnvelopeStatus,

    #[serde(default)]
    pub error: Option<String>,

    #[serde(default)]
    pub metrics: EnvelopeMetrics,
}

/// Parse the envelope from captured container stdout.
///
/// The envelope is the last non-empty line; anything the handler printed
/// before it is ignored.
pub fn parse(stdout: &str) -> Result<Envelope, String> {
    let line = stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| "container produced no output".to_string())?;

    serde_json::from_str(line).map_err(|e| format!("invalid envelope `{}`: {}", truncate(line), e))
}

fn truncate(s: &str) -> &str {
    match s.char_indices().nth(200) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
