//! Response types handed back to callers.
//!
//! Field names follow the JSON the existing HTTP clients already parse:
//! `prompt_id`, `status`, `execution_time`, `outputs`, `node_errors`.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Node id → human-readable validation or execution errors.
pub type NodeErrors = BTreeMap<String, Vec<String>>;

/// Node id → artifacts that node produced.
pub type NodeOutputs = BTreeMap<String, Vec<OutputArtifact>>;

/// Terminal status reported in the envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Success,
    Error,
}

/// One produced artifact, either as a storage reference or inlined.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputArtifact {
    pub filename: String,
    pub subfolder: String,
    /// Storage class on the engine (`output`, `temp`, ...).
    #[serde(rename = "type")]
    pub kind: String,
    /// Download location, set in reference mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Standard base64 of the artifact bytes, set in inline mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
}

/// The single structured response of one `submit_and_wait` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub prompt_id: String,
    pub status: JobStatus,
    /// Wall-clock seconds from submit to terminal detection, two decimals.
    pub execution_time: f64,
    pub outputs: NodeOutputs,
    pub node_errors: NodeErrors,
}

impl ResultEnvelope {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }

    /// Total number of artifacts across all nodes.
    pub fn artifact_count(&self) -> usize {
        self.outputs.values().map(Vec::len).sum()
    }
}

/// Seconds rounded to two decimals, as reported in `execution_time`.
pub fn round_secs(elapsed: Duration) -> f64 {
    (elapsed.as_secs_f64() * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of probing the engine's queue endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub comfyui_server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_running: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue_pending: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthReport {
    pub fn healthy(server: String, running: usize, pending: usize) -> Self {
        Self {
            status: HealthStatus::Healthy,
            comfyui_server: server,
            queue_running: Some(running),
            queue_pending: Some(pending),
            error: None,
        }
    }

    pub fn unhealthy(server: String, error: String) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            comfyui_server: server,
            queue_running: None,
            queue_pending: None,
            error: Some(error),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}
