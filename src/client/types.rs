//! Wire types of the ComfyUI prompt API, parsed leniently.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ClientError;
use crate::envelope::NodeErrors;

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// One accepted submission. Immutable once created.
#[derive(Debug, Clone)]
pub struct Job {
    /// Engine-assigned prompt id.
    pub id: String,
    /// Workflow document exactly as the caller sent it.
    pub payload: Value,
    pub submitted_at: DateTime<Utc>,
}

impl Job {
    pub fn new(id: String, payload: Value) -> Self {
        Self {
            id,
            payload,
            submitted_at: Utc::now(),
        }
    }

    /// Number of nodes in the submitted workflow (API-format prompts are a
    /// node id → node map).
    pub fn node_count(&self) -> usize {
        self.payload.as_object().map_or(0, |nodes| nodes.len())
    }
}

/// Body of a successful `POST /prompt`.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitReceipt {
    pub prompt_id: String,
    /// Queue position assigned by the engine.
    #[serde(default)]
    pub number: Option<i64>,
    /// Non-fatal validation errors for nodes the engine pruned.
    #[serde(default)]
    pub node_errors: Value,
}

impl SubmitReceipt {
    /// Decode the submit body; a body without `prompt_id` is malformed.
    pub fn from_value(body: Value) -> Result<Self, ClientError> {
        serde_json::from_value(body)
            .map_err(|e| ClientError::Malformed(format!("submit response: {e}")))
    }

    pub fn node_errors(&self) -> NodeErrors {
        flatten_node_errors(&self.node_errors)
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Prompt ids currently running or waiting on the engine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueSnapshot {
    pub running: Vec<String>,
    pub pending: Vec<String>,
}

impl QueueSnapshot {
    /// Decode `GET /queue`. Each item is `[number, prompt_id, prompt, ...]`.
    pub fn from_value(body: &Value) -> Result<Self, ClientError> {
        let object = body
            .as_object()
            .ok_or_else(|| ClientError::Malformed("queue response is not an object".into()))?;

        Ok(Self {
            running: queue_ids(object.get("queue_running")),
            pending: queue_ids(object.get("queue_pending")),
        })
    }

    pub fn contains(&self, job_id: &str) -> bool {
        self.is_running(job_id) || self.is_pending(job_id)
    }

    pub fn is_running(&self, job_id: &str) -> bool {
        self.running.iter().any(|id| id == job_id)
    }

    pub fn is_pending(&self, job_id: &str) -> bool {
        self.pending.iter().any(|id| id == job_id)
    }
}

fn queue_ids(list: Option<&Value>) -> Vec<String> {
    let Some(items) = list.and_then(Value::as_array) else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(|item| match item.get(1).and_then(Value::as_str) {
            Some(id) => Some(id.to_string()),
            None => {
                tracing::warn!(item = %item, "Skipping queue item without a prompt id");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Raw history entry for one prompt, as stored under its id in `GET /history/{id}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HistoryEntry(pub Value);

impl HistoryEntry {
    /// `outputs` map of node id → node output, if present.
    pub fn outputs(&self) -> Option<&serde_json::Map<String, Value>> {
        self.0.get("outputs").and_then(Value::as_object)
    }

    pub fn has_outputs(&self) -> bool {
        self.0.get("outputs").is_some()
    }

    /// `status.status_str`, e.g. `success` or `error`.
    pub fn status_str(&self) -> Option<&str> {
        self.0
            .get("status")
            .and_then(|s| s.get("status_str"))
            .and_then(Value::as_str)
    }

    pub fn is_error(&self) -> bool {
        self.status_str() == Some("error")
    }

    /// The engine is done with this prompt: it either failed or published outputs.
    pub fn is_terminal(&self) -> bool {
        self.is_error() || self.has_outputs()
    }

    /// Payload of the `execution_error` status message, if the engine recorded one.
    pub fn execution_error(&self) -> Option<&Value> {
        self.0
            .get("status")
            .and_then(|s| s.get("messages"))
            .and_then(Value::as_array)?
            .iter()
            .filter_map(Value::as_array)
            .find(|msg| msg.first().and_then(Value::as_str) == Some("execution_error"))
            .and_then(|msg| msg.get(1))
    }
}

// ---------------------------------------------------------------------------
// Job state
// ---------------------------------------------------------------------------

/// Where a job stands, derived from one result fetch and one queue snapshot.
/// Never stored beyond the poll tick that computed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Completed,
    Failed,
    Unknown,
}

impl JobState {
    pub fn observe(
        entry: Option<&HistoryEntry>,
        queue: Option<&QueueSnapshot>,
        job_id: &str,
    ) -> Self {
        if let Some(entry) = entry.filter(|e| e.is_terminal()) {
            return if entry.is_error() {
                JobState::Failed
            } else {
                JobState::Completed
            };
        }
        match queue {
            Some(q) if q.is_running(job_id) => JobState::Running,
            Some(q) if q.is_pending(job_id) => JobState::Queued,
            _ => JobState::Unknown,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Completed | JobState::Failed)
    }
}

// ---------------------------------------------------------------------------
// Artifacts
// ---------------------------------------------------------------------------

/// Storage coordinates of one artifact on the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactRef {
    pub filename: String,
    pub subfolder: String,
    pub kind: String,
}

impl ArtifactRef {
    /// Parse one entry of a node's `images`/`gifs`/`audio` list.
    /// `filename` is required; `subfolder` defaults to empty and `type` to `output`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let filename = value.get("filename")?.as_str()?.to_string();
        let subfolder = value
            .get("subfolder")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .unwrap_or("output")
            .to_string();

        Some(Self {
            filename,
            subfolder,
            kind,
        })
    }
}

// ---------------------------------------------------------------------------
// Node errors
// ---------------------------------------------------------------------------

/// Flatten ComfyUI's `node_errors` object into node id → messages.
///
/// Input shape: `{"4": {"errors": [{"message": "...", "details": "..."}], "class_type": "..."}}`.
/// Entries that do not match are skipped.
pub fn flatten_node_errors(value: &Value) -> NodeErrors {
    let mut flattened = NodeErrors::new();
    let Some(nodes) = value.as_object() else {
        return flattened;
    };

    for (node_id, node) in nodes {
        let messages: Vec<String> = node
            .get("errors")
            .and_then(Value::as_array)
            .map(|errors| errors.iter().filter_map(describe_error).collect())
            .unwrap_or_default();

        if messages.is_empty() {
            tracing::warn!(node_id = %node_id, "Node error entry without readable messages");
            continue;
        }
        flattened.insert(node_id.clone(), messages);
    }

    flattened
}

/// `message: details`, or just `message` when details are empty.
pub(crate) fn describe_error(error: &Value) -> Option<String> {
    let message = error.get("message").and_then(Value::as_str)?;
    match error.get("details").and_then(Value::as_str) {
        Some(details) if !details.is_empty() => Some(format!("{message}: {details}")),
        _ => Some(message.to_string()),
    }
}
