//! Outward-facing error taxonomy.
//!
//! Every failure that leaves `SyncBridge` is one of four variants, and every
//! variant carries the prompt id whenever one was assigned so callers can
//! correlate with engine-side logs. Node-level validation errors are not in
//! here: they travel inside a `ResultEnvelope` with status `error`.

use std::time::Duration;

use crate::client::ClientError;
use crate::envelope::NodeErrors;

pub type Result<T> = std::result::Result<T, BridgeError>;

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// Engine unreachable or answered with something unusable. Never retried
    /// inside the bridge.
    #[error("ComfyUI service unavailable: {message}")]
    Connection {
        job_id: Option<String>,
        message: String,
    },

    /// Engine refused the workflow at submit time; it never entered the queue.
    #[error("Prompt rejected: {message}")]
    Rejected {
        message: String,
        node_errors: NodeErrors,
    },

    /// Deadline passed while waiting. The job may still finish on the engine.
    #[error("Task {job_id} timed out after {:.2}s", .elapsed.as_secs_f64())]
    Timeout { job_id: String, elapsed: Duration },

    /// Engine dropped the job from its queue without a retrievable result.
    #[error("Task {job_id} left the queue but produced no retrievable result")]
    InconsistentState { job_id: String },
}

impl BridgeError {
    /// Map a failed client call, tagging it with the job it belonged to.
    pub fn from_client(err: ClientError, job_id: Option<&str>) -> Self {
        match err {
            ClientError::Rejected {
                message,
                node_errors,
            } => BridgeError::Rejected {
                message,
                node_errors,
            },
            other => BridgeError::Connection {
                job_id: job_id.map(str::to_string),
                message: other.to_string(),
            },
        }
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            BridgeError::Connection { job_id, .. } => job_id.as_deref(),
            BridgeError::Rejected { .. } => None,
            BridgeError::Timeout { job_id, .. } | BridgeError::InconsistentState { job_id } => {
                Some(job_id.as_str())
            }
        }
    }

    /// Short stable name for logs and error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::Connection { .. } => "connection",
            BridgeError::Rejected { .. } => "rejected",
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::InconsistentState { .. } => "inconsistent_state",
        }
    }

    pub fn node_errors(&self) -> Option<&NodeErrors> {
        match self {
            BridgeError::Rejected { node_errors, .. } => Some(node_errors),
            _ => None,
        }
    }
}
