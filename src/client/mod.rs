//! Remote job engine boundary.
//!
//! `JobEngine` is the only way the poller, assembler and bridge talk to
//! ComfyUI. `http::HttpEngineClient` is the production implementation; tests
//! script the trait directly.

pub mod http;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use serde_json::Value;

use crate::envelope::NodeErrors;

pub use types::{ArtifactRef, HistoryEntry, Job, JobState, QueueSnapshot, SubmitReceipt};

/// Failures of a single call against the engine.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection refused, reset, timed out, or the body could not be read.
    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The engine answered with a non-success status.
    #[error("HTTP error with status {status}: {body}")]
    Http { status: u16, body: String },

    /// The engine answered 2xx but the body was not what the API promises.
    #[error("Malformed engine response: {0}")]
    Malformed(String),

    /// The engine refused the workflow at submit time.
    #[error("Prompt rejected: {message}")]
    Rejected {
        message: String,
        node_errors: NodeErrors,
    },
}

/// Typed operations against the remote engine.
///
/// Implementations must be safe to share between concurrent waits; the
/// production client funnels every call through one pooled connection set.
#[async_trait]
pub trait JobEngine: Send + Sync {
    /// Queue a workflow. Never retried.
    async fn submit(
        &self,
        payload: &Value,
        client_id: Option<&str>,
    ) -> Result<SubmitReceipt, ClientError>;

    /// `GET /queue` body exactly as the engine returned it.
    async fn queue_raw(&self) -> Result<Value, ClientError>;

    /// Snapshot of the running and pending queues.
    async fn get_status(&self) -> Result<QueueSnapshot, ClientError> {
        let body = self.queue_raw().await?;
        QueueSnapshot::from_value(&body)
    }

    /// `GET /history` body (every retained prompt, keyed by id).
    async fn history_raw(&self) -> Result<Value, ClientError>;

    /// History entry for `job_id`, or `None` while the engine has none.
    async fn get_result(&self, job_id: &str) -> Result<Option<HistoryEntry>, ClientError>;

    /// Raw bytes of one output artifact.
    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ClientError>;

    /// Best-effort cancellation. Failures are logged by the implementation.
    async fn interrupt(&self, job_id: &str);

    /// Where callers can download `artifact` themselves, if the engine exposes it.
    fn artifact_url(&self, _artifact: &ArtifactRef) -> Option<String> {
        None
    }

    /// `host:port` of the engine, for health reports and logs.
    fn address(&self) -> String;
}
