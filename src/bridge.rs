//! Synchronous bridge — the public entry point.
//!
//! `submit_and_wait` composes the client, poller and assembler into one call
//! that returns exactly one `ResultEnvelope` or one `BridgeError`. Submission
//! is never retried, so a transport failure after the engine accepted the
//! prompt cannot create a duplicate job.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tokio::time::{sleep, Instant};

use crate::assembler::{execution_errors, ArtifactMode, ResultAssembler};
use crate::client::{Job, JobEngine};
use crate::config::BridgeConfig;
use crate::envelope::{round_secs, HealthReport, JobStatus, NodeErrors, NodeOutputs, ResultEnvelope};
use crate::error::{BridgeError, Result};
use crate::poller::{CompletionPoller, PollSettings};

/// Per-call options for `submit_and_wait_with`.
#[derive(Debug, Clone, Default)]
pub struct SubmitOptions {
    /// Overrides the engine client's own client id.
    pub client_id: Option<String>,
    pub artifact_mode: ArtifactMode,
    /// Falls back to `BridgeConfig::default_timeout` when `None`.
    pub timeout: Option<Duration>,
}

/// Answer of `queue_prompt`: the engine's native `/prompt` body, sent once
/// the prompt has finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PromptAck {
    pub prompt_id: String,
    pub number: Option<i64>,
    pub node_errors: NodeErrors,
    #[serde(skip)]
    pub status: JobStatus,
}

impl PromptAck {
    pub fn is_success(&self) -> bool {
        self.status == JobStatus::Success
    }
}

/// Submit-and-wait over any `JobEngine`.
///
/// Holds no per-job state: share one instance (behind an `Arc`) across
/// concurrent callers. The only shared resource is the engine's connection
/// pool.
pub struct SyncBridge<E: JobEngine> {
    engine: E,
    config: BridgeConfig,
}

impl<E: JobEngine> SyncBridge<E> {
    pub fn new(engine: E, config: BridgeConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Submit `payload` and block until it finishes or `timeout` passes.
    pub async fn submit_and_wait(
        &self,
        payload: Value,
        want_inline_artifacts: bool,
        timeout: Option<Duration>,
    ) -> Result<ResultEnvelope> {
        let options = SubmitOptions {
            artifact_mode: ArtifactMode::from_flag(want_inline_artifacts),
            timeout,
            ..SubmitOptions::default()
        };
        self.submit_and_wait_with(payload, &options).await
    }

    pub async fn submit_and_wait_with(
        &self,
        payload: Value,
        options: &SubmitOptions,
    ) -> Result<ResultEnvelope> {
        let (envelope, _) = self.run(payload, options).await?;
        Ok(envelope)
    }

    /// Same wait as `submit_and_wait_with`, answered in the shape of the
    /// engine's own `POST /prompt` response. Artifacts are not assembled.
    pub async fn queue_prompt(
        &self,
        payload: Value,
        client_id: Option<String>,
    ) -> Result<PromptAck> {
        let options = SubmitOptions {
            client_id,
            ..SubmitOptions::default()
        };
        let (envelope, number) = self.run(payload, &options).await?;
        Ok(PromptAck {
            prompt_id: envelope.prompt_id,
            number,
            node_errors: envelope.node_errors,
            status: envelope.status,
        })
    }

    async fn run(
        &self,
        payload: Value,
        options: &SubmitOptions,
    ) -> Result<(ResultEnvelope, Option<i64>)> {
        let timeout = options.timeout.unwrap_or_else(|| self.config.default_timeout());
        tracing::info!(
            timeout_secs = timeout.as_secs_f64(),
            mode = ?options.artifact_mode,
            "Starting prompt processing"
        );

        self.wait_until_ready().await?;

        let started = Instant::now();
        let receipt = self
            .engine
            .submit(&payload, options.client_id.as_deref())
            .await
            .map_err(|e| BridgeError::from_client(e, None))?;
        let submit_errors = receipt.node_errors();
        let job = Job::new(receipt.prompt_id, payload);
        tracing::info!(
            job_id = %job.id,
            queue_number = ?receipt.number,
            nodes = job.node_count(),
            "Task submitted"
        );

        let finished = CompletionPoller::new(&self.engine, PollSettings::from(&self.config))
            .wait(&job.id, timeout)
            .await?;

        let (status, outputs, node_errors) = match finished.status {
            JobStatus::Error => (
                JobStatus::Error,
                NodeOutputs::new(),
                execution_errors(&finished.entry),
            ),
            JobStatus::Success if !submit_errors.is_empty() => {
                (JobStatus::Error, NodeOutputs::new(), submit_errors)
            }
            JobStatus::Success => {
                let outputs = ResultAssembler::new(&self.engine)
                    .assemble(&finished.entry, options.artifact_mode)
                    .await
                    .map_err(|e| BridgeError::from_client(e, Some(&job.id)))?;
                (JobStatus::Success, outputs, submit_errors)
            }
        };

        let envelope = ResultEnvelope {
            prompt_id: job.id.clone(),
            status,
            execution_time: round_secs(started.elapsed()),
            outputs,
            node_errors,
        };

        if envelope.is_success() {
            tracing::info!(
                job_id = %job.id,
                submitted_at = %job.submitted_at,
                execution_time = envelope.execution_time,
                artifacts = envelope.artifact_count(),
                "Task completed successfully"
            );
        } else {
            tracing::warn!(
                job_id = %job.id,
                submitted_at = %job.submitted_at,
                execution_time = envelope.execution_time,
                failed_nodes = envelope.node_errors.len(),
                "Task finished with node errors"
            );
        }
        Ok((envelope, receipt.number))
    }

    /// Probe the engine's queue. Never fails: connectivity problems are
    /// reported as `unhealthy`.
    pub async fn health(&self) -> HealthReport {
        match self.engine.get_status().await {
            Ok(queue) => HealthReport::healthy(
                self.engine.address(),
                queue.running.len(),
                queue.pending.len(),
            ),
            Err(e) => HealthReport::unhealthy(self.engine.address(), e.to_string()),
        }
    }

    /// Wait for a cold-starting engine to answer before submitting.
    async fn wait_until_ready(&self) -> Result<()> {
        let attempts = self.config.startup_probe_attempts.max(1);

        for attempt in 1..=attempts {
            let report = self.health().await;
            if report.is_healthy() {
                if attempt > 1 {
                    tracing::info!(attempt, "ComfyUI is ready");
                }
                return Ok(());
            }

            let error = report.error.unwrap_or_default();
            if attempt == attempts {
                tracing::error!(attempts, error = %error, "ComfyUI did not become ready");
                return Err(BridgeError::Connection {
                    job_id: None,
                    message: format!(
                        "engine at {} not ready after {} probes: {}",
                        report.comfyui_server, attempts, error
                    ),
                });
            }

            tracing::info!(attempt, attempts, error = %error, "ComfyUI not ready, waiting");
            sleep(self.config.startup_probe_interval()).await;
        }

        Ok(())
    }
}
