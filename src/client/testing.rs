//! Scripted in-memory engine for unit tests.
//!
//! Jobs follow a time-based plan measured from their submit instant, so tests
//! running on a paused tokio clock get deterministic results no matter how
//! many concurrent waits poll the same engine.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Instant;

use super::{ArtifactRef, ClientError, HistoryEntry, JobEngine, SubmitReceipt};
use crate::envelope::NodeErrors;

/// What the engine does with a submitted job.
#[derive(Debug, Clone)]
pub struct JobPlan {
    /// History entry becomes fetchable this long after submit; `None` = never.
    pub result_at: Option<Duration>,
    /// Job disappears from the queue this long after submit; `None` = never.
    pub leaves_queue_at: Option<Duration>,
    /// History entry served once `result_at` has passed.
    pub entry: Value,
    /// Refuse the submission with these node errors.
    pub reject: Option<NodeErrors>,
    /// Non-fatal node errors returned in the submit receipt.
    pub receipt_node_errors: Value,
}

impl JobPlan {
    /// Finishes at `at` with `outputs`, leaving the queue at the same moment.
    pub fn completes(at: Duration, outputs: Value) -> Self {
        Self {
            result_at: Some(at),
            leaves_queue_at: Some(at),
            entry: json!({
                "outputs": outputs,
                "status": {"status_str": "success", "completed": true}
            }),
            reject: None,
            receipt_node_errors: json!({}),
        }
    }

    /// Never finishes and never leaves the queue.
    pub fn hangs() -> Self {
        Self {
            result_at: None,
            leaves_queue_at: None,
            entry: json!({}),
            reject: None,
            receipt_node_errors: json!({}),
        }
    }

    /// Leaves the queue at `at` without ever publishing a result.
    pub fn vanishes(at: Duration) -> Self {
        Self {
            leaves_queue_at: Some(at),
            ..Self::hangs()
        }
    }

    /// Engine reports an execution error on `node_id` at `at`.
    pub fn crashes(at: Duration, node_id: &str, message: &str) -> Self {
        Self {
            result_at: Some(at),
            leaves_queue_at: Some(at),
            entry: json!({
                "outputs": {},
                "status": {
                    "status_str": "error",
                    "completed": false,
                    "messages": [
                        ["execution_start", {"prompt_id": "ignored"}],
                        ["execution_error", {
                            "node_id": node_id,
                            "node_type": "KSampler",
                            "exception_message": message
                        }]
                    ]
                }
            }),
            reject: None,
            receipt_node_errors: json!({}),
        }
    }

    pub fn rejected(node_errors: NodeErrors) -> Self {
        Self {
            reject: Some(node_errors),
            ..Self::hangs()
        }
    }
}

struct ScriptedJob {
    plan: JobPlan,
    submitted: Instant,
}

/// In-memory `JobEngine` driven by `JobPlan`s keyed by the payload's `label`.
#[derive(Default)]
pub struct ScriptedEngine {
    plans: Mutex<HashMap<String, JobPlan>>,
    jobs: Mutex<HashMap<String, ScriptedJob>>,
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
    next_id: AtomicU32,
    /// The first `n` status calls fail as if the engine were down.
    failing_status_calls: AtomicU32,
    result_delay: Duration,
    pub submits: Mutex<Vec<Value>>,
    pub status_calls: AtomicU32,
    pub result_calls: AtomicU32,
    pub artifact_fetches: Mutex<Vec<String>>,
    pub interrupts: Mutex<Vec<String>>,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Plan for payloads whose `label` is `label`. Unlabelled payloads use `"default"`.
    pub fn plan(self, label: &str, plan: JobPlan) -> Self {
        self.plans.lock().unwrap().insert(label.to_string(), plan);
        self
    }

    pub fn artifact(self, filename: &str, bytes: &[u8]) -> Self {
        self.artifacts
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
        self
    }

    pub fn fail_status_calls(self, n: u32) -> Self {
        self.failing_status_calls.store(n, Ordering::SeqCst);
        self
    }

    pub fn interrupted(&self) -> Vec<String> {
        self.interrupts.lock().unwrap().clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.artifact_fetches.lock().unwrap().clone()
    }

    /// Every `get_result` call stalls this long before answering.
    pub fn slow_results(mut self, delay: Duration) -> Self {
        self.result_delay = delay;
        self
    }

    fn published(job: &ScriptedJob) -> Option<HistoryEntry> {
        match job.plan.result_at {
            Some(at) if job.submitted.elapsed() >= at => {
                Some(HistoryEntry(job.plan.entry.clone()))
            }
            _ => None,
        }
    }

    fn down() -> ClientError {
        ClientError::Http {
            status: 503,
            body: "engine unavailable".into(),
        }
    }
}

#[async_trait]
impl JobEngine for ScriptedEngine {
    async fn submit(
        &self,
        payload: &Value,
        _client_id: Option<&str>,
    ) -> Result<SubmitReceipt, ClientError> {
        self.submits.lock().unwrap().push(payload.clone());

        let label = payload
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or("default");
        let plan = self
            .plans
            .lock()
            .unwrap()
            .get(label)
            .cloned()
            .unwrap_or_else(JobPlan::hangs);

        if let Some(node_errors) = plan.reject.clone() {
            return Err(ClientError::Rejected {
                message: "Prompt outputs failed validation".into(),
                node_errors,
            });
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let id = format!("{label}-{n}");
        let receipt_node_errors = plan.receipt_node_errors.clone();
        self.jobs.lock().unwrap().insert(
            id.clone(),
            ScriptedJob {
                plan,
                submitted: Instant::now(),
            },
        );

        Ok(SubmitReceipt {
            prompt_id: id,
            number: Some(n as i64),
            node_errors: receipt_node_errors,
        })
    }

    async fn queue_raw(&self) -> Result<Value, ClientError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self.failing_status_calls.load(Ordering::SeqCst);
        if failing > 0 {
            self.failing_status_calls.store(failing - 1, Ordering::SeqCst);
            return Err(Self::down());
        }

        let jobs = self.jobs.lock().unwrap();
        let running: Vec<Value> = jobs
            .iter()
            .filter(|(_, job)| match job.plan.leaves_queue_at {
                Some(at) => job.submitted.elapsed() < at,
                None => true,
            })
            .map(|(id, _)| json!([0, id, {}, {}, []]))
            .collect();
        Ok(json!({"queue_running": running, "queue_pending": []}))
    }

    async fn history_raw(&self) -> Result<Value, ClientError> {
        let jobs = self.jobs.lock().unwrap();
        let history: serde_json::Map<String, Value> = jobs
            .iter()
            .filter_map(|(id, job)| Self::published(job).map(|entry| (id.clone(), entry.0)))
            .collect();
        Ok(Value::Object(history))
    }

    async fn get_result(&self, job_id: &str) -> Result<Option<HistoryEntry>, ClientError> {
        self.result_calls.fetch_add(1, Ordering::SeqCst);
        if !self.result_delay.is_zero() {
            tokio::time::sleep(self.result_delay).await;
        }
        let jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get(job_id) else {
            return Ok(None);
        };
        Ok(Self::published(job))
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ClientError> {
        self.artifact_fetches
            .lock()
            .unwrap()
            .push(artifact.filename.clone());
        self.artifacts
            .lock()
            .unwrap()
            .get(&artifact.filename)
            .cloned()
            .ok_or(ClientError::Http {
                status: 404,
                body: format!("no artifact {}", artifact.filename),
            })
    }

    async fn interrupt(&self, job_id: &str) {
        self.interrupts.lock().unwrap().push(job_id.to_string());
    }

    fn artifact_url(&self, artifact: &ArtifactRef) -> Option<String> {
        Some(format!("scripted://view/{}", artifact.filename))
    }

    fn address(&self) -> String {
        "scripted:0".to_string()
    }
}
