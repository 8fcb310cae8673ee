//! Completion poller — waits for one prompt to reach a terminal state.
//!
//! Each tick asks two independent questions:
//!
//! 1. Does `GET /history/{id}` hold a terminal entry? Then the job is done.
//! 2. Is the id still in the running or pending queue? If not, the engine has
//!    finished with it; the result is fetched again a bounded number of times
//!    (the entry can lag the queue briefly) before the job is declared
//!    inconsistent.
//!
//! Relying on (1) alone would wait forever on engine-side failures that never
//! write history. The interval is fixed and the loop wakes at the deadline at
//! the latest, so detection latency is bounded by one interval.
//!
//! The whole loop runs under the job deadline, so a stalled engine call
//! cannot hold the caller past it.
//!
//! ```text
//! Queued/Running ──result──────────────▶ Completed | Failed
//!    │ └──Unknown (left queue)──recheck──▶ Completed | Failed | InconsistentState
//!    └──deadline──interrupt──────────────▶ Timeout
//! ```

use std::time::Duration;

use tokio::time::{sleep, sleep_until, timeout_at, Instant};

use crate::client::{HistoryEntry, JobEngine, JobState};
use crate::config::BridgeConfig;
use crate::envelope::JobStatus;
use crate::error::{BridgeError, Result};

/// Timing knobs taken from `BridgeConfig`.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub poll_interval: Duration,
    pub settle_rechecks: u32,
    pub settle_delay: Duration,
}

impl From<&BridgeConfig> for PollSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            settle_rechecks: config.settle_rechecks,
            settle_delay: config.settle_delay(),
        }
    }
}

/// A job the engine is done with.
#[derive(Debug, Clone)]
pub struct FinishedJob {
    pub job_id: String,
    pub entry: HistoryEntry,
    pub status: JobStatus,
    /// Number of poll ticks it took.
    pub ticks: u32,
}

pub struct CompletionPoller<'a, E: JobEngine + ?Sized> {
    engine: &'a E,
    settings: PollSettings,
}

impl<'a, E: JobEngine + ?Sized> CompletionPoller<'a, E> {
    pub fn new(engine: &'a E, settings: PollSettings) -> Self {
        Self { engine, settings }
    }

    /// Drive the wait loop for `job_id` until a terminal state or `timeout`.
    ///
    /// The deadline also bounds in-flight engine calls: a stalled read is
    /// abandoned when it passes. On timeout the job is interrupted (best
    /// effort) before returning.
    pub async fn wait(&self, job_id: &str, timeout: Duration) -> Result<FinishedJob> {
        let started = Instant::now();
        let deadline = started + timeout;

        match timeout_at(deadline, self.poll(job_id, started, deadline)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(self.time_out(job_id, started).await),
        }
    }

    async fn poll(
        &self,
        job_id: &str,
        started: Instant,
        deadline: Instant,
    ) -> Result<FinishedJob> {
        let mut ticks = 0u32;

        loop {
            ticks += 1;

            let entry = self.fetch_terminal(job_id).await?;
            let queue = match entry {
                Some(_) => None,
                None => Some(
                    self.engine
                        .get_status()
                        .await
                        .map_err(|e| BridgeError::from_client(e, Some(job_id)))?,
                ),
            };

            let state = JobState::observe(entry.as_ref(), queue.as_ref(), job_id);
            tracing::trace!(job_id, tick = ticks, ?state, "Poll tick");

            match (state, entry) {
                (state, Some(entry)) if state.is_terminal() => {
                    return Ok(self.finish(job_id, entry, state, ticks));
                }
                (JobState::Unknown, _) => {
                    return match self.settle(job_id).await? {
                        Some(entry) => {
                            let state = JobState::observe(Some(&entry), None, job_id);
                            Ok(self.finish(job_id, entry, state, ticks))
                        }
                        None => {
                            tracing::error!(
                                job_id,
                                rechecks = self.settings.settle_rechecks,
                                "Job left the queue without a result"
                            );
                            Err(BridgeError::InconsistentState {
                                job_id: job_id.to_string(),
                            })
                        }
                    };
                }
                _ => {}
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(self.time_out(job_id, started).await);
            }

            sleep_until((now + self.settings.poll_interval).min(deadline)).await;
        }
    }

    async fn time_out(&self, job_id: &str, started: Instant) -> BridgeError {
        let elapsed = started.elapsed();
        tracing::warn!(
            job_id,
            elapsed_secs = elapsed.as_secs_f64(),
            "Job timed out, interrupting"
        );
        self.engine.interrupt(job_id).await;
        BridgeError::Timeout {
            job_id: job_id.to_string(),
            elapsed,
        }
    }

    /// History entry for `job_id`, if it is terminal. Non-terminal entries
    /// count as absent.
    async fn fetch_terminal(&self, job_id: &str) -> Result<Option<HistoryEntry>> {
        let entry = self
            .engine
            .get_result(job_id)
            .await
            .map_err(|e| BridgeError::from_client(e, Some(job_id)))?;

        Ok(match entry {
            Some(entry) if entry.is_terminal() => Some(entry),
            Some(_) => {
                tracing::debug!(job_id, "History entry present but not terminal yet");
                None
            }
            None => None,
        })
    }

    /// The job is gone from the queue: one immediate re-fetch plus
    /// `settle_rechecks` delayed ones.
    async fn settle(&self, job_id: &str) -> Result<Option<HistoryEntry>> {
        for attempt in 0..=self.settings.settle_rechecks {
            if attempt > 0 {
                sleep(self.settings.settle_delay).await;
                tracing::debug!(job_id, attempt, "Re-checking history after queue exit");
            }
            if let Some(entry) = self.fetch_terminal(job_id).await? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    fn finish(
        &self,
        job_id: &str,
        entry: HistoryEntry,
        state: JobState,
        ticks: u32,
    ) -> FinishedJob {
        let status = match state {
            JobState::Failed => JobStatus::Error,
            _ => JobStatus::Success,
        };
        tracing::debug!(job_id, ticks, ?state, "Job reached terminal state");

        FinishedJob {
            job_id: job_id.to_string(),
            entry,
            status,
            ticks,
        }
    }
}
