//! # comfy-bridge
//!
//! Turns the ComfyUI asynchronous prompt API (submit, poll the queue, fetch
//! history) into a single blocking call: submit a workflow and wait until it
//! finishes or the deadline passes.
//!
//! ## Layout
//!
//! - `client`: typed operations against the remote engine (`JobEngine` trait
//!   plus the pooled `reqwest` implementation)
//! - `poller`: the completion wait loop for one job
//! - `assembler`: turns raw history outputs into envelope entries
//! - `bridge`: the public `submit_and_wait` / `health` entry points
//! - `envelope`: response types returned to callers
//! - `error`: the outward-facing error taxonomy
//! - `config`: explicit configuration (CLI flags and environment)
//! - `api` (feature `server`): axum routes over the bridge
//!
//! ## Example
//!
//! ```ignore
//! use comfy_bridge::{BridgeConfig, HttpEngineClient, SyncBridge};
//!
//! let config = BridgeConfig::default();
//! let client = HttpEngineClient::new(&config)?;
//! let bridge = SyncBridge::new(client, config);
//! let envelope = bridge.submit_and_wait(workflow, false, None).await?;
//! ```

pub mod assembler;
pub mod bridge;
pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod poller;

#[cfg(feature = "server")]
pub mod api;

pub use assembler::ArtifactMode;
pub use bridge::{PromptAck, SubmitOptions, SyncBridge};
pub use client::http::HttpEngineClient;
pub use client::{ClientError, JobEngine};
pub use config::BridgeConfig;
pub use envelope::{HealthReport, JobStatus, OutputArtifact, ResultEnvelope};
pub use error::{BridgeError, Result};
