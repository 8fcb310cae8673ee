//! Result assembly — history outputs to envelope entries.
//!
//! ComfyUI stores per-node outputs as `{"9": {"images": [{filename, subfolder,
//! type}, ...]}}`. Only artifact-like kinds are carried into the envelope;
//! anything else a node emits (text, latent previews, ...) is left out.

use base64::engine::general_purpose::STANDARD as BASE64_ENGINE;
use base64::Engine as _;
use serde_json::Value;

use crate::client::{ArtifactRef, ClientError, HistoryEntry, JobEngine};
use crate::envelope::{NodeErrors, NodeOutputs, OutputArtifact};

/// Node output keys whose entries are downloadable artifacts.
pub const RECOGNIZED_OUTPUT_KINDS: &[&str] = &["images", "gifs", "audio"];

/// Key used for execution errors the engine did not attribute to a node.
pub const UNATTRIBUTED_NODE: &str = "_execution";

/// How artifacts are handed back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactMode {
    /// Storage descriptor plus view URL. No extra engine calls.
    #[default]
    Reference,
    /// Bytes fetched from the engine and base64-encoded.
    Inline,
}

impl ArtifactMode {
    pub fn from_flag(inline: bool) -> Self {
        if inline {
            ArtifactMode::Inline
        } else {
            ArtifactMode::Reference
        }
    }
}

pub struct ResultAssembler<'a, E: JobEngine + ?Sized> {
    engine: &'a E,
}

impl<'a, E: JobEngine + ?Sized> ResultAssembler<'a, E> {
    pub fn new(engine: &'a E) -> Self {
        Self { engine }
    }

    /// Collect artifacts per node. Nodes without recognized artifacts are
    /// omitted; malformed entries are skipped with a warning.
    ///
    /// In `Inline` mode a failed download is returned as an error rather than
    /// silently dropping the artifact.
    pub async fn assemble(
        &self,
        entry: &HistoryEntry,
        mode: ArtifactMode,
    ) -> Result<NodeOutputs, ClientError> {
        let mut outputs = NodeOutputs::new();
        let Some(nodes) = entry.outputs() else {
            return Ok(outputs);
        };

        for (node_id, node_output) in nodes {
            let refs = artifact_refs(node_id, node_output);
            if refs.is_empty() {
                continue;
            }

            let mut artifacts = Vec::with_capacity(refs.len());
            for artifact in refs {
                artifacts.push(self.render(artifact, mode).await?);
            }
            outputs.insert(node_id.clone(), artifacts);
        }

        Ok(outputs)
    }

    async fn render(
        &self,
        artifact: ArtifactRef,
        mode: ArtifactMode,
    ) -> Result<OutputArtifact, ClientError> {
        let (url, data) = match mode {
            ArtifactMode::Reference => (self.engine.artifact_url(&artifact), None),
            ArtifactMode::Inline => {
                let bytes = self.engine.fetch_artifact(&artifact).await?;
                (None, Some(BASE64_ENGINE.encode(bytes)))
            }
        };

        Ok(OutputArtifact {
            filename: artifact.filename,
            subfolder: artifact.subfolder,
            kind: artifact.kind,
            url,
            data,
        })
    }
}

fn artifact_refs(node_id: &str, node_output: &Value) -> Vec<ArtifactRef> {
    let Some(node_output) = node_output.as_object() else {
        tracing::warn!(node_id, "Skipping node output that is not an object");
        return Vec::new();
    };

    let mut refs = Vec::new();
    for kind in RECOGNIZED_OUTPUT_KINDS {
        let Some(list) = node_output.get(*kind) else {
            continue;
        };
        let Some(items) = list.as_array() else {
            tracing::warn!(node_id, kind, "Skipping artifact list that is not an array");
            continue;
        };
        for item in items {
            match ArtifactRef::from_value(item) {
                Some(artifact) => refs.push(artifact),
                None => {
                    tracing::warn!(node_id, kind, item = %item, "Skipping malformed artifact entry")
                }
            }
        }
    }
    refs
}

/// Node errors for a job the engine marked as failed.
///
/// Uses the `execution_error` status message when present; otherwise reports
/// a generic failure under `_execution`, so a failed envelope never has an
/// empty error map.
pub fn execution_errors(entry: &HistoryEntry) -> NodeErrors {
    let mut errors = NodeErrors::new();

    let Some(detail) = entry.execution_error() else {
        errors.insert(
            UNATTRIBUTED_NODE.to_string(),
            vec!["execution failed without an error report".to_string()],
        );
        return errors;
    };

    let message = detail
        .get("exception_message")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .unwrap_or("execution failed");
    let message = match detail.get("node_type").and_then(Value::as_str) {
        Some(node_type) => format!("{node_type}: {message}"),
        None => message.to_string(),
    };

    let node_id = match detail.get("node_id") {
        Some(Value::String(id)) => id.clone(),
        Some(Value::Number(id)) => id.to_string(),
        _ => UNATTRIBUTED_NODE.to_string(),
    };
    errors.insert(node_id, vec![message]);
    errors
}
