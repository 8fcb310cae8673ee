//! ComfyUI HTTP client.
//!
//! One `reqwest::Client` per process: the connection pool inside it is shared
//! by every concurrent wait, so steady throughput does not pay connection
//! setup per call. Every request carries the configured per-call timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde_json::{json, Value};
use tokio::time::sleep;
use url::Url;

use super::types::{describe_error, flatten_node_errors, ArtifactRef, HistoryEntry, SubmitReceipt};
use super::{ClientError, JobEngine};
use crate::config::BridgeConfig;

/// Base delay between read retries; attempt `n` waits `n` times this.
const READ_RETRY_BACKOFF_MS: u64 = 200;

/// Pooled client for a single ComfyUI engine.
#[derive(Clone)]
pub struct HttpEngineClient {
    http: Client,
    base_url: String,
    address: String,
    client_id: String,
    read_retries: u32,
}

impl HttpEngineClient {
    pub fn new(config: &BridgeConfig) -> Result<Self, ClientError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;

        Ok(Self {
            http,
            base_url: config.engine_base_url(),
            address: config.engine_address(),
            client_id: uuid::Uuid::new_v4().to_string(),
            read_retries: config.read_retries,
        })
    }

    /// Use a fixed client id instead of the generated one.
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = client_id.into();
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// GET with retries on transport failures. Only used for idempotent reads.
    async fn get_with_retries(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<Response, ClientError> {
        let url = self.url(path);
        let mut attempt = 0;

        loop {
            match self.http.get(&url).query(query).send().await {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.read_retries => {
                    attempt += 1;
                    tracing::debug!(
                        path,
                        attempt,
                        error = %e,
                        "Engine read failed, retrying"
                    );
                    sleep(Duration::from_millis(READ_RETRY_BACKOFF_MS * attempt as u64)).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn read_json(response: Response, what: &str) -> Result<Value, ClientError> {
        let status = response.status();
        if !status.is_success() {
            return Err(http_error(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::Malformed(format!("{what}: {e}")))
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<Response, ClientError> {
        Ok(self.http.post(self.url(path)).json(body).send().await?)
    }
}

#[async_trait]
impl JobEngine for HttpEngineClient {
    async fn submit(
        &self,
        payload: &Value,
        client_id: Option<&str>,
    ) -> Result<SubmitReceipt, ClientError> {
        let body = json!({
            "prompt": payload,
            "client_id": client_id.unwrap_or(&self.client_id),
        });
        let response = self.post_json("/prompt", &body).await?;

        if response.status() == StatusCode::BAD_REQUEST {
            let body = response.text().await.unwrap_or_default();
            return Err(rejection_from_body(&body));
        }

        let body = Self::read_json(response, "submit response").await?;
        SubmitReceipt::from_value(body)
    }

    async fn queue_raw(&self) -> Result<Value, ClientError> {
        let response = self.get_with_retries("/queue", &[]).await?;
        Self::read_json(response, "queue response").await
    }

    async fn history_raw(&self) -> Result<Value, ClientError> {
        let response = self.get_with_retries("/history", &[]).await?;
        Self::read_json(response, "history response").await
    }

    async fn get_result(&self, job_id: &str) -> Result<Option<HistoryEntry>, ClientError> {
        let response = self
            .get_with_retries(&format!("/history/{job_id}"), &[])
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let mut body = Self::read_json(response, "history response").await?;
        Ok(body
            .as_object_mut()
            .and_then(|history| history.remove(job_id))
            .map(HistoryEntry))
    }

    async fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, ClientError> {
        let mut query = vec![
            ("filename", artifact.filename.as_str()),
            ("type", artifact.kind.as_str()),
        ];
        if !artifact.subfolder.is_empty() {
            query.push(("subfolder", artifact.subfolder.as_str()));
        }

        let response = self.get_with_retries("/view", &query).await?;
        if !response.status().is_success() {
            return Err(http_error(response).await);
        }
        Ok(response.bytes().await?.to_vec())
    }

    async fn interrupt(&self, job_id: &str) {
        // Stop it if it is executing, then drop it if it is still pending.
        let calls = [
            ("/interrupt", json!({ "prompt_id": job_id })),
            ("/queue", json!({ "delete": [job_id] })),
        ];

        for (path, body) in calls {
            match self.post_json(path, &body).await {
                Ok(response) if response.status().is_success() => {}
                Ok(response) => tracing::warn!(
                    job_id,
                    path,
                    status = %response.status(),
                    "Interrupt request rejected by engine"
                ),
                Err(e) => tracing::warn!(job_id, path, error = %e, "Interrupt request failed"),
            }
        }
    }

    fn artifact_url(&self, artifact: &ArtifactRef) -> Option<String> {
        let mut params = vec![
            ("filename", artifact.filename.as_str()),
            ("type", artifact.kind.as_str()),
        ];
        if !artifact.subfolder.is_empty() {
            params.push(("subfolder", artifact.subfolder.as_str()));
        }
        Url::parse_with_params(&self.url("/view"), &params)
            .map(String::from)
            .ok()
    }

    fn address(&self) -> String {
        self.address.clone()
    }
}

async fn http_error(response: Response) -> ClientError {
    let status = response.status().as_u16();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Failed to read response text".to_string());
    ClientError::Http {
        status,
        body: body.chars().take(500).collect(),
    }
}

/// Build a `Rejected` error from a 400 submit body:
/// `{"error": {"message", "details"}, "node_errors": {...}}`.
fn rejection_from_body(body: &str) -> ClientError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);

    let message = match parsed.get("error") {
        Some(Value::String(message)) => message.clone(),
        Some(error) => describe_error(error).unwrap_or_else(|| error.to_string()),
        None if body.is_empty() => "prompt rejected".to_string(),
        None => body.chars().take(500).collect(),
    };
    let node_errors = parsed
        .get("node_errors")
        .map(flatten_node_errors)
        .unwrap_or_default();

    ClientError::Rejected {
        message,
        node_errors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> HttpEngineClient {
        let mut config = BridgeConfig::default();
        config.engine_host = "10.1.2.3".into();
        config.engine_port = 8190;
        HttpEngineClient::new(&config).unwrap()
    }

    #[test]
    fn test_artifact_url_without_subfolder() {
        let url = client()
            .artifact_url(&ArtifactRef {
                filename: "ComfyUI_00001_.png".into(),
                subfolder: String::new(),
                kind: "output".into(),
            })
            .unwrap();
        assert_eq!(
            url,
            "http://10.1.2.3:8190/view?filename=ComfyUI_00001_.png&type=output"
        );
    }

    #[test]
    fn test_artifact_url_encodes_subfolder() {
        let url = client()
            .artifact_url(&ArtifactRef {
                filename: "a b.png".into(),
                subfolder: "runs/2024 q1".into(),
                kind: "temp".into(),
            })
            .unwrap();
        assert_eq!(
            url,
            "http://10.1.2.3:8190/view?filename=a+b.png&type=temp&subfolder=runs%2F2024+q1"
        );
    }

    #[test]
    fn test_rejection_from_structured_body() {
        let body = r#"{
            "error": {
                "type": "prompt_outputs_failed_validation",
                "message": "Prompt outputs failed validation",
                "details": ""
            },
            "node_errors": {
                "4": {"errors": [{"message": "Value not in list", "details": "ckpt_name"}]}
            }
        }"#;
        match rejection_from_body(body) {
            ClientError::Rejected {
                message,
                node_errors,
            } => {
                assert_eq!(message, "Prompt outputs failed validation");
                assert_eq!(node_errors["4"], vec!["Value not in list: ckpt_name"]);
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_rejection_from_plain_body() {
        match rejection_from_body("invalid prompt") {
            ClientError::Rejected {
                message,
                node_errors,
            } => {
                assert_eq!(message, "invalid prompt");
                assert!(node_errors.is_empty());
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[test]
    fn test_client_id_override() {
        let client = client().with_client_id("fixed");
        assert_eq!(client.client_id(), "fixed");
        assert_eq!(client.address(), "10.1.2.3:8190");
    }
}
