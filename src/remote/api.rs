//! HTTP client for the generation server's REST endpoints.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{PhotovarError, Result};

/// Response from `POST /prompt` after a workflow is queued.
#[derive(Debug, Deserialize)]
struct SubmitResponse {
    prompt_id: String,
}

/// Client for a single generation server instance.
#[derive(Debug, Clone)]
pub struct ComfyClient {
    client: reqwest::Client,
    base_url: String,
}

impl ComfyClient {
    /// Create a client for `base_url`, e.g. `http://host:8188`.
    #[must_use]
    pub fn new<S: Into<String>>(base_url: S) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_owned();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Base HTTP URL this client talks to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Liveness probe via `GET /system_stats`. Any transport failure or
    /// non-2xx status counts as "not alive".
    pub async fn is_alive(&self) -> bool {
        match self
            .client
            .get(format!("{}/system_stats", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                tracing::debug!(error = %e, "liveness probe failed");
                false
            }
        }
    }

    /// True once the server can see a staged input file, checked via
    /// `GET /view?filename=...&subfolder=...&type=input`.
    pub async fn input_visible(&self, filename: &str, subfolder: &str) -> bool {
        let result = self
            .client
            .get(format!("{}/view", self.base_url))
            .query(&[
                ("filename", filename),
                ("subfolder", subfolder),
                ("type", "input"),
            ])
            .send()
            .await;
        matches!(result, Ok(response) if response.status().is_success())
    }

    /// Queue a patched workflow via `POST /prompt`. Returns the
    /// server-assigned job id.
    ///
    /// # Errors
    /// [`PhotovarError::Network`] on transport failure, a non-2xx status, or
    /// an unparseable response body.
    pub async fn submit(&self, payload: &Value, client_id: &str) -> Result<String> {
        let body = serde_json::json!({
            "prompt": payload,
            "client_id": client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| PhotovarError::network(format!("submit request failed: {e}")))?;

        let response = Self::ensure_success(response).await?;
        let parsed: SubmitResponse = response
            .json()
            .await
            .map_err(|e| PhotovarError::network(format!("invalid submit response: {e}")))?;
        Ok(parsed.prompt_id)
    }

    /// Fetch execution history for one job via `GET /history/{id}`. The
    /// entry is empty until the job has finished.
    ///
    /// # Errors
    /// [`PhotovarError::Network`] on transport failure or a non-2xx status.
    pub async fn history(&self, job_id: &str) -> Result<Value> {
        let response = self
            .client
            .get(format!("{}/history/{job_id}", self.base_url))
            .send()
            .await
            .map_err(|e| PhotovarError::network(format!("history request failed: {e}")))?;

        let response = Self::ensure_success(response).await?;
        response
            .json()
            .await
            .map_err(|e| PhotovarError::network(format!("invalid history response: {e}")))
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(PhotovarError::network(format!(
            "server returned {status}: {body}"
        )))
    }
}

/// Pull the output image filenames for `job_id` out of a `/history`
/// response: every `images[]` entry with `type == "output"` across all
/// nodes. Empty when the job has not produced outputs yet.
#[must_use]
pub fn extract_output_filenames(history: &Value, job_id: &str) -> Vec<String> {
    let Some(outputs) = history
        .get(job_id)
        .and_then(|entry| entry.get("outputs"))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    let mut filenames = Vec::new();
    for node_output in outputs.values() {
        let Some(images) = node_output.get("images").and_then(Value::as_array) else {
            continue;
        };
        for img in images {
            let is_output = img.get("type").and_then(Value::as_str) == Some("output");
            if !is_output {
                continue;
            }
            if let Some(name) = img.get("filename").and_then(Value::as_str) {
                filenames.push(name.to_owned());
            }
        }
    }
    filenames
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn base_url_is_normalized() {
        let client = ComfyClient::new("http://host:8188/");
        assert_eq!(client.base_url(), "http://host:8188");
    }

    #[test]
    fn extracts_only_output_type_images() {
        let history = json!({
            "job-1": {
                "outputs": {
                    "9": {
                        "images": [
                            {"filename": "final_00001_.png", "subfolder": "comfy_api_output", "type": "output"},
                            {"filename": "preview.png", "subfolder": "", "type": "temp"}
                        ]
                    }
                }
            }
        });
        assert_eq!(
            extract_output_filenames(&history, "job-1"),
            vec!["final_00001_.png".to_owned()]
        );
    }

    #[test]
    fn missing_job_yields_no_filenames() {
        let history = json!({});
        assert!(extract_output_filenames(&history, "job-1").is_empty());
    }

    #[test]
    fn pending_job_with_empty_outputs_yields_nothing() {
        let history = json!({"job-1": {"outputs": {}}});
        assert!(extract_output_filenames(&history, "job-1").is_empty());
    }
}
