use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::multipart::{Form, Part};
use tracing::debug;

use crate::error::AnalysisError;
use crate::export::{BatchExportRequest, ExportArtifact, ExportRequest};
use crate::options::AnalyzeOptions;
use crate::orchestrator::{AnalysisTransport, ByteStream, UploadFile};

const STREAM_PATH: &str = "/v1/papers/analyze/stream";
const EXPORT_PATH: &str = "/v1/papers/export/docx";
const BATCH_EXPORT_PATH: &str = "/v1/papers/export/batch-docx";

/// HTTP client for the analysis server.
pub struct AnalysisClient {
    client: reqwest::Client,
    server_url: String,
}

impl AnalysisClient {
    pub fn from_env() -> Result<Self> {
        let server_url = dotenv::var("PAPER_LENS_SERVER")
            .unwrap_or_else(|_| "http://localhost:8000".to_string());
        Self::new(server_url)
    }

    pub fn new(server_url: impl Into<String>) -> Result<Self> {
        // No total timeout: an analysis stream stays open for as long as the
        // model keeps writing. Only connecting is bounded.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(15))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            server_url: server_url.into(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server_url.trim_end_matches('/'), path)
    }

    /// Export one document; returns where to download the file.
    pub async fn export(&self, request: &ExportRequest) -> Result<ExportArtifact> {
        self.post_export(EXPORT_PATH, request).await
    }

    /// Export several documents into a single file.
    pub async fn export_batch(&self, request: &BatchExportRequest) -> Result<ExportArtifact> {
        self.post_export(BATCH_EXPORT_PATH, request).await
    }

    async fn post_export<T: serde::Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<ExportArtifact> {
        let resp = self
            .client
            .post(self.endpoint(path))
            .json(body)
            .send()
            .await
            .context("Export request failed")?;
        let status = resp.status();
        let text = resp.text().await.context("Failed to read export response")?;
        if !status.is_success() {
            anyhow::bail!("Export failed with status {}: {}", status, error_detail(&text));
        }
        let mut artifact: ExportArtifact =
            serde_json::from_str(&text).context("Failed to parse export response")?;
        if artifact.download_url.starts_with('/') {
            artifact.download_url = self.endpoint(&artifact.download_url);
        }
        Ok(artifact)
    }
}

#[async_trait]
impl AnalysisTransport for AnalysisClient {
    async fn open_stream(
        &self,
        file: &UploadFile,
        options: &AnalyzeOptions,
    ) -> Result<ByteStream, AnalysisError> {
        let options_json = serde_json::to_string(options)
            .map_err(|e| AnalysisError::Transport(format!("Failed to encode options: {}", e)))?;
        let form = Form::new()
            .text("options_json", options_json)
            .part(
                "file",
                Part::bytes(file.content.clone()).file_name(file.name.clone()),
            );

        let resp = self
            .client
            .post(self.endpoint(STREAM_PATH))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AnalysisError::Transport(format!("Analysis request failed: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AnalysisError::Status {
                status: status.as_u16(),
                body: error_detail(&body),
            });
        }
        debug!(file = %file.name, %status, "analysis stream opened");

        Ok(resp
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|e| AnalysisError::Transport(format!("Stream read failed: {}", e)))
            })
            .boxed())
    }
}

/// Pull `detail` out of a JSON error body; fall back to the raw text.
fn error_detail(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| match &v["detail"] {
            serde_json::Value::String(s) => Some(s.clone()),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        })
        .unwrap_or_else(|| body.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_detail() {
        assert_eq!(
            error_detail(r#"{"detail":"Only PDF files are supported."}"#),
            "Only PDF files are supported."
        );
        assert_eq!(error_detail("Bad Gateway"), "Bad Gateway");
        assert_eq!(error_detail(r#"{"error":"x"}"#), r#"{"error":"x"}"#);
        assert_eq!(
            error_detail(r#"{"detail":[{"msg":"field required"}]}"#),
            r#"[{"msg":"field required"}]"#
        );
    }

    #[test]
    fn test_endpoint() {
        let client = AnalysisClient::new("http://localhost:8000/").unwrap();
        assert_eq!(
            client.endpoint(STREAM_PATH),
            "http://localhost:8000/v1/papers/analyze/stream"
        );
    }
}
