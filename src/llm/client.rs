use crate::config::PollPolicy;
use crate::error::{BillMonitorError, Result};
use crate::llm::types::*;
use log::{debug, info};
use reqwest::Client;
use serde_json::json;
use std::path::Path;
use tokio::fs;
use tokio::time::sleep;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const GEMINI_UPLOAD_URL: &str = "https://generativelanguage.googleapis.com/upload/v1beta/files";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PollStep {
    Ready,
    Wait,
}

/// Decides what to do after `checks` state lookups have returned `state`.
pub(crate) fn next_poll_step(
    name: &str,
    state: &str,
    checks: u32,
    policy: &PollPolicy,
) -> Result<PollStep> {
    if state == STATE_ACTIVE {
        return Ok(PollStep::Ready);
    }
    if state != STATE_PROCESSING {
        return Err(BillMonitorError::ProcessingFailed {
            name: name.to_string(),
            state: state.to_string(),
        });
    }
    if checks >= policy.max_attempts {
        return Err(BillMonitorError::ProcessingTimeout {
            name: name.to_string(),
            attempts: checks,
        });
    }
    Ok(PollStep::Wait)
}

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    base_url: String,
    upload_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            upload_url: GEMINI_UPLOAD_URL.to_string(),
        }
    }

    /// Uploads a local file with the resumable protocol. The returned document may still be
    /// processing; see [`GeminiClient::wait_until_active`].
    pub async fn upload_document(&self, path: &Path) -> Result<RemoteDocument> {
        let file_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BillMonitorError::ExtractionFailed("Invalid file name".to_string())
            })?;

        let file_size = fs::metadata(path).await?.len();
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .to_string();
        let file_bytes = fs::read(path).await?;

        let start_url = format!("{}?key={}", self.upload_url, self.api_key);
        let metadata = json!({ "file": { "display_name": file_name } });

        let init_res = self
            .client
            .post(&start_url)
            .header("X-Goog-Upload-Protocol", "resumable")
            .header("X-Goog-Upload-Command", "start")
            .header("X-Goog-Upload-Header-Content-Length", file_size.to_string())
            .header("X-Goog-Upload-Header-Content-Type", &mime_type)
            .header("Content-Type", "application/json")
            .json(&metadata)
            .send()
            .await?;

        let init_status = init_res.status();
        if !init_status.is_success() {
            let error_text = init_res.text().await?;
            return Err(BillMonitorError::ExtractionFailed(format!(
                "Upload init failed (status {}): {}",
                init_status, error_text
            )));
        }

        let upload_url = init_res
            .headers()
            .get("x-goog-upload-url")
            .ok_or_else(|| {
                BillMonitorError::ExtractionFailed("No upload URL in headers".to_string())
            })?
            .to_str()
            .map_err(|e| BillMonitorError::ExtractionFailed(e.to_string()))?
            .to_string();

        let upload_res = self
            .client
            .post(&upload_url)
            .header("Content-Length", file_size.to_string())
            .header("X-Goog-Upload-Offset", "0")
            .header("X-Goog-Upload-Command", "upload, finalize")
            .body(file_bytes)
            .send()
            .await?;

        let upload_status = upload_res.status();
        if !upload_status.is_success() {
            let error_text = upload_res.text().await?;
            return Err(BillMonitorError::ExtractionFailed(format!(
                "File upload failed (status {}): {}",
                upload_status, error_text
            )));
        }

        let uploaded: UploadResponse = upload_res.json().await?;
        let file = uploaded.file;
        let uri = file.uri.ok_or_else(|| {
            BillMonitorError::ExtractionFailed("Upload response missing uri".to_string())
        })?;

        info!("Uploaded file '{}' as: {}", file_name, uri);

        Ok(RemoteDocument {
            uri,
            name: file.name,
            display_name: file_name.to_string(),
            mime_type: file.mime_type.unwrap_or(mime_type),
            state: file.state.unwrap_or_else(|| STATE_PROCESSING.to_string()),
        })
    }

    /// Current processing state of an uploaded file.
    pub async fn document_state(&self, name: &str) -> Result<String> {
        let check_url = format!("{}/{}?key={}", self.base_url, name, self.api_key);
        let check_res = self.client.get(&check_url).send().await?;
        let status = check_res.status();

        if !status.is_success() {
            let error_text = check_res.text().await?;
            return Err(BillMonitorError::ExtractionFailed(format!(
                "File status check failed (status {}): {}",
                status, error_text
            )));
        }

        let file: FileResource = check_res.json().await?;
        Ok(file
            .state
            .unwrap_or_else(|| STATE_PROCESSING.to_string()))
    }

    /// Polls until the document is active, it reaches any other terminal state, or the policy's
    /// checks run out.
    pub async fn wait_until_active(
        &self,
        document: RemoteDocument,
        policy: PollPolicy,
    ) -> Result<RemoteDocument> {
        let mut state = document.state.clone();
        let mut checks = 0;

        while next_poll_step(&document.name, &state, checks, &policy)? == PollStep::Wait {
            sleep(policy.interval).await;
            state = self.document_state(&document.name).await?;
            checks += 1;
        }

        debug!("File {} is active after {} checks", document.name, checks);
        Ok(RemoteDocument { state, ..document })
    }

    /// Runs a JSON-mode `generateContent` call and returns the first text part.
    pub async fn generate_content(&self, model: &str, contents: Vec<Content>) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model, self.api_key
        );

        let payload = GenerateContentRequest {
            contents,
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let res = self.client.post(&url).json(&payload).send().await?;
        let status = res.status();

        if !status.is_success() {
            let err_text = res.text().await?;
            return Err(BillMonitorError::ExtractionFailed(format!(
                "Gemini API Error (status {}): {}",
                status, err_text
            )));
        }

        let body: GenerateContentResponse = res.json().await?;

        let candidate = body
            .candidates
            .ok_or_else(|| {
                BillMonitorError::ExtractionFailed("No candidates returned".to_string())
            })?
            .into_iter()
            .next()
            .ok_or_else(|| {
                BillMonitorError::ExtractionFailed("Empty candidates list".to_string())
            })?;

        let finish_reason = candidate.finish_reason.unwrap_or_default();
        candidate
            .content
            .and_then(|content| content.parts.into_iter().find_map(|part| part.text))
            .ok_or_else(|| {
                BillMonitorError::ExtractionFailed(format!(
                    "Model returned no text content (finish reason: {})",
                    finish_reason
                ))
            })
    }
}
