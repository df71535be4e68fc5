use async_trait::async_trait;
use chrono::Local;
use log::{info, warn};
use serde_json::error::Category;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::{MonitorConfig, PollPolicy};
use crate::error::{BillMonitorError, Result};
use crate::llm::client::GeminiClient;
use crate::llm::prompts::bill_extraction_prompt;
use crate::llm::types::Content;
use crate::schema::{BillExtraction, BillRecord};
use crate::store::BillStore;
use crate::utils::TIMESTAMP_FORMAT;

/// Turns one bill PDF into its extracted fields.
#[async_trait]
pub trait BillSource {
    async fn extract_bill(&self, path: &Path) -> Result<BillExtraction>;
}

/// Uploads the PDF to Gemini, waits for it to be processed and asks for the bill fields.
pub struct GeminiBillSource {
    client: GeminiClient,
    model: String,
    poll: PollPolicy,
    prompt: String,
}

impl GeminiBillSource {
    pub fn new(client: GeminiClient, model: impl Into<String>) -> Result<Self> {
        Ok(Self {
            client,
            model: model.into(),
            poll: PollPolicy::default(),
            prompt: bill_extraction_prompt()?,
        })
    }

    pub fn from_config(config: &MonitorConfig) -> Result<Self> {
        let client = GeminiClient::new(config.require_api_key()?);
        Ok(Self::new(client, config.model.clone())?.with_poll_policy(config.poll))
    }

    pub fn with_poll_policy(mut self, poll: PollPolicy) -> Self {
        self.poll = poll;
        self
    }

    /// Replace the built-in extraction prompt (e.g. for another utility's bill layout).
    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = prompt.into();
        self
    }
}

#[async_trait]
impl BillSource for GeminiBillSource {
    async fn extract_bill(&self, path: &Path) -> Result<BillExtraction> {
        let uploaded = self.client.upload_document(path).await?;

        info!("Waiting for file processing...");
        let document = self.client.wait_until_active(uploaded, self.poll).await?;

        info!("Sending prompt to Gemini...");
        let raw = self
            .client
            .generate_content(
                &self.model,
                vec![Content::user_with_file(self.prompt.clone(), &document)],
            )
            .await?;

        info!("Response received.");
        parse_extraction(&raw)
    }
}

fn clean_json_output(raw: &str) -> &str {
    let trimmed = raw.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"));
    unfenced.unwrap_or(trimmed).trim()
}

/// Parses the model's answer, accepting either a bare object or a one-element array of objects.
pub fn parse_extraction(raw: &str) -> Result<BillExtraction> {
    let value: serde_json::Value = serde_json::from_str(clean_json_output(raw)).map_err(|e| {
        BillMonitorError::ExtractionFailed(format!("Response is not valid JSON: {}", e))
    })?;

    let object = match value {
        serde_json::Value::Array(items) => items.into_iter().next().ok_or_else(|| {
            BillMonitorError::ExtractionFailed("Response is an empty array".to_string())
        })?,
        other => other,
    };

    if !object.is_object() {
        return Err(BillMonitorError::ExtractionFailed(format!(
            "Expected a JSON object, got: {}",
            object
        )));
    }

    Ok(serde_json::from_value(object)?)
}

/// Incrementally extracts new bill PDFs into the bill history store.
pub struct BillExtractor<S> {
    source: S,
    store: BillStore,
    item_delay: Duration,
}

impl<S: BillSource> BillExtractor<S> {
    pub fn new(source: S, store: BillStore) -> Self {
        Self {
            source,
            store,
            item_delay: Duration::from_secs(2),
        }
    }

    pub fn with_item_delay(mut self, delay: Duration) -> Self {
        self.item_delay = delay;
        self
    }

    /// Loads the history to append to. A file that is not JSON at all is logged and replaced by
    /// an empty history; a readable file that does not decode as bills is an error, so that
    /// saving never overwrites records this version cannot represent.
    fn load_history(&self) -> Result<Vec<BillRecord>> {
        match self.store.load() {
            Ok(history) => Ok(history.unwrap_or_default()),
            Err(BillMonitorError::SerializationError(e))
                if matches!(e.classify(), Category::Syntax | Category::Eof) =>
            {
                warn!("Error reading history file ({}). Starting fresh.", e);
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    /// Extracts every PDF in `dir` whose file name is not in the history yet and returns how
    /// many bills were added. A failing file is logged and skipped; the history is saved after
    /// each successful one.
    pub async fn process_directory(&self, dir: &Path) -> Result<usize> {
        if !dir.is_dir() {
            warn!("Directory '{}' not found.", dir.display());
            return Ok(0);
        }

        let mut history = self.load_history()?;
        let mut processed: HashSet<String> = history
            .iter()
            .filter(|bill| !bill.source_file.is_empty())
            .map(|bill| bill.source_file.clone())
            .collect();

        let pdf_files = list_pdfs(dir)?;
        if pdf_files.is_empty() {
            info!("No PDF files found in '{}'.", dir.display());
            return Ok(0);
        }
        info!("Found {} PDF files.", pdf_files.len());

        let mut new_count = 0;
        for path in pdf_files {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                warn!("Skipping file with a non UTF-8 name: {}", path.display());
                continue;
            };
            if processed.contains(file_name) {
                continue;
            }

            info!("Processing '{}'...", file_name);
            match self.source.extract_bill(&path).await {
                Ok(extraction) => {
                    let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
                    history.push(BillRecord::new(extraction, file_name, timestamp));
                    processed.insert(file_name.to_string());
                    new_count += 1;

                    self.store.save(&history)?;
                    info!("Successfully processed '{}'", file_name);

                    if !self.item_delay.is_zero() {
                        sleep(self.item_delay).await;
                    }
                }
                Err(e) => warn!("Failed to process '{}': {}", file_name, e),
            }
        }

        info!("Processing complete. {} new bills added.", new_count);
        info!("Total entries in history: {}", history.len());
        Ok(new_count)
    }
}

fn list_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|ext| ext.to_str())
                    .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        })
        .collect();
    paths.sort();
    Ok(paths)
}
