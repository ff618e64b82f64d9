//! Start-point inference client
//!
//! Sends the container's table of contents and text statistics to a
//! chat-completions endpoint and turns the model's JSON answer into a
//! validated [`StartPointResult`]. Model output is untrusted input: the
//! answer must name a manifest file and carry a numeric confidence, and a
//! malformed answer earns exactly one retry before the request fails.
//! Transport failures are never retried here; they surface as
//! [`Error::DependencyUnavailable`] for the caller to map.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::models::{ContainerManifest, SampledToc, StartPointResult};
use crate::services::epub::normalize_zip_path;
use undrm_common::{Error, Result};

const SYSTEM_PROMPT: &str = "You are an ebook structure analyst. Given a book's table of \
    contents and per-file character counts, identify where the narrative content begins, \
    skipping covers, title pages, copyright notices, dedications, forewords and other \
    front matter. Respond with a single JSON object: {\"file\": \"<href from the input>\", \
    \"anchor\": \"<fragment or null>\", \"confidence\": <number 0..1>, \
    \"rationale\": \"<one sentence>\"}.";

const TASK_DESCRIPTION: &str = "Identify the file (and optional anchor) where the book's \
    narrative content starts.";

/// Chat-completions client configuration
#[derive(Debug, Clone)]
pub struct InferenceSettings {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Client for the start-point inference endpoint
pub struct InferenceClient {
    client: reqwest::Client,
    settings: InferenceSettings,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    response_format: serde_json::Value,
    temperature: f64,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// The model's raw answer, before any validation
#[derive(Debug, Deserialize)]
struct RawCandidate {
    file: Option<String>,
    anchor: Option<String>,
    /// Kept loose: models occasionally emit a string here
    confidence: Option<serde_json::Value>,
    rationale: Option<String>,
}

impl InferenceClient {
    pub fn new(settings: InferenceSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| Error::Internal(format!("HTTP client init failed: {}", e)))?;
        Ok(Self { client, settings })
    }

    /// Ask the model for the start point. A malformed answer is retried
    /// once with the same prompt; a second malformed answer fails the
    /// request with [`Error::Inference`].
    pub async fn detect_start_point(
        &self,
        manifest: &ContainerManifest,
        sampled: &SampledToc,
    ) -> Result<StartPointResult> {
        let prompt = self.build_prompt(manifest, sampled);

        let mut last_rejection = String::new();
        for attempt in 1..=2u32 {
            let content = self.request_completion(&prompt).await?;
            match validate_candidate(&content, manifest) {
                Ok(result) => {
                    tracing::info!(
                        start_file = %result.start_file,
                        confidence = result.confidence,
                        attempt,
                        "Start point inferred"
                    );
                    return Ok(result);
                }
                Err(reason) => {
                    tracing::warn!(attempt, %reason, "Malformed inference answer");
                    last_rejection = reason;
                }
            }
        }

        Err(Error::Inference(format!(
            "Model returned malformed output twice: {}",
            last_rejection
        )))
    }

    fn build_prompt(&self, manifest: &ContainerManifest, sampled: &SampledToc) -> String {
        let chars_by_path: std::collections::HashMap<&str, usize> = manifest
            .text_stats
            .iter()
            .map(|stat| (stat.path.as_str(), stat.chars))
            .collect();

        let toc_with_stats: Vec<serde_json::Value> = sampled
            .entries
            .iter()
            .map(|entry| {
                json!({
                    "order": entry.order,
                    "label": entry.label,
                    "file": entry.href,
                    "anchor": entry.anchor,
                    "chars": chars_by_path.get(entry.href.as_str()),
                })
            })
            .collect();

        let file_stats: Vec<serde_json::Value> = manifest
            .text_stats
            .iter()
            .map(|stat| json!({ "path": stat.path, "chars": stat.chars }))
            .collect();

        json!({
            "task_description": TASK_DESCRIPTION,
            "table_of_contents_with_stats": toc_with_stats,
            "file_stats": file_stats,
        })
        .to_string()
    }

    async fn request_completion(&self, prompt: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.settings.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: prompt,
                },
            ],
            response_format: json!({ "type": "json_object" }),
            temperature: 0.0,
        };

        let url = format!(
            "{}/v1/chat/completions",
            self.settings.base_url.trim_end_matches('/')
        );
        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.settings.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            Error::DependencyUnavailable(format!("Inference endpoint unreachable: {}", e))
        })?;

        let status = response.status();
        if status.is_server_error() || status.as_u16() == 429 {
            return Err(Error::DependencyUnavailable(format!(
                "Inference endpoint returned {}",
                status
            )));
        }
        if !status.is_success() {
            return Err(Error::Inference(format!(
                "Inference endpoint rejected the request: {}",
                status
            )));
        }

        let parsed: ChatResponse = response.json().await.map_err(|e| {
            Error::DependencyUnavailable(format!("Inference response unreadable: {}", e))
        })?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or_else(|| Error::Inference("Inference response contained no choices".to_string()))
    }
}

/// Validate one raw answer against the manifest. `Err` carries the
/// rejection reason and means the answer may be retried.
fn validate_candidate(
    content: &str,
    manifest: &ContainerManifest,
) -> std::result::Result<StartPointResult, String> {
    let raw: RawCandidate = serde_json::from_str(content)
        .map_err(|e| format!("answer is not a JSON object: {}", e))?;

    let file = raw
        .file
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .ok_or_else(|| "answer names no file".to_string())?;

    let confidence = raw
        .confidence
        .as_ref()
        .and_then(|v| v.as_f64())
        .ok_or_else(|| "confidence is missing or not numeric".to_string())?;
    // Out-of-range values are clamped, not rejected
    let confidence = confidence.clamp(0.0, 1.0);

    let mut rationale = raw.rationale.unwrap_or_default();
    let start_file = match resolve_answer_file(file, manifest) {
        FileMatch::Exact(href) => href,
        FileMatch::Fuzzy(href) => {
            if !rationale.is_empty() {
                rationale.push(' ');
            }
            rationale.push_str(&format!(
                "(answer '{}' matched manifest entry '{}')",
                file, href
            ));
            href
        }
        FileMatch::None => {
            return Err(format!("answer file '{}' is not in the manifest", file));
        }
    };

    let anchor = raw
        .anchor
        .as_deref()
        .map(|a| a.trim_start_matches('#').trim().to_string())
        .filter(|a| !a.is_empty());

    Ok(StartPointResult {
        start_file,
        anchor,
        confidence,
        rationale,
    })
}

enum FileMatch {
    Exact(String),
    Fuzzy(String),
    None,
}

/// Match the model's file against the manifest: exact href first, then
/// normalized path, then unique basename
fn resolve_answer_file(answer: &str, manifest: &ContainerManifest) -> FileMatch {
    if let Some(item) = manifest.items.iter().find(|item| item.href == answer) {
        return FileMatch::Exact(item.href.clone());
    }

    let normalized = normalize_zip_path(answer);
    if let Some(item) = manifest.items.iter().find(|item| item.href == normalized) {
        return FileMatch::Fuzzy(item.href.clone());
    }

    let basename = normalized.rsplit('/').next().unwrap_or(&normalized);
    if !basename.is_empty() {
        let mut matches = manifest
            .items
            .iter()
            .filter(|item| item.href.rsplit('/').next() == Some(basename));
        if let (Some(item), None) = (matches.next(), matches.next()) {
            return FileMatch::Fuzzy(item.href.clone());
        }
    }

    FileMatch::None
}
