//! Gemini-backed decomposition oracle using structured JSON output.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::types::{DecompositionOracle, DecompositionResult, Effort, OracleError, ProposedItem};
use crate::validate::sanitize_items;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.0-flash";

const SYSTEM_INSTRUCTION: &str = "You are a software planning assistant. Break the given task \
into independently mergeable subtasks, each small enough for a single pull request. Respond \
with JSON only, matching the provided schema. Titles use conventional-commit form \
(type(scope): description).";

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_base: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout_ms: u64,
    pub max_retries: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            request_timeout_ms: 60_000,
            max_retries: 2,
            retry_base_delay_ms: 500,
        }
    }
}

#[derive(Clone)]
pub struct GeminiOracle {
    http: reqwest::Client,
    config: GeminiConfig,
}

impl GeminiOracle {
    pub fn new(config: GeminiConfig) -> Result<Self, OracleError> {
        if config.api_key.trim().is_empty() {
            return Err(OracleError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms.max(1)))
            .build()
            .map_err(|error| OracleError::Unavailable(error.to_string()))?;
        Ok(Self { http, config })
    }

    fn generate_content_url(&self) -> String {
        let base = self.config.api_base.trim_end_matches('/');
        format!("{base}/models/{}:generateContent", self.config.model)
    }

    async fn request_candidate_text(&self, body: &Value) -> Result<String, OracleError> {
        let url = self.generate_content_url();
        let max_retries = self.config.max_retries;
        for attempt in 0..=max_retries {
            let response = self
                .http
                .post(&url)
                .query(&[("key", self.config.api_key.as_str())])
                .json(body)
                .send()
                .await;
            match response {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let parsed = response
                            .json::<GenerateContentResponse>()
                            .await
                            .map_err(|error| {
                                OracleError::MalformedOutput(format!(
                                    "failed to decode oracle response: {error}"
                                ))
                            })?;
                        return parsed.candidate_text();
                    }
                    let retryable = status.as_u16() == 429 || status.as_u16() >= 500;
                    let body_text = response.text().await.unwrap_or_default();
                    if attempt < max_retries && retryable {
                        let delay = backoff_delay(self.config.retry_base_delay_ms, attempt);
                        debug!(
                            status = status.as_u16(),
                            attempt,
                            delay_ms = delay.as_millis() as u64,
                            "retrying oracle request"
                        );
                        tokio::time::sleep(delay).await;
                        continue;
                    }
                    return Err(OracleError::Unavailable(format!(
                        "oracle returned status {}: {}",
                        status.as_u16(),
                        truncate(&body_text, 400)
                    )));
                }
                Err(error) => {
                    let retryable = error.is_timeout() || error.is_connect() || error.is_request();
                    if attempt < max_retries && retryable {
                        warn!(attempt, %error, "oracle transport error, retrying");
                        tokio::time::sleep(backoff_delay(
                            self.config.retry_base_delay_ms,
                            attempt,
                        ))
                        .await;
                        continue;
                    }
                    return Err(OracleError::Unavailable(error.to_string()));
                }
            }
        }
        Err(OracleError::Unavailable(
            "oracle retry loop terminated unexpectedly".to_string(),
        ))
    }
}

#[async_trait]
impl DecompositionOracle for GeminiOracle {
    async fn decompose(
        &self,
        description: &str,
        repo_context: &str,
        max_items: usize,
    ) -> Result<DecompositionResult, OracleError> {
        let body = build_decompose_body(description, repo_context, max_items);
        let text = self.request_candidate_text(&body).await?;
        let parsed: SubtaskListWire = serde_json::from_str(text.trim()).map_err(|error| {
            OracleError::MalformedOutput(format!("oracle output is not the expected shape: {error}"))
        })?;
        let items = parsed
            .subtasks
            .into_iter()
            .map(SubtaskWire::into_item)
            .collect::<Vec<_>>();
        Ok(DecompositionResult {
            items: sanitize_items(items, max_items),
        })
    }
}

fn build_decompose_body(description: &str, repo_context: &str, max_items: usize) -> Value {
    let prompt = format!(
        "Task:\n{description}\n\nRepository context:\n{repo_context}\n\n\
Produce at most {max_items} subtasks."
    );
    json!({
        "systemInstruction": {
            "parts": [{ "text": SYSTEM_INSTRUCTION }],
        },
        "contents": [{
            "role": "user",
            "parts": [{ "text": prompt }],
        }],
        "generationConfig": {
            "responseMimeType": "application/json",
            "responseSchema": {
                "type": "OBJECT",
                "properties": {
                    "subtasks": {
                        "type": "ARRAY",
                        "items": {
                            "type": "OBJECT",
                            "properties": {
                                "title": { "type": "STRING" },
                                "description": { "type": "STRING" },
                                "estimated_effort": {
                                    "type": "STRING",
                                    "enum": ["S", "M", "L"],
                                },
                            },
                            "required": ["title", "description"],
                        },
                    },
                },
                "required": ["subtasks"],
            },
        },
    })
}

fn backoff_delay(base_delay_ms: u64, attempt: usize) -> Duration {
    let shift = attempt.min(6) as u32;
    Duration::from_millis(base_delay_ms.max(1).saturating_mul(1_u64 << shift))
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out = text.chars().take(max_chars).collect::<String>();
    out.push_str("...");
    out
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

impl GenerateContentResponse {
    fn candidate_text(self) -> Result<String, OracleError> {
        let text = self
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content)
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .filter_map(|part| part.text)
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(OracleError::MalformedOutput(
                "oracle returned no candidate text".to_string(),
            ));
        }
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct SubtaskListWire {
    subtasks: Vec<SubtaskWire>,
}

#[derive(Debug, Deserialize)]
struct SubtaskWire {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    estimated_effort: Option<Effort>,
}

impl SubtaskWire {
    fn into_item(self) -> ProposedItem {
        ProposedItem {
            title: self.title,
            body: self.description,
            effort: self.estimated_effort,
        }
    }
}
