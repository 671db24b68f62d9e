//! Google Gemini `generateContent` transport.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ExtractionService;
use crate::error::ServiceError;
use crate::models::config::ServiceConfig;

/// Extraction service backed by the Gemini REST API.
#[derive(Debug, Clone)]
pub struct GeminiService {
    http: reqwest::Client,
    url: String,
    api_key: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'static str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback", default)]
    prompt_feedback: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

impl GeminiService {
    /// Build a client from configuration. Requires an API key.
    pub fn from_config(config: &ServiceConfig) -> Result<Self, ServiceError> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| {
                ServiceError::NotConfigured("GEMINI_API_KEY (or GOOGLE_AI_API_KEY) is not set".into())
            })?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| ServiceError::NotConfigured(e.to_string()))?;

        Ok(Self {
            http,
            url: format!(
                "{}/v1beta/models/{}:generateContent",
                config.endpoint.trim_end_matches('/'),
                config.model
            ),
            api_key,
        })
    }
}

#[async_trait]
impl ExtractionService for GeminiService {
    async fn generate(&self, instruction: &str, text: &str) -> Result<String, ServiceError> {
        let body = GenerateRequest {
            contents: vec![Content {
                role: "user",
                parts: vec![Part { text: instruction }, Part { text }],
            }],
            generation_config: GenerationConfig { temperature: 0.0 },
        };

        let response = self
            .http
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let envelope: GenerateResponse = response.json().await?;
        candidate_text(envelope)
    }
}

/// Concatenated text parts of the first candidate.
fn candidate_text(envelope: GenerateResponse) -> Result<String, ServiceError> {
    let Some(candidate) = envelope.candidates.into_iter().next() else {
        let feedback = envelope
            .prompt_feedback
            .map(|f| f.to_string())
            .unwrap_or_else(|| "none".to_string());
        return Err(ServiceError::EmptyResponse(format!(
            "no candidates (prompt feedback: {})",
            feedback
        )));
    };

    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(ServiceError::EmptyResponse("candidate has no text".into()));
    }
    debug!("Service returned {} chars", text.len());
    Ok(text)
}
