//! Image generation backends.
//!
//! Defines the [`ImageGenerator`] trait and the Gemini implementation.
//! A generator makes exactly one service call per [`ImageGenerator::generate`];
//! retries and pacing live in the coordinator so that every backend gets
//! the same policy.
//!
//! # Error mapping
//!
//! | Response                                   | Error                |
//! |--------------------------------------------|----------------------|
//! | HTTP 429                                   | `RateLimited`        |
//! | HTTP 408, client timeout                   | `Timeout`            |
//! | HTTP 5xx, connection failure, no image     | `ServiceUnavailable` |
//! | HTTP 401/403, invalid API key              | `Unauthorized`       |
//! | other 4xx, blocked prompt, safety stop     | `InvalidPrompt`      |

use anyhow::{bail, Result};
use async_trait::async_trait;
use base64::Engine;
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::config::{Credentials, GeneratorConfig};
use crate::error::GenerateError;
use crate::models::{GeneratedImage, GenerationRequest};

/// Finish reasons that mean the model refused the prompt.
const SAFETY_FINISH_REASONS: [&str; 4] = ["SAFETY", "PROHIBITED_CONTENT", "IMAGE_SAFETY", "BLOCKLIST"];

#[async_trait]
pub trait ImageGenerator: Send + Sync {
    /// Model identifier, for logging.
    fn model_name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerateError>;
}

/// Google Gemini image generation over the `generateContent` REST API.
pub struct GeminiGenerator {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiGenerator {
    pub fn new(config: &GeneratorConfig, api_key: &str) -> Result<Self> {
        if api_key.trim().is_empty() {
            bail!("GEMINI_API_KEY is empty");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: api_key.to_string(),
        })
    }

    fn url(&self) -> String {
        format!("{}/models/{}:generateContent", self.endpoint, self.model)
    }
}

#[async_trait]
impl ImageGenerator for GeminiGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedImage, GenerateError> {
        debug!(model = %self.model, chars = request.prompt.chars().count(), "requesting image");

        let response = self
            .client
            .post(self.url())
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body(request))
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let body = response.text().await.map_err(classify_transport)?;
        if !status.is_success() {
            return Err(classify_status(status, &body));
        }

        let json: Value = serde_json::from_str(&body).map_err(|e| GenerateError::ServiceUnavailable {
            detail: format!("invalid JSON response: {}", e),
        })?;
        parse_gemini_response(&json)
    }
}

fn request_body(request: &GenerationRequest) -> Value {
    let mut generation_config = json!({ "responseModalities": ["TEXT", "IMAGE"] });
    if let Some(size) = &request.size {
        generation_config["imageConfig"] = json!({ "aspectRatio": size });
    }
    json!({
        "contents": [{ "role": "user", "parts": [{ "text": request.prompt }] }],
        "generationConfig": generation_config,
    })
}

/// Extract the first inline image from a `generateContent` response.
pub fn parse_gemini_response(json: &Value) -> Result<GeneratedImage, GenerateError> {
    if let Some(reason) = json
        .pointer("/promptFeedback/blockReason")
        .and_then(|v| v.as_str())
    {
        return Err(GenerateError::InvalidPrompt {
            detail: format!("prompt blocked: {}", reason),
        });
    }

    let candidates = json
        .get("candidates")
        .and_then(|v| v.as_array())
        .map(Vec::as_slice)
        .unwrap_or_default();

    for candidate in candidates {
        let parts = candidate
            .pointer("/content/parts")
            .and_then(|v| v.as_array())
            .map(Vec::as_slice)
            .unwrap_or_default();
        for part in parts {
            let Some(inline) = part.get("inlineData").or_else(|| part.get("inline_data")) else {
                continue;
            };
            let Some(data) = inline.get("data").and_then(|v| v.as_str()) else {
                continue;
            };
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(|v| v.as_str())
                .unwrap_or("image/png")
                .to_string();
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| GenerateError::ServiceUnavailable {
                    detail: format!("undecodable image data: {}", e),
                })?;
            if bytes.is_empty() {
                continue;
            }
            return Ok(GeneratedImage { bytes, mime_type });
        }
    }

    let finish_reason = candidates
        .iter()
        .filter_map(|c| c.get("finishReason").and_then(|v| v.as_str()))
        .find(|r| SAFETY_FINISH_REASONS.contains(r));
    match finish_reason {
        Some(reason) => Err(GenerateError::InvalidPrompt {
            detail: format!("generation stopped: {}", reason),
        }),
        None => Err(GenerateError::ServiceUnavailable {
            detail: "response contained no image".to_string(),
        }),
    }
}

pub fn classify_status(status: StatusCode, body: &str) -> GenerateError {
    let detail = format!("HTTP {}: {}", status.as_u16(), excerpt(body));
    let invalid_key = body.contains("API_KEY_INVALID") || body.contains("API key not valid");
    match status.as_u16() {
        429 => GenerateError::RateLimited { detail },
        408 => GenerateError::Timeout { detail },
        401 | 403 => GenerateError::Unauthorized { detail },
        _ if invalid_key => GenerateError::Unauthorized { detail },
        s if s >= 500 => GenerateError::ServiceUnavailable { detail },
        _ => GenerateError::InvalidPrompt { detail },
    }
}

pub fn classify_transport(error: reqwest::Error) -> GenerateError {
    let detail = error.to_string();
    if error.is_timeout() {
        GenerateError::Timeout { detail }
    } else {
        GenerateError::ServiceUnavailable { detail }
    }
}

/// First 300 characters of a response body, for error details.
pub(crate) fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    match trimmed.char_indices().nth(300) {
        Some((i, _)) => format!("{}...", &trimmed[..i]),
        None => trimmed.to_string(),
    }
}

/// Create the configured generator.
pub fn create_generator(
    config: &GeneratorConfig,
    credentials: &Credentials,
) -> Result<Arc<dyn ImageGenerator>> {
    match config.provider.as_str() {
        "gemini" => Ok(Arc::new(GeminiGenerator::new(
            config,
            &credentials.gemini_api_key,
        )?)),
        other => bail!("Unknown generator provider: {}", other),
    }
}
