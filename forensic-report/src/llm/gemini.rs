use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};
use tracing::{debug, info};

use super::{GenerationError, GenerationRequest, TextGenerator};

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-flash";
const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Gemini `generateContent` over REST.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl GeminiClient {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_API_BASE.to_string(),
        }
    }

    /// Client for image descriptions: `GEMINI_IMAGE_MODEL` when set,
    /// otherwise the text model.
    pub fn image_from_env() -> anyhow::Result<Self> {
        let client = Self::from_env()?;
        match std::env::var("GEMINI_IMAGE_MODEL") {
            Ok(model) if !model.trim().is_empty() => {
                info!("Using Gemini image model {}", model);
                Ok(client.with_model(model))
            }
            _ => Ok(client),
        }
    }

    /// Reads `GOOGLE_API_KEY` and, optionally, `GEMINI_MODEL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("GOOGLE_API_KEY")
            .map_err(|_| anyhow::anyhow!("GOOGLE_API_KEY environment variable not set"))?;
        let model =
            std::env::var("GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_GEMINI_MODEL.to_string());
        info!("Using Gemini model {}", model);
        Ok(Self::new(api_key, model))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            self.model
        )
    }
}

#[async_trait]
impl TextGenerator for GeminiClient {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        let payload = build_payload(request);
        debug!(
            "Sending {} parts and {} images to {}",
            request.parts().len(),
            request.images().len(),
            self.model
        );

        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .timeout(request.options.timeout)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GenerationError::Timeout(request.options.timeout)
                } else {
                    GenerationError::Other(format!("Gemini request failed: {e}"))
                }
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            if e.is_timeout() {
                GenerationError::Timeout(request.options.timeout)
            } else {
                GenerationError::Other(format!("Failed to read Gemini response: {e}"))
            }
        })?;

        if !status.is_success() {
            return Err(classify_http_error(status, &body));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| GenerationError::Other(format!("Invalid response format from Gemini: {e}")))?;
        parse_generate_response(&value)
    }
}

fn build_payload(request: &GenerationRequest) -> Value {
    let parts: Vec<Value> = request
        .images()
        .iter()
        .map(|image| {
            json!({
                "inline_data": {
                    "mime_type": image.mime_type,
                    "data": BASE64.encode(&image.data)
                }
            })
        })
        .chain(request.parts().iter().map(|text| json!({ "text": text })))
        .collect();

    json!({
        "contents": [
            {
                "role": "user",
                "parts": parts
            }
        ],
        "generationConfig": {
            "temperature": request.options.temperature,
            "maxOutputTokens": request.options.max_output_tokens
        }
    })
}

/// Map a non-2xx reply. The body is kept in rate-limit errors so the retry
/// hint (`retryDelay`) can be read from it.
fn classify_http_error(status: StatusCode, body: &str) -> GenerationError {
    let api_status = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["status"].as_str().map(str::to_string))
        .unwrap_or_default();

    if status == StatusCode::TOO_MANY_REQUESTS || api_status == "RESOURCE_EXHAUSTED" {
        GenerationError::RateLimited(format!("{status}: {body}"))
    } else {
        GenerationError::Other(format!("Gemini API request failed: {status}: {body}"))
    }
}

fn parse_generate_response(value: &Value) -> Result<String, GenerationError> {
    if let Some(reason) = value["promptFeedback"]["blockReason"].as_str() {
        return Err(GenerationError::Blocked(reason.to_string()));
    }

    let candidate = &value["candidates"][0];
    let finish_reason = candidate["finishReason"].as_str().unwrap_or("UNKNOWN");

    let text: String = candidate["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|part| part["text"].as_str())
                .collect::<Vec<_>>()
                .join("")
        })
        .unwrap_or_default();

    if !text.trim().is_empty() {
        return Ok(text);
    }

    match finish_reason {
        "SAFETY" | "PROHIBITED_CONTENT" | "BLOCKLIST" | "SPII" => {
            Err(GenerationError::Blocked(finish_reason.to_string()))
        }
        other => Err(GenerationError::EmptyResponse(other.to_string())),
    }
}
