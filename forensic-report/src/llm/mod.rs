//! Text generation backends.
//!
//! The analysis core only sees [`TextGenerator`]. Requests are a list of text
//! parts (the batch documents followed by the instruction), optional inline
//! images, and generation options; backends decide how to lay those parts out
//! on the wire.

pub mod gemini;
pub mod openrouter;
pub mod scripted;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

use crate::retry::is_rate_limit_message;

pub use gemini::GeminiClient;
pub use openrouter::OpenRouterGenerator;

pub const DEFAULT_TEMPERATURE: f32 = 0.2;
pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 8192;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOptions {
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

impl Default for GenerationOptions {
    fn default() -> Self {
        Self {
            temperature: DEFAULT_TEMPERATURE,
            max_output_tokens: DEFAULT_MAX_OUTPUT_TOKENS,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Raw image bytes sent inline ahead of the text parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagePart {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl ImagePart {
    pub fn new(mime_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    parts: Vec<String>,
    #[serde(default)]
    images: Vec<ImagePart>,
    pub options: GenerationOptions,
}

impl GenerationRequest {
    pub fn new(parts: Vec<String>, options: GenerationOptions) -> Self {
        Self {
            parts: normalize_parts(parts),
            images: Vec::new(),
            options,
        }
    }

    pub fn with_image(mut self, image: ImagePart) -> Self {
        self.images.push(image);
        self
    }

    pub fn images(&self) -> &[ImagePart] {
        &self.images
    }

    pub fn single(text: impl Into<String>, options: GenerationOptions) -> Self {
        Self::new(vec![text.into()], options)
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }

    /// All parts as one prompt, for backends that take a single message.
    pub fn joined(&self) -> String {
        self.parts.join("\n\n")
    }
}

/// Coerce parts into clean text units: NUL characters removed, surrounding
/// whitespace trimmed, empty parts dropped.
pub fn normalize_parts(parts: Vec<String>) -> Vec<String> {
    let total = parts.len();
    let normalized: Vec<String> = parts
        .into_iter()
        .map(|part| {
            let cleaned = if part.contains('\0') {
                part.replace('\0', "")
            } else {
                part
            };
            let trimmed = cleaned.trim();
            if trimmed.len() == cleaned.len() {
                cleaned
            } else {
                trimmed.to_string()
            }
        })
        .filter(|part| !part.is_empty())
        .collect();

    if normalized.len() < total {
        warn!(
            "Dropped {} empty request parts out of {}",
            total - normalized.len(),
            total
        );
    }
    normalized
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Content blocked by safety filters: {0}")]
    Blocked(String),

    #[error("Model returned no text (finish reason: {0})")]
    EmptyResponse(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("{0}")]
    Other(String),
}

impl GenerationError {
    /// Errors worth retrying after a backoff.
    pub fn is_rate_limit(&self) -> bool {
        match self {
            GenerationError::RateLimited(_) => true,
            GenerationError::Other(message) => is_rate_limit_message(message),
            _ => false,
        }
    }
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Short backend name for logs.
    fn name(&self) -> &str;

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_are_normalized() {
        let parts = normalize_parts(vec![
            "  first  ".into(),
            "".into(),
            "sec\0ond".into(),
            " \n\t".into(),
            "third".into(),
        ]);
        assert_eq!(parts, vec!["first", "second", "third"]);
    }

    #[test]
    fn joined_prompt_separates_parts() {
        let request = GenerationRequest::new(
            vec!["doc a".into(), "doc b".into(), "prompt".into()],
            GenerationOptions::default(),
        );
        assert_eq!(request.joined(), "doc a\n\ndoc b\n\nprompt");
    }

    #[test]
    fn only_throttling_is_retryable() {
        assert!(GenerationError::RateLimited("x".into()).is_rate_limit());
        assert!(GenerationError::Other("HTTP 429".into()).is_rate_limit());
        assert!(!GenerationError::Other("bad request".into()).is_rate_limit());
        assert!(!GenerationError::Blocked("quota".into()).is_rate_limit());
        assert!(!GenerationError::Timeout(Duration::from_secs(1)).is_rate_limit());
    }
}
