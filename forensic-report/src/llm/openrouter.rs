use async_trait::async_trait;
use rig::{client::CompletionClient, completion::Prompt, providers::openrouter};
use tracing::{debug, info};

use super::{GenerationError, GenerationRequest, TextGenerator};
use crate::retry::is_rate_limit_message;

pub const DEFAULT_OPENROUTER_MODEL: &str = "google/gemini-2.5-flash";

const ANALYST_PREAMBLE: &str = "You are a forensic analyst preparing sections of an expert report. \
Work only from the case documents you are given and follow the formatting instructions exactly.";

/// OpenRouter chat model driven through a `rig` agent.
pub struct OpenRouterGenerator {
    client: openrouter::Client,
    model: String,
}

impl OpenRouterGenerator {
    pub fn new(api_key: &str, model: impl Into<String>) -> Self {
        Self {
            client: openrouter::Client::new(api_key),
            model: model.into(),
        }
    }

    /// Reads `OPENROUTER_API_KEY` and, optionally, `OPENROUTER_MODEL`.
    pub fn from_env() -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENROUTER_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENROUTER_API_KEY not set"))?;
        let model = std::env::var("OPENROUTER_MODEL")
            .unwrap_or_else(|_| DEFAULT_OPENROUTER_MODEL.to_string());
        info!("Using OpenRouter model {}", model);
        Ok(Self::new(&api_key, model))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl TextGenerator for OpenRouterGenerator {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, request: &GenerationRequest) -> Result<String, GenerationError> {
        if !request.images().is_empty() {
            return Err(GenerationError::Other(format!(
                "{} is configured for text only; image input is not supported",
                self.model
            )));
        }

        let agent = self
            .client
            .agent(&self.model)
            .preamble(ANALYST_PREAMBLE)
            .temperature(f64::from(request.options.temperature))
            .max_tokens(u64::from(request.options.max_output_tokens))
            .build();

        let prompt = request.joined();
        debug!("Prompting {} with {} characters", self.model, prompt.len());

        let response = tokio::time::timeout(request.options.timeout, agent.prompt(prompt.as_str()))
            .await
            .map_err(|_| GenerationError::Timeout(request.options.timeout))?
            .map_err(|e| classify_error(&e.to_string()))?;

        Ok(response)
    }
}

fn classify_error(message: &str) -> GenerationError {
    let lower = message.to_lowercase();
    if is_rate_limit_message(message) {
        GenerationError::RateLimited(message.to_string())
    } else if lower.contains("content_filter") || lower.contains("safety") {
        GenerationError::Blocked(message.to_string())
    } else {
        GenerationError::Other(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_errors_are_classified_by_message() {
        assert!(matches!(
            classify_error("ProviderError: 429 rate limit exceeded"),
            GenerationError::RateLimited(_)
        ));
        assert!(matches!(
            classify_error("finish_reason: content_filter"),
            GenerationError::Blocked(_)
        ));
        assert!(matches!(
            classify_error("connection reset"),
            GenerationError::Other(_)
        ));
    }
}
