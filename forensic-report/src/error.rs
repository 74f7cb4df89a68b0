use report_flow::FlowError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;

/// Why a single batch produced no analysis. Absorbed into synthesis.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchError {
    #[error("Rate limit exceeded after maximum retries.")]
    RateLimited,

    #[error("Content blocked by the model: {reason}")]
    Blocked { reason: String },

    #[error("{message}")]
    Failed { message: String },
}

impl BatchError {
    pub fn failed(message: impl Into<String>) -> Self {
        BatchError::Failed {
            message: message.into(),
        }
    }
}

/// Terminal failures of a section analysis.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("No documents found or processed successfully for this case.")]
    NoDocuments,

    #[error("No prompts configured.")]
    MissingPrompts,

    #[error("Rate limit exceeded after maximum retries.")]
    RateLimited,

    #[error("Could not create unified analysis due to persistent API rate limits.")]
    SynthesisRateLimited,

    #[error("Content blocked by the model: {0}")]
    Blocked(String),

    #[error("Synthesis failed: {0}")]
    Synthesis(String),

    #[error("Invalid image data: {0}")]
    InvalidImage(String),

    #[error("Error generating image description: {0}")]
    ImageDescription(String),

    #[error("Failed to stage case documents: {0}")]
    Staging(#[from] std::io::Error),

    #[error("Analysis cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Workflow error: {0}")]
    Workflow(String),
}

impl AnalysisError {
    /// Whether the failure was caused by upstream rate limiting (HTTP 429 upstream).
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            AnalysisError::RateLimited | AnalysisError::SynthesisRateLimited
        )
    }
}

impl From<AnalysisError> for FlowError {
    fn from(error: AnalysisError) -> Self {
        match error {
            AnalysisError::Cancelled => FlowError::Cancelled,
            other => FlowError::Task(anyhow::Error::new(other)),
        }
    }
}

impl From<FlowError> for AnalysisError {
    fn from(error: FlowError) -> Self {
        match error {
            FlowError::Cancelled => AnalysisError::Cancelled,
            FlowError::Task(inner) => inner
                .downcast::<AnalysisError>()
                .unwrap_or_else(|other| AnalysisError::Workflow(other.to_string())),
            other => AnalysisError::Workflow(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn analysis_error_survives_a_trip_through_the_workflow_error() {
        let flow: FlowError = AnalysisError::Synthesis("500".into()).into();
        let back: AnalysisError = flow.into();
        assert!(matches!(back, AnalysisError::Synthesis(ref m) if m == "500"));

        let flow: FlowError = AnalysisError::Cancelled.into();
        assert!(matches!(flow, FlowError::Cancelled));
        assert!(matches!(AnalysisError::from(flow), AnalysisError::Cancelled));
    }

    #[test]
    fn foreign_workflow_errors_keep_their_message() {
        let back: AnalysisError = FlowError::ContextError("batches not found".into()).into();
        match back {
            AnalysisError::Workflow(message) => assert!(message.contains("batches not found")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn rate_limit_messages_match_the_legacy_markers() {
        assert_eq!(
            BatchError::RateLimited.to_string(),
            "Rate limit exceeded after maximum retries."
        );
        assert_eq!(
            AnalysisError::SynthesisRateLimited.to_string(),
            "Could not create unified analysis due to persistent API rate limits."
        );
        assert!(AnalysisError::RateLimited.is_rate_limited());
        assert!(!AnalysisError::NoDocuments.is_rate_limited());
    }
}
