use serde::{Deserialize, Serialize};

use crate::error::BatchError;

/// Text extracted from one source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentContent {
    pub text: String,
    /// File name the text came from, when known. Only used for logging.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl DocumentContent {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// A contiguous run of documents sent to the model in a single request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Zero-based position of the batch in the run.
    pub index: usize,
    pub documents: Vec<DocumentContent>,
}

impl Batch {
    /// One-based number used in logs and synthesis markers.
    pub fn number(&self) -> usize {
        self.index + 1
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// Outcome of querying the model with one batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchResult {
    Success { text: String },
    Failed { error: BatchError },
}

impl BatchResult {
    pub fn success(text: impl Into<String>) -> Self {
        BatchResult::Success { text: text.into() }
    }

    pub fn failed(error: BatchError) -> Self {
        BatchResult::Failed { error }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, BatchResult::Success { .. })
    }

    pub fn error(&self) -> Option<&BatchError> {
        match self {
            BatchResult::Success { .. } => None,
            BatchResult::Failed { error } => Some(error),
        }
    }
}

/// A narrative split into its findings and background parts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SplitResult {
    pub findings: String,
    pub background: String,
}

impl SplitResult {
    pub fn new(findings: impl Into<String>, background: impl Into<String>) -> Self {
        Self {
            findings: findings.into(),
            background: background.into(),
        }
    }
}

/// What to analyze.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub case_id: String,
    pub section: String,
    pub case_type: Option<String>,
}

impl AnalysisRequest {
    pub fn new(case_id: impl Into<String>, section: impl Into<String>) -> Self {
        Self {
            case_id: case_id.into(),
            section: section.into(),
            case_type: None,
        }
    }

    pub fn with_case_type(mut self, case_type: impl Into<String>) -> Self {
        let case_type = case_type.into();
        self.case_type = (!case_type.trim().is_empty()).then_some(case_type);
        self
    }
}

/// Final result of analyzing one report section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionReport {
    pub case_id: String,
    pub section: String,
    /// Unified narrative before splitting. Empty for bypassed or degraded sections.
    pub narrative: String,
    pub findings: String,
    pub background: String,
    pub batches: usize,
    pub failed_batches: usize,
    /// The section is not analyzed by the model at all.
    pub bypassed: bool,
    /// Analysis failed and the section policy substituted an empty report.
    pub degraded: bool,
}

impl SectionReport {
    pub fn bypassed(request: &AnalysisRequest) -> Self {
        Self {
            case_id: request.case_id.clone(),
            section: request.section.clone(),
            bypassed: true,
            ..Default::default()
        }
    }

    pub fn degraded(request: &AnalysisRequest) -> Self {
        Self {
            case_id: request.case_id.clone(),
            section: request.section.clone(),
            degraded: true,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_result_serializes_with_status_tag() {
        let ok = serde_json::to_value(BatchResult::success("text")).unwrap();
        assert_eq!(ok["status"], "success");
        assert_eq!(ok["text"], "text");

        let failed = serde_json::to_value(BatchResult::failed(BatchError::RateLimited)).unwrap();
        assert_eq!(failed["status"], "failed");
        assert_eq!(failed["error"]["kind"], "rate_limited");

        let back: BatchResult = serde_json::from_value(failed).unwrap();
        assert_eq!(back.error(), Some(&BatchError::RateLimited));
    }

    #[test]
    fn blank_case_type_is_dropped() {
        let request = AnalysisRequest::new("c1", "Findings").with_case_type("  ");
        assert_eq!(request.case_type, None);
        let request = AnalysisRequest::new("c1", "Findings").with_case_type("slip_and_fall");
        assert_eq!(request.case_type.as_deref(), Some("slip_and_fall"));
    }
}
