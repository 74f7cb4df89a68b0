//! Forensic descriptions of case photographs.
//!
//! Images have no text of their own, so each one is sent to the model with a
//! fixed instruction and the description stands in for the image during batch
//! analysis. Rate limits get the same backoff as batch queries.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use report_flow::Context;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::AnalyzerConfig;
use crate::documents::{ExtractError, FileTextExtractor, TextExtractor};
use crate::error::AnalysisError;
use crate::llm::{GenerationOptions, GenerationRequest, ImagePart, TextGenerator};
use crate::models::DocumentContent;
use crate::retry::{RetryOutcome, RetryPolicy, generate_with_retry};

pub const IMAGE_PROMPT: &str = "Act as an expert in Forensic Engineering with decades of experience in analyzing complex incidents, conducting site inspections, and generating detailed engineering reports.\n\nDo not include any introductory or explanatory text about your role or what you are doing. Begin directly with the description of the image, Do not invent information.";

/// Documents first, then images.
pub const DOCUMENT_AND_IMAGE_EXTENSIONS: &[&str] = &["pdf", "docx", "txt", "jpg", "jpeg", "png"];

pub fn image_mime_type(extension: &str) -> Option<&'static str> {
    match extension.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("image/jpeg"),
        "png" => Some("image/png"),
        _ => None,
    }
}

pub struct ImageDescriber {
    generator: Arc<dyn TextGenerator>,
    options: GenerationOptions,
    policy: RetryPolicy,
}

impl ImageDescriber {
    pub fn new(generator: Arc<dyn TextGenerator>, config: &AnalyzerConfig) -> Self {
        Self {
            generator,
            options: config.generation.clone(),
            policy: config.retry_policy(),
        }
    }

    pub async fn describe(
        &self,
        image: ImagePart,
        context: &Context,
    ) -> Result<String, AnalysisError> {
        if image.data.is_empty() {
            return Err(AnalysisError::InvalidImage("image has no data".to_string()));
        }

        info!(
            "Describing {} image ({} bytes)",
            image.mime_type,
            image.data.len()
        );
        let request = GenerationRequest::single(IMAGE_PROMPT, self.options.clone()).with_image(image);
        match generate_with_retry(
            self.generator.as_ref(),
            &request,
            &self.policy,
            context,
            "image description",
        )
        .await
        {
            RetryOutcome::Succeeded(text) => Ok(text),
            RetryOutcome::RateLimited { .. } => Err(AnalysisError::RateLimited),
            RetryOutcome::Blocked(reason) => Err(AnalysisError::Blocked(reason)),
            RetryOutcome::Failed(message) => Err(AnalysisError::ImageDescription(message)),
            RetryOutcome::Cancelled => Err(AnalysisError::Cancelled),
        }
    }

    /// Describe a base64-encoded JPEG, as uploaded by clients.
    pub async fn describe_base64(
        &self,
        encoded: &str,
        context: &Context,
    ) -> Result<String, AnalysisError> {
        let data = BASE64
            .decode(encoded.trim())
            .map_err(|e| AnalysisError::InvalidImage(e.to_string()))?;
        self.describe(ImagePart::new("image/jpeg", data), context).await
    }
}

/// [`FileTextExtractor`] plus model descriptions for image files.
pub struct ImageAwareExtractor {
    files: FileTextExtractor,
    describer: ImageDescriber,
    context: Context,
}

impl ImageAwareExtractor {
    /// `context` supplies cancellation and heartbeats for the description calls.
    pub fn new(describer: ImageDescriber, context: Context) -> Self {
        Self {
            files: FileTextExtractor,
            describer,
            context,
        }
    }
}

#[async_trait]
impl TextExtractor for ImageAwareExtractor {
    fn extensions(&self) -> &'static [&'static str] {
        DOCUMENT_AND_IMAGE_EXTENSIONS
    }

    async fn extract(&self, path: &Path) -> Result<Option<DocumentContent>, ExtractError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        let Some(mime_type) = image_mime_type(extension) else {
            return self.files.extract(path).await;
        };

        let display = path.display().to_string();
        let data = tokio::fs::read(path).await.map_err(|source| ExtractError::Io {
            path: display.clone(),
            source,
        })?;
        let description = self
            .describer
            .describe(ImagePart::new(mime_type, data), &self.context)
            .await
            .map_err(|e| ExtractError::Image {
                path: display.clone(),
                reason: e.to_string(),
            })?;
        if description.trim().is_empty() {
            warn!("Empty description for {}", path.display());
            return Ok(None);
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or(display);
        Ok(Some(
            DocumentContent::new(format!("Photograph {name}:\n{}", description.trim()))
                .with_source(name),
        ))
    }
}
