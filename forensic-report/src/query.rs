use report_flow::Context;
use tracing::info;

use crate::error::{AnalysisError, BatchError};
use crate::llm::{GenerationOptions, GenerationRequest, TextGenerator};
use crate::models::{Batch, BatchResult};
use crate::retry::{RetryOutcome, RetryPolicy, generate_with_retry};

/// Request parts for one batch: every document text, then the instruction.
pub fn batch_request(batch: &Batch, prompt: &str, options: &GenerationOptions) -> GenerationRequest {
    let parts = batch
        .documents
        .iter()
        .map(|doc| doc.text.clone())
        .chain(std::iter::once(prompt.to_string()))
        .collect();
    GenerationRequest::new(parts, options.clone())
}

/// Query the model with one batch.
///
/// Model failures come back as [`BatchResult::Failed`]; only cancellation is
/// an error, since it aborts the whole analysis.
pub async fn query_batch(
    generator: &dyn TextGenerator,
    batch: &Batch,
    prompt: &str,
    options: &GenerationOptions,
    policy: &RetryPolicy,
    context: &Context,
) -> Result<BatchResult, AnalysisError> {
    if batch.is_empty() {
        return Ok(BatchResult::failed(BatchError::failed(
            "Empty batch provided for querying.",
        )));
    }

    let label = format!("batch {}", batch.number());
    let request = batch_request(batch, prompt, options);
    info!(
        "Querying {} with {} documents ({} parts)",
        label,
        batch.len(),
        request.parts().len()
    );

    let result = match generate_with_retry(generator, &request, policy, context, &label).await {
        RetryOutcome::Succeeded(text) => BatchResult::success(text),
        RetryOutcome::RateLimited { .. } => BatchResult::failed(BatchError::RateLimited),
        RetryOutcome::Blocked(reason) => BatchResult::failed(BatchError::Blocked { reason }),
        RetryOutcome::Failed(message) => BatchResult::failed(BatchError::Failed { message }),
        RetryOutcome::Cancelled => return Err(AnalysisError::Cancelled),
    };
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{GenerationError, scripted::ScriptedGenerator};
    use crate::models::DocumentContent;
    use report_flow::CancellationToken;
    use std::time::Duration;

    fn batch(texts: &[&str]) -> Batch {
        Batch {
            index: 1,
            documents: texts.iter().map(|t| DocumentContent::new(*t)).collect(),
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(5),
            max_retries: 3,
            heartbeat_interval: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn documents_precede_the_prompt() {
        let generator = ScriptedGenerator::always(Ok("analysis".into()));
        let result = query_batch(
            &generator,
            &batch(&["doc a", "", "doc b"]),
            "Extract findings",
            &GenerationOptions::default(),
            &policy(),
            &Context::new(),
        )
        .await
        .unwrap();

        assert_eq!(result, BatchResult::success("analysis"));
        let requests = generator.requests();
        assert_eq!(requests[0].parts(), ["doc a", "doc b", "Extract findings"]);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_rate_limit_becomes_a_batch_error() {
        let generator = ScriptedGenerator::always(Err(GenerationError::RateLimited("429".into())));
        let result = query_batch(
            &generator,
            &batch(&["doc"]),
            "prompt",
            &GenerationOptions::default(),
            &policy(),
            &Context::new(),
        )
        .await
        .unwrap();

        assert_eq!(result, BatchResult::failed(BatchError::RateLimited));
        assert_eq!(generator.calls(), 4);
        assert_eq!(
            result.error().map(ToString::to_string).as_deref(),
            Some("Rate limit exceeded after maximum retries.")
        );
    }

    #[tokio::test]
    async fn block_is_distinct_from_failure() {
        let generator = ScriptedGenerator::always(Err(GenerationError::Blocked("SAFETY".into())));
        let result = query_batch(
            &generator,
            &batch(&["doc"]),
            "prompt",
            &GenerationOptions::default(),
            &policy(),
            &Context::new(),
        )
        .await
        .unwrap();
        assert_eq!(
            result,
            BatchResult::failed(BatchError::Blocked {
                reason: "SAFETY".into()
            })
        );
    }

    #[tokio::test]
    async fn empty_batch_never_reaches_the_model() {
        let generator = ScriptedGenerator::always(Ok("unused".into()));
        let result = query_batch(
            &generator,
            &batch(&[]),
            "prompt",
            &GenerationOptions::default(),
            &policy(),
            &Context::new(),
        )
        .await
        .unwrap();
        assert!(!result.is_success());
        assert_eq!(generator.calls(), 0);
    }

    #[tokio::test]
    async fn cancellation_is_an_error() {
        let token = CancellationToken::new();
        token.cancel();
        let generator = ScriptedGenerator::always(Ok("unused".into()));
        let err = query_batch(
            &generator,
            &batch(&["doc"]),
            "prompt",
            &GenerationOptions::default(),
            &policy(),
            &Context::new().with_cancellation(token),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AnalysisError::Cancelled));
        assert_eq!(generator.calls(), 0);
    }
}
