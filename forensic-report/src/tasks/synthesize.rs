use async_trait::async_trait;
use report_flow::{Context, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::warn;

use super::{PROGRESS_SYNTHESIS_DONE, PROGRESS_SYNTHESIS_STARTED, batch_results, session_keys};
use crate::llm::{GenerationOptions, TextGenerator};
use crate::retry::RetryPolicy;
use crate::synthesis::synthesize;

/// Merges the batch results into one narrative.
pub struct SynthesizeTask {
    generator: Arc<dyn TextGenerator>,
    options: GenerationOptions,
    policy: RetryPolicy,
}

impl SynthesizeTask {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        options: GenerationOptions,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            generator,
            options,
            policy,
        }
    }
}

#[async_trait]
impl Task for SynthesizeTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let section: String = context.require(session_keys::SECTION)?;
        let results = batch_results(&context);
        let failed = results.iter().filter(|r| !r.is_success()).count();
        if failed > 0 && failed == results.len() {
            warn!(
                "All {} batches for '{}' failed; synthesizing from error markers",
                failed, section
            );
        }

        context
            .report(PROGRESS_SYNTHESIS_STARTED, "Synthesizing batch results")
            .await;

        let narrative = synthesize(
            self.generator.as_ref(),
            &results,
            &section,
            &self.options,
            &self.policy,
            &context,
        )
        .await?;

        context.set(session_keys::NARRATIVE, &narrative)?;
        context
            .report(PROGRESS_SYNTHESIS_DONE, "Synthesis complete")
            .await;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some(format!("Synthesized '{}' from {} batches", section, results.len())),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{AnalysisError, BatchError};
    use crate::llm::scripted::ScriptedGenerator;
    use crate::models::BatchResult;
    use std::time::Duration;

    fn task(generator: Arc<ScriptedGenerator>) -> SynthesizeTask {
        SynthesizeTask::new(
            generator,
            GenerationOptions::default(),
            RetryPolicy {
                base_delay: Duration::from_secs(1),
                max_retries: 1,
                heartbeat_interval: Duration::from_secs(5),
            },
        )
    }

    fn context_with(results: &[BatchResult]) -> Context {
        let context = Context::new();
        context.set(session_keys::SECTION, "1.4 Findings").unwrap();
        for (index, result) in results.iter().enumerate() {
            context.set(session_keys::batch_result(index), result).unwrap();
        }
        context.set(session_keys::NEXT_BATCH, results.len()).unwrap();
        context
    }

    #[tokio::test]
    async fn failed_batches_still_reach_the_model() {
        let generator = Arc::new(ScriptedGenerator::always(Ok("merged".into())));
        let context = context_with(&[
            BatchResult::failed(BatchError::failed("400 bad")),
            BatchResult::failed(BatchError::RateLimited),
        ]);

        task(generator.clone()).run(context.clone()).await.unwrap();

        assert_eq!(generator.calls(), 1);
        assert_eq!(context.get::<String>(session_keys::NARRATIVE).as_deref(), Some("merged"));
        let prompt = generator.requests()[0].joined();
        assert!(prompt.contains("[[ERROR PROCESSING BATCH 1: Error: 400 bad]]"));
    }

    #[tokio::test]
    async fn no_results_is_no_documents() {
        let generator = Arc::new(ScriptedGenerator::always(Ok("unused".into())));
        let err = task(generator.clone())
            .run(context_with(&[]))
            .await
            .unwrap_err();
        assert!(matches!(AnalysisError::from(err), AnalysisError::NoDocuments));
        assert_eq!(generator.calls(), 0);
    }
}
