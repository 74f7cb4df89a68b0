use async_trait::async_trait;
use report_flow::{Context, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::{error, info};

use super::{batch_progress, session_keys};
use crate::llm::{GenerationOptions, TextGenerator};
use crate::models::Batch;
use crate::query::query_batch;
use crate::retry::RetryPolicy;

/// Queries the next pending batch. The workflow loops on this task until
/// every batch has a result.
pub struct QueryBatchTask {
    generator: Arc<dyn TextGenerator>,
    options: GenerationOptions,
    policy: RetryPolicy,
}

impl QueryBatchTask {
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

/// Whether batches remain to be queried.
pub fn has_pending_batches(context: &Context) -> bool {
    let next: usize = context.get(session_keys::NEXT_BATCH).unwrap_or(0);
    let total: usize = context.get(session_keys::BATCH_COUNT).unwrap_or(0);
    next < total
}

#[async_trait]
impl Task for QueryBatchTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let total: usize = context.require(session_keys::BATCH_COUNT)?;
        let next: usize = context.require(session_keys::NEXT_BATCH)?;
        if next >= total {
            return Ok(TaskResult::new(None, NextAction::Continue));
        }
        let batch: Batch = context.require(&session_keys::batch(next))?;
        let prompt: String = context.require(session_keys::PROMPT)?;

        info!("Processing batch {} of {}", batch.number(), total);
        let result = query_batch(
            self.generator.as_ref(),
            &batch,
            &prompt,
            &self.options,
            &self.policy,
            &context,
        )
        .await?;

        if let Some(error) = result.error() {
            error!("Batch {} failed: {}", batch.number(), error);
        }

        let done = next + 1;
        context.set(session_keys::batch_result(next), &result)?;
        context.set(session_keys::NEXT_BATCH, done)?;
        // Documents are no longer needed once the batch has a result.
        context.remove(&session_keys::batch(next));

        let status = format!("Processed batch {} of {}", done, total);
        context
            .report(batch_progress(done, total), &status)
            .await;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some(status),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedGenerator;
    use crate::models::{BatchResult, DocumentContent};
    use crate::tasks::batch_results;
    use std::time::Duration;

    fn task(generator: Arc<ScriptedGenerator>) -> QueryBatchTask {
        QueryBatchTask::new(
            generator,
            GenerationOptions::default(),
            RetryPolicy {
                base_delay: Duration::from_secs(1),
                max_retries: 0,
                heartbeat_interval: Duration::from_secs(5),
            },
        )
    }

    #[tokio::test]
    async fn each_step_consumes_one_batch() {
        let generator = Arc::new(ScriptedGenerator::new(|_, call| Ok(format!("answer {call}"))));
        let context = Context::new();
        for index in 0..2 {
            let batch = Batch {
                index,
                documents: vec![DocumentContent::new(format!("doc {index}"))],
            };
            context.set(session_keys::batch(index), &batch).unwrap();
        }
        context.set(session_keys::BATCH_COUNT, 2usize).unwrap();
        context.set(session_keys::NEXT_BATCH, 0usize).unwrap();
        context.set(session_keys::PROMPT, "prompt").unwrap();

        let task = task(generator.clone());
        task.run(context.clone()).await.unwrap();
        assert!(has_pending_batches(&context));
        assert!(!context.contains(&session_keys::batch(0)));
        assert!(context.contains(&session_keys::batch(1)));

        task.run(context.clone()).await.unwrap();
        assert!(!has_pending_batches(&context));
        assert_eq!(
            batch_results(&context),
            vec![BatchResult::success("answer 0"), BatchResult::success("answer 1")]
        );
        assert_eq!(generator.requests()[1].parts()[0], "doc 1");
    }
}
