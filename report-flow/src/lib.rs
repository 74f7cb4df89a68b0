pub mod context;
pub mod error;
pub mod progress;
pub mod task;
pub mod workflow;

// Re-export commonly used types
pub use context::Context;
pub use error::{FlowError, Result};
pub use progress::{NoopProgress, ProgressEvent, ProgressSink, RecordingProgress, TracingProgress};
pub use task::{NextAction, Task, TaskResult};
pub use workflow::{ExecutionResult, Workflow, WorkflowBuilder};

// Re-exported so task implementors do not need their own tokio-util dependency.
pub use tokio_util::sync::CancellationToken;

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct EchoTask {
        id: String,
    }

    #[async_trait]
    impl Task for EchoTask {
        fn id(&self) -> &str {
            &self.id
        }

        async fn run(&self, context: Context) -> Result<TaskResult> {
            let input: String = context.get("input").unwrap_or_default();
            context.set("output", format!("Processed: {}", input))?;

            Ok(TaskResult::new(
                Some("Task completed".to_string()),
                NextAction::End,
            ))
        }
    }

    /// Pops one item per run and reports progress proportional to what is left.
    struct DrainTask;

    #[async_trait]
    impl Task for DrainTask {
        fn id(&self) -> &str {
            "drain"
        }

        async fn run(&self, context: Context) -> Result<TaskResult> {
            let mut queue: Vec<u32> = context.require("queue")?;
            let total: usize = context.require("total")?;
            let item = queue.pop();
            let mut seen: Vec<u32> = context.get("seen").unwrap_or_default();
            if let Some(item) = item {
                seen.push(item);
            }
            context.set("queue", &queue)?;
            context.set("seen", &seen)?;
            let done = total - queue.len();
            context.report((done * 100 / total) as u8, "drained one").await;
            Ok(TaskResult::new(None, NextAction::Continue))
        }
    }

    struct FinishTask;

    #[async_trait]
    impl Task for FinishTask {
        fn id(&self) -> &str {
            "finish"
        }

        async fn run(&self, context: Context) -> Result<TaskResult> {
            let seen: Vec<u32> = context.require("seen")?;
            Ok(TaskResult::new_with_status(
                Some(format!("{} items", seen.len())),
                NextAction::End,
                Some("finished".to_string()),
            ))
        }
    }

    struct FailingTask;

    #[async_trait]
    impl Task for FailingTask {
        async fn run(&self, _context: Context) -> Result<TaskResult> {
            Err(anyhow::anyhow!("boom").into())
        }
    }

    fn drain_workflow() -> Workflow {
        WorkflowBuilder::new("drain")
            .add_task(Arc::new(DrainTask))
            .add_task(Arc::new(FinishTask))
            .add_conditional_edge("drain", "drain", |ctx| {
                ctx.get::<Vec<u32>>("queue")
                    .map(|q| !q.is_empty())
                    .unwrap_or(false)
            })
            .add_edge("drain", "finish")
            .build()
    }

    #[tokio::test]
    async fn test_simple_workflow_execution() {
        let task = Arc::new(EchoTask {
            id: "test_task".to_string(),
        });

        let workflow = WorkflowBuilder::new("test_workflow").add_task(task).build();

        let context = Context::new();
        context.set("input", "Hello, World!").unwrap();

        let result = workflow.execute(context.clone()).await.unwrap();

        assert_eq!(result.response.as_deref(), Some("Task completed"));
        assert_eq!(result.steps, 1);
        assert_eq!(result.last_task_id, "test_task");

        let output: String = context.get("output").unwrap();
        assert_eq!(output, "Processed: Hello, World!");
    }

    #[tokio::test]
    async fn test_self_edge_loops_until_condition_fails() {
        let progress = Arc::new(RecordingProgress::new());
        let context = Context::new().with_progress(progress.clone());
        context.set("queue", vec![1u32, 2, 3, 4]).unwrap();
        context.set("total", 4usize).unwrap();

        let result = drain_workflow().execute(context.clone()).await.unwrap();

        assert_eq!(result.response.as_deref(), Some("4 items"));
        assert_eq!(result.status_message.as_deref(), Some("finished"));
        assert_eq!(result.steps, 5);
        let seen: Vec<u32> = context.get("seen").unwrap();
        assert_eq!(seen, vec![4, 3, 2, 1]);
        assert_eq!(progress.percentages(), vec![25, 50, 75, 100]);
    }

    #[tokio::test]
    async fn test_cancelled_context_stops_before_first_task() {
        let token = CancellationToken::new();
        let context = Context::new().with_cancellation(token.clone());
        context.set("queue", vec![1u32]).unwrap();
        context.set("total", 1usize).unwrap();
        token.cancel();

        let err = drain_workflow().execute(context.clone()).await.unwrap_err();
        assert!(matches!(err, FlowError::Cancelled));
        assert!(!context.contains("seen"));
    }

    #[tokio::test]
    async fn test_missing_context_value_is_reported() {
        let err = drain_workflow().execute(Context::new()).await.unwrap_err();
        match err {
            FlowError::ContextError(message) => assert!(message.contains("queue")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_task_error_is_downcastable() {
        let workflow = WorkflowBuilder::new("failing")
            .add_task(Arc::new(FailingTask))
            .build();

        let err = workflow.execute(Context::new()).await.unwrap_err();
        match err {
            FlowError::Task(inner) => assert_eq!(inner.to_string(), "boom"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_step_limit() {
        let workflow = WorkflowBuilder::new("spin")
            .add_task(Arc::new(DrainTask))
            .add_edge("drain", "drain")
            .max_steps(3)
            .build();
        let context = Context::new();
        context.set("queue", Vec::<u32>::new()).unwrap();
        context.set("total", 1usize).unwrap();

        let err = workflow.execute(context).await.unwrap_err();
        assert!(matches!(err, FlowError::StepLimitExceeded(3)));
    }

    #[tokio::test]
    async fn test_goto_unknown_task() {
        struct Jump;

        #[async_trait]
        impl Task for Jump {
            fn id(&self) -> &str {
                "jump"
            }

            async fn run(&self, _context: Context) -> Result<TaskResult> {
                Ok(TaskResult::new(None, NextAction::GoTo("nowhere".into())))
            }
        }

        let workflow = WorkflowBuilder::new("jump").add_task(Arc::new(Jump)).build();
        let err = workflow.execute(Context::new()).await.unwrap_err();
        assert!(matches!(err, FlowError::TaskNotFound(id) if id == "nowhere"));
    }

    #[test]
    fn test_default_task_id_is_type_name() {
        assert!(FailingTask.id().ends_with("FailingTask"));
    }
}
