use report_flow::{Task, Workflow, WorkflowBuilder};
use std::sync::Arc;

use crate::config::AnalyzerConfig;
use crate::llm::TextGenerator;
use crate::prompts::PromptTable;
use crate::tasks::query_batch::has_pending_batches;
use crate::tasks::*;

/// prepare batches -> resolve prompt -> query batch (loops) -> synthesize -> split
pub fn build_analysis_workflow(
    generator: Arc<dyn TextGenerator>,
    prompts: Arc<PromptTable>,
    config: &AnalyzerConfig,
) -> Workflow {
    let policy = config.retry_policy();

    let prepare_task = Arc::new(PrepareBatchesTask::new(config.batch_size));
    let prepare_id = prepare_task.id().to_string();

    let resolve_task = Arc::new(ResolvePromptTask::new(prompts));
    let resolve_id = resolve_task.id().to_string();

    let query_task = Arc::new(QueryBatchTask::new(
        generator.clone(),
        config.generation.clone(),
        policy.clone(),
    ));
    let query_id = query_task.id().to_string();

    let synthesize_task = Arc::new(SynthesizeTask::new(
        generator,
        config.generation.clone(),
        policy,
    ));
    let synthesize_id = synthesize_task.id().to_string();

    let split_task = Arc::new(SplitSectionsTask);
    let split_id = split_task.id().to_string();

    WorkflowBuilder::new("section_analysis")
        .add_task(prepare_task)
        .add_task(resolve_task)
        .add_task(query_task)
        .add_task(synthesize_task)
        .add_task(split_task)
        .add_edge(&prepare_id, &resolve_id)
        .add_edge(&resolve_id, &query_id)
        .add_conditional_edge(&query_id, &query_id, has_pending_batches)
        .add_edge(&query_id, &synthesize_id)
        .add_edge(&synthesize_id, &split_id)
        .set_start_task(&prepare_id)
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::scripted::ScriptedGenerator;

    #[test]
    fn analysis_workflow_starts_with_batching() {
        let generator = Arc::new(ScriptedGenerator::always(Ok("unused".into())));
        let workflow = build_analysis_workflow(
            generator,
            Arc::new(PromptTable::new()),
            &AnalyzerConfig::default(),
        );

        assert_eq!(workflow.task_count(), 5);
        let start = workflow.start_task_id().unwrap();
        assert_eq!(start, std::any::type_name::<PrepareBatchesTask>());
        assert!(workflow.get_task(std::any::type_name::<QueryBatchTask>()).is_some());
    }
}
