use async_trait::async_trait;
use report_flow::{Context, NextAction, Result, Task, TaskResult};
use tracing::info;

use super::{PROGRESS_COMPLETE, session_keys};
use crate::policy::SplitterKind;

/// Splits the narrative into findings and background.
pub struct SplitSectionsTask;

#[async_trait]
impl Task for SplitSectionsTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        let narrative: String = context.require(session_keys::NARRATIVE)?;
        let splitter: SplitterKind = context.get(session_keys::SPLITTER).unwrap_or_default();

        let split = splitter.split(&narrative);
        info!(
            "Split narrative with {:?} splitter: {} findings chars, {} background chars",
            splitter,
            split.findings.len(),
            split.background.len()
        );
        context.set(session_keys::SPLIT, &split)?;
        context.report(PROGRESS_COMPLETE, "Analysis complete").await;

        Ok(TaskResult::new_with_status(
            Some(narrative),
            NextAction::End,
            Some("Narrative split into findings and background".to_string()),
        ))
    }
}
