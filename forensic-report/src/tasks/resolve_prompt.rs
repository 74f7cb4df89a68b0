use async_trait::async_trait;
use report_flow::{Context, NextAction, Result, Task, TaskResult};
use std::sync::Arc;
use tracing::error;

use super::session_keys;
use crate::error::AnalysisError;
use crate::prompts::{PromptTable, resolve_prompt};

/// Picks the section prompt before any model call is made.
pub struct ResolvePromptTask {
    prompts: Arc<PromptTable>,
}

impl ResolvePromptTask {
    pub fn new(prompts: Arc<PromptTable>) -> Self {
        Self { prompts }
    }
}

#[async_trait]
impl Task for ResolvePromptTask {
    fn id(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn run(&self, context: Context) -> Result<TaskResult> {
        if self.prompts.is_empty() {
            error!("Prompt table is empty");
            return Err(AnalysisError::MissingPrompts.into());
        }

        let section: String = context.require(session_keys::SECTION)?;
        let case_type: Option<String> = context.get(session_keys::CASE_TYPE).flatten();

        let resolved = resolve_prompt(&section, case_type.as_deref(), &self.prompts);
        context.set(session_keys::PROMPT, &resolved.text)?;

        Ok(TaskResult::new_with_status(
            None,
            NextAction::Continue,
            Some(format!("Resolved {:?} prompt for '{}'", resolved.tier, section)),
        ))
    }
}
