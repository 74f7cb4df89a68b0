use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    context::Context,
    error::{FlowError, Result},
    task::{NextAction, Task, TaskResult},
};

/// Upper bound on executed tasks per run unless overridden.
pub const DEFAULT_MAX_STEPS: usize = 10_000;

/// Type alias for edge condition functions
pub type EdgeCondition = Arc<dyn Fn(&Context) -> bool + Send + Sync>;

/// Edge between tasks in the workflow
#[derive(Clone)]
pub struct Edge {
    pub from: String,
    pub to: String,
    pub condition: Option<EdgeCondition>,
}

/// A directed set of tasks executed one after another over a shared context.
///
/// Edges are evaluated in insertion order: the first conditional edge whose
/// condition holds, or the first unconditional edge, decides the next task.
/// Self-edges are allowed, which is how loops over a work queue are expressed.
pub struct Workflow {
    pub id: String,
    tasks: HashMap<String, Arc<dyn Task>>,
    edges: Vec<Edge>,
    start_task_id: Option<String>,
    max_steps: usize,
}

impl Workflow {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            tasks: HashMap::new(),
            edges: Vec::new(),
            start_task_id: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Run from the start task until a task ends the run or has no way forward.
    pub async fn execute(&self, context: Context) -> Result<ExecutionResult> {
        let start = self.start_task_id.clone().ok_or(FlowError::NoStartTask)?;
        self.execute_from(&start, context).await
    }

    /// Run starting at `task_id`.
    pub async fn execute_from(&self, task_id: &str, context: Context) -> Result<ExecutionResult> {
        let mut current = task_id.to_string();
        let mut steps = 0usize;

        loop {
            if context.is_cancelled() {
                warn!("Workflow {} cancelled before task {}", self.id, current);
                return Err(FlowError::Cancelled);
            }
            if steps >= self.max_steps {
                return Err(FlowError::StepLimitExceeded(self.max_steps));
            }
            steps += 1;

            let result = self.execute_single_task(&current, context.clone()).await?;

            if let Some(status) = &result.status_message {
                debug!("[{}] {}: {}", self.id, result.task_id, status);
            }

            let next = match &result.next_action {
                NextAction::End => None,
                NextAction::Continue => self.find_next_task(&result.task_id, &context),
                NextAction::GoTo(target_id) => {
                    if !self.tasks.contains_key(target_id) {
                        return Err(FlowError::TaskNotFound(target_id.clone()));
                    }
                    Some(target_id.clone())
                }
            };

            match next {
                Some(next_task_id) => current = next_task_id,
                None => {
                    info!("Workflow {} completed after {} steps", self.id, steps);
                    return Ok(ExecutionResult {
                        response: result.response,
                        status_message: result.status_message,
                        last_task_id: result.task_id,
                        steps,
                    });
                }
            }
        }
    }

    async fn execute_single_task(&self, task_id: &str, context: Context) -> Result<TaskResult> {
        let task = self
            .tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| FlowError::TaskNotFound(task_id.to_string()))?;

        let mut result = task.run(context).await?;

        // Set the task_id in the result to track which task generated it
        result.task_id = task_id.to_string();

        Ok(result)
    }

    /// Find the next task based on edges and conditions
    pub fn find_next_task(&self, current_task_id: &str, context: &Context) -> Option<String> {
        self.edges
            .iter()
            .filter(|edge| edge.from == current_task_id)
            .find(|edge| match &edge.condition {
                Some(condition) => condition(context),
                None => true,
            })
            .map(|edge| edge.to.clone())
    }

    pub fn start_task_id(&self) -> Option<&str> {
        self.start_task_id.as_deref()
    }

    pub fn get_task(&self, task_id: &str) -> Option<Arc<dyn Task>> {
        self.tasks.get(task_id).cloned()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }
}

/// Builder for creating workflows
pub struct WorkflowBuilder {
    workflow: Workflow,
}

impl WorkflowBuilder {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            workflow: Workflow::new(id),
        }
    }

    /// Add a task. The first task added becomes the start task.
    pub fn add_task(mut self, task: Arc<dyn Task>) -> Self {
        let task_id = task.id().to_string();
        if self.workflow.start_task_id.is_none() {
            self.workflow.start_task_id = Some(task_id.clone());
        }
        self.workflow.tasks.insert(task_id, task);
        self
    }

    pub fn add_edge(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.workflow.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: None,
        });
        self
    }

    pub fn add_conditional_edge<F>(
        mut self,
        from: impl Into<String>,
        to: impl Into<String>,
        condition: F,
    ) -> Self
    where
        F: Fn(&Context) -> bool + Send + Sync + 'static,
    {
        self.workflow.edges.push(Edge {
            from: from.into(),
            to: to.into(),
            condition: Some(Arc::new(condition)),
        });
        self
    }

    pub fn set_start_task(mut self, task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        if self.workflow.tasks.contains_key(&task_id) {
            self.workflow.start_task_id = Some(task_id);
        }
        self
    }

    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.workflow.max_steps = max_steps.max(1);
        self
    }

    pub fn build(self) -> Workflow {
        self.workflow
    }
}

/// Outcome of a completed run
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub response: Option<String>,
    pub status_message: Option<String>,
    pub last_task_id: String,
    pub steps: usize,
}
