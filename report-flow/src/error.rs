use thiserror::Error;

/// Errors raised while executing a workflow.
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Context error: {0}")]
    ContextError(String),

    #[error("Workflow cancelled")]
    Cancelled,

    #[error("Workflow exceeded {0} steps without completing")]
    StepLimitExceeded(usize),

    #[error("Workflow has no start task")]
    NoStartTask,

    #[error("Failed to serialize context value: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A task failed with a domain error. Callers can recover the concrete
    /// type with [`anyhow::Error::downcast`].
    #[error(transparent)]
    Task(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FlowError>;
