/// Structural problems in a runbook's step graph. These are fatal and never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("cycle between steps: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    #[error("step '{step}' depends on unknown step '{dependency}'")]
    UnknownDependency { step: String, dependency: String },

    #[error("step '{0}' depends on itself")]
    SelfReference(String),

    #[error("step id '{0}' is used more than once")]
    DuplicateStep(String),

    #[error("step id must not be empty")]
    EmptyStepId,
}

/// Errors returned when a runbook cannot be started.
///
/// Failures of individual steps are not errors: they are recorded in the
/// execution's step results.
///
/// # Examples
///
/// ```rust
/// use runwarden_executor::error::{ExecutorError, GraphError};
///
/// let err = ExecutorError::from(GraphError::SelfReference("deploy".into()));
/// assert_eq!(
///     err.to_string(),
///     "Executor: invalid step graph: step 'deploy' depends on itself"
/// );
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Executor: runbook '{0}' not found")]
    RunbookNotFound(String),

    #[error("Executor: runbook '{0}' is disabled")]
    DisabledRunbook(String),

    /// Another execution of the runbook is in flight and the concurrency
    /// policy rejects overlapping firings.
    #[error("Executor: runbook '{0}' already has an execution in flight")]
    AlreadyRunning(String),

    /// Covers cycles as well as dangling or malformed step references.
    #[error("Executor: invalid step graph: {0}")]
    CyclicGraph(#[from] GraphError),

    /// A step targets a thing the runner does not know. Never retried.
    #[error("Executor: step '{step}' references unknown thing '{thing}'")]
    UnknownThing { step: String, thing: String },

    #[error("Executor: storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ExecutorError>;
