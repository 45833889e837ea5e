use runwarden_common::types::TriggerSource;

/// Errors raised while registering triggers or handling a firing request.
///
/// Registration errors are returned before anything is armed.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Trigger: runbook '{0}' is disabled")]
    DisabledRunbook(String),

    #[error("Trigger: invalid webhook signature")]
    InvalidSignature,

    #[error("Trigger: caller {0} is outside the allowed IP range")]
    ForbiddenSource(String),

    #[error("Trigger: watch path '{0}' does not exist")]
    PathNotFound(String),

    #[error("Trigger: invalid file pattern '{0}'")]
    InvalidPattern(String),

    #[error("Trigger: invalid cron expression '{expression}': {reason}")]
    InvalidCronExpression { expression: String, reason: String },

    #[error("Trigger: unknown time zone '{0}'")]
    InvalidTimeZone(String),

    #[error("Trigger: invalid allowed IP range '{0}'")]
    InvalidAllowedRange(String),

    #[error("Trigger: runbook '{0}' not found")]
    RunbookNotFound(String),

    #[error("Trigger: runbook '{runbook_id}' does not have a {expected} trigger")]
    TriggerMismatch {
        runbook_id: String,
        expected: TriggerSource,
    },

    #[error("Trigger: file watcher error: {0}")]
    Watch(#[from] notify::Error),

    #[error("Trigger: storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, TriggerError>;
