use runwarden_common::types::AlertStatus;

#[derive(Debug, thiserror::Error)]
pub enum AlertError {
    #[error("Alert: rule '{0}' not found")]
    RuleNotFound(String),

    #[error("Alert: alert '{0}' not found")]
    AlertNotFound(String),

    /// The requested lifecycle change is not allowed from the alert's status.
    #[error("Alert: cannot {action} alert '{alert_id}' in status {status}")]
    InvalidTransition {
        alert_id: String,
        action: &'static str,
        status: AlertStatus,
    },

    #[error("Alert: invalid rule: {0}")]
    InvalidRule(String),

    #[error("Alert: metrics query failed: {0}")]
    Metrics(anyhow::Error),

    #[error("Alert: storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AlertError>;
