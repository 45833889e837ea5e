/// Errors raised while configuring or running alert actions.
///
/// Action handlers return `anyhow::Result`; these variants are what they
/// wrap, so callers can downcast when they need the category.
///
/// # Examples
///
/// ```rust
/// use runwarden_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing url".to_string());
/// assert!(err.to_string().contains("url"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Action configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid action configuration: {0}")]
    InvalidConfig(String),

    /// No plugin is registered for the action type.
    #[error("Notify: unknown action type '{0}'")]
    UnknownActionType(String),

    #[error("Notify: HTTP request failed: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("Notify: SMTP error: {0}")]
    SmtpError(String),

    /// The remote endpoint answered with a non-success status.
    #[error("Notify: API error from {service}: status={status}, body={body}")]
    ApiError {
        service: String,
        status: u16,
        body: String,
    },

    #[error("Notify: {0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
