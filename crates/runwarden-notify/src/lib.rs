//! Alert actions.
//!
//! Each entry in an alert rule's action list is turned into an
//! [`ActionHandler`] by the [`plugin::ActionPlugin`] registered for its
//! type. The [`dispatcher::ActionDispatcher`] runs a rule's handlers in
//! order and isolates their failures. Built-in actions publish to the event
//! bus, send email over SMTP, POST to a webhook, or fire a runbook.

pub mod actions;
pub mod dispatcher;
pub mod error;
pub mod plugin;
pub mod utils;


use anyhow::Result;
use async_trait::async_trait;
use runwarden_common::types::{ActionType, Alert, AlertRule};

pub use actions::email::{EmailSender, SmtpSettings};
pub use dispatcher::{validate_actions, ActionDispatcher};
pub use plugin::{ActionContext, ActionRegistry};

/// One configured action, ready to run for fired alerts.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Performs the action.
    ///
    /// # Errors
    ///
    /// Returns an error if the action failed after any retries it makes.
    async fn execute(&self, rule: &AlertRule, alert: &Alert) -> Result<()>;

    fn action_type(&self) -> ActionType;
}
