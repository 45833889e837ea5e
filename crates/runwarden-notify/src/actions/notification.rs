//! In-process notification published on the event bus.

use crate::plugin::{parse_config, ActionContext, ActionPlugin};
use crate::utils::render_template;
use crate::ActionHandler;
use anyhow::Result;
use async_trait::async_trait;
use runwarden_common::events::{EventBus, SystemEvent};
use runwarden_common::types::{ActionType, Alert, AlertRule};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Default, Deserialize)]
struct NotificationConfig {
    #[serde(default)]
    title: Option<String>,
    /// Message template; `{{metric}}`, `{{value}}` and friends are substituted.
    #[serde(default)]
    message: Option<String>,
}

pub struct NotificationAction {
    events: EventBus,
    title: Option<String>,
    message: Option<String>,
}

#[async_trait]
impl ActionHandler for NotificationAction {
    async fn execute(&self, rule: &AlertRule, alert: &Alert) -> Result<()> {
        let title = match &self.title {
            Some(t) => render_template(t, rule, alert),
            None => format!("[{}] {}", alert.severity, rule.name),
        };
        let message = match &self.message {
            Some(m) => render_template(m, rule, alert),
            None => alert.message.clone(),
        };
        let receivers = self.events.publish(SystemEvent::Notification {
            title,
            message,
            severity: alert.severity,
            rule_id: rule.id.clone(),
            alert_id: alert.id.clone(),
        });
        tracing::debug!(alert_id = %alert.id, receivers, "Notification published");
        Ok(())
    }

    fn action_type(&self) -> ActionType {
        ActionType::Notification
    }
}

pub struct NotificationPlugin;

impl ActionPlugin for NotificationPlugin {
    fn action_type(&self) -> ActionType {
        ActionType::Notification
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        parse_config::<NotificationConfig>(ActionType::Notification, config).map(|_| ())
    }

    fn create_handler(&self, config: &Value, context: &ActionContext) -> Result<Box<dyn ActionHandler>> {
        let config: NotificationConfig = parse_config(ActionType::Notification, config)?;
        Ok(Box::new(NotificationAction {
            events: context.events.clone(),
            title: config.title,
            message: config.message,
        }))
    }
}
