//! Fires a runbook in response to an alert. The alert id travels as the
//! trigger payload.

use crate::error::NotifyError;
use crate::plugin::{parse_config, ActionContext, ActionPlugin};
use crate::ActionHandler;
use anyhow::Result;
use async_trait::async_trait;
use runwarden_common::types::{ActionType, Alert, AlertRule, FireContext, TriggerSource};
use runwarden_common::RunbookLauncher;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct RunRunbookConfig {
    runbook_id: String,
}

pub struct RunRunbookAction {
    launcher: Arc<dyn RunbookLauncher>,
    runbook_id: String,
}

#[async_trait]
impl ActionHandler for RunRunbookAction {
    async fn execute(&self, _rule: &AlertRule, alert: &Alert) -> Result<()> {
        let result = self
            .launcher
            .fire(
                &self.runbook_id,
                FireContext::with_payload(TriggerSource::Alert, alert.id.clone()),
            )
            .await;
        if !result.success {
            return Err(NotifyError::Other(format!(
                "runbook '{}' did not start: {}",
                self.runbook_id,
                result.error_message.unwrap_or_default()
            ))
            .into());
        }
        tracing::info!(
            alert_id = %alert.id,
            runbook_id = %self.runbook_id,
            execution_id = ?result.execution_id,
            "Runbook started by alert"
        );
        Ok(())
    }

    fn action_type(&self) -> ActionType {
        ActionType::RunRunbook
    }
}

pub struct RunRunbookPlugin;

impl ActionPlugin for RunRunbookPlugin {
    fn action_type(&self) -> ActionType {
        ActionType::RunRunbook
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let config: RunRunbookConfig = parse_config(ActionType::RunRunbook, config)?;
        if config.runbook_id.trim().is_empty() {
            return Err(NotifyError::InvalidConfig("run_runbook: runbook_id is empty".into()).into());
        }
        Ok(())
    }

    fn create_handler(&self, config: &Value, context: &ActionContext) -> Result<Box<dyn ActionHandler>> {
        let config: RunRunbookConfig = parse_config(ActionType::RunRunbook, config)?;
        Ok(Box::new(RunRunbookAction {
            launcher: context.launcher.clone(),
            runbook_id: config.runbook_id,
        }))
    }
}
