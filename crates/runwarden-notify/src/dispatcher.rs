use crate::plugin::{ActionContext, ActionRegistry};
use anyhow::Result;
use async_trait::async_trait;
use runwarden_alert::AlertActionDispatcher;
use runwarden_common::types::{ActionResult, Alert, AlertAction, AlertRule};

/// Runs a rule's actions in declaration order.
///
/// Handlers are built from the rule's action list on each dispatch, so edits
/// to a rule take effect on its next firing. A failing action is logged and
/// reported; the remaining actions still run.
pub struct ActionDispatcher {
    registry: ActionRegistry,
    context: ActionContext,
}

impl ActionDispatcher {
    pub fn new(registry: ActionRegistry, context: ActionContext) -> Self {
        Self { registry, context }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    async fn run_one(&self, action: &AlertAction, rule: &AlertRule, alert: &Alert) -> Result<()> {
        let handler = self
            .registry
            .create_handler(action.action_type, &action.config, &self.context)?;
        handler.execute(rule, alert).await
    }
}

#[async_trait]
impl AlertActionDispatcher for ActionDispatcher {
    async fn dispatch(&self, rule: &AlertRule, alert: &Alert) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(rule.actions.len());
        for action in &rule.actions {
            match self.run_one(action, rule, alert).await {
                Ok(()) => results.push(ActionResult::ok(action.action_type)),
                Err(e) => {
                    tracing::error!(
                        rule_id = %rule.id,
                        alert_id = %alert.id,
                        action = %action.action_type,
                        error = %e,
                        "Alert action failed"
                    );
                    results.push(ActionResult::failed(action.action_type, format!("{e:#}")));
                }
            }
        }
        results
    }
}

/// Checks every action of a rule against its plugin's config schema.
pub fn validate_actions(registry: &ActionRegistry, actions: &[AlertAction]) -> Result<()> {
    for (index, action) in actions.iter().enumerate() {
        registry
            .validate(action.action_type, &action.config)
            .map_err(|e| e.context(format!("action #{index}")))?;
    }
    Ok(())
}
