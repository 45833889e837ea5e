use crate::actions::email::EmailSender;
use crate::error::NotifyError;
use crate::ActionHandler;
use anyhow::Result;
use runwarden_common::events::EventBus;
use runwarden_common::types::ActionType;
use runwarden_common::RunbookLauncher;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Collaborators shared by every action handler.
#[derive(Clone)]
pub struct ActionContext {
    pub events: EventBus,
    pub launcher: Arc<dyn RunbookLauncher>,
    /// `None` when no SMTP server is configured; email actions then fail.
    pub email: Option<Arc<EmailSender>>,
    pub http: reqwest::Client,
}

impl ActionContext {
    pub fn new(events: EventBus, launcher: Arc<dyn RunbookLauncher>) -> Self {
        Self {
            events,
            launcher,
            email: None,
            http: reqwest::Client::new(),
        }
    }

    pub fn with_email(mut self, sender: EmailSender) -> Self {
        self.email = Some(Arc::new(sender));
        self
    }
}

/// Builds [`ActionHandler`]s for one action type from the JSON `config`
/// stored on the rule.
pub trait ActionPlugin: Send + Sync {
    fn action_type(&self) -> ActionType;

    /// Validates a config blob against this plugin's schema.
    fn validate_config(&self, config: &Value) -> Result<()>;

    /// Creates a handler from a validated config.
    fn create_handler(&self, config: &Value, context: &ActionContext) -> Result<Box<dyn ActionHandler>>;
}

/// Registry of [`ActionPlugin`]s keyed by action type.
///
/// # Examples
///
/// ```
/// use runwarden_notify::plugin::ActionRegistry;
/// use runwarden_common::types::ActionType;
///
/// let registry = ActionRegistry::default();
/// assert!(registry.has_plugin(ActionType::Email));
/// assert!(registry.has_plugin(ActionType::RunRunbook));
/// assert!(!ActionRegistry::new().has_plugin(ActionType::Webhook));
/// ```
pub struct ActionRegistry {
    plugins: HashMap<ActionType, Box<dyn ActionPlugin>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            plugins: HashMap::new(),
        }
    }

    pub fn register(&mut self, plugin: Box<dyn ActionPlugin>) {
        self.plugins.insert(plugin.action_type(), plugin);
    }

    pub fn has_plugin(&self, action_type: ActionType) -> bool {
        self.plugins.contains_key(&action_type)
    }

    pub fn validate(&self, action_type: ActionType, config: &Value) -> Result<()> {
        self.plugin(action_type)?.validate_config(config)
    }

    pub fn create_handler(
        &self,
        action_type: ActionType,
        config: &Value,
        context: &ActionContext,
    ) -> Result<Box<dyn ActionHandler>> {
        let plugin = self.plugin(action_type)?;
        plugin.validate_config(config)?;
        plugin.create_handler(config, context)
    }

    fn plugin(&self, action_type: ActionType) -> Result<&dyn ActionPlugin> {
        self.plugins
            .get(&action_type)
            .map(|p| p.as_ref())
            .ok_or_else(|| NotifyError::UnknownActionType(action_type.to_string()).into())
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(crate::actions::notification::NotificationPlugin));
        registry.register(Box::new(crate::actions::email::EmailPlugin));
        registry.register(Box::new(crate::actions::webhook::WebhookPlugin));
        registry.register(Box::new(crate::actions::run_runbook::RunRunbookPlugin));
        registry
    }
}

/// Deserializes a plugin config, mapping failures to `InvalidConfig`.
pub(crate) fn parse_config<T: serde::de::DeserializeOwned>(action: ActionType, config: &Value) -> Result<T> {
    let config = if config.is_null() {
        Value::Object(Default::default())
    } else {
        config.clone()
    };
    serde_json::from_value(config)
        .map_err(|e| NotifyError::InvalidConfig(format!("{action}: {e}")).into())
}
