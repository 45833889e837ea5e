use crate::error::NotifyError;
use crate::plugin::{parse_config, ActionContext, ActionPlugin};
use crate::utils::{alert_payload, truncate_string, MAX_BODY_LENGTH};
use crate::ActionHandler;
use anyhow::Result;
use async_trait::async_trait;
use runwarden_common::types::{ActionType, Alert, AlertRule};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct WebhookConfig {
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    3
}

/// POSTs the alert as JSON, retrying with exponential backoff.
pub struct WebhookAction {
    client: reqwest::Client,
    url: String,
    headers: HashMap<String, String>,
    max_attempts: u32,
}

impl WebhookAction {
    async fn post_once(&self, body: &Value) -> Result<()> {
        let mut request = self.client.post(&self.url).json(body);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let resp = request.send().await.map_err(NotifyError::from)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = match resp.text().await {
            Ok(text) => truncate_string(&text, MAX_BODY_LENGTH),
            Err(e) => format!("[failed to read response body: {e}]"),
        };
        Err(NotifyError::ApiError {
            service: self.url.clone(),
            status: status.as_u16(),
            body: text,
        }
        .into())
    }
}

#[async_trait]
impl ActionHandler for WebhookAction {
    async fn execute(&self, rule: &AlertRule, alert: &Alert) -> Result<()> {
        let body = alert_payload(rule, alert);
        let mut last_err = None;
        for attempt in 0..self.max_attempts {
            match self.post_once(&body).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        url = %self.url,
                        attempt = attempt + 1,
                        error = %e,
                        "Webhook action failed"
                    );
                    last_err = Some(e);
                }
            }
            if attempt + 1 < self.max_attempts {
                tokio::time::sleep(Duration::from_millis(100 * 2u64.pow(attempt))).await;
            }
        }
        Err(last_err.unwrap_or_else(|| NotifyError::Other("webhook made no attempts".into()).into()))
    }

    fn action_type(&self) -> ActionType {
        ActionType::Webhook
    }
}

pub struct WebhookPlugin;

impl ActionPlugin for WebhookPlugin {
    fn action_type(&self) -> ActionType {
        ActionType::Webhook
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let config: WebhookConfig = parse_config(ActionType::Webhook, config)?;
        if !config.url.starts_with("http://") && !config.url.starts_with("https://") {
            return Err(NotifyError::InvalidConfig(format!(
                "webhook: url must be http(s), got '{}'",
                config.url
            ))
            .into());
        }
        if config.max_attempts == 0 || config.max_attempts > 10 {
            return Err(
                NotifyError::InvalidConfig("webhook: max_attempts must be 1..=10".into()).into(),
            );
        }
        Ok(())
    }

    fn create_handler(&self, config: &Value, context: &ActionContext) -> Result<Box<dyn ActionHandler>> {
        let config: WebhookConfig = parse_config(ActionType::Webhook, config)?;
        Ok(Box::new(WebhookAction {
            client: context.http.clone(),
            url: config.url,
            headers: config.headers,
            max_attempts: config.max_attempts,
        }))
    }
}
