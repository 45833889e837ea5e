use crate::error::NotifyError;
use crate::plugin::{parse_config, ActionContext, ActionPlugin};
use crate::utils::render_template;
use crate::ActionHandler;
use anyhow::Result;
use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use runwarden_common::types::{format_tags, ActionType, Alert, AlertRule};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;

/// SMTP server settings, shared by every email action.
#[derive(Debug, Clone, Deserialize)]
pub struct SmtpSettings {
    pub host: String,
    #[serde(default = "default_smtp_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    pub from: String,
}

fn default_smtp_port() -> u16 {
    587
}

/// Connection to the configured SMTP relay.
pub struct EmailSender {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: String,
}

impl EmailSender {
    pub fn new(settings: &SmtpSettings) -> Result<Self> {
        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)?.port(settings.port);
        if let (Some(user), Some(pass)) = (&settings.username, &settings.password) {
            builder = builder.credentials(Credentials::new(user.clone(), pass.clone()));
        }
        Ok(Self {
            transport: builder.build(),
            from: settings.from.clone(),
        })
    }

    pub async fn send(&self, to: &[String], subject: &str, body: &str) -> Result<()> {
        for recipient in to {
            let email = Message::builder()
                .from(self.from.parse()?)
                .to(recipient.parse()?)
                .subject(subject)
                .header(ContentType::TEXT_PLAIN)
                .body(body.to_string())?;
            self.transport
                .send(email)
                .await
                .map_err(|e| NotifyError::SmtpError(format!("{recipient}: {e}")))?;
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct EmailConfig {
    to: Vec<String>,
    #[serde(default)]
    subject: Option<String>,
}

pub struct EmailAction {
    sender: Option<Arc<EmailSender>>,
    to: Vec<String>,
    subject: Option<String>,
}

impl EmailAction {
    fn format_body(rule: &AlertRule, alert: &Alert) -> String {
        let tags = format_tags(&rule.tags);
        let tags_line = if tags.is_empty() {
            String::new()
        } else {
            format!("\nTags: {tags}")
        };
        format!(
            "Alert: {severity}\nRule: {rule}\nMetric: {metric}{tags_line}\nValue: {value:.2}\nThreshold: {threshold:.2}\nMessage: {message}\nFired at: {time}",
            severity = alert.severity,
            rule = rule.name,
            metric = rule.metric_name,
            value = alert.current_value,
            threshold = alert.threshold,
            message = alert.message,
            time = alert.fired_at.to_rfc3339(),
        )
    }
}

#[async_trait]
impl ActionHandler for EmailAction {
    async fn execute(&self, rule: &AlertRule, alert: &Alert) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| NotifyError::SmtpError("SMTP is not configured".to_string()))?;
        let subject = match &self.subject {
            Some(s) => render_template(s, rule, alert),
            None => format!("[runwarden][{}] {}", alert.severity, rule.name),
        };
        sender
            .send(&self.to, &subject, &Self::format_body(rule, alert))
            .await?;
        tracing::info!(alert_id = %alert.id, recipients = self.to.len(), "Alert email sent");
        Ok(())
    }

    fn action_type(&self) -> ActionType {
        ActionType::Email
    }
}

pub struct EmailPlugin;

impl ActionPlugin for EmailPlugin {
    fn action_type(&self) -> ActionType {
        ActionType::Email
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        let config: EmailConfig = parse_config(ActionType::Email, config)?;
        if config.to.is_empty() {
            return Err(NotifyError::InvalidConfig("email: 'to' must not be empty".into()).into());
        }
        Ok(())
    }

    fn create_handler(&self, config: &Value, context: &ActionContext) -> Result<Box<dyn ActionHandler>> {
        let config: EmailConfig = parse_config(ActionType::Email, config)?;
        Ok(Box::new(EmailAction {
            sender: context.email.clone(),
            to: config.to,
            subject: config.subject,
        }))
    }
}
