use runwarden_executor::{BackoffStrategy, ConcurrencyPolicy, ExecutorConfig};
use runwarden_notify::SmtpSettings;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_http_port")]
    pub http_port: u16,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    /// Terminal executions older than this are deleted by the hourly cleanup.
    #[serde(default = "default_execution_retention_days")]
    pub execution_retention_days: u32,
    #[serde(default)]
    pub executor: ExecutorSection,
    #[serde(default)]
    pub alert: AlertSection,
    #[serde(default)]
    pub smtp: Option<SmtpSettings>,
    /// Commands the process runner may start, keyed by thing id.
    #[serde(default)]
    pub things: HashMap<String, ThingCommand>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: default_http_port(),
            data_dir: default_data_dir(),
            execution_retention_days: default_execution_retention_days(),
            executor: ExecutorSection::default(),
            alert: AlertSection::default(),
            smtp: None,
            things: HashMap::new(),
        }
    }
}

fn default_http_port() -> u16 {
    8080
}

fn default_data_dir() -> String {
    "data".to_string()
}

fn default_execution_retention_days() -> u32 {
    30
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExecutorSection {
    #[serde(default)]
    pub concurrency: ConcurrencyPolicy,
    #[serde(default)]
    pub backoff: BackoffSection,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    #[default]
    None,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackoffSection {
    #[serde(default)]
    pub strategy: BackoffKind,
    /// Delay before the first retry; the fixed delay for `fixed`.
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            strategy: BackoffKind::default(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_initial_delay_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_multiplier() -> f64 {
    2.0
}

impl BackoffSection {
    pub fn strategy(&self) -> BackoffStrategy {
        let initial = Duration::from_millis(self.initial_delay_ms);
        match self.strategy {
            BackoffKind::None => BackoffStrategy::None,
            BackoffKind::Fixed => BackoffStrategy::Fixed(initial),
            BackoffKind::Exponential => BackoffStrategy::Exponential {
                initial,
                max: Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms)),
                multiplier: self.multiplier,
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct AlertSection {
    #[serde(default = "default_alert_enabled")]
    pub enabled: bool,
    #[serde(default = "default_evaluation_interval_secs")]
    pub evaluation_interval_secs: u64,
}

impl Default for AlertSection {
    fn default() -> Self {
        Self {
            enabled: default_alert_enabled(),
            evaluation_interval_secs: default_evaluation_interval_secs(),
        }
    }
}

fn default_alert_enabled() -> bool {
    true
}

fn default_evaluation_interval_secs() -> u64 {
    30
}

/// How the process runner starts one thing.
#[derive(Debug, Clone, Deserialize)]
pub struct ThingCommand {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub working_dir: Option<String>,
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read config '{path}': {e}"))?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            backoff: self.executor.backoff.strategy(),
            concurrency: self.executor.concurrency,
        }
    }

    pub fn evaluation_interval(&self) -> Duration {
        Duration::from_secs(self.alert.evaluation_interval_secs.max(1))
    }
}

// ---- Seed file types (used by the `init-runbooks` / `init-rules` subcommands) ----

#[derive(Debug, Clone, Deserialize)]
pub struct RunbooksSeedFile {
    #[serde(default)]
    pub runbooks: Vec<runwarden_common::types::Runbook>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RulesSeedFile {
    #[serde(default)]
    pub rules: Vec<runwarden_common::types::AlertRule>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.http_port, 8080);
        assert_eq!(config.execution_retention_days, 30);
        assert_eq!(config.executor.concurrency, ConcurrencyPolicy::Reject);
        assert_eq!(config.executor.backoff.strategy(), BackoffStrategy::None);
        assert!(config.alert.enabled);
        assert!(config.smtp.is_none());
    }

    #[test]
    fn parses_nested_sections() {
        let config: ServerConfig = toml::from_str(
            r#"
            http_port = 9000

            [executor]
            concurrency = "queue"

            [executor.backoff]
            strategy = "exponential"
            initial_delay_ms = 500
            max_delay_ms = 4000

            [alert]
            evaluation_interval_secs = 10

            [smtp]
            host = "smtp.example.com"
            from = "runwarden@example.com"

            [things.restart-web]
            command = "systemctl"
            args = ["restart", "nginx"]
            "#,
        )
        .unwrap();

        assert_eq!(config.http_port, 9000);
        assert_eq!(config.executor.concurrency, ConcurrencyPolicy::Queue);
        assert_eq!(
            config.executor.backoff.strategy(),
            BackoffStrategy::Exponential {
                initial: Duration::from_millis(500),
                max: Duration::from_millis(4000),
                multiplier: 2.0,
            }
        );
        assert_eq!(config.evaluation_interval(), Duration::from_secs(10));
        assert_eq!(config.smtp.as_ref().unwrap().port, 587);
        assert_eq!(config.things["restart-web"].args, vec!["restart", "nginx"]);
    }
}
