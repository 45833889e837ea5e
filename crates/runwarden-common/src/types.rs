use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// ---- Runbooks ----

/// A named set of dependent steps plus the trigger that starts it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runbook {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<RunbookStep>,
    pub trigger: Trigger,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Runbook {
    pub fn step(&self, step_id: &str) -> Option<&RunbookStep> {
        self.steps.iter().find(|s| s.id == step_id)
    }
}

/// Gate deciding whether a step runs once its dependencies are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    #[default]
    OnSuccess,
    OnFailure,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default)]
    pub enable_retry: bool,
    #[serde(default)]
    pub max_retries: u32,
}

impl RetrySettings {
    /// Total number of attempts a step may make, including the first one.
    pub fn max_attempts(&self) -> u32 {
        if self.enable_retry {
            self.max_retries.saturating_add(1)
        } else {
            1
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookStep {
    /// Unique within the owning runbook.
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub thing_id: String,
    #[serde(default)]
    pub profile_id: String,
    #[serde(default)]
    pub condition: StepCondition,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry: Option<RetrySettings>,
    /// `None` or `Some(0)` means no timeout.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl RunbookStep {
    pub fn max_attempts(&self) -> u32 {
        self.retry.map_or(1, |r| r.max_attempts())
    }

    pub fn timeout(&self) -> Option<std::time::Duration> {
        match self.timeout_secs {
            Some(secs) if secs > 0 => Some(std::time::Duration::from_secs(secs)),
            _ => None,
        }
    }
}

// ---- Triggers ----

/// The event source that starts a runbook. Replacing it is a full runbook update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    Schedule(ScheduleTrigger),
    Webhook(WebhookTrigger),
    FileWatch(FileWatchTrigger),
    Manual,
}

impl Trigger {
    pub fn kind(&self) -> TriggerSource {
        match self {
            Trigger::Schedule(_) => TriggerSource::Schedule,
            Trigger::Webhook(_) => TriggerSource::Webhook,
            Trigger::FileWatch(_) => TriggerSource::FileWatch,
            Trigger::Manual => TriggerSource::Manual,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleTrigger {
    /// Five-field cron expression (minute hour day-of-month month day-of-week).
    pub cron_expression: String,
    /// IANA time zone name; UTC when absent.
    #[serde(default)]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebhookTrigger {
    pub secret: String,
    /// CIDR block the caller must come from, e.g. `10.0.0.0/8`.
    #[serde(default)]
    pub allowed_ip_range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileWatchTrigger {
    pub path: String,
    /// Glob matched against the changed file's name.
    #[serde(default = "default_pattern")]
    pub pattern: String,
    #[serde(default)]
    pub include_subdirectories: bool,
    #[serde(default)]
    pub debounce_ms: Option<u64>,
}

fn default_pattern() -> String {
    "*".to_string()
}

fn default_true() -> bool {
    true
}

/// What caused a firing. Also used as the trigger kind of a runbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Schedule,
    Webhook,
    FileWatch,
    Manual,
    Alert,
}

impl std::fmt::Display for TriggerSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerSource::Schedule => write!(f, "schedule"),
            TriggerSource::Webhook => write!(f, "webhook"),
            TriggerSource::FileWatch => write!(f, "file_watch"),
            TriggerSource::Manual => write!(f, "manual"),
            TriggerSource::Alert => write!(f, "alert"),
        }
    }
}

/// Context handed to the executor for one firing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireContext {
    pub source: TriggerSource,
    /// Webhook body, changed file path, or alert id, depending on the source.
    #[serde(default)]
    pub payload: Option<String>,
}

impl FireContext {
    pub fn new(source: TriggerSource) -> Self {
        Self {
            source,
            payload: None,
        }
    }

    pub fn with_payload(source: TriggerSource, payload: impl Into<String>) -> Self {
        Self {
            source,
            payload: Some(payload.into()),
        }
    }
}

// ---- Executions ----

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionStatus::Running => write!(f, "running"),
            ExecutionStatus::Succeeded => write!(f, "succeeded"),
            ExecutionStatus::Failed => write!(f, "failed"),
            ExecutionStatus::Canceled => write!(f, "canceled"),
        }
    }
}

impl std::str::FromStr for ExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(ExecutionStatus::Running),
            "succeeded" => Ok(ExecutionStatus::Succeeded),
            "failed" => Ok(ExecutionStatus::Failed),
            "canceled" => Ok(ExecutionStatus::Canceled),
            _ => Err(format!("unknown execution status: {s}")),
        }
    }
}

/// Terminal state of a single step within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed,
    Skipped,
    Canceled,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Succeeded => write!(f, "succeeded"),
            StepStatus::Failed => write!(f, "failed"),
            StepStatus::Skipped => write!(f, "skipped"),
            StepStatus::Canceled => write!(f, "canceled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    pub attempts: u32,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: DateTime<Utc>,
}

impl StepResult {
    /// A result for a step that never ran (gated out or canceled before start).
    pub fn not_run(step_id: &str, status: StepStatus, reason: Option<String>) -> Self {
        Self {
            step_id: step_id.to_string(),
            status,
            attempts: 0,
            output: None,
            error: reason,
            exit_code: None,
            started_at: None,
            completed_at: Utc::now(),
        }
    }
}

/// The record of one firing of a runbook.
///
/// Created when a trigger fires, mutated only by the executor task running
/// it, immutable once its status is terminal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunbookExecution {
    pub id: String,
    pub runbook_id: String,
    pub status: ExecutionStatus,
    pub source: TriggerSource,
    /// Keyed by step ID.
    #[serde(default)]
    pub step_results: BTreeMap<String, StepResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunbookExecution {
    pub fn start(runbook_id: &str, source: TriggerSource) -> Self {
        Self {
            id: crate::id::next_id(),
            runbook_id: runbook_id.to_string(),
            status: ExecutionStatus::Running,
            source,
            step_results: BTreeMap::new(),
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn step_status(&self, step_id: &str) -> Option<StepStatus> {
        self.step_results.get(step_id).map(|r| r.status)
    }
}

/// Outcome of a fire request, whatever the trigger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerResult {
    pub success: bool,
    #[serde(default)]
    pub execution_id: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl TriggerResult {
    pub fn started(execution_id: impl Into<String>) -> Self {
        Self {
            success: true,
            execution_id: Some(execution_id.into()),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            execution_id: None,
            error_message: Some(message.into()),
        }
    }
}

// ---- Alerting ----

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use runwarden_common::types::Severity;
///
/// let sev: Severity = "error".parse().unwrap();
/// assert_eq!(sev, Severity::Error);
/// assert_eq!(sev.to_string(), "error");
/// assert!(Severity::Critical > Severity::Warning);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Info => write!(f, "info"),
            Severity::Warning => write!(f, "warning"),
            Severity::Error => write!(f, "error"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "error" => Ok(Severity::Error),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertCondition {
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Equal,
    NotEqual,
    AbsoluteChange,
    PercentChange,
}

impl AlertCondition {
    /// Change conditions compare the window's start-to-end delta instead of its average.
    pub fn is_change(self) -> bool {
        matches!(
            self,
            AlertCondition::AbsoluteChange | AlertCondition::PercentChange
        )
    }
}

impl std::fmt::Display for AlertCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            AlertCondition::GreaterThan => "greater_than",
            AlertCondition::GreaterThanOrEqual => "greater_than_or_equal",
            AlertCondition::LessThan => "less_than",
            AlertCondition::LessThanOrEqual => "less_than_or_equal",
            AlertCondition::Equal => "equal",
            AlertCondition::NotEqual => "not_equal",
            AlertCondition::AbsoluteChange => "absolute_change",
            AlertCondition::PercentChange => "percent_change",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Notification,
    Email,
    Webhook,
    RunRunbook,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Notification => write!(f, "notification"),
            ActionType::Email => write!(f, "email"),
            ActionType::Webhook => write!(f, "webhook"),
            ActionType::RunRunbook => write!(f, "run_runbook"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,
    #[serde(default)]
    pub config: serde_json::Value,
}

/// Outcome of one alert action. Failures are reported here instead of
/// aborting the remaining actions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub action_type: ActionType,
    pub success: bool,
    #[serde(default)]
    pub error_message: Option<String>,
}

impl ActionResult {
    pub fn ok(action_type: ActionType) -> Self {
        Self {
            action_type,
            success: true,
            error_message: None,
        }
    }

    pub fn failed(action_type: ActionType, message: impl Into<String>) -> Self {
        Self {
            action_type,
            success: false,
            error_message: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: String,
    pub name: String,
    pub metric_name: String,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub evaluation_window_secs: u64,
    #[serde(default)]
    pub cooldown_secs: u64,
    pub severity: Severity,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub actions: Vec<AlertAction>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl AlertRule {
    pub fn evaluation_window(&self) -> Duration {
        secs_to_duration(self.evaluation_window_secs)
    }

    pub fn cooldown(&self) -> Duration {
        secs_to_duration(self.cooldown_secs)
    }
}

fn secs_to_duration(secs: u64) -> Duration {
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .unwrap_or(Duration::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertStatus {
    Firing,
    Acknowledged,
    Resolved,
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertStatus::Firing => write!(f, "firing"),
            AlertStatus::Acknowledged => write!(f, "acknowledged"),
            AlertStatus::Resolved => write!(f, "resolved"),
        }
    }
}

impl std::str::FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "firing" => Ok(AlertStatus::Firing),
            "acknowledged" => Ok(AlertStatus::Acknowledged),
            "resolved" => Ok(AlertStatus::Resolved),
            _ => Err(format!("unknown alert status: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub rule_id: String,
    pub rule_name: String,
    pub severity: Severity,
    pub message: String,
    pub current_value: f64,
    pub threshold: f64,
    pub status: AlertStatus,
    pub fired_at: DateTime<Utc>,
    #[serde(default)]
    pub acknowledged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub acknowledgement: Option<String>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

impl Alert {
    /// Time from firing until resolution, or until `now` while still open.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        self.resolved_at.unwrap_or(now) - self.fired_at
    }

    pub fn is_open(&self) -> bool {
        self.status != AlertStatus::Resolved
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub metric_name: String,
    pub value: f64,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    pub timestamp: DateTime<Utc>,
}

/// Format a tag map as a sorted `k=v, k=v` string.
///
/// # Examples
///
/// ```
/// use std::collections::HashMap;
/// use runwarden_common::types::format_tags;
///
/// let mut tags = HashMap::new();
/// tags.insert("host".to_string(), "web-01".to_string());
/// tags.insert("env".to_string(), "prod".to_string());
/// assert_eq!(format_tags(&tags), "env=prod, host=web-01");
/// ```
pub fn format_tags(tags: &HashMap<String, String>) -> String {
    let mut pairs: Vec<String> = tags.iter().map(|(k, v)| format!("{k}={v}")).collect();
    pairs.sort();
    pairs.join(", ")
}
