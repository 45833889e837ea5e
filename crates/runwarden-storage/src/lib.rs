//! Persistence layer for runbooks, executions, alert rules, alerts and
//! metric samples.
//!
//! [`engine::SqliteStorageEngine`] keeps everything in a single WAL-mode
//! SQLite database with JSON-encoded definitions; [`memory::MemoryStorageEngine`]
//! is a lock-protected in-process variant used by tests and ephemeral
//! deployments.

pub mod engine;
pub mod memory;

#[cfg(test)]
mod tests;

use anyhow::Result;
use chrono::{DateTime, Utc};
use runwarden_common::types::{
    Alert, AlertRule, AlertStatus, ExecutionStatus, MetricSample, Runbook, RunbookExecution,
};
use std::collections::HashMap;

/// Filter for execution reporting queries. `None` fields match everything.
///
/// # Examples
///
/// ```
/// use runwarden_storage::ExecutionQuery;
/// use runwarden_common::types::ExecutionStatus;
///
/// let query = ExecutionQuery {
///     runbook_id: Some("nightly-backup".into()),
///     status: Some(ExecutionStatus::Failed),
///     ..Default::default()
/// };
/// assert_eq!(query.limit, 100);
/// ```
#[derive(Debug, Clone)]
pub struct ExecutionQuery {
    pub runbook_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    /// Inclusive lower bound on `started_at`.
    pub from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `started_at`.
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for ExecutionQuery {
    fn default() -> Self {
        Self {
            runbook_id: None,
            status: None,
            from: None,
            to: None,
            limit: 100,
        }
    }
}

/// Filter for alert reporting queries, matched against `fired_at`.
#[derive(Debug, Clone)]
pub struct AlertQuery {
    pub rule_id: Option<String>,
    pub status: Option<AlertStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: usize,
}

impl Default for AlertQuery {
    fn default() -> Self {
        Self {
            rule_id: None,
            status: None,
            from: None,
            to: None,
            limit: 100,
        }
    }
}

/// Samples of one metric in `[from, to]` whose tags include every pair in `tags`.
#[derive(Debug, Clone)]
pub struct MetricQuery {
    pub metric_name: String,
    pub tags: HashMap<String, String>,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl MetricQuery {
    pub(crate) fn matches(&self, sample: &MetricSample) -> bool {
        sample.metric_name == self.metric_name
            && sample.timestamp >= self.from
            && sample.timestamp <= self.to
            && self.tags_match(&sample.tags)
    }

    pub(crate) fn tags_match(&self, tags: &HashMap<String, String>) -> bool {
        self.tags
            .iter()
            .all(|(k, v)| tags.get(k).is_some_and(|sv| sv == v))
    }
}

/// Persistence backend shared by the executor, trigger service, alert
/// engine and HTTP API.
///
/// Implementations must be safe to share across threads because every
/// background task reads definitions concurrently. Results keyed by ID
/// are upserts: saving an execution or alert twice replaces the earlier
/// record.
pub trait StorageEngine: Send + Sync {
    fn upsert_runbook(&self, runbook: &Runbook) -> Result<()>;

    fn get_runbook(&self, id: &str) -> Result<Option<Runbook>>;

    fn list_runbooks(&self) -> Result<Vec<Runbook>>;

    /// Returns true if a runbook was removed.
    fn delete_runbook(&self, id: &str) -> Result<bool>;

    /// Persists an execution snapshot. Called after every step transition so
    /// partial progress survives a crash.
    fn save_execution(&self, execution: &RunbookExecution) -> Result<()>;

    fn get_execution(&self, id: &str) -> Result<Option<RunbookExecution>>;

    /// Newest first.
    fn query_executions(&self, query: &ExecutionQuery) -> Result<Vec<RunbookExecution>>;

    /// Removes terminal executions that started before `before`. Returns the
    /// number removed.
    fn cleanup_executions(&self, before: DateTime<Utc>) -> Result<u64>;

    fn upsert_alert_rule(&self, rule: &AlertRule) -> Result<()>;

    fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRule>>;

    fn list_alert_rules(&self) -> Result<Vec<AlertRule>>;

    fn delete_alert_rule(&self, id: &str) -> Result<bool>;

    fn save_alert(&self, alert: &Alert) -> Result<()>;

    fn get_alert(&self, id: &str) -> Result<Option<Alert>>;

    /// Newest first.
    fn query_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>>;

    fn write_samples(&self, samples: &[MetricSample]) -> Result<()>;

    /// Oldest first.
    fn query_samples(&self, query: &MetricQuery) -> Result<Vec<MetricSample>>;
}

pub(crate) fn execution_matches(query: &ExecutionQuery, execution: &RunbookExecution) -> bool {
    query
        .runbook_id
        .as_ref()
        .is_none_or(|id| *id == execution.runbook_id)
        && query.status.is_none_or(|s| s == execution.status)
        && query.from.is_none_or(|from| execution.started_at >= from)
        && query.to.is_none_or(|to| execution.started_at <= to)
}

pub(crate) fn alert_matches(query: &AlertQuery, alert: &Alert) -> bool {
    query.rule_id.as_ref().is_none_or(|id| *id == alert.rule_id)
        && query.status.is_none_or(|s| s == alert.status)
        && query.from.is_none_or(|from| alert.fired_at >= from)
        && query.to.is_none_or(|to| alert.fired_at <= to)
}
