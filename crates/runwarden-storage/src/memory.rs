use crate::{alert_matches, execution_matches, AlertQuery, ExecutionQuery, MetricQuery, StorageEngine};
use anyhow::Result;
use chrono::{DateTime, Utc};
use runwarden_common::types::{Alert, AlertRule, MetricSample, Runbook, RunbookExecution};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Default)]
struct Tables {
    runbooks: BTreeMap<String, Runbook>,
    executions: BTreeMap<String, RunbookExecution>,
    rules: BTreeMap<String, AlertRule>,
    alerts: BTreeMap<String, Alert>,
    samples: Vec<MetricSample>,
}

/// Volatile storage; everything is lost when the process exits.
#[derive(Default)]
pub struct MemoryStorageEngine {
    tables: RwLock<Tables>,
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Tables> {
        self.tables
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl StorageEngine for MemoryStorageEngine {
    fn upsert_runbook(&self, runbook: &Runbook) -> Result<()> {
        self.write()
            .runbooks
            .insert(runbook.id.clone(), runbook.clone());
        Ok(())
    }

    fn get_runbook(&self, id: &str) -> Result<Option<Runbook>> {
        Ok(self.read().runbooks.get(id).cloned())
    }

    fn list_runbooks(&self) -> Result<Vec<Runbook>> {
        Ok(self.read().runbooks.values().cloned().collect())
    }

    fn delete_runbook(&self, id: &str) -> Result<bool> {
        Ok(self.write().runbooks.remove(id).is_some())
    }

    fn save_execution(&self, execution: &RunbookExecution) -> Result<()> {
        self.write()
            .executions
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    fn get_execution(&self, id: &str) -> Result<Option<RunbookExecution>> {
        Ok(self.read().executions.get(id).cloned())
    }

    fn query_executions(&self, query: &ExecutionQuery) -> Result<Vec<RunbookExecution>> {
        let tables = self.read();
        let mut out: Vec<RunbookExecution> = tables
            .executions
            .values()
            .filter(|e| execution_matches(query, e))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.id.cmp(&a.id)));
        out.truncate(query.limit);
        Ok(out)
    }

    fn cleanup_executions(&self, before: DateTime<Utc>) -> Result<u64> {
        let mut tables = self.write();
        let len = tables.executions.len();
        tables
            .executions
            .retain(|_, e| !(e.is_terminal() && e.started_at < before));
        Ok((len - tables.executions.len()) as u64)
    }

    fn upsert_alert_rule(&self, rule: &AlertRule) -> Result<()> {
        self.write().rules.insert(rule.id.clone(), rule.clone());
        Ok(())
    }

    fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        Ok(self.read().rules.get(id).cloned())
    }

    fn list_alert_rules(&self) -> Result<Vec<AlertRule>> {
        Ok(self.read().rules.values().cloned().collect())
    }

    fn delete_alert_rule(&self, id: &str) -> Result<bool> {
        Ok(self.write().rules.remove(id).is_some())
    }

    fn save_alert(&self, alert: &Alert) -> Result<()> {
        self.write().alerts.insert(alert.id.clone(), alert.clone());
        Ok(())
    }

    fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        Ok(self.read().alerts.get(id).cloned())
    }

    fn query_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        let tables = self.read();
        let mut out: Vec<Alert> = tables
            .alerts
            .values()
            .filter(|a| alert_matches(query, a))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.fired_at.cmp(&a.fired_at).then_with(|| b.id.cmp(&a.id)));
        out.truncate(query.limit);
        Ok(out)
    }

    fn write_samples(&self, samples: &[MetricSample]) -> Result<()> {
        self.write().samples.extend_from_slice(samples);
        Ok(())
    }

    fn query_samples(&self, query: &MetricQuery) -> Result<Vec<MetricSample>> {
        let tables = self.read();
        let mut out: Vec<MetricSample> = tables
            .samples
            .iter()
            .filter(|s| query.matches(s))
            .cloned()
            .collect();
        out.sort_by_key(|s| s.timestamp);
        Ok(out)
    }
}
