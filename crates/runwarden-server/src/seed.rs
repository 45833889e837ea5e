//! Loading runbooks and alert rules from JSON seed files.
//!
//! Definitions are validated the same way the update API validates them.
//! IDs already present in storage are skipped, so seeding is repeatable.

use crate::config::{RulesSeedFile, RunbooksSeedFile};
use anyhow::Result;
use chrono::Utc;
use runwarden_executor::{graph, ThingRunner};
use runwarden_notify::{validate_actions, ActionRegistry};
use runwarden_storage::StorageEngine;
use runwarden_trigger::validate_trigger;
use serde::de::DeserializeOwned;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SeedReport {
    pub created: u32,
    pub skipped: u32,
    pub invalid: u32,
}

pub fn read_seed_file<T: DeserializeOwned>(path: &str) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("Failed to read seed file '{path}': {e}"))?;
    serde_json::from_str(&content)
        .map_err(|e| anyhow::anyhow!("Failed to parse seed file '{path}': {e}"))
}

pub fn seed_runbooks(
    storage: &dyn StorageEngine,
    runner: &dyn ThingRunner,
    seed: &RunbooksSeedFile,
) -> Result<SeedReport> {
    let mut report = SeedReport::default();
    for runbook in &seed.runbooks {
        if storage.get_runbook(&runbook.id)?.is_some() {
            tracing::warn!(runbook_id = %runbook.id, "Runbook already exists, skipping");
            report.skipped += 1;
            continue;
        }
        if let Err(e) = graph::validate(&runbook.steps) {
            tracing::error!(runbook_id = %runbook.id, error = %e, "Invalid step graph, skipping");
            report.invalid += 1;
            continue;
        }
        if let Some(step) = runbook.steps.iter().find(|s| !runner.has_thing(&s.thing_id)) {
            tracing::error!(
                runbook_id = %runbook.id,
                step_id = %step.id,
                thing_id = %step.thing_id,
                "Step targets an unknown thing, skipping"
            );
            report.invalid += 1;
            continue;
        }
        if let Err(e) = validate_trigger(&runbook.trigger) {
            tracing::error!(runbook_id = %runbook.id, error = %e, "Invalid trigger, skipping");
            report.invalid += 1;
            continue;
        }

        let mut runbook = runbook.clone();
        let now = Utc::now();
        runbook.created_at = now;
        runbook.updated_at = now;
        storage.upsert_runbook(&runbook)?;
        tracing::info!(runbook_id = %runbook.id, name = %runbook.name, "Runbook created");
        report.created += 1;
    }
    Ok(report)
}

pub fn seed_rules(storage: &dyn StorageEngine, seed: &RulesSeedFile) -> Result<SeedReport> {
    let registry = ActionRegistry::default();
    let mut report = SeedReport::default();
    for rule in &seed.rules {
        if storage.get_alert_rule(&rule.id)?.is_some() {
            tracing::warn!(rule_id = %rule.id, "Alert rule already exists, skipping");
            report.skipped += 1;
            continue;
        }
        let valid = !rule.metric_name.trim().is_empty()
            && rule.threshold.is_finite()
            && rule.evaluation_window_secs > 0;
        if !valid {
            tracing::error!(rule_id = %rule.id, "Alert rule needs a metric, a finite threshold and a window, skipping");
            report.invalid += 1;
            continue;
        }
        if let Err(e) = validate_actions(&registry, &rule.actions) {
            tracing::error!(rule_id = %rule.id, error = %format!("{e:#}"), "Invalid alert action, skipping");
            report.invalid += 1;
            continue;
        }
        storage.upsert_alert_rule(rule)?;
        tracing::info!(rule_id = %rule.id, metric = %rule.metric_name, "Alert rule created");
        report.created += 1;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ThingCommand;
    use crate::runner::ProcessThingRunner;
    use runwarden_storage::memory::MemoryStorageEngine;
    use std::collections::HashMap;

    fn runner(things: &[&str]) -> ProcessThingRunner {
        let command = ThingCommand {
            command: "true".into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
        };
        ProcessThingRunner::new(
            things
                .iter()
                .map(|t| (t.to_string(), command.clone()))
                .collect(),
        )
    }

    #[test]
    fn runbook_seed_skips_existing_and_invalid() {
        let storage = MemoryStorageEngine::new();
        let seed: RunbooksSeedFile = serde_json::from_value(serde_json::json!({
            "runbooks": [
                {
                    "id": "restart-web",
                    "name": "Restart web",
                    "trigger": {"type": "manual"},
                    "steps": [
                        {"id": "drain", "thing_id": "lb-drain"},
                        {"id": "restart", "thing_id": "restart", "depends_on": ["drain"]}
                    ]
                },
                {
                    "id": "loop",
                    "name": "Cyclic",
                    "trigger": {"type": "manual"},
                    "steps": [
                        {"id": "a", "thing_id": "t", "depends_on": ["b"]},
                        {"id": "b", "thing_id": "t", "depends_on": ["a"]}
                    ]
                },
                {
                    "id": "haunted",
                    "name": "Unknown thing",
                    "trigger": {"type": "manual"},
                    "steps": [{"id": "boo", "thing_id": "ghost"}]
                },
                {
                    "id": "bad-cron",
                    "name": "Bad cron",
                    "trigger": {"type": "schedule", "cron_expression": "not a cron"}
                }
            ]
        }))
        .unwrap();

        let runner = runner(&["lb-drain", "restart", "t"]);
        let first = seed_runbooks(&storage, &runner, &seed).unwrap();
        assert_eq!(first, SeedReport { created: 1, skipped: 0, invalid: 3 });
        assert!(storage.get_runbook("restart-web").unwrap().is_some());
        assert!(storage.get_runbook("loop").unwrap().is_none());
        assert!(storage.get_runbook("haunted").unwrap().is_none());

        let second = seed_runbooks(&storage, &runner, &seed).unwrap();
        assert_eq!(second, SeedReport { created: 0, skipped: 1, invalid: 3 });
    }

    #[test]
    fn rule_seed_validates_actions() {
        let storage = MemoryStorageEngine::new();
        let seed: RulesSeedFile = serde_json::from_value(serde_json::json!({
            "rules": [
                {
                    "id": "cpu-high",
                    "name": "CPU high",
                    "metric_name": "cpu.usage",
                    "condition": "greater_than",
                    "threshold": 90.0,
                    "evaluation_window_secs": 300,
                    "severity": "critical",
                    "actions": [{"type": "notification"}]
                },
                {
                    "id": "bad-hook",
                    "name": "Bad hook",
                    "metric_name": "disk.free",
                    "condition": "less_than",
                    "threshold": 5.0,
                    "evaluation_window_secs": 60,
                    "severity": "warning",
                    "actions": [{"type": "webhook", "config": {}}]
                }
            ]
        }))
        .unwrap();

        let report = seed_rules(&storage, &seed).unwrap();
        assert_eq!(report, SeedReport { created: 1, skipped: 0, invalid: 1 });
        assert_eq!(storage.list_alert_rules().unwrap().len(), 1);
    }
}
