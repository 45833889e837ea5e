use crate::engine::SqliteStorageEngine;
use crate::memory::MemoryStorageEngine;
use crate::{AlertQuery, ExecutionQuery, MetricQuery, StorageEngine};
use chrono::{Duration, Utc};
use runwarden_common::types::*;
use std::collections::HashMap;
use tempfile::TempDir;

fn engines() -> (TempDir, Vec<Box<dyn StorageEngine>>) {
    let dir = TempDir::new().unwrap();
    let sqlite = SqliteStorageEngine::new(dir.path()).unwrap();
    (dir, vec![Box::new(sqlite), Box::new(MemoryStorageEngine::new())])
}

fn make_runbook(id: &str) -> Runbook {
    Runbook {
        id: id.into(),
        name: format!("{id} runbook"),
        description: String::new(),
        steps: vec![RunbookStep {
            id: "a".into(),
            name: "first".into(),
            thing_id: "backup".into(),
            profile_id: "default".into(),
            condition: StepCondition::OnSuccess,
            depends_on: vec![],
            retry: None,
            timeout_secs: None,
            parameters: HashMap::new(),
        }],
        trigger: Trigger::Manual,
        enabled: true,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn make_execution(runbook_id: &str, status: ExecutionStatus, age_hours: i64) -> RunbookExecution {
    let mut execution = RunbookExecution::start(runbook_id, TriggerSource::Manual);
    execution.status = status;
    execution.started_at = Utc::now() - Duration::hours(age_hours);
    execution
}

fn make_alert(rule_id: &str, status: AlertStatus, age_minutes: i64) -> Alert {
    Alert {
        id: runwarden_common::id::next_id(),
        rule_id: rule_id.into(),
        rule_name: rule_id.into(),
        severity: Severity::Warning,
        message: "value above threshold".into(),
        current_value: 95.0,
        threshold: 90.0,
        status,
        fired_at: Utc::now() - Duration::minutes(age_minutes),
        acknowledged_at: None,
        acknowledgement: None,
        resolved_at: None,
    }
}

fn make_sample(metric: &str, value: f64, tags: &[(&str, &str)], age_secs: i64) -> MetricSample {
    MetricSample {
        metric_name: metric.into(),
        value,
        tags: tags
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        timestamp: Utc::now() - Duration::seconds(age_secs),
    }
}

#[test]
fn runbook_upsert_replaces_and_delete_removes() {
    let (_dir, engines) = engines();
    for store in engines {
        let mut runbook = make_runbook("nightly");
        store.upsert_runbook(&runbook).unwrap();
        runbook.enabled = false;
        store.upsert_runbook(&runbook).unwrap();

        let loaded = store.get_runbook("nightly").unwrap().unwrap();
        assert!(!loaded.enabled);
        assert_eq!(store.list_runbooks().unwrap().len(), 1);

        assert!(store.delete_runbook("nightly").unwrap());
        assert!(!store.delete_runbook("nightly").unwrap());
        assert!(store.get_runbook("nightly").unwrap().is_none());
    }
}

#[test]
fn execution_save_is_an_upsert() {
    let (_dir, engines) = engines();
    for store in engines {
        let mut execution = make_execution("nightly", ExecutionStatus::Running, 0);
        store.save_execution(&execution).unwrap();

        execution.step_results.insert(
            "a".into(),
            StepResult::not_run("a", StepStatus::Skipped, None),
        );
        execution.status = ExecutionStatus::Succeeded;
        store.save_execution(&execution).unwrap();

        let loaded = store.get_execution(&execution.id).unwrap().unwrap();
        assert_eq!(loaded.status, ExecutionStatus::Succeeded);
        assert_eq!(loaded.step_status("a"), Some(StepStatus::Skipped));
        assert_eq!(
            store.query_executions(&ExecutionQuery::default()).unwrap().len(),
            1
        );
    }
}

#[test]
fn execution_query_filters_and_orders_newest_first() {
    let (_dir, engines) = engines();
    for store in engines {
        let old = make_execution("nightly", ExecutionStatus::Failed, 5);
        let recent = make_execution("nightly", ExecutionStatus::Succeeded, 1);
        let other = make_execution("weekly", ExecutionStatus::Failed, 2);
        for e in [&old, &recent, &other] {
            store.save_execution(e).unwrap();
        }

        let by_runbook = store
            .query_executions(&ExecutionQuery {
                runbook_id: Some("nightly".into()),
                ..Default::default()
            })
            .unwrap();
        let ids: Vec<&str> = by_runbook.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec![recent.id.as_str(), old.id.as_str()]);

        let failed = store
            .query_executions(&ExecutionQuery {
                status: Some(ExecutionStatus::Failed),
                from: Some(Utc::now() - Duration::hours(3)),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, other.id);

        let limited = store
            .query_executions(&ExecutionQuery {
                limit: 2,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(limited.len(), 2);
    }
}

#[test]
fn cleanup_keeps_running_executions() {
    let (_dir, engines) = engines();
    for store in engines {
        let finished = make_execution("nightly", ExecutionStatus::Succeeded, 48);
        let stuck = make_execution("nightly", ExecutionStatus::Running, 48);
        let fresh = make_execution("nightly", ExecutionStatus::Failed, 1);
        for e in [&finished, &stuck, &fresh] {
            store.save_execution(e).unwrap();
        }

        let removed = store
            .cleanup_executions(Utc::now() - Duration::hours(24))
            .unwrap();
        assert_eq!(removed, 1);
        assert!(store.get_execution(&finished.id).unwrap().is_none());
        assert!(store.get_execution(&stuck.id).unwrap().is_some());
        assert!(store.get_execution(&fresh.id).unwrap().is_some());
    }
}

#[test]
fn alert_query_filters_by_rule_and_status() {
    let (_dir, engines) = engines();
    for store in engines {
        let firing = make_alert("cpu", AlertStatus::Firing, 5);
        let resolved = make_alert("cpu", AlertStatus::Resolved, 30);
        let disk = make_alert("disk", AlertStatus::Firing, 1);
        for a in [&firing, &resolved, &disk] {
            store.save_alert(a).unwrap();
        }

        let cpu = store
            .query_alerts(&AlertQuery {
                rule_id: Some("cpu".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(cpu.len(), 2);
        assert_eq!(cpu[0].id, firing.id);

        let open = store
            .query_alerts(&AlertQuery {
                status: Some(AlertStatus::Firing),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(open.len(), 2);
        assert!(open.iter().all(|a| a.is_open()));
    }
}

#[test]
fn samples_match_on_tag_superset_and_time_range() {
    let (_dir, engines) = engines();
    for store in engines {
        store
            .write_samples(&[
                make_sample("cpu.usage", 50.0, &[("host", "web-01"), ("env", "prod")], 90),
                make_sample("cpu.usage", 70.0, &[("host", "web-01")], 30),
                make_sample("cpu.usage", 99.0, &[("host", "web-02")], 20),
                make_sample("cpu.usage", 10.0, &[("host", "web-01")], 600),
                make_sample("mem.usage", 40.0, &[("host", "web-01")], 10),
            ])
            .unwrap();

        let now = Utc::now();
        let samples = store
            .query_samples(&MetricQuery {
                metric_name: "cpu.usage".into(),
                tags: HashMap::from([("host".to_string(), "web-01".to_string())]),
                from: now - Duration::seconds(300),
                to: now,
            })
            .unwrap();
        let values: Vec<f64> = samples.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![50.0, 70.0]);

        let untagged = store
            .query_samples(&MetricQuery {
                metric_name: "cpu.usage".into(),
                tags: HashMap::new(),
                from: now - Duration::seconds(300),
                to: now,
            })
            .unwrap();
        assert_eq!(untagged.len(), 3);
    }
}

#[test]
fn sqlite_engine_persists_across_reopen() {
    let dir = TempDir::new().unwrap();
    {
        let store = SqliteStorageEngine::new(dir.path()).unwrap();
        store.upsert_runbook(&make_runbook("nightly")).unwrap();
    }
    let store = SqliteStorageEngine::new(dir.path()).unwrap();
    let runbook = store.get_runbook("nightly").unwrap().unwrap();
    assert_eq!(runbook.steps.len(), 1);
    assert_eq!(runbook.trigger, Trigger::Manual);
}
