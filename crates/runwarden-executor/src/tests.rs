use crate::executor::{PARAM_TRIGGER_PAYLOAD, PARAM_TRIGGER_SOURCE};
use crate::*;
use async_trait::async_trait;
use runwarden_common::events::{EventBus, SystemEvent};
use runwarden_common::types::*;
use runwarden_common::RunbookLauncher;
use runwarden_storage::memory::MemoryStorageEngine;
use runwarden_storage::{ExecutionQuery, StorageEngine};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Thing runner driven by per-thing scripts. Unscripted calls succeed.
#[derive(Default)]
struct ScriptedRunner {
    scripts: Mutex<HashMap<String, VecDeque<bool>>>,
    always_fail: Mutex<Vec<String>>,
    delays: Mutex<HashMap<String, Duration>>,
    log: Mutex<Vec<String>>,
    params: Mutex<Vec<HashMap<String, String>>>,
    unknown: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    fn fail_always(&self, thing: &str) {
        self.always_fail.lock().unwrap().push(thing.to_string());
    }

    fn script(&self, thing: &str, outcomes: &[bool]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(thing.to_string(), outcomes.iter().copied().collect());
    }

    /// Makes `thing` unknown to the runner.
    fn forget(&self, thing: &str) {
        self.unknown.lock().unwrap().push(thing.to_string());
    }

    fn delay(&self, thing: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(thing.to_string(), delay);
    }

    fn calls(&self, thing: &str) -> usize {
        let start = format!("start:{thing}");
        self.log.lock().unwrap().iter().filter(|e| **e == start).count()
    }

    fn position(&self, entry: &str) -> usize {
        self.log
            .lock()
            .unwrap()
            .iter()
            .position(|e| e == entry)
            .unwrap_or_else(|| panic!("{entry} not logged"))
    }
}

#[async_trait]
impl ThingRunner for ScriptedRunner {
    fn has_thing(&self, thing_id: &str) -> bool {
        !self.unknown.lock().unwrap().iter().any(|t| t == thing_id)
    }

    async fn execute(
        &self,
        thing_id: &str,
        _profile_id: &str,
        parameters: &HashMap<String, String>,
        cancel: CancellationToken,
    ) -> anyhow::Result<ThingOutcome> {
        self.log.lock().unwrap().push(format!("start:{thing_id}"));
        self.params.lock().unwrap().push(parameters.clone());

        let delay = self.delays.lock().unwrap().get(thing_id).copied();
        if let Some(delay) = delay {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => anyhow::bail!("canceled"),
            }
        }

        let success = if self.always_fail.lock().unwrap().iter().any(|t| t == thing_id) {
            false
        } else {
            self.scripts
                .lock()
                .unwrap()
                .get_mut(thing_id)
                .and_then(|s| s.pop_front())
                .unwrap_or(true)
        };
        self.log.lock().unwrap().push(format!("end:{thing_id}"));

        Ok(if success {
            ThingOutcome::succeeded(format!("{thing_id} ok"))
        } else {
            ThingOutcome::failed(format!("{thing_id} exploded"), Some(1))
        })
    }
}

fn step(id: &str, condition: StepCondition, deps: &[&str]) -> RunbookStep {
    RunbookStep {
        id: id.into(),
        name: id.into(),
        thing_id: id.into(),
        profile_id: "default".into(),
        condition,
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        retry: None,
        timeout_secs: None,
        parameters: HashMap::new(),
    }
}

fn runbook(id: &str, steps: Vec<RunbookStep>) -> Runbook {
    Runbook {
        id: id.into(),
        name: id.into(),
        description: String::new(),
        steps,
        trigger: Trigger::Manual,
        enabled: true,
        created_at: chrono::Utc::now(),
        updated_at: chrono::Utc::now(),
    }
}

struct Harness {
    storage: Arc<MemoryStorageEngine>,
    runner: Arc<ScriptedRunner>,
    events: EventBus,
    executor: RunbookExecutor,
}

fn harness(config: ExecutorConfig) -> Harness {
    let storage = Arc::new(MemoryStorageEngine::new());
    let runner = Arc::new(ScriptedRunner::default());
    let events = EventBus::default();
    let executor = RunbookExecutor::new(storage.clone(), runner.clone(), events.clone(), config);
    Harness {
        storage,
        runner,
        events,
        executor,
    }
}

fn manual() -> FireContext {
    FireContext::new(TriggerSource::Manual)
}

#[tokio::test]
async fn on_failure_branch_is_skipped_when_dependency_succeeds() {
    let h = harness(ExecutorConfig::default());
    h.storage
        .upsert_runbook(&runbook(
            "deploy",
            vec![
                step("a", StepCondition::OnSuccess, &[]),
                step("b", StepCondition::OnSuccess, &["a"]),
                step("c", StepCondition::OnFailure, &["a"]),
            ],
        ))
        .unwrap();

    let execution = h.executor.execute("deploy", manual()).await.unwrap();

    assert_eq!(execution.status, ExecutionStatus::Succeeded);
    assert_eq!(execution.step_status("a"), Some(StepStatus::Succeeded));
    assert_eq!(execution.step_status("b"), Some(StepStatus::Succeeded));
    assert_eq!(execution.step_status("c"), Some(StepStatus::Skipped));
    assert_eq!(h.runner.calls("c"), 0);
    assert!(execution.completed_at.is_some());
}

#[tokio::test]
async fn exhausted_retries_fail_step_and_run_failure_branch() {
    let h = harness(ExecutorConfig::default());
    let mut a = step("a", StepCondition::OnSuccess, &[]);
    a.retry = Some(RetrySettings {
        enable_retry: true,
        max_retries: 2,
    });
    h.storage
        .upsert_runbook(&runbook(
            "deploy",
            vec![
                a,
                step("b", StepCondition::OnSuccess, &["a"]),
                step("c", StepCondition::OnFailure, &["a"]),
            ],
        ))
        .unwrap();
    h.runner.fail_always("a");

    let execution = h.executor.execute("deploy", manual()).await.unwrap();

    assert_eq!(h.runner.calls("a"), 3);
    let a = &execution.step_results["a"];
    assert_eq!(a.status, StepStatus::Failed);
    assert_eq!(a.attempts, 3);
    assert_eq!(a.exit_code, Some(1));
    assert_eq!(a.error.as_deref(), Some("a exploded"));
    assert_eq!(execution.step_status("b"), Some(StepStatus::Skipped));
    assert_eq!(execution.step_status("c"), Some(StepStatus::Succeeded));
    assert_eq!(execution.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn retry_stops_at_first_success() {
    let h = harness(ExecutorConfig::default());
    let mut a = step("a", StepCondition::OnSuccess, &[]);
    a.retry = Some(RetrySettings {
        enable_retry: true,
        max_retries: 5,
    });
    h.storage.upsert_runbook(&runbook("flaky", vec![a])).unwrap();
    h.runner.script("a", &[false, true]);

    let execution = h.executor.execute("flaky", manual()).await.unwrap();

    assert_eq!(execution.step_results["a"].attempts, 2);
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
}

#[tokio::test]
async fn invalid_graphs_are_rejected_before_any_step_runs() {
    let h = harness(ExecutorConfig::default());
    h.storage
        .upsert_runbook(&runbook(
            "cyclic",
            vec![
                step("a", StepCondition::OnSuccess, &["b"]),
                step("b", StepCondition::OnSuccess, &["a"]),
            ],
        ))
        .unwrap();
    h.storage
        .upsert_runbook(&runbook(
            "dangling",
            vec![step("a", StepCondition::OnSuccess, &["missing"])],
        ))
        .unwrap();

    for id in ["cyclic", "dangling"] {
        match h.executor.execute(id, manual()).await {
            Err(ExecutorError::CyclicGraph(_)) => {}
            other => panic!("expected graph rejection for {id}, got {other:?}"),
        }
    }

    assert!(h.runner.log.lock().unwrap().is_empty());
    assert!(h
        .storage
        .query_executions(&ExecutionQuery::default())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn unknown_thing_is_rejected_without_attempts() {
    let h = harness(ExecutorConfig::default());
    h.runner.forget("ghost");
    let mut ghost = step("ghost", StepCondition::OnSuccess, &["a"]);
    ghost.retry = Some(RetrySettings {
        enable_retry: true,
        max_retries: 2,
    });
    let rb = runbook("haunted", vec![step("a", StepCondition::OnSuccess, &[]), ghost]);
    h.storage.upsert_runbook(&rb).unwrap();

    match h.executor.validate(&rb.steps) {
        Err(ExecutorError::UnknownThing { step, thing }) => {
            assert_eq!(step, "ghost");
            assert_eq!(thing, "ghost");
        }
        other => panic!("expected unknown thing, got {other:?}"),
    }
    assert!(matches!(
        h.executor.execute("haunted", manual()).await,
        Err(ExecutorError::UnknownThing { .. })
    ));

    let result = h.executor.fire("haunted", manual()).await;
    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("unknown thing 'ghost'"));

    assert_eq!(h.runner.calls("a"), 0);
    assert_eq!(h.runner.calls("ghost"), 0);
    assert!(h
        .storage
        .query_executions(&ExecutionQuery::default())
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn missing_and_disabled_runbooks_are_rejected() {
    let h = harness(ExecutorConfig::default());
    let mut disabled = runbook("off", vec![step("a", StepCondition::OnSuccess, &[])]);
    disabled.enabled = false;
    h.storage.upsert_runbook(&disabled).unwrap();

    assert!(matches!(
        h.executor.execute("ghost", manual()).await,
        Err(ExecutorError::RunbookNotFound(_))
    ));
    assert!(matches!(
        h.executor.execute("off", manual()).await,
        Err(ExecutorError::DisabledRunbook(_))
    ));

    let result = h.executor.fire("off", manual()).await;
    assert!(!result.success);
    assert!(result.execution_id.is_none());
    assert!(result.error_message.unwrap().contains("disabled"));
}

#[tokio::test(start_paused = true)]
async fn steps_start_only_after_dependencies_finish() {
    let h = harness(ExecutorConfig::default());
    h.storage
        .upsert_runbook(&runbook(
            "diamond",
            vec![
                step("a", StepCondition::OnSuccess, &[]),
                step("b", StepCondition::OnSuccess, &["a"]),
                step("c", StepCondition::OnSuccess, &["a"]),
                step("d", StepCondition::OnSuccess, &["b", "c"]),
            ],
        ))
        .unwrap();
    h.runner.delay("a", Duration::from_secs(1));
    h.runner.delay("b", Duration::from_secs(5));
    h.runner.delay("c", Duration::from_secs(2));

    let execution = h.executor.execute("diamond", manual()).await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Succeeded);

    let r = &h.runner;
    assert!(r.position("end:a") < r.position("start:b"));
    assert!(r.position("end:a") < r.position("start:c"));
    // b and c overlap.
    assert!(r.position("start:c") < r.position("end:b"));
    assert!(r.position("end:b") < r.position("start:d"));
    assert!(r.position("end:c") < r.position("start:d"));
}

#[tokio::test]
async fn skip_propagates_to_on_success_but_not_always() {
    let h = harness(ExecutorConfig::default());
    h.storage
        .upsert_runbook(&runbook(
            "cleanup",
            vec![
                step("a", StepCondition::OnSuccess, &[]),
                step("rollback", StepCondition::OnFailure, &["a"]),
                step("verify", StepCondition::OnSuccess, &["rollback"]),
                step("report", StepCondition::Always, &["rollback"]),
            ],
        ))
        .unwrap();

    let execution = h.executor.execute("cleanup", manual()).await.unwrap();

    assert_eq!(execution.step_status("rollback"), Some(StepStatus::Skipped));
    assert_eq!(execution.step_status("verify"), Some(StepStatus::Skipped));
    assert_eq!(execution.step_status("report"), Some(StepStatus::Succeeded));
    assert_eq!(execution.status, ExecutionStatus::Succeeded);
}

#[tokio::test(start_paused = true)]
async fn timeout_counts_as_failed_attempt() {
    let h = harness(ExecutorConfig::default());
    let mut slow = step("slow", StepCondition::OnSuccess, &[]);
    slow.timeout_secs = Some(1);
    slow.retry = Some(RetrySettings {
        enable_retry: true,
        max_retries: 1,
    });
    h.storage.upsert_runbook(&runbook("slow", vec![slow])).unwrap();
    h.runner.delay("slow", Duration::from_secs(30));

    let execution = h.executor.execute("slow", manual()).await.unwrap();

    let result = &execution.step_results["slow"];
    assert_eq!(result.status, StepStatus::Failed);
    assert_eq!(result.attempts, 2);
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(execution.status, ExecutionStatus::Failed);
}

#[tokio::test(start_paused = true)]
async fn backoff_delays_retries() {
    let h = harness(ExecutorConfig {
        backoff: BackoffStrategy::Fixed(Duration::from_secs(10)),
        ..Default::default()
    });
    let mut a = step("a", StepCondition::OnSuccess, &[]);
    a.retry = Some(RetrySettings {
        enable_retry: true,
        max_retries: 2,
    });
    h.storage.upsert_runbook(&runbook("slow-retry", vec![a])).unwrap();
    h.runner.fail_always("a");

    let before = tokio::time::Instant::now();
    h.executor.execute("slow-retry", manual()).await.unwrap();
    assert!(before.elapsed() >= Duration::from_secs(20));
}

#[tokio::test(start_paused = true)]
async fn cancel_marks_running_and_pending_steps_canceled() {
    let h = harness(ExecutorConfig::default());
    h.storage
        .upsert_runbook(&runbook(
            "long",
            vec![
                step("quick", StepCondition::OnSuccess, &[]),
                step("long", StepCondition::OnSuccess, &["quick"]),
                step("after", StepCondition::Always, &["long"]),
            ],
        ))
        .unwrap();
    h.runner.delay("long", Duration::from_secs(3600));

    let started = h.executor.start("long", manual()).unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(h.executor.cancel(&started.execution_id));

    let execution = started.handle.await.unwrap();
    assert_eq!(execution.status, ExecutionStatus::Canceled);
    assert_eq!(execution.step_status("quick"), Some(StepStatus::Succeeded));
    assert_eq!(execution.step_status("long"), Some(StepStatus::Canceled));
    assert_eq!(execution.step_status("after"), Some(StepStatus::Canceled));
    assert_eq!(h.runner.calls("after"), 0);
    assert!(!h.executor.cancel(&started.execution_id));

    let stored = h.storage.get_execution(&started.execution_id).unwrap().unwrap();
    assert_eq!(stored.status, ExecutionStatus::Canceled);
}

#[tokio::test(start_paused = true)]
async fn reject_policy_refuses_overlapping_fire() {
    let h = harness(ExecutorConfig::default());
    h.storage
        .upsert_runbook(&runbook("nightly", vec![step("a", StepCondition::OnSuccess, &[])]))
        .unwrap();
    h.runner.delay("a", Duration::from_secs(60));

    let first = h.executor.fire("nightly", manual()).await;
    assert!(first.success);

    let second = h.executor.fire("nightly", manual()).await;
    assert!(!second.success);
    assert!(second.error_message.unwrap().contains("already"));

    tokio::time::sleep(Duration::from_secs(61)).await;
    let third = h.executor.fire("nightly", manual()).await;
    assert!(third.success);
}

#[tokio::test(start_paused = true)]
async fn queue_policy_serializes_overlapping_fire() {
    let h = harness(ExecutorConfig {
        concurrency: ConcurrencyPolicy::Queue,
        ..Default::default()
    });
    h.storage
        .upsert_runbook(&runbook("nightly", vec![step("a", StepCondition::OnSuccess, &[])]))
        .unwrap();
    h.runner.delay("a", Duration::from_secs(10));

    let first = h.executor.start("nightly", manual()).unwrap();
    let second = h.executor.start("nightly", manual()).unwrap();

    let first = first.handle.await.unwrap();
    let second = second.handle.await.unwrap();
    assert_eq!(first.status, ExecutionStatus::Succeeded);
    assert_eq!(second.status, ExecutionStatus::Succeeded);
    assert_eq!(
        *h.runner.log.lock().unwrap(),
        vec!["start:a", "end:a", "start:a", "end:a"]
    );
}

#[tokio::test]
async fn steps_receive_parameters_and_trigger_context() {
    let h = harness(ExecutorConfig::default());
    let mut a = step("a", StepCondition::OnSuccess, &[]);
    a.parameters.insert("region".into(), "eu-west-1".into());
    h.storage.upsert_runbook(&runbook("hook", vec![a])).unwrap();

    h.executor
        .execute(
            "hook",
            FireContext::with_payload(TriggerSource::Webhook, r#"{"event":"push"}"#),
        )
        .await
        .unwrap();

    let params = h.runner.params.lock().unwrap()[0].clone();
    assert_eq!(params["region"], "eu-west-1");
    assert_eq!(params[PARAM_TRIGGER_SOURCE], "webhook");
    assert_eq!(params[PARAM_TRIGGER_PAYLOAD], r#"{"event":"push"}"#);
}

#[tokio::test]
async fn lifecycle_events_are_published() {
    let h = harness(ExecutorConfig::default());
    let mut rx = h.events.subscribe();
    h.storage
        .upsert_runbook(&runbook("evt", vec![step("a", StepCondition::OnSuccess, &[])]))
        .unwrap();

    let execution = h.executor.execute("evt", manual()).await.unwrap();

    let mut kinds = Vec::new();
    while let Ok(event) = rx.try_recv() {
        kinds.push(match event {
            SystemEvent::ExecutionStarted { execution_id, .. } => {
                assert_eq!(execution_id, execution.id);
                "started"
            }
            SystemEvent::StepFinished { step_id, .. } => {
                assert_eq!(step_id, "a");
                "step"
            }
            SystemEvent::ExecutionFinished { status, .. } => {
                assert_eq!(status, ExecutionStatus::Succeeded);
                "finished"
            }
            _ => "other",
        });
    }
    assert_eq!(kinds, vec!["started", "step", "finished"]);
}

#[tokio::test]
async fn recover_interrupted_cancels_stale_running_executions() {
    let h = harness(ExecutorConfig::default());
    h.storage
        .upsert_runbook(&runbook(
            "nightly",
            vec![
                step("a", StepCondition::OnSuccess, &[]),
                step("b", StepCondition::OnSuccess, &["a"]),
            ],
        ))
        .unwrap();
    let mut stale = RunbookExecution::start("nightly", TriggerSource::Schedule);
    stale.step_results.insert(
        "a".into(),
        StepResult {
            step_id: "a".into(),
            status: StepStatus::Succeeded,
            attempts: 1,
            output: None,
            error: None,
            exit_code: Some(0),
            started_at: None,
            completed_at: chrono::Utc::now(),
        },
    );
    h.storage.save_execution(&stale).unwrap();

    assert_eq!(h.executor.recover_interrupted().unwrap(), 1);

    let repaired = h.storage.get_execution(&stale.id).unwrap().unwrap();
    assert_eq!(repaired.status, ExecutionStatus::Canceled);
    assert_eq!(repaired.step_status("a"), Some(StepStatus::Succeeded));
    assert_eq!(repaired.step_status("b"), Some(StepStatus::Canceled));
    assert!(repaired.completed_at.is_some());
}
