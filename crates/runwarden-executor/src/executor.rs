use crate::condition::should_run;
use crate::error::{ExecutorError, Result};
use crate::graph::StepGraph;
use crate::retry::{BackoffStrategy, ConcurrencyPolicy, RetryPolicy};
use crate::runner::ThingRunner;
use async_trait::async_trait;
use chrono::Utc;
use runwarden_common::events::{EventBus, SystemEvent};
use runwarden_common::types::{
    ExecutionStatus, FireContext, Runbook, RunbookExecution, RunbookStep, StepResult, StepStatus,
    TriggerResult,
};
use runwarden_common::RunbookLauncher;
use runwarden_storage::{ExecutionQuery, StorageEngine};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::OwnedMutexGuard;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Step parameter carrying the [`FireContext::source`] of the firing.
pub const PARAM_TRIGGER_SOURCE: &str = "trigger.source";
/// Step parameter carrying the [`FireContext::payload`], when present.
pub const PARAM_TRIGGER_PAYLOAD: &str = "trigger.payload";

#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutorConfig {
    pub backoff: BackoffStrategy,
    pub concurrency: ConcurrencyPolicy,
}

/// An execution that was accepted and is running in the background.
pub struct StartedExecution {
    pub execution_id: String,
    pub handle: JoinHandle<RunbookExecution>,
}

/// Runs runbook firings to completion.
///
/// Cloning is cheap; clones share in-flight state, so a clone can cancel an
/// execution started by another.
#[derive(Clone)]
pub struct RunbookExecutor {
    inner: Arc<Inner>,
}

struct Inner {
    storage: Arc<dyn StorageEngine>,
    runner: Arc<dyn ThingRunner>,
    events: EventBus,
    config: ExecutorConfig,
    /// One slot per runbook; holding it means an execution is in flight.
    runbook_slots: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    /// Cancellation tokens keyed by execution ID.
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

enum Slot {
    Held(OwnedMutexGuard<()>),
    Queued(Arc<tokio::sync::Mutex<()>>),
}

struct Prepared {
    runbook: Runbook,
    graph: StepGraph,
    execution: RunbookExecution,
    context: FireContext,
    cancel: CancellationToken,
    slot: Slot,
}

impl RunbookExecutor {
    pub fn new(
        storage: Arc<dyn StorageEngine>,
        runner: Arc<dyn ThingRunner>,
        events: EventBus,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                runner,
                events,
                config,
                runbook_slots: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Validates the runbook, records a new execution and runs it in a
    /// background task.
    pub fn start(&self, runbook_id: &str, context: FireContext) -> Result<StartedExecution> {
        let prepared = self.prepare(runbook_id, context)?;
        let execution_id = prepared.execution.id.clone();
        let executor = self.clone();
        let handle = tokio::spawn(async move { executor.run(prepared).await });
        Ok(StartedExecution {
            execution_id,
            handle,
        })
    }

    /// Like [`start`](Self::start) but runs on the caller's task and returns
    /// the terminal execution.
    pub async fn execute(&self, runbook_id: &str, context: FireContext) -> Result<RunbookExecution> {
        let prepared = self.prepare(runbook_id, context)?;
        Ok(self.run(prepared).await)
    }

    /// Signals an in-flight execution to stop. Returns false if no execution
    /// with that ID is running in this process.
    pub fn cancel(&self, execution_id: &str) -> bool {
        match self.lock_in_flight().get(execution_id) {
            Some(token) => {
                info!(execution_id, "Cancellation requested");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Checks a step list the way a firing would: the graph must be valid
    /// and every step must target a thing the runner knows.
    pub fn validate(&self, steps: &[RunbookStep]) -> Result<()> {
        StepGraph::build(steps)?;
        self.check_things(steps)
    }

    pub fn is_in_flight(&self, execution_id: &str) -> bool {
        self.lock_in_flight().contains_key(execution_id)
    }

    /// Marks executions left `Running` by a previous process as `Canceled`,
    /// giving every step without a result a `Canceled` result. Returns the
    /// number of executions repaired.
    pub fn recover_interrupted(&self) -> Result<usize> {
        let storage = &self.inner.storage;
        let stale = storage.query_executions(&ExecutionQuery {
            status: Some(ExecutionStatus::Running),
            limit: usize::MAX,
            ..Default::default()
        })?;
        let active: HashSet<String> = self.lock_in_flight().keys().cloned().collect();

        let mut repaired = 0;
        for mut execution in stale.into_iter().filter(|e| !active.contains(&e.id)) {
            if let Some(runbook) = storage.get_runbook(&execution.runbook_id)? {
                for step in &runbook.steps {
                    execution
                        .step_results
                        .entry(step.id.clone())
                        .or_insert_with(|| {
                            StepResult::not_run(
                                &step.id,
                                StepStatus::Canceled,
                                Some("interrupted by shutdown".to_string()),
                            )
                        });
                }
            }
            execution.status = ExecutionStatus::Canceled;
            execution.completed_at = Some(Utc::now());
            storage.save_execution(&execution)?;
            warn!(
                execution_id = %execution.id,
                runbook_id = %execution.runbook_id,
                "Marked interrupted execution as canceled"
            );
            repaired += 1;
        }
        Ok(repaired)
    }

    fn prepare(&self, runbook_id: &str, context: FireContext) -> Result<Prepared> {
        let runbook = self
            .inner
            .storage
            .get_runbook(runbook_id)?
            .ok_or_else(|| ExecutorError::RunbookNotFound(runbook_id.to_string()))?;
        if !runbook.enabled {
            return Err(ExecutorError::DisabledRunbook(runbook.id));
        }
        let graph = StepGraph::build(&runbook.steps)?;
        self.check_things(&runbook.steps)?;

        let lock = self.runbook_slot(&runbook.id);
        let slot = match lock.clone().try_lock_owned() {
            Ok(guard) => Slot::Held(guard),
            Err(_) => match self.inner.config.concurrency {
                ConcurrencyPolicy::Reject => {
                    return Err(ExecutorError::AlreadyRunning(runbook.id));
                }
                ConcurrencyPolicy::Queue => Slot::Queued(lock),
            },
        };

        let execution = RunbookExecution::start(&runbook.id, context.source);
        self.inner.storage.save_execution(&execution)?;

        let cancel = CancellationToken::new();
        self.lock_in_flight()
            .insert(execution.id.clone(), cancel.clone());

        info!(
            execution_id = %execution.id,
            runbook_id = %runbook.id,
            source = %context.source,
            steps = runbook.steps.len(),
            "Execution started"
        );
        self.inner.events.publish(SystemEvent::ExecutionStarted {
            execution_id: execution.id.clone(),
            runbook_id: runbook.id.clone(),
            source: context.source,
        });

        Ok(Prepared {
            runbook,
            graph,
            execution,
            context,
            cancel,
            slot,
        })
    }

    async fn run(&self, prepared: Prepared) -> RunbookExecution {
        let Prepared {
            runbook,
            graph,
            mut execution,
            context,
            cancel,
            slot,
        } = prepared;

        let _guard = match slot {
            Slot::Held(guard) => Some(guard),
            Slot::Queued(lock) => {
                debug!(execution_id = %execution.id, runbook_id = %runbook.id, "Queued behind in-flight execution");
                tokio::select! {
                    guard = lock.lock_owned() => Some(guard),
                    _ = cancel.cancelled() => None,
                }
            }
        };

        let trigger_params = trigger_parameters(&context);
        let step_count = runbook.steps.len();
        let mut statuses: Vec<Option<StepStatus>> = vec![None; step_count];
        let mut started = vec![false; step_count];
        let mut running: JoinSet<(usize, StepResult)> = JoinSet::new();
        let mut canceled = cancel.is_cancelled();

        loop {
            if canceled {
                for &i in graph.order() {
                    if !started[i] {
                        started[i] = true;
                        let result = StepResult::not_run(
                            &runbook.steps[i].id,
                            StepStatus::Canceled,
                            Some("execution canceled".to_string()),
                        );
                        self.record(&mut execution, &mut statuses, i, result);
                    }
                }
            } else {
                // A skip can make further steps eligible, so scan until stable.
                let mut progressed = true;
                while progressed {
                    progressed = false;
                    for &i in graph.order() {
                        if started[i] {
                            continue;
                        }
                        let deps: Option<Vec<StepStatus>> =
                            graph.dependencies(i).iter().map(|&d| statuses[d]).collect();
                        let Some(deps) = deps else {
                            continue;
                        };
                        started[i] = true;
                        let step = &runbook.steps[i];

                        if should_run(step.condition, &deps) {
                            let mut parameters = step.parameters.clone();
                            parameters.extend(trigger_params.clone());
                            let attempt = run_step(
                                self.inner.runner.clone(),
                                execution.id.clone(),
                                step.clone(),
                                parameters,
                                self.inner.config.backoff,
                                cancel.child_token(),
                            );
                            let step_id = step.id.clone();
                            running.spawn(async move {
                                let result = match tokio::spawn(attempt).await {
                                    Ok(result) => result,
                                    Err(e) => failed_result(&step_id, 1, None, format!("step task aborted: {e}")),
                                };
                                (i, result)
                            });
                        } else {
                            debug!(
                                execution_id = %execution.id,
                                step_id = %step.id,
                                condition = ?step.condition,
                                "Step skipped, condition not met"
                            );
                            let result = StepResult::not_run(
                                &step.id,
                                StepStatus::Skipped,
                                Some(format!("condition {:?} not met", step.condition)),
                            );
                            self.record(&mut execution, &mut statuses, i, result);
                            progressed = true;
                        }
                    }
                }
            }

            if running.is_empty() {
                break;
            }

            tokio::select! {
                joined = running.join_next() => match joined {
                    Some(Ok((i, result))) => self.record(&mut execution, &mut statuses, i, result),
                    Some(Err(e)) => error!(execution_id = %execution.id, error = %e, "Step supervisor task failed"),
                    None => {}
                },
                _ = cancel.cancelled(), if !canceled => {
                    canceled = true;
                }
            }
        }

        execution.status = if canceled {
            ExecutionStatus::Canceled
        } else if statuses.contains(&Some(StepStatus::Failed)) {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        };
        execution.completed_at = Some(Utc::now());
        self.persist(&execution);
        self.lock_in_flight().remove(&execution.id);

        info!(
            execution_id = %execution.id,
            runbook_id = %execution.runbook_id,
            status = %execution.status,
            "Execution finished"
        );
        self.inner.events.publish(SystemEvent::ExecutionFinished {
            execution_id: execution.id.clone(),
            runbook_id: execution.runbook_id.clone(),
            status: execution.status,
        });
        execution
    }

    fn record(
        &self,
        execution: &mut RunbookExecution,
        statuses: &mut [Option<StepStatus>],
        index: usize,
        result: StepResult,
    ) {
        statuses[index] = Some(result.status);
        self.inner.events.publish(SystemEvent::StepFinished {
            execution_id: execution.id.clone(),
            step_id: result.step_id.clone(),
            status: result.status,
            attempts: result.attempts,
        });
        execution
            .step_results
            .insert(result.step_id.clone(), result);
        self.persist(execution);
    }

    fn persist(&self, execution: &RunbookExecution) {
        if let Err(e) = self.inner.storage.save_execution(execution) {
            error!(execution_id = %execution.id, error = %e, "Failed to persist execution");
        }
    }

    fn check_things(&self, steps: &[RunbookStep]) -> Result<()> {
        match steps.iter().find(|s| !self.inner.runner.has_thing(&s.thing_id)) {
            Some(step) => Err(ExecutorError::UnknownThing {
                step: step.id.clone(),
                thing: step.thing_id.clone(),
            }),
            None => Ok(()),
        }
    }

    fn runbook_slot(&self, runbook_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut slots = self
            .inner
            .runbook_slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        slots.entry(runbook_id.to_string()).or_default().clone()
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.inner
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl RunbookLauncher for RunbookExecutor {
    async fn fire(&self, runbook_id: &str, context: FireContext) -> TriggerResult {
        match self.start(runbook_id, context) {
            Ok(started) => TriggerResult::started(started.execution_id),
            Err(e) => {
                warn!(runbook_id, error = %e, "Fire rejected");
                TriggerResult::failed(e.to_string())
            }
        }
    }
}

fn trigger_parameters(context: &FireContext) -> HashMap<String, String> {
    let mut params = HashMap::from([(PARAM_TRIGGER_SOURCE.to_string(), context.source.to_string())]);
    if let Some(payload) = &context.payload {
        params.insert(PARAM_TRIGGER_PAYLOAD.to_string(), payload.clone());
    }
    params
}

/// Runs one step's attempts until success, exhaustion or cancellation.
async fn run_step(
    runner: Arc<dyn ThingRunner>,
    execution_id: String,
    step: RunbookStep,
    parameters: HashMap<String, String>,
    backoff: BackoffStrategy,
    cancel: CancellationToken,
) -> StepResult {
    let started_at = Utc::now();
    let mut policy = RetryPolicy::new(step.max_attempts(), backoff);

    loop {
        let attempt = policy.begin_attempt();
        let attempt_token = cancel.child_token();
        let call = runner.execute(&step.thing_id, &step.profile_id, &parameters, attempt_token.clone());
        let limit = step.timeout();

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            outcome = async {
                match limit {
                    Some(limit) => match tokio::time::timeout(limit, call).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(anyhow::anyhow!("timed out after {}s", limit.as_secs())),
                    },
                    None => call.await,
                }
            } => Some(outcome),
        };
        attempt_token.cancel();

        let Some(outcome) = outcome else {
            return canceled_result(&step.id, attempt, started_at);
        };

        let (error, output, exit_code) = match outcome {
            Ok(outcome) if outcome.success => {
                return StepResult {
                    step_id: step.id.clone(),
                    status: StepStatus::Succeeded,
                    attempts: attempt,
                    output: Some(outcome.output),
                    error: None,
                    exit_code: outcome.exit_code,
                    started_at: Some(started_at),
                    completed_at: Utc::now(),
                };
            }
            Ok(outcome) => (
                outcome
                    .error
                    .unwrap_or_else(|| "thing reported failure".to_string()),
                Some(outcome.output),
                outcome.exit_code,
            ),
            Err(e) => (format!("{e:#}"), None, None),
        };

        if !policy.can_retry() {
            warn!(
                execution_id = %execution_id,
                step_id = %step.id,
                attempts = attempt,
                error = %error,
                "Step failed"
            );
            let mut result = failed_result(&step.id, attempt, exit_code, error);
            result.output = output;
            result.started_at = Some(started_at);
            return result;
        }

        let delay = policy.next_delay();
        warn!(
            execution_id = %execution_id,
            step_id = %step.id,
            attempt,
            error = %error,
            retry_in_ms = delay.as_millis() as u64,
            "Step attempt failed, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => return canceled_result(&step.id, attempt, started_at),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

fn failed_result(step_id: &str, attempts: u32, exit_code: Option<i32>, error: String) -> StepResult {
    StepResult {
        step_id: step_id.to_string(),
        status: StepStatus::Failed,
        attempts,
        output: None,
        error: Some(error),
        exit_code,
        started_at: None,
        completed_at: Utc::now(),
    }
}

fn canceled_result(step_id: &str, attempts: u32, started_at: chrono::DateTime<Utc>) -> StepResult {
    StepResult {
        step_id: step_id.to_string(),
        status: StepStatus::Canceled,
        attempts,
        output: None,
        error: Some("execution canceled".to_string()),
        exit_code: None,
        started_at: Some(started_at),
        completed_at: Utc::now(),
    }
}
