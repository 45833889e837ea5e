use crate::error::{Result, TriggerError};
use crate::schedule::CronSchedule;
use crate::watch::{self, PathWatch};
use crate::webhook;
use chrono::{DateTime, Utc};
use runwarden_common::types::{FireContext, Runbook, Trigger, TriggerResult, TriggerSource};
use runwarden_common::RunbookLauncher;
use runwarden_storage::StorageEngine;
use std::collections::HashMap;
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Checks a trigger definition without arming it: cron syntax and time
/// zone, CIDR syntax, and that a watched path exists with a valid pattern.
pub fn validate_trigger(trigger: &Trigger) -> Result<()> {
    match trigger {
        Trigger::Schedule(schedule) => {
            CronSchedule::parse(&schedule.cron_expression, schedule.time_zone.as_deref())?;
        }
        Trigger::Webhook(hook) => {
            if let Some(range) = &hook.allowed_ip_range {
                webhook::parse_allowed_range(range)?;
            }
        }
        Trigger::FileWatch(config) => {
            if !Path::new(&config.path).exists() {
                return Err(TriggerError::PathNotFound(config.path.clone()));
            }
            watch::compile_pattern(&config.pattern)?;
        }
        Trigger::Manual => {}
    }
    Ok(())
}

/// Wall clock consulted by schedule timers.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Owns the background listeners (schedule timers, file watchers) and
/// turns webhook and manual requests into firings.
///
/// At most one listener is armed per runbook; registering a runbook again
/// replaces its listener.
pub struct TriggerService {
    storage: Arc<dyn StorageEngine>,
    launcher: Arc<dyn RunbookLauncher>,
    armed: Mutex<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
    clock: Clock,
}

impl TriggerService {
    pub fn new(storage: Arc<dyn StorageEngine>, launcher: Arc<dyn RunbookLauncher>) -> Self {
        Self {
            storage,
            launcher,
            armed: Mutex::new(HashMap::new()),
            shutdown: CancellationToken::new(),
            clock: Arc::new(Utc::now),
        }
    }

    /// Replaces the clock schedule timers compute occurrences from.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    /// Validates and arms the runbook's trigger. Webhook and manual triggers
    /// have no background state; registering one only disarms any previous
    /// listener. Must be called from within a Tokio runtime.
    pub fn register(&self, runbook: &Runbook) -> Result<()> {
        validate_trigger(&runbook.trigger)?;

        // Open the watcher before disarming so a failure leaves the old one running.
        let listener = match &runbook.trigger {
            Trigger::Schedule(schedule) => Some(Listener::Schedule(CronSchedule::parse(
                &schedule.cron_expression,
                schedule.time_zone.as_deref(),
            )?)),
            Trigger::FileWatch(config) => Some(Listener::Watch(
                watch::open(config)?,
                config.debounce_ms.map(Duration::from_millis),
            )),
            Trigger::Webhook(_) | Trigger::Manual => None,
        };

        let Some(listener) = listener else {
            self.unregister(&runbook.id);
            return Ok(());
        };

        // Insert and cancel-previous under one lock: one live listener per runbook.
        let cancel = self.shutdown.child_token();
        if let Some(previous) = self
            .lock_armed()
            .insert(runbook.id.clone(), cancel.clone())
        {
            previous.cancel();
        }

        let storage = self.storage.clone();
        let launcher = self.launcher.clone();
        let runbook_id = runbook.id.clone();
        match listener {
            Listener::Schedule(schedule) => {
                let clock = self.clock.clone();
                tokio::spawn(schedule_loop(schedule, clock, runbook_id, storage, launcher, cancel));
            }
            Listener::Watch(path_watch, debounce) => {
                tokio::spawn(watch_loop(path_watch, debounce, runbook_id, storage, launcher, cancel));
            }
        }
        info!(runbook_id = %runbook.id, trigger = %runbook.trigger.kind(), "Trigger armed");
        Ok(())
    }

    /// Disarms the runbook's listener. Returns false if nothing was armed.
    pub fn unregister(&self, runbook_id: &str) -> bool {
        match self.lock_armed().remove(runbook_id) {
            Some(cancel) => {
                cancel.cancel();
                info!(runbook_id, "Trigger disarmed");
                true
            }
            None => false,
        }
    }

    /// Registers every stored runbook. A runbook whose trigger fails
    /// validation is logged and left unarmed. Returns how many registered.
    pub fn reload_all(&self) -> Result<usize> {
        let runbooks = self.storage.list_runbooks()?;
        let mut registered = 0;
        for runbook in &runbooks {
            match self.register(runbook) {
                Ok(()) => registered += 1,
                Err(e) => error!(runbook_id = %runbook.id, error = %e, "Failed to register trigger"),
            }
        }
        Ok(registered)
    }

    pub fn is_armed(&self, runbook_id: &str) -> bool {
        self.lock_armed().contains_key(runbook_id)
    }

    pub fn armed_count(&self) -> usize {
        self.lock_armed().len()
    }

    /// Fires a runbook on operator request, whatever its configured trigger.
    pub async fn fire_manual(&self, runbook_id: &str, payload: Option<String>) -> Result<TriggerResult> {
        let runbook = self.load(runbook_id)?;
        if !runbook.enabled {
            return Err(TriggerError::DisabledRunbook(runbook.id));
        }
        let context = FireContext {
            source: TriggerSource::Manual,
            payload,
        };
        Ok(self.launcher.fire(&runbook.id, context).await)
    }

    /// Verifies and fires a webhook request. The source range is checked
    /// first, then the signature, then whether the runbook is enabled.
    pub async fn handle_webhook(
        &self,
        runbook_id: &str,
        body: &[u8],
        signature: Option<&str>,
        caller: Option<IpAddr>,
    ) -> Result<TriggerResult> {
        let runbook = self.load(runbook_id)?;
        let Trigger::Webhook(hook) = &runbook.trigger else {
            return Err(TriggerError::TriggerMismatch {
                runbook_id: runbook.id,
                expected: TriggerSource::Webhook,
            });
        };

        if let Some(range) = &hook.allowed_ip_range {
            let range = webhook::parse_allowed_range(range)?;
            let allowed = caller.is_some_and(|ip| webhook::source_allowed(&range, ip));
            if !allowed {
                let caller = caller.map_or_else(|| "unknown".to_string(), |ip| ip.to_string());
                warn!(runbook_id, caller = %caller, "Webhook rejected, caller outside allowed range");
                return Err(TriggerError::ForbiddenSource(caller));
            }
        }

        let valid = signature.is_some_and(|sig| webhook::validate_signature(&hook.secret, body, sig));
        if !valid {
            warn!(runbook_id, "Webhook rejected, invalid signature");
            return Err(TriggerError::InvalidSignature);
        }

        if !runbook.enabled {
            return Err(TriggerError::DisabledRunbook(runbook.id));
        }

        let payload = String::from_utf8_lossy(body).into_owned();
        let context = FireContext::with_payload(TriggerSource::Webhook, payload);
        Ok(self.launcher.fire(&runbook.id, context).await)
    }

    /// Disarms every listener.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.lock_armed().clear();
    }

    fn load(&self, runbook_id: &str) -> Result<Runbook> {
        self.storage
            .get_runbook(runbook_id)?
            .ok_or_else(|| TriggerError::RunbookNotFound(runbook_id.to_string()))
    }

    fn lock_armed(&self) -> MutexGuard<'_, HashMap<String, CancellationToken>> {
        self.armed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for TriggerService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

enum Listener {
    Schedule(CronSchedule),
    Watch(PathWatch, Option<Duration>),
}

/// Fires a background-triggered runbook after re-reading it. Missing or
/// disabled runbooks are skipped silently and yield `None`.
pub async fn fire_if_enabled(
    storage: &dyn StorageEngine,
    launcher: &dyn RunbookLauncher,
    runbook_id: &str,
    context: FireContext,
) -> Option<TriggerResult> {
    let runbook = match storage.get_runbook(runbook_id) {
        Ok(Some(runbook)) => runbook,
        Ok(None) => {
            debug!(runbook_id, "Runbook no longer exists, skipping firing");
            return None;
        }
        Err(e) => {
            error!(runbook_id, error = %e, "Failed to load runbook for firing");
            return None;
        }
    };
    if !runbook.enabled {
        debug!(runbook_id, source = %context.source, "Runbook disabled, skipping firing");
        return None;
    }

    let result = launcher.fire(runbook_id, context).await;
    if !result.success {
        warn!(
            runbook_id,
            error = result.error_message.as_deref().unwrap_or("unknown"),
            "Triggered firing failed"
        );
    }
    Some(result)
}

async fn schedule_loop(
    schedule: CronSchedule,
    clock: Clock,
    runbook_id: String,
    storage: Arc<dyn StorageEngine>,
    launcher: Arc<dyn RunbookLauncher>,
    cancel: CancellationToken,
) {
    let mut cursor = clock();
    loop {
        let Some(next) = schedule.next_after(cursor) else {
            warn!(runbook_id = %runbook_id, "Schedule has no future occurrences");
            return;
        };
        let wait = (next - clock()).to_std().unwrap_or_default();
        debug!(runbook_id = %runbook_id, next = %next, "Next scheduled firing");

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(wait) => {}
        }

        let context = FireContext::new(TriggerSource::Schedule);
        fire_if_enabled(storage.as_ref(), launcher.as_ref(), &runbook_id, context).await;
        // Skip occurrences missed while firing or suspended.
        cursor = next.max(clock());
    }
}

async fn watch_loop(
    mut path_watch: PathWatch,
    debounce: Option<Duration>,
    runbook_id: String,
    storage: Arc<dyn StorageEngine>,
    launcher: Arc<dyn RunbookLauncher>,
    cancel: CancellationToken,
) {
    while let Some(path) = watch::next_change(&mut path_watch.events, debounce, &cancel).await {
        let context = FireContext::with_payload(TriggerSource::FileWatch, path.display().to_string());
        fire_if_enabled(storage.as_ref(), launcher.as_ref(), &runbook_id, context).await;
    }
}
