use crate::condition::compare;
use crate::error::{AlertError, Result};
use crate::metrics::MetricsSource;
use crate::window::{self, WindowValue};
use crate::AlertActionDispatcher;
use chrono::{DateTime, Utc};
use runwarden_common::events::{EventBus, SystemEvent};
use runwarden_common::id;
use runwarden_common::types::{format_tags, Alert, AlertCondition, AlertRule, AlertStatus};
use runwarden_storage::{AlertQuery, StorageEngine};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Per-rule lifecycle state. A rule is Firing while it has an open alert.
#[derive(Debug, Default, Clone)]
struct RuleState {
    open_alert: Option<String>,
    /// Anchor for the cooldown window.
    last_resolved_at: Option<DateTime<Utc>>,
}

/// Evaluates alert rules against metric windows and owns the alert lifecycle.
///
/// All state transitions (fire, auto-resolve, acknowledge, resolve, rule
/// deletion) are serialized through one lock, so a resolve can never
/// interleave with a firing of the same rule. Actions are dispatched after
/// the lock is released.
pub struct AlertEngine {
    storage: Arc<dyn StorageEngine>,
    metrics: Arc<dyn MetricsSource>,
    actions: Arc<dyn AlertActionDispatcher>,
    events: EventBus,
    states: Mutex<HashMap<String, RuleState>>,
}

impl AlertEngine {
    pub fn new(
        storage: Arc<dyn StorageEngine>,
        metrics: Arc<dyn MetricsSource>,
        actions: Arc<dyn AlertActionDispatcher>,
        events: EventBus,
    ) -> Self {
        Self {
            storage,
            metrics,
            actions,
            events,
            states: Mutex::new(HashMap::new()),
        }
    }

    /// Rebuilds rule state from persisted alerts: open alerts mark their rule
    /// as firing and the latest resolution time anchors its cooldown.
    /// Returns the number of open alerts found.
    pub async fn restore_state(&self) -> Result<usize> {
        let alerts = self.storage.query_alerts(&AlertQuery {
            limit: usize::MAX,
            ..Default::default()
        })?;
        let mut states = self.states.lock().await;
        states.clear();
        let mut open = 0;
        for alert in alerts {
            let state = states.entry(alert.rule_id.clone()).or_default();
            if alert.is_open() && state.open_alert.is_none() {
                state.open_alert = Some(alert.id.clone());
                open += 1;
            }
            if let Some(resolved_at) = alert.resolved_at {
                state.last_resolved_at = state.last_resolved_at.max(Some(resolved_at));
            }
        }
        Ok(open)
    }

    /// Evaluates every enabled rule once. Returns the alerts that fired.
    /// A rule that fails to evaluate is logged and skipped.
    pub async fn evaluate_at(&self, now: DateTime<Utc>) -> Vec<Alert> {
        let rules = match self.storage.list_alert_rules() {
            Ok(rules) => rules,
            Err(e) => {
                error!(error = %e, "Failed to load alert rules");
                return Vec::new();
            }
        };

        let mut fired = Vec::new();
        for rule in rules.iter().filter(|r| r.enabled) {
            match self.evaluate_rule(rule, now).await {
                Ok(Some(alert)) => fired.push(alert),
                Ok(None) => {}
                Err(e) => error!(rule_id = %rule.id, error = %e, "Rule evaluation failed"),
            }
        }
        fired
    }

    /// Evaluates one rule at `now`, firing or resolving as needed. An empty
    /// window leaves the rule's state unchanged, as does a rule deleted or
    /// disabled while its metrics were being queried.
    pub async fn evaluate_rule(&self, rule: &AlertRule, now: DateTime<Utc>) -> Result<Option<Alert>> {
        let from = now
            .checked_sub_signed(rule.evaluation_window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let samples = self
            .metrics
            .query(&rule.metric_name, &rule.tags, from, now)
            .await
            .map_err(AlertError::Metrics)?;
        let Some(value) = window::reduce(rule.condition, &samples) else {
            debug!(rule_id = %rule.id, metric = %rule.metric_name, "No samples in evaluation window");
            return Ok(None);
        };
        let breached = compare(rule.condition, value.current, rule.threshold, value.previous);

        let fired = {
            let mut states = self.states.lock().await;
            // The metrics query ran unlocked; the rule may be gone by now.
            let live = self.storage.get_alert_rule(&rule.id)?;
            if !live.is_some_and(|r| r.enabled) {
                debug!(rule_id = %rule.id, "Rule deleted or disabled during evaluation");
                return Ok(None);
            }
            let state = states.entry(rule.id.clone()).or_default();
            match (state.open_alert.clone(), breached) {
                (Some(alert_id), false) => {
                    self.close_alert(state, &alert_id, now)?;
                    None
                }
                (None, true) => {
                    let cooling = state
                        .last_resolved_at
                        .is_some_and(|resolved| now - resolved < rule.cooldown());
                    if cooling {
                        debug!(
                            rule_id = %rule.id,
                            value = value.current,
                            "Alert suppressed (cooldown)"
                        );
                        None
                    } else {
                        let alert = build_alert(rule, &value, now);
                        self.storage.save_alert(&alert)?;
                        state.open_alert = Some(alert.id.clone());
                        Some(alert)
                    }
                }
                (Some(_), true) | (None, false) => None,
            }
        };

        if let Some(alert) = &fired {
            info!(
                rule_id = %rule.id,
                alert_id = %alert.id,
                severity = %alert.severity,
                value = alert.current_value,
                threshold = alert.threshold,
                "Alert fired"
            );
            self.events.publish(SystemEvent::AlertFired {
                alert: alert.clone(),
            });
            for result in self.actions.dispatch(rule, alert).await {
                if !result.success {
                    warn!(
                        rule_id = %rule.id,
                        alert_id = %alert.id,
                        action = %result.action_type,
                        error = result.error_message.as_deref().unwrap_or("unknown"),
                        "Alert action failed"
                    );
                }
            }
        }
        Ok(fired)
    }

    pub async fn acknowledge(&self, alert_id: &str, message: Option<String>) -> Result<Alert> {
        let _states = self.states.lock().await;
        let mut alert = self
            .storage
            .get_alert(alert_id)?
            .ok_or_else(|| AlertError::AlertNotFound(alert_id.to_string()))?;
        if alert.status == AlertStatus::Resolved {
            return Err(AlertError::InvalidTransition {
                alert_id: alert.id,
                action: "acknowledge",
                status: alert.status,
            });
        }
        alert.status = AlertStatus::Acknowledged;
        alert.acknowledged_at = Some(Utc::now());
        alert.acknowledgement = message;
        self.storage.save_alert(&alert)?;

        info!(alert_id = %alert.id, rule_id = %alert.rule_id, "Alert acknowledged");
        self.events.publish(SystemEvent::AlertAcknowledged {
            alert_id: alert.id.clone(),
            rule_id: alert.rule_id.clone(),
        });
        Ok(alert)
    }

    pub async fn resolve(&self, alert_id: &str) -> Result<Alert> {
        self.resolve_at(alert_id, Utc::now()).await
    }

    /// Resolves an open alert, stamping `now` and anchoring the rule's cooldown there.
    pub async fn resolve_at(&self, alert_id: &str, now: DateTime<Utc>) -> Result<Alert> {
        let mut states = self.states.lock().await;
        let alert = self
            .storage
            .get_alert(alert_id)?
            .ok_or_else(|| AlertError::AlertNotFound(alert_id.to_string()))?;
        if alert.status == AlertStatus::Resolved {
            return Err(AlertError::InvalidTransition {
                alert_id: alert.id,
                action: "resolve",
                status: alert.status,
            });
        }
        let state = states.entry(alert.rule_id.clone()).or_default();
        self.close_alert(state, alert_id, now)?
            .ok_or_else(|| AlertError::AlertNotFound(alert_id.to_string()))
    }

    /// Validates and stores a rule. Existing lifecycle state is kept.
    pub async fn upsert_rule(&self, rule: &AlertRule) -> Result<()> {
        validate_rule(rule)?;
        let _states = self.states.lock().await;
        self.storage.upsert_alert_rule(rule)?;
        info!(rule_id = %rule.id, metric = %rule.metric_name, "Alert rule saved");
        Ok(())
    }

    /// Resolves the rule's open alerts, then deletes it. Returns how many
    /// alerts were resolved.
    pub async fn delete_rule(&self, rule_id: &str) -> Result<usize> {
        let mut states = self.states.lock().await;
        if self.storage.get_alert_rule(rule_id)?.is_none() {
            return Err(AlertError::RuleNotFound(rule_id.to_string()));
        }

        let open: Vec<Alert> = self
            .storage
            .query_alerts(&AlertQuery {
                rule_id: Some(rule_id.to_string()),
                limit: usize::MAX,
                ..Default::default()
            })?
            .into_iter()
            .filter(Alert::is_open)
            .collect();

        let now = Utc::now();
        let state = states.entry(rule_id.to_string()).or_default();
        for alert in &open {
            self.close_alert(state, &alert.id, now)?;
        }
        self.storage.delete_alert_rule(rule_id)?;
        states.remove(rule_id);

        info!(rule_id, resolved = open.len(), "Alert rule deleted");
        Ok(open.len())
    }

    /// Runs `evaluate_at(now)` on a fixed interval until canceled.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(interval_secs = interval.as_secs(), "Alert evaluation loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let fired = self.evaluate_at(Utc::now()).await;
                    if !fired.is_empty() {
                        debug!(count = fired.len(), "Evaluation cycle fired alerts");
                    }
                }
            }
        }
        info!("Alert evaluation loop stopped");
    }

    /// Marks an alert resolved and returns the rule to Normal. Returns the
    /// resolved alert, or `None` if it no longer exists.
    fn close_alert(&self, state: &mut RuleState, alert_id: &str, now: DateTime<Utc>) -> Result<Option<Alert>> {
        if state.open_alert.as_deref() == Some(alert_id) {
            state.open_alert = None;
        }
        state.last_resolved_at = state.last_resolved_at.max(Some(now));

        let Some(mut alert) = self.storage.get_alert(alert_id)? else {
            warn!(alert_id, "Open alert missing from storage");
            return Ok(None);
        };
        if alert.status == AlertStatus::Resolved {
            return Ok(Some(alert));
        }
        alert.status = AlertStatus::Resolved;
        alert.resolved_at = Some(now);
        self.storage.save_alert(&alert)?;

        info!(
            alert_id = %alert.id,
            rule_id = %alert.rule_id,
            duration_secs = alert.duration(now).num_seconds(),
            "Alert resolved"
        );
        self.events.publish(SystemEvent::AlertResolved {
            alert_id: alert.id.clone(),
            rule_id: alert.rule_id.clone(),
        });
        Ok(Some(alert))
    }
}

fn validate_rule(rule: &AlertRule) -> Result<()> {
    if rule.id.trim().is_empty() {
        return Err(AlertError::InvalidRule("id must not be empty".into()));
    }
    if rule.metric_name.trim().is_empty() {
        return Err(AlertError::InvalidRule(format!("rule '{}' has no metric name", rule.id)));
    }
    if !rule.threshold.is_finite() {
        return Err(AlertError::InvalidRule(format!("rule '{}' threshold must be finite", rule.id)));
    }
    if rule.evaluation_window_secs == 0 {
        return Err(AlertError::InvalidRule(format!(
            "rule '{}' evaluation window must be positive",
            rule.id
        )));
    }
    Ok(())
}

fn build_alert(rule: &AlertRule, value: &WindowValue, now: DateTime<Utc>) -> Alert {
    let current = match (rule.condition, value.previous) {
        (AlertCondition::PercentChange, Some(previous)) if previous != 0.0 => value.current / previous,
        _ => value.current,
    };
    let mut message = format!(
        "{}: {} {} {} (current {:.4})",
        rule.name, rule.metric_name, rule.condition, rule.threshold, current
    );
    if !rule.tags.is_empty() {
        message.push_str(&format!(" [{}]", format_tags(&rule.tags)));
    }
    Alert {
        id: id::next_id(),
        rule_id: rule.id.clone(),
        rule_name: rule.name.clone(),
        severity: rule.severity,
        message,
        current_value: current,
        threshold: rule.threshold,
        status: AlertStatus::Firing,
        fired_at: now,
        acknowledged_at: None,
        acknowledgement: None,
        resolved_at: None,
    }
}
