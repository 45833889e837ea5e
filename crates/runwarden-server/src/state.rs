use crate::config::ServerConfig;
use chrono::{DateTime, Utc};
use runwarden_alert::{AlertEngine, StorageMetricsSource};
use runwarden_common::events::EventBus;
use runwarden_common::RunbookLauncher;
use runwarden_executor::{RunbookExecutor, ThingRunner};
use runwarden_notify::{ActionContext, ActionDispatcher, ActionRegistry, EmailSender};
use runwarden_storage::StorageEngine;
use runwarden_trigger::TriggerService;
use std::sync::Arc;

/// Everything the HTTP handlers and background loops share.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn StorageEngine>,
    pub executor: RunbookExecutor,
    pub triggers: Arc<TriggerService>,
    pub alerts: Arc<AlertEngine>,
    pub actions: Arc<ActionDispatcher>,
    pub events: EventBus,
    pub start_time: DateTime<Utc>,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    /// Wires the components together. The executor is the launcher behind
    /// triggers and `run_runbook` alert actions alike.
    pub fn new(
        config: ServerConfig,
        storage: Arc<dyn StorageEngine>,
        runner: Arc<dyn ThingRunner>,
    ) -> anyhow::Result<Self> {
        let events = EventBus::default();
        let executor = RunbookExecutor::new(
            storage.clone(),
            runner,
            events.clone(),
            config.executor_config(),
        );
        let launcher: Arc<dyn RunbookLauncher> = Arc::new(executor.clone());

        let mut context = ActionContext::new(events.clone(), launcher.clone());
        if let Some(smtp) = &config.smtp {
            context = context.with_email(EmailSender::new(smtp)?);
        }
        let actions = Arc::new(ActionDispatcher::new(ActionRegistry::default(), context));

        let alerts = Arc::new(AlertEngine::new(
            storage.clone(),
            Arc::new(StorageMetricsSource::new(storage.clone())),
            actions.clone(),
            events.clone(),
        ));
        let triggers = Arc::new(TriggerService::new(storage.clone(), launcher));

        Ok(Self {
            storage,
            executor,
            triggers,
            alerts,
            actions,
            events,
            start_time: Utc::now(),
            config: Arc::new(config),
        })
    }
}
