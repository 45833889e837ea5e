//! Shared data model for the runwarden orchestration engine.
//!
//! Runbooks, triggers, executions, alert rules and alerts live in
//! [`types`]; [`events`] carries the in-process event bus; [`id`] hands out
//! Snowflake identifiers. The [`RunbookLauncher`] trait is the single seam
//! through which triggers and alert actions start runbook executions.

pub mod events;
pub mod id;
pub mod types;

use async_trait::async_trait;
use types::{FireContext, TriggerResult};

/// Starts an execution of a runbook.
///
/// Implemented by the runbook executor; consumed by the trigger service
/// and by the `run_runbook` alert action. Implementations never fail with
/// an error: problems are reported through [`TriggerResult::error_message`].
#[async_trait]
pub trait RunbookLauncher: Send + Sync {
    async fn fire(&self, runbook_id: &str, context: FireContext) -> TriggerResult;
}
