//! Alert engine.
//!
//! Rules are evaluated periodically against a window of metric samples
//! pulled from a [`metrics::MetricsSource`]. A rule that crosses its
//! threshold opens an [`Alert`] and has its actions dispatched; once the
//! condition clears the alert is resolved and the rule stays quiet for its
//! cooldown period, even if the condition flips back sooner.

pub mod condition;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod window;


use async_trait::async_trait;
use runwarden_common::types::{ActionResult, Alert, AlertRule};

pub use engine::AlertEngine;
pub use error::AlertError;
pub use metrics::{MetricsSource, StorageMetricsSource};

/// Runs a rule's actions for a freshly fired alert.
///
/// Implementations run every action in order and report each outcome; a
/// failing action must not prevent the ones after it.
#[async_trait]
pub trait AlertActionDispatcher: Send + Sync {
    async fn dispatch(&self, rule: &AlertRule, alert: &Alert) -> Vec<ActionResult>;
}
