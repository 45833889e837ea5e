use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;

/// Result of one invocation of a Thing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThingOutcome {
    pub success: bool,
    #[serde(default)]
    pub output: String,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i32>,
}

impl ThingOutcome {
    pub fn succeeded(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            exit_code: Some(0),
        }
    }

    pub fn failed(error: impl Into<String>, exit_code: Option<i32>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            exit_code,
        }
    }
}

/// Backend that actually runs a step's script or target.
///
/// An `Err` is treated like an unsuccessful outcome: a retryable failed
/// attempt. Implementations should stop work promptly once `cancel` fires.
#[async_trait]
pub trait ThingRunner: Send + Sync {
    /// Whether `thing_id` names a configured target. Runbooks referencing
    /// unknown things are rejected before any execution is recorded.
    fn has_thing(&self, thing_id: &str) -> bool;

    async fn execute(
        &self,
        thing_id: &str,
        profile_id: &str,
        parameters: &HashMap<String, String>,
        cancel: CancellationToken,
    ) -> anyhow::Result<ThingOutcome>;
}
