use async_trait::async_trait;
use chrono::{DateTime, Utc};
use runwarden_common::types::MetricSample;
use runwarden_storage::{MetricQuery, StorageEngine};
use std::collections::HashMap;
use std::sync::Arc;

/// Source of metric samples for rule evaluation.
#[async_trait]
pub trait MetricsSource: Send + Sync {
    /// Samples of `metric_name` in `[from, to]` carrying at least `tags`,
    /// oldest first.
    async fn query(
        &self,
        metric_name: &str,
        tags: &HashMap<String, String>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricSample>>;
}

/// Reads samples ingested into the storage engine.
pub struct StorageMetricsSource {
    storage: Arc<dyn StorageEngine>,
}

impl StorageMetricsSource {
    pub fn new(storage: Arc<dyn StorageEngine>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl MetricsSource for StorageMetricsSource {
    async fn query(
        &self,
        metric_name: &str,
        tags: &HashMap<String, String>,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> anyhow::Result<Vec<MetricSample>> {
        self.storage.query_samples(&MetricQuery {
            metric_name: metric_name.to_string(),
            tags: tags.clone(),
            from,
            to,
        })
    }
}
