use crate::api::{error_response, storage_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use runwarden_common::types::MetricSample;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct SampleInput {
    metric_name: String,
    value: f64,
    #[serde(default)]
    tags: HashMap<String, String>,
    /// Defaults to the time of ingestion.
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct IngestRequest {
    samples: Vec<SampleInput>,
}

#[derive(Serialize)]
struct IngestResponse {
    accepted: usize,
}

pub async fn ingest_metrics(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Json(request): Json<IngestRequest>,
) -> Response {
    let now = Utc::now();
    let mut samples = Vec::with_capacity(request.samples.len());
    for (index, input) in request.samples.into_iter().enumerate() {
        if input.metric_name.trim().is_empty() || !input.value.is_finite() {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &format!("Sample #{index} needs a metric name and a finite value"),
            );
        }
        samples.push(MetricSample {
            metric_name: input.metric_name,
            value: input.value,
            tags: input.tags,
            timestamp: input.timestamp.unwrap_or(now),
        });
    }

    if let Err(e) = state.storage.write_samples(&samples) {
        return storage_error_response(&trace_id, &e);
    }
    tracing::debug!(count = samples.len(), "Metric samples stored");
    success_response(
        StatusCode::OK,
        &trace_id,
        IngestResponse {
            accepted: samples.len(),
        },
    )
}
