pub mod alerts;
pub mod executions;
pub mod metrics;
pub mod runbooks;

use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::{Extension, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use chrono::Utc;
use runwarden_alert::AlertError;
use runwarden_executor::ExecutorError;
use runwarden_trigger::TriggerError;
use serde::Serialize;
use serde_json::Value;

/// Uniform response envelope.
#[derive(Serialize)]
pub struct ApiResponse<T>
where
    T: Serialize,
{
    /// 0 on success.
    pub err_code: i32,
    pub err_msg: String,
    pub trace_id: String,
    pub data: Option<T>,
}

pub fn success_response<T>(status: StatusCode, trace_id: &str, data: T) -> Response
where
    T: Serialize,
{
    (
        status,
        Json(ApiResponse {
            err_code: 0,
            err_msg: "success".to_string(),
            trace_id: trace_id.to_string(),
            data: Some(data),
        }),
    )
        .into_response()
}

pub fn success_empty_response(status: StatusCode, trace_id: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: 0,
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

fn to_custom_error_code(code: &str) -> i32 {
    match code {
        "bad_request" => 1001,
        "invalid_signature" => 1002,
        "not_found" => 1004,
        "conflict" => 1005,
        "forbidden_source" => 1006,
        "invalid_graph" => 1101,
        "invalid_trigger" => 1102,
        "invalid_rule" => 1103,
        "invalid_transition" => 1104,
        "internal_error" => 1500,
        "storage_error" => 1501,
        _ => 1999,
    }
}

pub fn error_response(status: StatusCode, trace_id: &str, code: &str, msg: &str) -> Response {
    (
        status,
        Json(ApiResponse::<Value> {
            err_code: to_custom_error_code(code),
            err_msg: msg.to_string(),
            trace_id: trace_id.to_string(),
            data: None,
        }),
    )
        .into_response()
}

pub fn storage_error_response(trace_id: &str, err: &anyhow::Error) -> Response {
    tracing::error!(trace_id, error = %err, "Storage error");
    error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        trace_id,
        "storage_error",
        "Storage error",
    )
}

pub fn trigger_error_response(trace_id: &str, err: &TriggerError) -> Response {
    let (status, code) = match err {
        TriggerError::InvalidSignature => (StatusCode::UNAUTHORIZED, "invalid_signature"),
        TriggerError::ForbiddenSource(_) => (StatusCode::FORBIDDEN, "forbidden_source"),
        TriggerError::RunbookNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        TriggerError::DisabledRunbook(_) | TriggerError::TriggerMismatch { .. } => {
            (StatusCode::CONFLICT, "conflict")
        }
        TriggerError::PathNotFound(_)
        | TriggerError::InvalidPattern(_)
        | TriggerError::InvalidCronExpression { .. }
        | TriggerError::InvalidTimeZone(_)
        | TriggerError::InvalidAllowedRange(_)
        | TriggerError::Watch(_) => (StatusCode::BAD_REQUEST, "invalid_trigger"),
        TriggerError::Storage(e) => return storage_error_response(trace_id, e),
    };
    error_response(status, trace_id, code, &err.to_string())
}

pub fn executor_error_response(trace_id: &str, err: &ExecutorError) -> Response {
    let (status, code) = match err {
        ExecutorError::RunbookNotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
        ExecutorError::DisabledRunbook(_) | ExecutorError::AlreadyRunning(_) => {
            (StatusCode::CONFLICT, "conflict")
        }
        ExecutorError::CyclicGraph(_) | ExecutorError::UnknownThing { .. } => {
            (StatusCode::BAD_REQUEST, "invalid_graph")
        }
        ExecutorError::Storage(e) => return storage_error_response(trace_id, e),
    };
    error_response(status, trace_id, code, &err.to_string())
}

pub fn alert_error_response(trace_id: &str, err: &AlertError) -> Response {
    let (status, code) = match err {
        AlertError::RuleNotFound(_) | AlertError::AlertNotFound(_) => {
            (StatusCode::NOT_FOUND, "not_found")
        }
        AlertError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
        AlertError::InvalidRule(_) => (StatusCode::BAD_REQUEST, "invalid_rule"),
        AlertError::Metrics(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        AlertError::Storage(e) => return storage_error_response(trace_id, e),
    };
    error_response(status, trace_id, code, &err.to_string())
}

#[derive(Serialize)]
struct HealthResponse {
    version: String,
    uptime_secs: i64,
    armed_triggers: usize,
}

async fn health(Extension(trace_id): Extension<TraceId>, State(state): State<AppState>) -> Response {
    success_response(
        StatusCode::OK,
        &trace_id,
        HealthResponse {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: (Utc::now() - state.start_time).num_seconds(),
            armed_triggers: state.triggers.armed_count(),
        },
    )
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/webhooks/{runbook_id}", post(runbooks::webhook))
        .route("/v1/runbooks", get(runbooks::list_runbooks))
        .route(
            "/v1/runbooks/{id}",
            get(runbooks::get_runbook)
                .put(runbooks::put_runbook)
                .delete(runbooks::delete_runbook),
        )
        .route("/v1/runbooks/{id}/fire", post(runbooks::fire_runbook))
        .route("/v1/executions", get(executions::list_executions))
        .route("/v1/executions/{id}", get(executions::get_execution))
        .route("/v1/executions/{id}/cancel", post(executions::cancel_execution))
        .route("/v1/alert-rules", get(alerts::list_rules))
        .route(
            "/v1/alert-rules/{id}",
            put(alerts::put_rule).delete(alerts::delete_rule),
        )
        .route("/v1/alerts", get(alerts::list_alerts))
        .route("/v1/alerts/{id}", get(alerts::get_alert))
        .route("/v1/alerts/{id}/acknowledge", post(alerts::acknowledge_alert))
        .route("/v1/alerts/{id}/resolve", post(alerts::resolve_alert))
        .route("/v1/metrics", post(metrics::ingest_metrics))
}
