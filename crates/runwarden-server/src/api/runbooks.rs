use crate::api::{
    error_response, executor_error_response, storage_error_response, success_empty_response,
    success_response, trigger_error_response,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{ConnectInfo, Extension, Path, Request, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use runwarden_common::types::{Runbook, TriggerResult};
use serde::Deserialize;
use serde_json::Value;
use std::net::SocketAddr;

/// Largest webhook body accepted.
const MAX_WEBHOOK_BODY: usize = 1024 * 1024;

const SIGNATURE_HEADERS: [&str; 2] = ["x-signature-256", "x-hub-signature-256"];

fn signature_header(headers: &HeaderMap) -> Option<String> {
    SIGNATURE_HEADERS
        .iter()
        .find_map(|name| headers.get(*name))
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Maps a launcher outcome: accepted firings are 202, refused ones 409.
fn fire_result_response(trace_id: &str, result: TriggerResult) -> Response {
    if result.success {
        success_response(StatusCode::ACCEPTED, trace_id, result)
    } else {
        let msg = result
            .error_message
            .unwrap_or_else(|| "Runbook was not started".to_string());
        error_response(StatusCode::CONFLICT, trace_id, "conflict", &msg)
    }
}

pub async fn webhook(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(runbook_id): Path<String>,
    req: Request,
) -> Response {
    let caller = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip());
    let signature = signature_header(req.headers());
    let body = match axum::body::to_bytes(req.into_body(), MAX_WEBHOOK_BODY).await {
        Ok(body) => body,
        Err(_) => {
            return error_response(
                StatusCode::PAYLOAD_TOO_LARGE,
                &trace_id,
                "bad_request",
                "Webhook body too large",
            )
        }
    };

    match state
        .triggers
        .handle_webhook(&runbook_id, &body, signature.as_deref(), caller)
        .await
    {
        Ok(result) => fire_result_response(&trace_id, result),
        Err(e) => trigger_error_response(&trace_id, &e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct FireRequest {
    #[serde(default)]
    payload: Option<String>,
}

pub async fn fire_runbook(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let request = if body.is_empty() {
        FireRequest::default()
    } else {
        match serde_json::from_slice::<FireRequest>(&body) {
            Ok(r) => r,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &trace_id,
                    "bad_request",
                    &format!("Invalid fire request: {e}"),
                )
            }
        }
    };

    match state.triggers.fire_manual(&id, request.payload).await {
        Ok(result) => fire_result_response(&trace_id, result),
        Err(e) => trigger_error_response(&trace_id, &e),
    }
}

pub async fn list_runbooks(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.storage.list_runbooks() {
        Ok(runbooks) => success_response(StatusCode::OK, &trace_id, runbooks),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

pub async fn get_runbook(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.get_runbook(&id) {
        Ok(Some(runbook)) => success_response(StatusCode::OK, &trace_id, runbook),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("Runbook '{id}' not found"),
        ),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// Parses a runbook body, taking the id from the path.
fn runbook_from_body(id: &str, mut body: Value) -> Result<Runbook, String> {
    let Some(obj) = body.as_object_mut() else {
        return Err("Runbook body must be a JSON object".to_string());
    };
    obj.insert("id".to_string(), Value::String(id.to_string()));
    serde_json::from_value(body).map_err(|e| format!("Invalid runbook: {e}"))
}

/// Creates or replaces a runbook. The step graph, the things its steps
/// target and the trigger are validated and the trigger re-armed before
/// the definition is stored.
pub async fn put_runbook(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<Value>,
) -> Response {
    let mut runbook = match runbook_from_body(&id, body) {
        Ok(r) => r,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &msg),
    };
    if let Err(e) = state.executor.validate(&runbook.steps) {
        return executor_error_response(&trace_id, &e);
    }

    let existing = match state.storage.get_runbook(&id) {
        Ok(existing) => existing,
        Err(e) => return storage_error_response(&trace_id, &e),
    };
    let now = Utc::now();
    runbook.created_at = existing.map_or(now, |r| r.created_at);
    runbook.updated_at = now;

    if let Err(e) = state.triggers.register(&runbook) {
        return trigger_error_response(&trace_id, &e);
    }
    if let Err(e) = state.storage.upsert_runbook(&runbook) {
        state.triggers.unregister(&id);
        return storage_error_response(&trace_id, &e);
    }
    tracing::info!(runbook_id = %id, steps = runbook.steps.len(), "Runbook saved");
    success_response(StatusCode::OK, &trace_id, runbook)
}

pub async fn delete_runbook(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.delete_runbook(&id) {
        Ok(true) => {
            state.triggers.unregister(&id);
            tracing::info!(runbook_id = %id, "Runbook deleted");
            success_empty_response(StatusCode::OK, &trace_id, "Runbook deleted")
        }
        Ok(false) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("Runbook '{id}' not found"),
        ),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}
