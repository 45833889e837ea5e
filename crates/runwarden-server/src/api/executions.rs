use crate::api::{error_response, storage_error_response, success_response};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use chrono::{DateTime, Utc};
use runwarden_common::types::ExecutionStatus;
use runwarden_storage::ExecutionQuery;
use serde::{Deserialize, Serialize};

const MAX_LIMIT: usize = 1000;

#[derive(Debug, Deserialize)]
pub struct ExecutionListParams {
    runbook_id: Option<String>,
    status: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

impl ExecutionListParams {
    fn into_query(self) -> Result<ExecutionQuery, String> {
        let status = self
            .status
            .map(|s| s.parse::<ExecutionStatus>())
            .transpose()?;
        let mut query = ExecutionQuery {
            runbook_id: self.runbook_id,
            status,
            from: self.from,
            to: self.to,
            ..Default::default()
        };
        if let Some(limit) = self.limit {
            query.limit = limit.clamp(1, MAX_LIMIT);
        }
        Ok(query)
    }
}

/// Executions matching the filters, newest first.
pub async fn list_executions(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    params: Result<Query<ExecutionListParams>, QueryRejection>,
) -> Response {
    let query = match params.map_err(|e| e.body_text()).and_then(|Query(p)| p.into_query()) {
        Ok(q) => q,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &msg),
    };
    match state.storage.query_executions(&query) {
        Ok(executions) => success_response(StatusCode::OK, &trace_id, executions),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

pub async fn get_execution(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.get_execution(&id) {
        Ok(Some(execution)) => success_response(StatusCode::OK, &trace_id, execution),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("Execution '{id}' not found"),
        ),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

#[derive(Serialize)]
struct CancelResponse {
    execution_id: String,
    cancel_requested: bool,
}

/// Requests cancellation. The execution finishes as `canceled` once its
/// running steps stop; poll the execution for the final state.
pub async fn cancel_execution(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    if state.executor.cancel(&id) {
        return success_response(
            StatusCode::ACCEPTED,
            &trace_id,
            CancelResponse {
                execution_id: id,
                cancel_requested: true,
            },
        );
    }
    match state.storage.get_execution(&id) {
        Ok(Some(execution)) => error_response(
            StatusCode::CONFLICT,
            &trace_id,
            "conflict",
            &format!("Execution '{id}' is not running (status {})", execution.status),
        ),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("Execution '{id}' not found"),
        ),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}
