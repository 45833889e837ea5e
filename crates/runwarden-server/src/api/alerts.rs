use crate::api::{
    alert_error_response, error_response, storage_error_response, success_response,
};
use crate::logging::TraceId;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Extension, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use chrono::{DateTime, Utc};
use runwarden_common::types::{AlertRule, AlertStatus};
use runwarden_notify::validate_actions;
use runwarden_storage::AlertQuery;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const MAX_LIMIT: usize = 1000;

pub async fn list_rules(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
) -> Response {
    match state.storage.list_alert_rules() {
        Ok(rules) => success_response(StatusCode::OK, &trace_id, rules),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

/// Creates or replaces a rule after checking its thresholds and action configs.
pub async fn put_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(mut body): Json<Value>,
) -> Response {
    let Some(obj) = body.as_object_mut() else {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "bad_request",
            "Alert rule body must be a JSON object",
        );
    };
    obj.insert("id".to_string(), Value::String(id.clone()));
    let rule: AlertRule = match serde_json::from_value(body) {
        Ok(rule) => rule,
        Err(e) => {
            return error_response(
                StatusCode::BAD_REQUEST,
                &trace_id,
                "bad_request",
                &format!("Invalid alert rule: {e}"),
            )
        }
    };
    if let Err(e) = validate_actions(state.actions.registry(), &rule.actions) {
        return error_response(
            StatusCode::BAD_REQUEST,
            &trace_id,
            "invalid_rule",
            &format!("{e:#}"),
        );
    }

    match state.alerts.upsert_rule(&rule).await {
        Ok(()) => success_response(StatusCode::OK, &trace_id, rule),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

#[derive(Serialize)]
struct DeleteRuleResponse {
    rule_id: String,
    resolved_alerts: usize,
}

pub async fn delete_rule(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.alerts.delete_rule(&id).await {
        Ok(resolved_alerts) => success_response(
            StatusCode::OK,
            &trace_id,
            DeleteRuleResponse {
                rule_id: id,
                resolved_alerts,
            },
        ),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

#[derive(Debug, Deserialize)]
pub struct AlertListParams {
    rule_id: Option<String>,
    status: Option<String>,
    from: Option<DateTime<Utc>>,
    to: Option<DateTime<Utc>>,
    limit: Option<usize>,
}

impl AlertListParams {
    fn into_query(self) -> Result<AlertQuery, String> {
        let status = self.status.map(|s| s.parse::<AlertStatus>()).transpose()?;
        let mut query = AlertQuery {
            rule_id: self.rule_id,
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

/// Alerts matching the filters, newest first.
pub async fn list_alerts(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    params: Result<Query<AlertListParams>, QueryRejection>,
) -> Response {
    let query = match params.map_err(|e| e.body_text()).and_then(|Query(p)| p.into_query()) {
        Ok(q) => q,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &trace_id, "bad_request", &msg),
    };
    match state.storage.query_alerts(&query) {
        Ok(alerts) => success_response(StatusCode::OK, &trace_id, alerts),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

pub async fn get_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.storage.get_alert(&id) {
        Ok(Some(alert)) => success_response(StatusCode::OK, &trace_id, alert),
        Ok(None) => error_response(
            StatusCode::NOT_FOUND,
            &trace_id,
            "not_found",
            &format!("Alert '{id}' not found"),
        ),
        Err(e) => storage_error_response(&trace_id, &e),
    }
}

#[derive(Debug, Default, Deserialize)]
struct AcknowledgeRequest {
    #[serde(default)]
    message: Option<String>,
}

pub async fn acknowledge_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> Response {
    let request = if body.is_empty() {
        AcknowledgeRequest::default()
    } else {
        match serde_json::from_slice::<AcknowledgeRequest>(&body) {
            Ok(r) => r,
            Err(e) => {
                return error_response(
                    StatusCode::BAD_REQUEST,
                    &trace_id,
                    "bad_request",
                    &format!("Invalid acknowledge request: {e}"),
                )
            }
        }
    };
    match state.alerts.acknowledge(&id, request.message).await {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, alert),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}

pub async fn resolve_alert(
    Extension(trace_id): Extension<TraceId>,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Response {
    match state.alerts.resolve(&id).await {
        Ok(alert) => success_response(StatusCode::OK, &trace_id, alert),
        Err(e) => alert_error_response(&trace_id, &e),
    }
}
