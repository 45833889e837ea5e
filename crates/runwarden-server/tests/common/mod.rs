#![allow(dead_code)]

use anyhow::Result;
use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::ConnectInfo;
use axum::http::{Request, StatusCode};
use runwarden_executor::{ThingOutcome, ThingRunner};
use runwarden_server::app;
use runwarden_server::config::ServerConfig;
use runwarden_server::state::AppState;
use runwarden_storage::memory::MemoryStorageEngine;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::util::ServiceExt;

/// Succeeds for any thing except `fail` (always fails) and `slow` (runs
/// until canceled). `ghost` is not a known thing.
pub struct StubRunner;

#[async_trait]
impl ThingRunner for StubRunner {
    fn has_thing(&self, thing_id: &str) -> bool {
        thing_id != "ghost"
    }

    async fn execute(
        &self,
        thing_id: &str,
        _profile_id: &str,
        _parameters: &HashMap<String, String>,
        cancel: CancellationToken,
    ) -> Result<ThingOutcome> {
        match thing_id {
            "fail" => Ok(ThingOutcome::failed("boom", Some(1))),
            "slow" => {
                tokio::select! {
                    _ = cancel.cancelled() => Ok(ThingOutcome::failed("canceled", None)),
                    _ = tokio::time::sleep(Duration::from_secs(60)) => Ok(ThingOutcome::succeeded("done")),
                }
            }
            other => Ok(ThingOutcome::succeeded(format!("ran {other}"))),
        }
    }
}

pub struct TestContext {
    pub temp_dir: TempDir,
    pub state: AppState,
    pub app: axum::Router,
}

pub fn build_test_context() -> Result<TestContext> {
    runwarden_common::id::init(1, 1);

    let temp_dir = tempfile::tempdir()?;
    let config = ServerConfig {
        data_dir: temp_dir.path().to_string_lossy().to_string(),
        ..Default::default()
    };
    let storage = Arc::new(MemoryStorageEngine::new());
    let state = AppState::new(config, storage, Arc::new(StubRunner))?;
    let app = app::build_http_app(state.clone());

    Ok(TestContext {
        temp_dir,
        state,
        app,
    })
}

pub fn caller(ip: &str) -> SocketAddr {
    SocketAddr::new(ip.parse().expect("ip should parse"), 40000)
}

async fn send(app: &axum::Router, req: Request<Body>) -> (StatusCode, Value, Option<String>) {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");

    let status = resp.status();
    let trace_id = resp
        .headers()
        .get("x-trace-id")
        .and_then(|h| h.to_str().ok())
        .map(|s| s.to_string());
    let bytes = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice::<Value>(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).to_string()))
    };
    (status, json, trace_id)
}

pub async fn request_json(
    app: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.unwrap_or(Value::Null).to_string()))
        .expect("request should build");
    send(app, req).await
}

pub async fn request_no_body(
    app: &axum::Router,
    method: &str,
    uri: &str,
) -> (StatusCode, Value, Option<String>) {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

/// POSTs a raw webhook body from `from`, with an optional signature header.
pub async fn post_webhook(
    app: &axum::Router,
    runbook_id: &str,
    body: &str,
    signature: Option<&str>,
    from: SocketAddr,
) -> (StatusCode, Value, Option<String>) {
    let mut builder = Request::builder()
        .method("POST")
        .uri(format!("/v1/webhooks/{runbook_id}"));
    if let Some(sig) = signature {
        builder = builder.header("X-Signature-256", sig);
    }
    let mut req = builder
        .body(Body::from(body.to_string()))
        .expect("request should build");
    req.extensions_mut().insert(ConnectInfo(from));
    send(app, req).await
}

pub fn assert_ok_envelope(body: &Value) {
    assert_eq!(body["err_code"], 0, "unexpected envelope: {body}");
    assert!(body["trace_id"].is_string());
}

pub fn assert_err_envelope(body: &Value, code: i64) {
    assert_eq!(body["err_code"], code, "unexpected envelope: {body}");
    assert!(body["err_msg"].is_string());
    assert!(body["data"].is_null());
}

/// Polls until the execution reaches a terminal status.
pub async fn wait_for_terminal(app: &axum::Router, execution_id: &str) -> Value {
    for _ in 0..200 {
        let (status, body, _) =
            request_no_body(app, "GET", &format!("/v1/executions/{execution_id}")).await;
        if status == StatusCode::OK && body["data"]["status"] != "running" {
            return body["data"].clone();
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("execution {execution_id} did not finish");
}
