use anyhow::Result;
use chrono::Utc;
use runwarden_common::events::SystemEvent;
use runwarden_storage::engine::SqliteStorageEngine;
use runwarden_storage::StorageEngine;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use runwarden_server::app;
use runwarden_server::config::{RulesSeedFile, RunbooksSeedFile, ServerConfig};
use runwarden_server::logging;
use runwarden_server::runner::ProcessThingRunner;
use runwarden_server::seed;
use runwarden_server::state::AppState;

#[allow(clippy::print_stderr)]
fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  runwarden-server [config.toml]                               Start the server");
    eprintln!("  runwarden-server init-runbooks <config.toml> <seed.json>     Load runbooks from a seed file");
    eprintln!("  runwarden-server init-rules <config.toml> <seed.json>        Load alert rules from a seed file");
}

#[tokio::main]
async fn main() -> Result<()> {
    runwarden_common::id::init(1, 1);
    logging::init_tracing()?;

    let args: Vec<String> = std::env::args().collect();
    match args.get(1).map(|s| s.as_str()) {
        Some(cmd @ ("init-runbooks" | "init-rules")) => {
            let (Some(config_path), Some(seed_path)) = (args.get(2), args.get(3)) else {
                print_usage();
                anyhow::bail!("{cmd} requires <config.toml> and <seed.json> arguments");
            };
            run_seed(cmd, config_path, seed_path)
        }
        Some("--help" | "-h") => {
            print_usage();
            Ok(())
        }
        _ => {
            let config_path = args
                .get(1)
                .map(|s| s.as_str())
                .unwrap_or("config/server.toml");
            run_server(config_path).await
        }
    }
}

fn open_storage(config: &ServerConfig) -> Result<Arc<SqliteStorageEngine>> {
    let data_dir = Path::new(&config.data_dir);
    std::fs::create_dir_all(data_dir)?;
    Ok(Arc::new(SqliteStorageEngine::new(data_dir)?))
}

fn run_seed(cmd: &str, config_path: &str, seed_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    let storage = open_storage(&config)?;
    let report = if cmd == "init-runbooks" {
        let file: RunbooksSeedFile = seed::read_seed_file(seed_path)?;
        let runner = ProcessThingRunner::new(config.things.clone());
        seed::seed_runbooks(storage.as_ref(), &runner, &file)?
    } else {
        let file: RulesSeedFile = seed::read_seed_file(seed_path)?;
        seed::seed_rules(storage.as_ref(), &file)?
    };
    tracing::info!(
        created = report.created,
        skipped = report.skipped,
        invalid = report.invalid,
        "{cmd} finished"
    );
    Ok(())
}

/// Logs bus events until the bus closes.
async fn log_events(state: AppState) {
    let mut rx = state.events.subscribe();
    loop {
        match rx.recv().await {
            Ok(SystemEvent::Notification { title, message, severity, rule_id, .. }) => {
                tracing::warn!(rule_id = %rule_id, severity = %severity, title = %title, "{message}");
            }
            Ok(event) => tracing::debug!(?event, "System event"),
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event logger lagged behind");
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn run_server(config_path: &str) -> Result<()> {
    let config = ServerConfig::load(config_path)?;
    tracing::info!(
        config = config_path,
        http_port = config.http_port,
        data_dir = %config.data_dir,
        things = config.things.len(),
        "runwarden-server starting"
    );

    let storage = open_storage(&config)?;
    let runner = Arc::new(ProcessThingRunner::new(config.things.clone()));
    let state = AppState::new(config.clone(), storage.clone(), runner)?;

    let recovered = state.executor.recover_interrupted()?;
    if recovered > 0 {
        tracing::warn!(recovered, "Marked interrupted executions as canceled");
    }
    let armed = state.triggers.reload_all()?;
    let open_alerts = state.alerts.restore_state().await?;
    tracing::info!(armed, open_alerts, "State restored");

    let shutdown = CancellationToken::new();
    let events_handle = tokio::spawn(log_events(state.clone()));

    let alert_handle = if config.alert.enabled {
        let alerts = state.alerts.clone();
        let cancel = shutdown.child_token();
        let every = config.evaluation_interval();
        Some(tokio::spawn(async move { alerts.run(every, cancel).await }))
    } else {
        tracing::info!("Alert evaluation disabled");
        None
    };

    let retention_days = i64::from(config.execution_retention_days);
    let cleanup_storage = storage.clone();
    let cleanup_handle = tokio::spawn(async move {
        let mut tick = interval(Duration::from_secs(3600));
        loop {
            tick.tick().await;
            let cutoff = Utc::now() - chrono::Duration::days(retention_days);
            match cleanup_storage.cleanup_executions(cutoff) {
                Ok(removed) if removed > 0 => {
                    tracing::info!(removed, "Cleaned up expired executions")
                }
                Err(e) => tracing::error!(error = %e, "Execution cleanup failed"),
                _ => {}
            }
        }
    });

    let http_addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();
    let listener = tokio::net::TcpListener::bind(http_addr).await?;
    tracing::info!(http = %http_addr, "Server started");

    let http_app = app::build_http_app(state.clone());
    let served = axum::serve(
        listener,
        http_app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        signal::ctrl_c().await.ok();
        tracing::info!("Shutting down gracefully");
    })
    .await;
    if let Err(e) = served {
        tracing::error!(error = %e, "HTTP server error");
    }

    shutdown.cancel();
    state.triggers.shutdown();
    if let Some(h) = alert_handle {
        let _ = h.await;
    }
    cleanup_handle.abort();
    events_handle.abort();
    tracing::info!("Server stopped");
    Ok(())
}
