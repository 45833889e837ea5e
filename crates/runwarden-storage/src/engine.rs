use crate::{AlertQuery, ExecutionQuery, MetricQuery, StorageEngine};
use anyhow::Result;
use chrono::{DateTime, Utc};
use runwarden_common::types::{Alert, AlertRule, MetricSample, Runbook, RunbookExecution};
use rusqlite::{Connection, OptionalExtension};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

const DB_FILE: &str = "runwarden.db";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS runbooks (
    id TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS executions (
    id TEXT PRIMARY KEY,
    runbook_id TEXT NOT NULL,
    status TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_executions_runbook_time
    ON executions(runbook_id, started_at);
CREATE INDEX IF NOT EXISTS idx_executions_status ON executions(status);
CREATE TABLE IF NOT EXISTS alert_rules (
    id TEXT PRIMARY KEY,
    body TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS alerts (
    id TEXT PRIMARY KEY,
    rule_id TEXT NOT NULL,
    status TEXT NOT NULL,
    fired_at INTEGER NOT NULL,
    body TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_alerts_rule_time ON alerts(rule_id, fired_at);
CREATE TABLE IF NOT EXISTS metric_samples (
    metric_name TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    value REAL NOT NULL,
    tags TEXT NOT NULL DEFAULT '{}'
);
CREATE INDEX IF NOT EXISTS idx_samples_metric_time
    ON metric_samples(metric_name, timestamp);
";

/// SQLite-backed storage. Definitions and execution records are stored as
/// JSON documents next to a few indexed columns used for filtering.
pub struct SqliteStorageEngine {
    conn: Mutex<Connection>,
}

impl SqliteStorageEngine {
    /// Opens (or creates) `runwarden.db` inside `data_dir`.
    pub fn new(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)?;
        let path = data_dir.join(DB_FILE);
        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        conn.execute_batch(SCHEMA)?;
        tracing::info!(path = %path.display(), "Opened storage database");
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the connection, recovering from a poisoned Mutex if necessary.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn get_body<T: DeserializeOwned>(&self, sql: &str, id: &str) -> Result<Option<T>> {
        let conn = self.lock();
        let body: Option<String> = conn
            .query_row(sql, [id], |row| row.get(0))
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }

    fn list_bodies<T: DeserializeOwned>(&self, sql: &str) -> Result<Vec<T>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(sql)?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in rows {
            out.push(serde_json::from_str(&body?)?);
        }
        Ok(out)
    }
}

impl StorageEngine for SqliteStorageEngine {
    fn upsert_runbook(&self, runbook: &Runbook) -> Result<()> {
        let body = serde_json::to_string(runbook)?;
        self.lock().execute(
            "INSERT OR REPLACE INTO runbooks (id, body, updated_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![&runbook.id, body, runbook.updated_at.timestamp_millis()],
        )?;
        Ok(())
    }

    fn get_runbook(&self, id: &str) -> Result<Option<Runbook>> {
        self.get_body("SELECT body FROM runbooks WHERE id = ?1", id)
    }

    fn list_runbooks(&self) -> Result<Vec<Runbook>> {
        self.list_bodies("SELECT body FROM runbooks ORDER BY id ASC")
    }

    fn delete_runbook(&self, id: &str) -> Result<bool> {
        let n = self.lock().execute("DELETE FROM runbooks WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    fn save_execution(&self, execution: &RunbookExecution) -> Result<()> {
        let body = serde_json::to_string(execution)?;
        self.lock().execute(
            "INSERT OR REPLACE INTO executions (id, runbook_id, status, started_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                &execution.id,
                &execution.runbook_id,
                execution.status.to_string(),
                execution.started_at.timestamp_millis(),
                body,
            ],
        )?;
        Ok(())
    }

    fn get_execution(&self, id: &str) -> Result<Option<RunbookExecution>> {
        self.get_body("SELECT body FROM executions WHERE id = ?1", id)
    }

    fn query_executions(&self, query: &ExecutionQuery) -> Result<Vec<RunbookExecution>> {
        let mut sql = String::from("SELECT body FROM executions WHERE 1 = 1");
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(runbook_id) = &query.runbook_id {
            params.push(Box::new(runbook_id.clone()));
            sql.push_str(&format!(" AND runbook_id = ?{}", params.len()));
        }
        if let Some(status) = query.status {
            params.push(Box::new(status.to_string()));
            sql.push_str(&format!(" AND status = ?{}", params.len()));
        }
        if let Some(from) = query.from {
            params.push(Box::new(from.timestamp_millis()));
            sql.push_str(&format!(" AND started_at >= ?{}", params.len()));
        }
        if let Some(to) = query.to {
            params.push(Box::new(to.timestamp_millis()));
            sql.push_str(&format!(" AND started_at <= ?{}", params.len()));
        }
        params.push(Box::new(query.limit as i64));
        sql.push_str(&format!(" ORDER BY started_at DESC, id DESC LIMIT ?{}", params.len()));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in rows {
            let execution: RunbookExecution = serde_json::from_str(&body?)?;
            out.push(execution);
        }
        Ok(out)
    }

    fn cleanup_executions(&self, before: DateTime<Utc>) -> Result<u64> {
        let n = self.lock().execute(
            "DELETE FROM executions WHERE started_at < ?1 AND status != 'running'",
            [before.timestamp_millis()],
        )?;
        Ok(n as u64)
    }

    fn upsert_alert_rule(&self, rule: &AlertRule) -> Result<()> {
        let body = serde_json::to_string(rule)?;
        self.lock().execute(
            "INSERT OR REPLACE INTO alert_rules (id, body) VALUES (?1, ?2)",
            rusqlite::params![&rule.id, body],
        )?;
        Ok(())
    }

    fn get_alert_rule(&self, id: &str) -> Result<Option<AlertRule>> {
        self.get_body("SELECT body FROM alert_rules WHERE id = ?1", id)
    }

    fn list_alert_rules(&self) -> Result<Vec<AlertRule>> {
        self.list_bodies("SELECT body FROM alert_rules ORDER BY id ASC")
    }

    fn delete_alert_rule(&self, id: &str) -> Result<bool> {
        let n = self.lock().execute("DELETE FROM alert_rules WHERE id = ?1", [id])?;
        Ok(n > 0)
    }

    fn save_alert(&self, alert: &Alert) -> Result<()> {
        let body = serde_json::to_string(alert)?;
        self.lock().execute(
            "INSERT OR REPLACE INTO alerts (id, rule_id, status, fired_at, body)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            rusqlite::params![
                &alert.id,
                &alert.rule_id,
                alert.status.to_string(),
                alert.fired_at.timestamp_millis(),
                body,
            ],
        )?;
        Ok(())
    }

    fn get_alert(&self, id: &str) -> Result<Option<Alert>> {
        self.get_body("SELECT body FROM alerts WHERE id = ?1", id)
    }

    fn query_alerts(&self, query: &AlertQuery) -> Result<Vec<Alert>> {
        let mut sql = String::from("SELECT body FROM alerts WHERE 1 = 1");
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if let Some(rule_id) = &query.rule_id {
            params.push(Box::new(rule_id.clone()));
            sql.push_str(&format!(" AND rule_id = ?{}", params.len()));
        }
        if let Some(status) = query.status {
            params.push(Box::new(status.to_string()));
            sql.push_str(&format!(" AND status = ?{}", params.len()));
        }
        if let Some(from) = query.from {
            params.push(Box::new(from.timestamp_millis()));
            sql.push_str(&format!(" AND fired_at >= ?{}", params.len()));
        }
        if let Some(to) = query.to {
            params.push(Box::new(to.timestamp_millis()));
            sql.push_str(&format!(" AND fired_at <= ?{}", params.len()));
        }
        params.push(Box::new(query.limit as i64));
        sql.push_str(&format!(" ORDER BY fired_at DESC, id DESC LIMIT ?{}", params.len()));

        let conn = self.lock();
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt.query_map(param_refs.as_slice(), |row| row.get::<_, String>(0))?;
        let mut out = Vec::new();
        for body in rows {
            let alert: Alert = serde_json::from_str(&body?)?;
            out.push(alert);
        }
        Ok(out)
    }

    fn write_samples(&self, samples: &[MetricSample]) -> Result<()> {
        let conn = self.lock();
        let tx = conn.unchecked_transaction()?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO metric_samples (metric_name, timestamp, value, tags) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for sample in samples {
                let tags_json = serde_json::to_string(&sample.tags)?;
                stmt.execute(rusqlite::params![
                    &sample.metric_name,
                    sample.timestamp.timestamp_millis(),
                    sample.value,
                    tags_json,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn query_samples(&self, query: &MetricQuery) -> Result<Vec<MetricSample>> {
        let conn = self.lock();
        let mut stmt = conn.prepare_cached(
            "SELECT timestamp, value, tags FROM metric_samples
             WHERE metric_name = ?1 AND timestamp >= ?2 AND timestamp <= ?3
             ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![
                &query.metric_name,
                query.from.timestamp_millis(),
                query.to.timestamp_millis()
            ],
            |row| {
                let ts_ms: i64 = row.get(0)?;
                let value: f64 = row.get(1)?;
                let tags: String = row.get(2)?;
                Ok((ts_ms, value, tags))
            },
        )?;

        let mut results = Vec::new();
        for row in rows {
            let (ts_ms, value, tags_str) = row?;
            let tags: HashMap<String, String> = serde_json::from_str(&tags_str).unwrap_or_default();
            let sample = MetricSample {
                metric_name: query.metric_name.clone(),
                value,
                tags,
                timestamp: DateTime::from_timestamp_millis(ts_ms).unwrap_or_default(),
            };
            if query.tags_match(&sample.tags) {
                results.push(sample);
            }
        }
        Ok(results)
    }
}
