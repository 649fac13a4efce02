// Request log persistence with bounded per-collection retention.
//
// Writes are best-effort: a failure here must never fail the request the log
// entry describes, and retention enforcement must never roll back the
// insert it follows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;

/// A single proxied request, persisted for observability/audit.
#[derive(Debug, Clone, Serialize)]
pub struct RequestLog {
    pub collection_id: String,
    pub path: String,
    pub method: String,
    pub target_url: String,
    pub status: u16,
    pub duration_ms: u64,
    pub request_size: usize,
    pub response_size: usize,
    pub client_ip: String,
    pub request_headers: Vec<(String, String)>,
    pub response_headers: Vec<(String, String)>,
    pub request_body: String,
    /// Decoded query parameters, grouped by key the way Go's `url.Values`
    /// (and its `json.Marshal` output) groups repeated keys into an array.
    pub request_params: BTreeMap<String, Vec<String>>,
    pub from_cache: bool,
    pub timestamp: DateTime<Utc>,
}

#[async_trait::async_trait]
pub trait LogStore: Send + Sync {
    /// Persists `entry`, then -- if `rolling` is set -- trims the oldest rows
    /// for `entry.collection_id` down to `max_entries` in one batched delete.
    /// Never returns an error to the caller: failures are logged internally.
    async fn record(&self, entry: RequestLog, rolling: bool, max_entries: i64);
}

pub type SharedLogStore = Arc<dyn LogStore>;

/// `sqlx::PgPool`-backed store, the production default.
pub struct SqlxLogStore {
    pool: sqlx::PgPool,
}

impl SqlxLogStore {
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Creates the `request_logs` table if it does not already exist. The
    /// full relational schema migration story lives outside this crate; this
    /// is only enough for the gateway to be runnable standalone.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS request_logs (
                id BIGSERIAL PRIMARY KEY,
                collection_id TEXT NOT NULL,
                path TEXT NOT NULL,
                method TEXT NOT NULL,
                target_url TEXT NOT NULL,
                status INTEGER NOT NULL,
                duration_ms BIGINT NOT NULL,
                request_size BIGINT NOT NULL,
                response_size BIGINT NOT NULL,
                client_ip TEXT NOT NULL,
                request_headers JSONB NOT NULL,
                response_headers JSONB NOT NULL,
                request_body TEXT NOT NULL,
                request_params JSONB NOT NULL,
                from_cache BOOLEAN NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_request_logs_collection_ts
                ON request_logs (collection_id, timestamp);
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LogStore for SqlxLogStore {
    async fn record(&self, entry: RequestLog, rolling: bool, max_entries: i64) {
        let headers_json = serde_json::to_value(&entry.request_headers).unwrap_or_default();
        let resp_headers_json = serde_json::to_value(&entry.response_headers).unwrap_or_default();
        let params_json = serde_json::to_value(&entry.request_params).unwrap_or_default();

        let insert = sqlx::query(
            r#"
            INSERT INTO request_logs
                (collection_id, path, method, target_url, status, duration_ms,
                 request_size, response_size, client_ip, request_headers,
                 response_headers, request_body, request_params, from_cache, timestamp)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15)
            "#,
        )
        .bind(&entry.collection_id)
        .bind(&entry.path)
        .bind(&entry.method)
        .bind(&entry.target_url)
        .bind(entry.status as i32)
        .bind(entry.duration_ms as i64)
        .bind(entry.request_size as i64)
        .bind(entry.response_size as i64)
        .bind(&entry.client_ip)
        .bind(headers_json)
        .bind(resp_headers_json)
        .bind(&entry.request_body)
        .bind(params_json)
        .bind(entry.from_cache)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await;

        if let Err(e) = insert {
            error!(component = "logsink", event = "insert_failed", collection_id = %entry.collection_id, error = %e, "failed to persist request log");
            return;
        }

        if !rolling {
            return;
        }

        let deleted = sqlx::query(
            r#"
            DELETE FROM request_logs WHERE id IN (
                SELECT id FROM request_logs
                WHERE collection_id = $1
                ORDER BY timestamp ASC
                LIMIT GREATEST((SELECT COUNT(*) FROM request_logs WHERE collection_id = $1) - $2, 0)
            )
            "#,
        )
        .bind(&entry.collection_id)
        .bind(max_entries)
        .execute(&self.pool)
        .await;

        if let Err(e) = deleted {
            error!(component = "logsink", event = "retention_delete_failed", collection_id = %entry.collection_id, error = %e, "failed to enforce log retention");
        }
    }
}

/// In-memory store implementing the identical retention algorithm, used by
/// the standalone binary without a configured database and by tests.
#[derive(Default)]
pub struct InMemoryLogStore {
    entries: Mutex<Vec<RequestLog>>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count_for(&self, collection_id: &str) -> usize {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.collection_id == collection_id)
            .count()
    }

    pub async fn all_for(&self, collection_id: &str) -> Vec<RequestLog> {
        self.entries
            .lock()
            .await
            .iter()
            .filter(|e| e.collection_id == collection_id)
            .cloned()
            .collect()
    }
}

#[async_trait::async_trait]
impl LogStore for InMemoryLogStore {
    async fn record(&self, entry: RequestLog, rolling: bool, max_entries: i64) {
        let mut entries = self.entries.lock().await;
        entries.push(entry.clone());

        if !rolling {
            return;
        }

        let mut indices: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.collection_id == entry.collection_id)
            .map(|(i, _)| i)
            .collect();
        indices.sort_by_key(|&i| entries[i].timestamp);

        let excess = indices.len() as i64 - max_entries;
        if excess <= 0 {
            return;
        }
        let to_remove: std::collections::HashSet<usize> =
            indices.into_iter().take(excess as usize).collect();

        let mut kept = Vec::with_capacity(entries.len());
        for (i, e) in entries.drain(..).enumerate() {
            if !to_remove.contains(&i) {
                kept.push(e);
            }
        }
        *entries = kept;
    }
}

#[cfg(test)]
fn dummy_log(collection_id: &str, ts_offset_secs: i64) -> RequestLog {
    RequestLog {
        collection_id: collection_id.to_string(),
        path: "/things".to_string(),
        method: "GET".to_string(),
        target_url: "http://upstream/things".to_string(),
        status: 200,
        duration_ms: 5,
        request_size: 0,
        response_size: 0,
        client_ip: "127.0.0.1".to_string(),
        request_headers: vec![],
        response_headers: vec![],
        request_body: String::new(),
        request_params: BTreeMap::new(),
        from_cache: false,
        timestamp: Utc::now() + chrono::Duration::seconds(ts_offset_secs),
    }
}
