//! Saved speed test results per user.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::Pool;
use crate::session::User;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database pool unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("database error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("stored row {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}

/// A completed run, ready to be saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTestResult {
    pub download_speed: f64,
    pub upload_speed: f64,
    pub ping: f64,
    pub jitter: f64,
    pub server_location: String,
    pub isp: Option<String>,
    pub ip_address: Option<String>,
    pub connection_type: String,
    /// Seconds.
    pub test_duration: Option<f64>,
}

/// A saved result as returned by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub id: Uuid,
    pub download_speed: f64,
    pub upload_speed: f64,
    pub ping: f64,
    pub jitter: f64,
    pub server_location: String,
    pub isp: Option<String>,
    pub ip_address: Option<String>,
    pub connection_type: String,
    pub test_duration: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Result persistence as seen by the dashboard.
#[async_trait::async_trait]
pub trait ResultStore: Send + Sync {
    async fn save_test_result(&self, user: &User, result: NewTestResult) -> Result<TestResult, StoreError>;

    /// Newest first.
    async fn fetch_test_results(&self, user: &User) -> Result<Vec<TestResult>, StoreError>;
}

pub type SharedResultStore = Arc<dyn ResultStore>;

#[derive(Clone)]
pub struct SqliteResultStore {
    pool: Pool,
}

impl SqliteResultStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ResultStore for SqliteResultStore {
    async fn save_test_result(&self, user: &User, result: NewTestResult) -> Result<TestResult, StoreError> {
        let conn = self.pool.get()?;
        let saved = TestResult {
            id: Uuid::new_v4(),
            download_speed: result.download_speed,
            upload_speed: result.upload_speed,
            ping: result.ping,
            jitter: result.jitter,
            server_location: result.server_location,
            isp: result.isp,
            ip_address: result.ip_address,
            connection_type: result.connection_type,
            test_duration: result.test_duration,
            created_at: Utc::now(),
        };

        conn.execute(
            "INSERT INTO speed_test_results
                (id, user_id, download_speed, upload_speed, ping, jitter, server_location,
                 isp, ip_address, connection_type, test_duration, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                saved.id.to_string(),
                user.id.to_string(),
                saved.download_speed,
                saved.upload_speed,
                saved.ping,
                saved.jitter,
                saved.server_location,
                saved.isp,
                saved.ip_address,
                saved.connection_type,
                saved.test_duration,
                saved.created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
            ],
        )?;

        tracing::debug!(id = %saved.id, user = %user.id, "test result saved");
        Ok(saved)
    }

    async fn fetch_test_results(&self, user: &User) -> Result<Vec<TestResult>, StoreError> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT id, download_speed, upload_speed, ping, jitter, server_location,
                    isp, ip_address, connection_type, test_duration, created_at
             FROM speed_test_results
             WHERE user_id = ?1
             ORDER BY created_at DESC, rowid DESC",
        )?;

        let rows = stmt.query_map(params![user.id.to_string()], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(10)?,
                TestResult {
                    id: Uuid::nil(),
                    download_speed: row.get(1)?,
                    upload_speed: row.get(2)?,
                    ping: row.get(3)?,
                    jitter: row.get(4)?,
                    server_location: row.get(5)?,
                    isp: row.get(6)?,
                    ip_address: row.get(7)?,
                    connection_type: row.get(8)?,
                    test_duration: row.get(9)?,
                    created_at: DateTime::<Utc>::MIN_UTC,
                },
            ))
        })?;

        let mut results = Vec::new();
        for r in rows {
            let (id, created_at, mut result) = r?;
            result.id = Uuid::parse_str(&id).map_err(|e| StoreError::Corrupt {
                id: id.clone(),
                reason: e.to_string(),
            })?;
            result.created_at = DateTime::parse_from_rfc3339(&created_at)
                .map_err(|e| StoreError::Corrupt {
                    id: id.clone(),
                    reason: e.to_string(),
                })?
                .with_timezone(&Utc);
            results.push(result);
        }
        Ok(results)
    }
}

/// Aggregates shown above the history list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryStats {
    pub avg_download: f64,
    pub avg_upload: f64,
    pub avg_ping: f64,
    pub max_download: f64,
    pub max_upload: f64,
    pub total_tests: usize,
}

/// `None` when there is no history yet.
pub fn history_stats(results: &[TestResult]) -> Option<HistoryStats> {
    if results.is_empty() {
        return None;
    }
    let n = results.len() as f64;
    let avg = |f: fn(&TestResult) -> f64| results.iter().map(f).sum::<f64>() / n;
    let max = |f: fn(&TestResult) -> f64| results.iter().map(f).fold(f64::MIN, f64::max);

    Some(HistoryStats {
        avg_download: avg(|r| r.download_speed),
        avg_upload: avg(|r| r.upload_speed),
        avg_ping: avg(|r| r.ping),
        max_download: max(|r| r.download_speed),
        max_upload: max(|r| r.upload_speed),
        total_tests: results.len(),
    })
}
