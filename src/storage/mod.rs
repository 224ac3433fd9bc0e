//! SQLite storage layer -- metric history, baselines, usage ledger.

pub mod ledger;
pub mod schema;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension};
use tracing::warn;
use uuid::Uuid;

use crate::detect::Metric;
use crate::domains::DomainKind;
use crate::sources::format_ts;

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA foreign_keys = ON;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// One day of spend for one hosting resource.
#[derive(Debug, Clone, PartialEq)]
pub struct UsageEntry {
    pub day: NaiveDate,
    pub subject: String,
    pub cost: f64,
}

/// Persistence used by a run: append-only metric history plus single-row
/// baseline lookups.
#[async_trait]
pub trait ResultStore: Send + Sync {
    async fn insert_metrics(&self, domain: DomainKind, metrics: &[Metric]) -> Result<()>;

    async fn recent_metrics(&self, domain: DomainKind, since: DateTime<Utc>) -> Result<Vec<Metric>>;

    async fn get_baseline(&self, key: &str) -> Result<Option<f64>>;

    async fn set_baseline(&self, key: &str, value: f64, at: DateTime<Utc>) -> Result<()>;

    async fn record_usage(&self, entries: &[UsageEntry], at: DateTime<Utc>) -> Result<()>;
}

#[derive(Clone)]
pub struct SqliteStore {
    pool: Pool,
}

impl SqliteStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

#[async_trait]
impl ResultStore for SqliteStore {
    async fn insert_metrics(&self, domain: DomainKind, metrics: &[Metric]) -> Result<()> {
        if metrics.is_empty() {
            return Ok(());
        }
        let pool = self.pool.clone();
        let metrics = metrics.to_vec();
        let run_id = Uuid::new_v4().to_string();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO metric_history
                        (run_id, domain, metric_kind, subject, severity, value, threshold, metric_json, created_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )?;
                for m in &metrics {
                    stmt.execute(params![
                        run_id,
                        domain.to_string(),
                        m.metric_kind.as_str(),
                        m.subject,
                        m.severity.to_string(),
                        m.value,
                        m.threshold,
                        serde_json::to_string(m)?,
                        format_ts(m.timestamp),
                    ])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
        .context("failed to insert metric history")
    }

    async fn recent_metrics(&self, domain: DomainKind, since: DateTime<Utc>) -> Result<Vec<Metric>> {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<Metric>> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT id, metric_json FROM metric_history
                 WHERE domain = ?1 AND created_at >= ?2
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![domain.to_string(), format_ts(since)], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?;

            let mut metrics = Vec::new();
            for r in rows {
                let (id, json) = r?;
                match serde_json::from_str::<Metric>(&json) {
                    Ok(m) => metrics.push(m),
                    Err(e) => warn!(id, error = %e, "skipping unreadable metric_history row"),
                }
            }
            Ok(metrics)
        })
        .await?
    }

    async fn get_baseline(&self, key: &str) -> Result<Option<f64>> {
        let pool = self.pool.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<f64>> {
            let conn = pool.get()?;
            let value = conn
                .query_row("SELECT value FROM baselines WHERE key = ?1", params![key], |row| {
                    row.get::<_, f64>(0)
                })
                .optional()?;
            Ok(value)
        })
        .await?
    }

    async fn set_baseline(&self, key: &str, value: f64, at: DateTime<Utc>) -> Result<()> {
        let pool = self.pool.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = pool.get()?;
            conn.execute(
                "INSERT INTO baselines (key, value, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
                params![key, value, format_ts(at)],
            )?;
            Ok(())
        })
        .await?
    }

    async fn record_usage(&self, entries: &[UsageEntry], at: DateTime<Utc>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let pool = self.pool.clone();
        let entries = entries.to_vec();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool.get()?;
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(
                    "INSERT INTO usage_ledger (day, subject, cost, created_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(day, subject) DO UPDATE SET cost = excluded.cost, created_at = excluded.created_at",
                )?;
                for e in &entries {
                    stmt.execute(params![e.day.to_string(), e.subject, e.cost, format_ts(at)])?;
                }
            }
            tx.commit()?;
            Ok(())
        })
        .await?
    }
}

/// Stand-in when the database cannot be opened. Every call fails; the
/// pipeline logs each failure and carries on with defaults.
pub struct UnavailableStore {
    reason: String,
}

impl UnavailableStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }

    fn error(&self) -> anyhow::Error {
        anyhow!("result store unavailable: {}", self.reason)
    }
}

#[async_trait]
impl ResultStore for UnavailableStore {
    async fn insert_metrics(&self, _domain: DomainKind, _metrics: &[Metric]) -> Result<()> {
        Err(self.error())
    }

    async fn recent_metrics(&self, _domain: DomainKind, _since: DateTime<Utc>) -> Result<Vec<Metric>> {
        Err(self.error())
    }

    async fn get_baseline(&self, _key: &str) -> Result<Option<f64>> {
        Err(self.error())
    }

    async fn set_baseline(&self, _key: &str, _value: f64, _at: DateTime<Utc>) -> Result<()> {
        Err(self.error())
    }

    async fn record_usage(&self, _entries: &[UsageEntry], _at: DateTime<Utc>) -> Result<()> {
        Err(self.error())
    }
}
