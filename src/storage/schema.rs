//! Database schema and migrations.

use anyhow::Result;
use rusqlite::Connection;

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );

        CREATE TABLE IF NOT EXISTS metric_history (
            id INTEGER PRIMARY KEY,
            run_id TEXT NOT NULL,
            domain TEXT NOT NULL,
            metric_kind TEXT NOT NULL,
            subject TEXT NOT NULL,
            severity TEXT NOT NULL,
            value REAL NOT NULL,
            threshold REAL NOT NULL,
            metric_json TEXT NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS baselines (
            key TEXT PRIMARY KEY,
            value REAL NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS usage_ledger (
            id INTEGER PRIMARY KEY,
            day TEXT NOT NULL,
            subject TEXT NOT NULL,
            cost REAL NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE (day, subject)
        );

        CREATE TABLE IF NOT EXISTS action_ledger (
            fingerprint TEXT PRIMARY KEY,
            fired_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS app_logs (
            id INTEGER PRIMARY KEY,
            service TEXT NOT NULL,
            level TEXT NOT NULL,
            message TEXT NOT NULL DEFAULT '',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS performance_samples (
            id INTEGER PRIMARY KEY,
            endpoint TEXT NOT NULL,
            duration_ms REAL NOT NULL,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_metric_history_domain_created ON metric_history(domain, created_at);
        CREATE INDEX IF NOT EXISTS idx_usage_ledger_day ON usage_ledger(day);
        CREATE INDEX IF NOT EXISTS idx_app_logs_created ON app_logs(created_at);
        CREATE INDEX IF NOT EXISTS idx_performance_created ON performance_samples(created_at);

        INSERT OR IGNORE INTO schema_version (version) VALUES (1);",
    )?;

    Ok(())
}
