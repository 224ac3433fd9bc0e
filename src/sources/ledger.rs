//! Persisted daily spend history.

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use rusqlite::params;

use super::{MetricSource, SourceError, TimeRange};
use crate::detect::{Sample, SourceKind};
use crate::storage::Pool;

/// Reads `usage_ledger` rows whose day falls in the window, one `daily_cost`
/// sample per (day, subject) stamped at midnight UTC.
pub struct UsageLedgerSource {
    pool: Pool,
}

impl UsageLedgerSource {
    pub const NAME: &'static str = "usage-ledger";

    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricSource for UsageLedgerSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::UsageLedger
    }

    async fn fetch(&self, window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
        let pool = self.pool.clone();
        let first_day = window.start.date_naive().to_string();
        let last_day = window.end.date_naive().to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<Sample>, SourceError> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT day, subject, cost FROM usage_ledger
                 WHERE day >= ?1 AND day <= ?2
                 ORDER BY day ASC, subject ASC",
            )?;
            let rows = stmt.query_map(params![first_day, last_day], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?;

            let mut samples = Vec::new();
            for r in rows {
                let (day, subject, cost) = r?;
                let day = NaiveDate::parse_from_str(&day, "%Y-%m-%d")
                    .map_err(|_| SourceError::Timestamp(day.clone()))?;
                let Some(midnight) = day.and_hms_opt(0, 0, 0) else { continue };
                samples.push(
                    Sample::new(Utc.from_utc_datetime(&midnight), SourceKind::UsageLedger, "daily_cost", subject, cost)
                        .with_cost(cost),
                );
            }
            Ok(samples)
        })
        .await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{open_pool, ResultStore, SqliteStore, UsageEntry};

    #[tokio::test]
    async fn test_reads_days_inside_window() {
        let dir = tempfile::tempdir().unwrap();
        let pool = open_pool(dir.path().join("v.db").to_str().unwrap()).unwrap();
        let store = SqliteStore::new(pool.clone());
        let at = Utc.with_ymd_and_hms(2026, 3, 10, 0, 0, 0).unwrap();
        let entries: Vec<UsageEntry> = (1..=9)
            .map(|d| UsageEntry {
                day: NaiveDate::from_ymd_opt(2026, 3, d).unwrap(),
                subject: "total".to_string(),
                cost: d as f64,
            })
            .collect();
        store.record_usage(&entries, at).await.unwrap();

        let window = TimeRange::new(
            Utc.with_ymd_and_hms(2026, 3, 3, 8, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 3, 5, 8, 0, 0).unwrap(),
        );
        let samples = UsageLedgerSource::new(pool).fetch(&window).await.unwrap();
        let costs: Vec<f64> = samples.iter().map(|s| s.value).collect();
        assert_eq!(costs, vec![3.0, 4.0, 5.0]);
        assert_eq!(samples[0].metric_kind, "daily_cost");
    }
}
