//! Persisted application logs.

use async_trait::async_trait;
use rusqlite::params;

use super::{format_ts, parse_ts, MetricSource, SourceError, TimeRange};
use crate::detect::{Sample, SourceKind};
use crate::storage::Pool;

/// One `log.<level>` sample per log row in the window.
pub struct LogSource {
    pool: Pool,
}

impl LogSource {
    pub const NAME: &'static str = "app-logs";

    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricSource for LogSource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::AppLogs
    }

    async fn fetch(&self, window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
        let pool = self.pool.clone();
        let (start, end) = (format_ts(window.start), format_ts(window.end));

        tokio::task::spawn_blocking(move || -> Result<Vec<Sample>, SourceError> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT service, level, created_at FROM app_logs
                 WHERE created_at >= ?1 AND created_at < ?2
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![start, end], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut samples = Vec::new();
            for r in rows {
                let (service, level, created_at) = r?;
                let kind = format!("log.{}", level.to_ascii_lowercase());
                samples.push(Sample::new(parse_ts(&created_at)?, SourceKind::AppLogs, kind, service, 1.0));
            }
            Ok(samples)
        })
        .await?
    }
}
