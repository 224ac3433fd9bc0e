//! Persisted request latency samples.

use async_trait::async_trait;
use rusqlite::params;

use super::{format_ts, parse_ts, MetricSource, SourceError, TimeRange};
use crate::detect::{Sample, SourceKind};
use crate::storage::Pool;

pub struct LatencySource {
    pool: Pool,
}

impl LatencySource {
    pub const NAME: &'static str = "performance-samples";

    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricSource for LatencySource {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Performance
    }

    async fn fetch(&self, window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
        let pool = self.pool.clone();
        let (start, end) = (format_ts(window.start), format_ts(window.end));

        tokio::task::spawn_blocking(move || -> Result<Vec<Sample>, SourceError> {
            let conn = pool.get()?;
            let mut stmt = conn.prepare(
                "SELECT endpoint, duration_ms, created_at FROM performance_samples
                 WHERE created_at >= ?1 AND created_at < ?2
                 AND duration_ms >= 0
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![start, end], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, f64>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;

            let mut samples = Vec::new();
            for r in rows {
                let (endpoint, duration_ms, created_at) = r?;
                samples.push(Sample::new(
                    parse_ts(&created_at)?,
                    SourceKind::Performance,
                    "latency_ms",
                    endpoint,
                    duration_ms,
                ));
            }
            Ok(samples)
        })
        .await?
    }
}
