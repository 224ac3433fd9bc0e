//! Referential-integrity and data-sanity queries against the application
//! database.

use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::{Connection, OpenFlags};
use tracing::warn;

use super::{MetricSource, SourceError, TimeRange};
use crate::config::IntegrityCheck;
use crate::detect::{Sample, SourceKind};

/// Runs each configured check (a query returning one count) and emits one
/// `integrity` sample per check that could be evaluated. A single broken check
/// is skipped; failing to open the database fails the whole source.
pub struct ConsistencySource {
    path: PathBuf,
    checks: Vec<IntegrityCheck>,
}

impl ConsistencySource {
    pub fn new(path: impl Into<PathBuf>, checks: Vec<IntegrityCheck>) -> Self {
        Self {
            path: path.into(),
            checks,
        }
    }
}

#[async_trait]
impl MetricSource for ConsistencySource {
    fn name(&self) -> &str {
        "consistency-queries"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::Consistency
    }

    async fn fetch(&self, window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
        let path = self.path.clone();
        let checks = self.checks.clone();
        let observed_at = window.end;

        tokio::task::spawn_blocking(move || -> Result<Vec<Sample>, SourceError> {
            let conn = Connection::open_with_flags(
                &path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )?;
            conn.busy_timeout(std::time::Duration::from_secs(5))?;

            let mut samples = Vec::with_capacity(checks.len());
            for check in &checks {
                match conn.query_row(&check.sql, [], |row| row.get::<_, i64>(0)) {
                    Ok(count) => samples.push(Sample::new(
                        observed_at,
                        SourceKind::Consistency,
                        "integrity",
                        check.name.clone(),
                        count.max(0) as f64,
                    )),
                    Err(e) => warn!(check = %check.name, error = %e, "integrity check failed, skipping"),
                }
            }
            Ok(samples)
        })
        .await?
    }
}
