//! Metric sources: the I/O edge of a run.
//!
//! Every source answers `fetch(window)` with samples or a [`SourceError`].
//! [`collect_all`] queries all sources of a run concurrently, bounds each call
//! by a timeout and demotes any failure to "no data" so collection always
//! moves forward.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::detect::{Sample, SourceKind};

pub mod ci;
pub mod consistency;
pub mod hosting;
pub mod latency;
pub mod ledger;
pub mod logs;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },

    #[error("failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("database query failed: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("database pool unavailable: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("blocking task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("invalid timestamp '{0}'")]
    Timestamp(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("result store is unavailable")]
    StoreUnavailable,
}

/// Half-open observation window `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `duration` leading up to `now`.
    pub fn last(duration: chrono::Duration, now: DateTime<Utc>) -> Self {
        Self {
            start: now - duration,
            end: now,
        }
    }

    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Name used in logs and the run report.
    fn name(&self) -> &str;

    fn kind(&self) -> SourceKind;

    async fn fetch(&self, window: &TimeRange) -> Result<Vec<Sample>, SourceError>;
}

/// Outcome of one source in one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceReport {
    pub name: String,
    pub kind: SourceKind,
    pub samples: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Fan out to every source, join, and concatenate samples in source order.
pub async fn collect_all(
    sources: &[Box<dyn MetricSource>],
    window: &TimeRange,
    timeout: Duration,
) -> (Vec<Sample>, Vec<SourceReport>) {
    let calls = sources.iter().map(|source| async move {
        let result = match tokio::time::timeout(timeout, source.fetch(window)).await {
            Ok(result) => result,
            Err(_) => Err(SourceError::Timeout(timeout)),
        };
        (source, result)
    });
    let results = futures::future::join_all(calls).await;

    let mut samples = Vec::new();
    let mut reports = Vec::with_capacity(results.len());
    for (source, result) in results {
        match result {
            Ok(batch) => {
                debug!(source = %source.name(), samples = batch.len(), "source collected");
                reports.push(SourceReport {
                    name: source.name().to_string(),
                    kind: source.kind(),
                    samples: batch.len(),
                    error: None,
                });
                samples.extend(batch);
            }
            Err(e) => {
                warn!(source = %source.name(), error = %e, "source unavailable, continuing without its data");
                reports.push(SourceReport {
                    name: source.name().to_string(),
                    kind: source.kind(),
                    samples: 0,
                    error: Some(e.to_string()),
                });
            }
        }
    }
    (samples, reports)
}

/// Timestamps are stored as RFC 3339 UTC with millisecond precision so that
/// lexical order in SQLite equals time order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>, SourceError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| SourceError::Timestamp(raw.to_string()))
}

/// Canned source for tests and dry runs.
pub struct StaticSource {
    name: String,
    kind: SourceKind,
    samples: Vec<Sample>,
}

impl StaticSource {
    pub fn new(name: impl Into<String>, kind: SourceKind, samples: Vec<Sample>) -> Self {
        Self {
            name: name.into(),
            kind,
            samples,
        }
    }
}

#[async_trait]
impl MetricSource for StaticSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
        Ok(self
            .samples
            .iter()
            .filter(|s| window.contains(s.timestamp))
            .cloned()
            .collect())
    }
}

/// Placeholder for a database-backed source when the result store could not
/// be opened. Every fetch fails, so the run reports it as degraded.
pub struct UnavailableSource {
    name: &'static str,
    kind: SourceKind,
}

impl UnavailableSource {
    pub fn new(name: &'static str, kind: SourceKind) -> Self {
        Self { name, kind }
    }
}

#[async_trait]
impl MetricSource for UnavailableSource {
    fn name(&self) -> &str {
        self.name
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    async fn fetch(&self, _window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
        Err(SourceError::StoreUnavailable)
    }
}
