//! CI run history (GitHub Actions style `workflow_runs` listing).

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{format_ts, parse_ts, MetricSource, SourceError, TimeRange};
use crate::detect::{Sample, SourceKind};

/// Conclusions counted as a failed deploy.
const FAILED_CONCLUSIONS: &[&str] = &["failure", "failed", "timed_out", "startup_failure"];

#[derive(Debug, Deserialize)]
struct RunsResponse {
    #[serde(default)]
    workflow_runs: Vec<WorkflowRun>,
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    name: String,
    conclusion: Option<String>,
    created_at: String,
}

/// One `ci_run` sample per finished run: value 1.0 when it failed, else 0.0.
pub struct CiRunSource {
    client: Client,
    base_url: String,
    token: String,
}

impl CiRunSource {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("vigil/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl MetricSource for CiRunSource {
    fn name(&self) -> &str {
        "ci-runs"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::CiRuns
    }

    async fn fetch(&self, window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
        let url = format!("{}/runs", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("since", format_ts(window.start))])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SourceError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }
        let body = resp.text().await?;
        parse_runs(&body, window)
    }
}

pub fn parse_runs(body: &str, window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
    let parsed: RunsResponse = serde_json::from_str(body)?;
    let mut samples = Vec::new();
    for run in parsed.workflow_runs {
        // still running
        let Some(conclusion) = run.conclusion else { continue };
        let ts = parse_ts(&run.created_at)?;
        if !window.contains(ts) {
            continue;
        }
        let failed = FAILED_CONCLUSIONS.contains(&conclusion.as_str());
        samples.push(Sample::new(
            ts,
            SourceKind::CiRuns,
            "ci_run",
            run.name,
            if failed { 1.0 } else { 0.0 },
        ));
    }
    samples.sort_by_key(|s| s.timestamp);
    Ok(samples)
}
