//! Hosting provider usage API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{format_ts, parse_ts, MetricSource, SourceError, TimeRange};
use crate::detect::{Sample, SourceKind};

#[derive(Debug, Deserialize)]
struct UsageResponse {
    #[serde(default)]
    usage: Vec<UsageItem>,
}

#[derive(Debug, Deserialize)]
struct UsageItem {
    resource: String,
    timestamp: String,
    quantity: f64,
    #[serde(default)]
    cost: f64,
}

/// Billable usage line items, one sample per item with its cost attached.
pub struct HostingUsageSource {
    client: Client,
    base_url: String,
    token: String,
}

impl HostingUsageSource {
    pub fn new(base_url: &str, token: &str, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl MetricSource for HostingUsageSource {
    fn name(&self) -> &str {
        "hosting-usage"
    }

    fn kind(&self) -> SourceKind {
        SourceKind::HostingApi
    }

    async fn fetch(&self, window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
        let url = format!("{}/usage", self.base_url);
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.token)
            .query(&[("from", format_ts(window.start)), ("to", format_ts(window.end))])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SourceError::Status {
                url,
                status: resp.status().as_u16(),
            });
        }
        let body = resp.text().await?;
        parse_usage(&body, window)
    }
}

pub fn parse_usage(body: &str, window: &TimeRange) -> Result<Vec<Sample>, SourceError> {
    let parsed: UsageResponse = serde_json::from_str(body)?;
    let mut samples = Vec::with_capacity(parsed.usage.len());
    for item in parsed.usage {
        let ts = parse_ts(&item.timestamp)?;
        if !window.contains(ts) {
            continue;
        }
        samples.push(
            Sample::new(ts, SourceKind::HostingApi, "usage", item.resource, item.quantity)
                .with_cost(item.cost),
        );
    }
    Ok(samples)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_parse_usage_filters_to_window() {
        let window = TimeRange::new(
            Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2026, 9, 25, 12, 0, 0).unwrap(),
        );
        let body = r#"{"usage":[
            {"resource":"bandwidth","timestamp":"2026-09-02T00:00:00Z","quantity":1200.5,"cost":12.0},
            {"resource":"functions","timestamp":"2026-08-31T23:00:00Z","quantity":10,"cost":1.0},
            {"resource":"builds","timestamp":"2026-09-03T00:00:00Z","quantity":4}
        ]}"#;

        let samples = parse_usage(body, &window).unwrap();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[0].subject, "bandwidth");
        assert_eq!(samples[0].cost, Some(12.0));
        assert_eq!(samples[1].cost, Some(0.0));
    }

    #[test]
    fn test_parse_usage_rejects_garbage() {
        let window = TimeRange::new(Utc::now(), Utc::now());
        assert!(matches!(parse_usage("not json", &window), Err(SourceError::Decode(_))));
        assert!(matches!(
            parse_usage(r#"{"usage":[{"resource":"x","timestamp":"soon","quantity":1}]}"#, &window),
            Err(SourceError::Timestamp(_))
        ));
    }
}
