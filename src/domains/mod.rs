//! Domain instantiations of the detection pipeline: cost, health and
//! integrity. Each domain supplies its sources, its observation window and an
//! [`Analyzer`] that turns samples into classified metrics.

pub mod cost;
pub mod health;
pub mod integrity;

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::{Credentials, VigilConfig};
use crate::detect::action::ActionRules;
use crate::detect::{CostForecast, Metric, Sample, SourceKind};
use crate::sources::latency::LatencySource;
use crate::sources::ledger::UsageLedgerSource;
use crate::sources::logs::LogSource;
use crate::sources::{self, MetricSource, TimeRange};
use crate::storage::{Pool, UsageEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DomainKind {
    Cost,
    Health,
    Integrity,
}

impl DomainKind {
    pub const ALL: [DomainKind; 3] = [DomainKind::Cost, DomainKind::Health, DomainKind::Integrity];
}

impl std::fmt::Display for DomainKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DomainKind::Cost => write!(f, "cost"),
            DomainKind::Health => write!(f, "health"),
            DomainKind::Integrity => write!(f, "integrity"),
        }
    }
}

/// Previously persisted reference values, keyed by baseline name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Baselines(HashMap<String, f64>);

impl Baselines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        self.0.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.0.get(key).copied()
    }
}

/// What a domain derived from one run's samples.
#[derive(Debug, Clone, Default)]
pub struct Analysis {
    pub metrics: Vec<Metric>,
    pub forecast: Option<CostForecast>,
    /// Baselines to write back, e.g. the latest healthy p95 per endpoint.
    pub baseline_updates: Vec<(String, f64)>,
    /// Spend rows to append to the usage ledger.
    pub usage: Vec<UsageEntry>,
}

/// Pure, domain-specific half of a run.
pub trait Analyzer: Send + Sync {
    fn domain(&self) -> DomainKind;

    fn window(&self, now: DateTime<Utc>) -> TimeRange;

    /// Baselines to fetch from the store before analysis.
    fn baseline_keys(&self, _samples: &[Sample]) -> Vec<String> {
        Vec::new()
    }

    /// How far back persisted metrics count toward pattern detection.
    fn pattern_lookback(&self) -> Option<chrono::Duration> {
        None
    }

    fn action_rules(&self) -> ActionRules {
        ActionRules::default()
    }

    fn analyze(&self, samples: &[Sample], baselines: &Baselines, now: DateTime<Utc>) -> Analysis;
}

pub fn analyzer(domain: DomainKind, config: &VigilConfig) -> Box<dyn Analyzer> {
    match domain {
        DomainKind::Cost => Box::new(cost::CostAnalyzer::new(config.cost.clone())),
        DomainKind::Health => Box::new(health::HealthAnalyzer::new(config.health.clone())),
        DomainKind::Integrity => Box::new(integrity::IntegrityAnalyzer::new(config.integrity.clone())),
    }
}

/// Wire the production sources for `domain`.
pub fn build_sources(
    domain: DomainKind,
    config: &VigilConfig,
    creds: &Credentials,
    pool: Option<&Pool>,
) -> Result<Vec<Box<dyn MetricSource>>> {
    let timeout = Duration::from_secs(config.sources.timeout_secs);
    let mut out: Vec<Box<dyn MetricSource>> = Vec::new();

    match domain {
        DomainKind::Cost => {
            let token = creds.hosting_token.as_deref().unwrap_or_default();
            out.push(Box::new(sources::hosting::HostingUsageSource::new(
                &config.cost.hosting_url,
                token,
                timeout,
            )?));
            out.push(pooled(pool, UsageLedgerSource::NAME, SourceKind::UsageLedger, UsageLedgerSource::new));
        }
        DomainKind::Health => {
            let token = creds.ci_token.as_deref().unwrap_or_default();
            out.push(Box::new(sources::ci::CiRunSource::new(&config.health.ci_url, token, timeout)?));
            out.push(pooled(pool, LogSource::NAME, SourceKind::AppLogs, LogSource::new));
            out.push(pooled(pool, LatencySource::NAME, SourceKind::Performance, LatencySource::new));
        }
        DomainKind::Integrity => {
            out.push(Box::new(sources::consistency::ConsistencySource::new(
                config.integrity_database(),
                config.integrity.checks.clone(),
            )));
        }
    }
    Ok(out)
}

/// A source backed by the result store, or a failing placeholder without one.
fn pooled<S, F>(pool: Option<&Pool>, name: &'static str, kind: SourceKind, build: F) -> Box<dyn MetricSource>
where
    S: MetricSource + 'static,
    F: FnOnce(Pool) -> S,
{
    match pool {
        Some(pool) => Box::new(build(pool.clone())),
        None => Box::new(sources::UnavailableSource::new(name, kind)),
    }
}

/// Samples of one source kind grouped by subject, in first-seen order.
pub(crate) fn group_by_subject<'a, F>(samples: &'a [Sample], keep: F) -> Vec<(&'a str, Vec<&'a Sample>)>
where
    F: Fn(&Sample) -> bool,
{
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(&str, Vec<&Sample>)> = Vec::new();
    for s in samples.iter().filter(|s| keep(*s)) {
        match index.get(s.subject.as_str()) {
            Some(&i) => groups[i].1.push(s),
            None => {
                index.insert(s.subject.as_str(), groups.len());
                groups.push((s.subject.as_str(), vec![s]));
            }
        }
    }
    groups
}

pub(crate) fn from_source(kind: SourceKind) -> impl Fn(&Sample) -> bool {
    move |s: &Sample| s.source_kind == kind
}
