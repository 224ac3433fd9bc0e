//! Anomaly detection core: the shared data model that flows from raw samples
//! through classification, pattern detection and action generation.

pub mod action;
pub mod classify;
pub mod engine;
pub mod pattern;
pub mod stats;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detect::stats::TrendLabel;
use crate::domains::DomainKind;
use crate::sources::SourceReport;

/// Severity tier assigned to a classified metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// Dispatch priority of a remediation action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::Low => write!(f, "low"),
            Priority::Medium => write!(f, "medium"),
            Priority::High => write!(f, "high"),
            Priority::Critical => write!(f, "critical"),
        }
    }
}

/// Where a sample came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    HostingApi,
    UsageLedger,
    CiRuns,
    AppLogs,
    Performance,
    Consistency,
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SourceKind::HostingApi => write!(f, "hosting_api"),
            SourceKind::UsageLedger => write!(f, "usage_ledger"),
            SourceKind::CiRuns => write!(f, "ci_runs"),
            SourceKind::AppLogs => write!(f, "app_logs"),
            SourceKind::Performance => write!(f, "performance"),
            SourceKind::Consistency => write!(f, "consistency"),
        }
    }
}

/// One raw observation produced by a metric source. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub source_kind: SourceKind,
    /// Source-defined kind string, e.g. `usage`, `ci_run`, `log.error`, `latency_ms`.
    pub metric_kind: String,
    /// What the sample is about: endpoint, workflow, service, resource or check name.
    pub subject: String,
    pub value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost: Option<f64>,
}

impl Sample {
    pub fn new(
        timestamp: DateTime<Utc>,
        source_kind: SourceKind,
        metric_kind: impl Into<String>,
        subject: impl Into<String>,
        value: f64,
    ) -> Self {
        Self {
            timestamp,
            source_kind,
            metric_kind: metric_kind.into(),
            subject: subject.into(),
            value,
            cost: None,
        }
    }

    pub fn with_cost(mut self, cost: f64) -> Self {
        self.cost = Some(cost);
        self
    }
}

/// Typed kind of a classified metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    BudgetDeviation,
    DeployFailure,
    LatencySpike,
    ErrorRate,
    IntegrityViolation,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::BudgetDeviation => "budget_deviation",
            MetricKind::DeployFailure => "deploy_failure",
            MetricKind::LatencySpike => "latency_spike",
            MetricKind::ErrorRate => "error_rate",
            MetricKind::IntegrityViolation => "integrity_violation",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-kind evidence attached to a metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetricContext {
    Budget {
        current_spend: f64,
        projected: f64,
        budget: f64,
        deviation_pct: f64,
        trend: TrendLabel,
    },
    DeployFailure {
        workflow: String,
        failed: usize,
        total: usize,
    },
    Latency {
        endpoint: String,
        p95_ms: f64,
        baseline_p95_ms: f64,
        increase_pct: f64,
        samples: usize,
    },
    ErrorRate {
        service: String,
        errors: usize,
        fatal: usize,
        total: usize,
        ratio: f64,
    },
    Integrity {
        check: String,
        count: u64,
    },
}

impl MetricContext {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricContext::Budget { .. } => MetricKind::BudgetDeviation,
            MetricContext::DeployFailure { .. } => MetricKind::DeployFailure,
            MetricContext::Latency { .. } => MetricKind::LatencySpike,
            MetricContext::ErrorRate { .. } => MetricKind::ErrorRate,
            MetricContext::Integrity { .. } => MetricKind::IntegrityViolation,
        }
    }
}

/// A sample (or aggregate of samples) that crossed a domain threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    pub timestamp: DateTime<Utc>,
    pub metric_kind: MetricKind,
    pub subject: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub context: MetricContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recommendation: Option<String>,
}

impl Metric {
    /// Build a metric whose kind is taken from its context.
    pub fn new(
        timestamp: DateTime<Utc>,
        subject: impl Into<String>,
        value: f64,
        threshold: f64,
        severity: Severity,
        context: MetricContext,
    ) -> Self {
        Self {
            timestamp,
            metric_kind: context.kind(),
            subject: subject.into(),
            value,
            threshold,
            severity,
            context,
            recommendation: None,
        }
    }

    pub fn with_recommendation(mut self, recommendation: impl Into<String>) -> Self {
        self.recommendation = Some(recommendation.into());
        self
    }
}

/// Same-kind metrics recurring inside one observation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub kind: MetricKind,
    pub occurrences: usize,
    pub description: String,
    /// Distinct subjects in first-seen order.
    pub subjects: Vec<String>,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Alert,
    Issue,
    ScaleRequest,
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionKind::Alert => write!(f, "alert"),
            ActionKind::Issue => write!(f, "issue"),
            ActionKind::ScaleRequest => write!(f, "scale_request"),
        }
    }
}

/// A typed request for an external remediation side effect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    #[serde(rename = "type")]
    pub kind: ActionKind,
    pub target: String,
    pub reason: String,
    pub priority: Priority,
    pub payload: serde_json::Map<String, serde_json::Value>,
}

impl Action {
    /// Stable identity used for in-run merging and cross-run cooldowns.
    pub fn fingerprint(&self) -> String {
        format!("{}:{}:{}", self.kind, self.target, self.reason)
    }
}

/// Overall outcome of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Healthy,
    #[serde(alias = "degraded")]
    Warning,
    Critical,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Healthy => write!(f, "healthy"),
            RunStatus::Warning => write!(f, "warning"),
            RunStatus::Critical => write!(f, "critical"),
        }
    }
}

/// Spend usage of one hosting resource over the billing period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub subject: String,
    pub average_usage: f64,
    pub total_cost: f64,
}

/// Month-end spend projection produced by the cost domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CostForecast {
    pub current_spend: f64,
    pub projected: f64,
    pub budget: f64,
    pub deviation_pct: f64,
    pub trend: TrendLabel,
    pub trend_slope: f64,
    pub history_days: usize,
    pub resources: Vec<ResourceUsage>,
}

/// Terminal artifact of one run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub domain: DomainKind,
    pub status: RunStatus,
    pub metrics: Vec<Metric>,
    pub patterns: Vec<Pattern>,
    pub actions: Vec<Action>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forecast: Option<CostForecast>,
    pub sources: Vec<SourceReport>,
    pub timestamp: DateTime<Utc>,
}
