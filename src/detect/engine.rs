//! Run orchestration: drives one domain through
//! `collecting -> analyzing -> detecting -> generating -> persisting -> dispatching -> done`.
//!
//! Only `collecting` runs concurrently. Source, store and dispatch failures are
//! logged and absorbed so a run always produces a [`RunResult`].

use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::detect::action::generate_actions;
use crate::detect::pattern::{detect_patterns, ISSUE_MIN_OCCURRENCES};
use crate::detect::{Metric, Pattern, Priority, RunResult, RunStatus, Severity};
use crate::dispatch::{ActionDispatcher, DispatchOutcome};
use crate::domains::{Analyzer, Baselines, DomainKind};
use crate::sources::{collect_all, MetricSource};
use crate::storage::ResultStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStage {
    Collecting,
    Analyzing,
    Detecting,
    Generating,
    Persisting,
    Dispatching,
    Done,
}

impl RunStage {
    /// Stages advance strictly in order; `Done` is terminal.
    pub fn next(self) -> Option<RunStage> {
        match self {
            RunStage::Collecting => Some(RunStage::Analyzing),
            RunStage::Analyzing => Some(RunStage::Detecting),
            RunStage::Detecting => Some(RunStage::Generating),
            RunStage::Generating => Some(RunStage::Persisting),
            RunStage::Persisting => Some(RunStage::Dispatching),
            RunStage::Dispatching => Some(RunStage::Done),
            RunStage::Done => None,
        }
    }
}

impl std::fmt::Display for RunStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunStage::Collecting => "collecting",
            RunStage::Analyzing => "analyzing",
            RunStage::Detecting => "detecting",
            RunStage::Generating => "generating",
            RunStage::Persisting => "persisting",
            RunStage::Dispatching => "dispatching",
            RunStage::Done => "done",
        };
        f.write_str(s)
    }
}

/// This many high-severity metrics make the run a warning.
pub const WARNING_HIGH_COUNT: usize = 2;

/// Critical on any critical metric or any issue-eligible pattern. Several
/// high findings of one kind reach critical through their pattern.
pub fn overall_status(metrics: &[Metric], patterns: &[Pattern]) -> RunStatus {
    let highs = metrics.iter().filter(|m| m.severity == Severity::High).count();

    let critical = metrics.iter().any(|m| m.severity == Severity::Critical)
        || patterns.iter().any(|p| p.occurrences >= ISSUE_MIN_OCCURRENCES);

    if critical {
        RunStatus::Critical
    } else if highs >= WARNING_HIGH_COUNT {
        RunStatus::Warning
    } else {
        RunStatus::Healthy
    }
}

/// Per-run inputs that are not configuration.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub now: DateTime<Utc>,
    pub source_timeout: Duration,
    pub min_dispatch_priority: Priority,
}

impl RunContext {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now,
            source_timeout: Duration::from_secs(10),
            min_dispatch_priority: Priority::Low,
        }
    }
}

/// Execute one full run of `analyzer`'s domain.
pub async fn run_pipeline(
    analyzer: &dyn Analyzer,
    sources: &[Box<dyn MetricSource>],
    store: &dyn ResultStore,
    dispatcher: &dyn ActionDispatcher,
    ctx: &RunContext,
) -> RunResult {
    let domain = analyzer.domain();
    let now = ctx.now;
    let mut stage = RunStage::Collecting;

    let window = analyzer.window(now);
    info!(%domain, %stage, sources = sources.len(), start = %window.start, end = %window.end, "run started");
    let (samples, reports) = collect_all(sources, &window, ctx.source_timeout).await;

    let mut baselines = Baselines::new();
    for key in analyzer.baseline_keys(&samples) {
        match store.get_baseline(&key).await {
            Ok(Some(value)) => baselines.insert(key, value),
            Ok(None) => debug!(%domain, key = %key, "no stored baseline, using default"),
            Err(e) => warn!(%domain, key = %key, error = %e, "baseline lookup failed, using default"),
        }
    }

    let history = match analyzer.pattern_lookback() {
        Some(lookback) => match store.recent_metrics(domain, now - lookback).await {
            Ok(metrics) => metrics,
            Err(e) => {
                warn!(%domain, error = %e, "metric history unavailable, detecting patterns on this run only");
                Vec::new()
            }
        },
        None => Vec::new(),
    };

    stage = advance(domain, stage);
    let analysis = analyzer.analyze(&samples, &baselines, now);
    info!(%domain, %stage, samples = samples.len(), metrics = analysis.metrics.len(), "analysis complete");

    stage = advance(domain, stage);
    let patterns = if history.is_empty() {
        detect_patterns(&analysis.metrics)
    } else {
        let mut window_metrics = history;
        window_metrics.extend(analysis.metrics.iter().cloned());
        detect_patterns(&window_metrics)
    };
    let status = overall_status(&analysis.metrics, &patterns);

    stage = advance(domain, stage);
    let actions = generate_actions(
        &analysis.metrics,
        &patterns,
        analysis.forecast.as_ref(),
        &analyzer.action_rules(),
    );

    stage = advance(domain, stage);
    if let Err(e) = store.insert_metrics(domain, &analysis.metrics).await {
        warn!(%domain, %stage, error = %e, "failed to persist metrics");
    }
    for (key, value) in &analysis.baseline_updates {
        if let Err(e) = store.set_baseline(key, *value, now).await {
            warn!(%domain, key = %key, error = %e, "failed to update baseline");
        }
    }
    if let Err(e) = store.record_usage(&analysis.usage, now).await {
        warn!(%domain, error = %e, "failed to record usage");
    }

    stage = advance(domain, stage);
    let mut sent = 0usize;
    for action in actions.iter().filter(|a| a.priority >= ctx.min_dispatch_priority) {
        match dispatcher.dispatch(action).await {
            Ok(DispatchOutcome::Sent) => sent += 1,
            Ok(DispatchOutcome::Skipped) => {}
            Err(e) => warn!(%domain, fingerprint = %action.fingerprint(), error = %e, "dispatch failed"),
        }
    }

    stage = advance(domain, stage);
    info!(
        %domain,
        %stage,
        %status,
        metrics = analysis.metrics.len(),
        patterns = patterns.len(),
        actions = actions.len(),
        sent,
        "run finished"
    );

    RunResult {
        domain,
        status,
        metrics: analysis.metrics,
        patterns,
        actions,
        forecast: analysis.forecast,
        sources: reports,
        timestamp: now,
    }
}

fn advance(domain: DomainKind, stage: RunStage) -> RunStage {
    let next = stage.next().unwrap_or(RunStage::Done);
    debug!(%domain, from = %stage, to = %next, "stage transition");
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{MetricContext, MetricKind};
    use crate::detect::pattern::detect_patterns;
    use chrono::TimeZone;

    fn metric(kind: MetricKind, severity: Severity) -> Metric {
        let context = match kind {
            MetricKind::ErrorRate => MetricContext::ErrorRate {
                service: "api".to_string(),
                errors: 6,
                fatal: 0,
                total: 100,
                ratio: 0.06,
            },
            _ => MetricContext::Integrity {
                check: "negative_prices".to_string(),
                count: 1,
            },
        };
        Metric::new(Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(), "x", 1.0, 1.0, severity, context)
    }

    fn pattern(occurrences: usize) -> Pattern {
        let t = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
        Pattern {
            kind: MetricKind::DeployFailure,
            occurrences,
            description: String::new(),
            subjects: vec!["deploy".to_string()],
            first_seen: t,
            last_seen: t,
        }
    }

    #[test]
    fn test_status_rules() {
        assert_eq!(overall_status(&[], &[]), RunStatus::Healthy);

        let one_high = [metric(MetricKind::ErrorRate, Severity::High)];
        assert_eq!(overall_status(&one_high, &[]), RunStatus::Healthy);

        let two_high = [
            metric(MetricKind::ErrorRate, Severity::High),
            metric(MetricKind::IntegrityViolation, Severity::High),
        ];
        assert_eq!(overall_status(&two_high, &[]), RunStatus::Warning);

        let critical = [metric(MetricKind::ErrorRate, Severity::Critical)];
        assert_eq!(overall_status(&critical, &[]), RunStatus::Critical);

        assert_eq!(overall_status(&[], &[pattern(2)]), RunStatus::Healthy);
        assert_eq!(overall_status(&[], &[pattern(3)]), RunStatus::Critical);
    }

    #[test]
    fn test_repeated_high_findings_escalate_through_their_pattern() {
        let highs = |n: usize| -> Vec<Metric> {
            (0..n).map(|_| metric(MetricKind::IntegrityViolation, Severity::High)).collect()
        };

        let two = highs(2);
        assert_eq!(overall_status(&two, &detect_patterns(&two)), RunStatus::Warning);

        let three = highs(3);
        assert_eq!(overall_status(&three, &detect_patterns(&three)), RunStatus::Critical);
    }

    #[test]
    fn test_stage_order() {
        let mut stage = RunStage::Collecting;
        let mut seen = vec![stage.to_string()];
        while let Some(next) = stage.next() {
            stage = next;
            seen.push(stage.to_string());
        }
        assert_eq!(
            seen,
            ["collecting", "analyzing", "detecting", "generating", "persisting", "dispatching", "done"]
        );
    }
}
