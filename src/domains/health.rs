//! Health domain: deploy failures per workflow, p95 latency against a stored
//! baseline per endpoint, and error ratio per service.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use super::{from_source, group_by_subject, Analysis, Analyzer, Baselines, DomainKind};
use crate::config::HealthConfig;
use crate::detect::classify::{deploy_failure_ladder, error_rate_ladder, latency_ladder};
use crate::detect::stats::percentile;
use crate::detect::{Metric, MetricContext, Sample, SourceKind};
use crate::sources::TimeRange;

pub fn latency_baseline_key(endpoint: &str) -> String {
    format!("latency_p95:{}", endpoint)
}

pub struct HealthAnalyzer {
    config: HealthConfig,
}

impl HealthAnalyzer {
    pub fn new(config: HealthConfig) -> Self {
        Self { config }
    }

    fn deploy_failures(&self, samples: &[Sample], now: DateTime<Utc>, out: &mut Vec<Metric>) {
        let ladder = deploy_failure_ladder(self.config.deploy_failure_threshold, self.config.deploy_failure_critical);

        for (workflow, runs) in group_by_subject(samples, from_source(SourceKind::CiRuns)) {
            let failed = runs.iter().filter(|s| s.value >= 1.0).count();
            let Some(severity) = ladder.classify(failed as f64) else { continue };

            let metric = Metric::new(
                now,
                workflow,
                failed as f64,
                ladder.threshold(),
                severity,
                MetricContext::DeployFailure {
                    workflow: workflow.to_string(),
                    failed,
                    total: runs.len(),
                },
            )
            .with_recommendation(format!(
                "{} of the last {} {} runs failed. Check the most recent failing job logs and consider pausing deploys.",
                failed,
                runs.len(),
                workflow
            ));
            out.push(metric);
        }
    }

    fn latency_spikes(
        &self,
        samples: &[Sample],
        baselines: &Baselines,
        now: DateTime<Utc>,
        out: &mut Vec<Metric>,
        healthy: &mut Vec<(String, f64)>,
    ) {
        let ladder = latency_ladder(self.config.latency_spike_pct);

        for (endpoint, group) in group_by_subject(samples, from_source(SourceKind::Performance)) {
            let durations: Vec<f64> = group.iter().map(|s| s.value).collect();
            let p95 = percentile(&durations, 95.0);
            let key = latency_baseline_key(endpoint);
            let baseline = baselines
                .get(&key)
                .filter(|b| *b > 0.0)
                .unwrap_or(self.config.default_baseline_p95_ms);
            let increase_pct = (p95 - baseline) / baseline * 100.0;

            match ladder.classify(increase_pct) {
                Some(severity) => {
                    let metric = Metric::new(
                        now,
                        endpoint,
                        increase_pct,
                        ladder.threshold(),
                        severity,
                        MetricContext::Latency {
                            endpoint: endpoint.to_string(),
                            p95_ms: p95,
                            baseline_p95_ms: baseline,
                            increase_pct,
                            samples: durations.len(),
                        },
                    )
                    .with_recommendation(format!(
                        "p95 on {} is {:.0}ms against a {:.0}ms baseline. Check recent deploys and downstream dependencies, or add capacity.",
                        endpoint, p95, baseline
                    ));
                    out.push(metric);
                }
                None => {
                    debug!(endpoint, p95, baseline, "latency within baseline");
                    healthy.push((key, p95));
                }
            }
        }
    }

    fn error_rates(&self, samples: &[Sample], now: DateTime<Utc>, out: &mut Vec<Metric>) {
        let ladder = error_rate_ladder(self.config.error_rate_threshold, self.config.error_rate_critical);

        for (service, lines) in group_by_subject(samples, from_source(SourceKind::AppLogs)) {
            let errors = lines.iter().filter(|s| s.metric_kind == "log.error").count();
            let fatal = lines.iter().filter(|s| s.metric_kind == "log.fatal").count();
            let total = lines.len();
            let ratio = (errors + fatal) as f64 / total as f64;
            let Some(severity) = ladder.classify(ratio) else { continue };

            let metric = Metric::new(
                now,
                service,
                ratio,
                ladder.threshold(),
                severity,
                MetricContext::ErrorRate {
                    service: service.to_string(),
                    errors,
                    fatal,
                    total,
                    ratio,
                },
            )
            .with_recommendation(format!(
                "{:.1}% of {} log lines from {} are errors. Inspect the newest error messages.",
                ratio * 100.0,
                total,
                service
            ));
            out.push(metric);
        }
    }
}

impl Analyzer for HealthAnalyzer {
    fn domain(&self) -> DomainKind {
        DomainKind::Health
    }

    fn window(&self, now: DateTime<Utc>) -> TimeRange {
        TimeRange::last(Duration::minutes(i64::from(self.config.window_minutes)), now)
    }

    fn baseline_keys(&self, samples: &[Sample]) -> Vec<String> {
        group_by_subject(samples, from_source(SourceKind::Performance))
            .into_iter()
            .map(|(endpoint, _)| latency_baseline_key(endpoint))
            .collect()
    }

    fn pattern_lookback(&self) -> Option<Duration> {
        match self.config.pattern_lookback_minutes {
            0 => None,
            minutes => Some(Duration::minutes(i64::from(minutes))),
        }
    }

    fn analyze(&self, samples: &[Sample], baselines: &Baselines, now: DateTime<Utc>) -> Analysis {
        let mut metrics = Vec::new();
        let mut baseline_updates = Vec::new();

        self.deploy_failures(samples, now, &mut metrics);
        self.latency_spikes(samples, baselines, now, &mut metrics, &mut baseline_updates);
        self.error_rates(samples, now, &mut metrics);

        Analysis {
            metrics,
            forecast: None,
            baseline_updates,
            usage: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{MetricKind, Severity};
    use chrono::TimeZone;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 4, 14, 10, 0, 0).unwrap()
    }

    fn at(minutes_ago: i64) -> DateTime<Utc> {
        now() - Duration::minutes(minutes_ago)
    }

    fn ci_runs(workflow: &str, outcomes: &[bool]) -> Vec<Sample> {
        outcomes
            .iter()
            .enumerate()
            .map(|(i, failed)| {
                let value = if *failed { 1.0 } else { 0.0 };
                Sample::new(at(50 - i as i64), SourceKind::CiRuns, "ci_run", workflow, value)
            })
            .collect()
    }

    fn latencies(endpoint: &str, values: &[f64]) -> Vec<Sample> {
        values
            .iter()
            .map(|v| Sample::new(at(5), SourceKind::Performance, "latency_ms", endpoint, *v))
            .collect()
    }

    fn logs(service: &str, errors: usize, fatal: usize, info: usize) -> Vec<Sample> {
        let mut out = Vec::new();
        for (kind, n) in [("log.error", errors), ("log.fatal", fatal), ("log.info", info)] {
            out.extend((0..n).map(|_| Sample::new(at(10), SourceKind::AppLogs, kind, service, 1.0)));
        }
        out
    }

    fn analyzer() -> HealthAnalyzer {
        HealthAnalyzer::new(HealthConfig::default())
    }

    #[test]
    fn test_three_of_six_failed_is_high() {
        let samples = ci_runs("deploy", &[true, false, true, false, true, false]);
        let analysis = analyzer().analyze(&samples, &Baselines::new(), now());
        assert_eq!(analysis.metrics.len(), 1);
        let m = &analysis.metrics[0];
        assert_eq!(m.metric_kind, MetricKind::DeployFailure);
        assert_eq!(m.severity, Severity::High);
        assert_eq!(m.value, 3.0);
        assert_eq!(
            m.context,
            MetricContext::DeployFailure {
                workflow: "deploy".to_string(),
                failed: 3,
                total: 6,
            }
        );
    }

    #[test]
    fn test_deploy_failure_boundaries() {
        let two = ci_runs("deploy", &[true, true, false]);
        assert!(analyzer().analyze(&two, &Baselines::new(), now()).metrics.is_empty());

        let five = ci_runs("deploy", &[true; 5]);
        let analysis = analyzer().analyze(&five, &Baselines::new(), now());
        assert_eq!(analysis.metrics[0].severity, Severity::Critical);
    }

    #[test]
    fn test_latency_uses_stored_baseline() {
        // p95 of 20 points is the 19th value: 650
        let mut values: Vec<f64> = (0..18).map(|_| 300.0).collect();
        values.extend([650.0, 900.0]);
        let samples = latencies("/checkout", &values);

        let mut baselines = Baselines::new();
        baselines.insert("latency_p95:/checkout", 400.0);

        let analysis = analyzer().analyze(&samples, &baselines, now());
        let m = &analysis.metrics[0];
        assert_eq!(m.severity, Severity::Critical);
        assert!((m.value - 62.5).abs() < 1e-9);
        assert!(analysis.baseline_updates.is_empty());
    }

    #[test]
    fn test_latency_falls_back_to_default_baseline() {
        // 620 vs the 500ms default is +24%: medium
        let samples = latencies("/search", &[620.0; 10]);
        let analysis = analyzer().analyze(&samples, &Baselines::new(), now());
        assert_eq!(analysis.metrics[0].severity, Severity::Medium);
    }

    #[test]
    fn test_latency_tiers() {
        let mut baselines = Baselines::new();
        baselines.insert("latency_p95:/a", 100.0);
        baselines.insert("latency_p95:/b", 100.0);
        let mut samples = latencies("/a", &[131.0; 4]);
        samples.extend(latencies("/b", &[125.0; 4]));

        let analysis = analyzer().analyze(&samples, &baselines, now());
        assert_eq!(analysis.metrics[0].subject, "/a");
        assert_eq!(analysis.metrics[0].severity, Severity::High);
        assert_eq!(analysis.metrics[1].severity, Severity::Medium);
    }

    #[test]
    fn test_healthy_latency_refreshes_baseline() {
        let samples = latencies("/home", &[200.0, 210.0, 220.0]);
        let analysis = analyzer().analyze(&samples, &Baselines::new(), now());
        assert!(analysis.metrics.is_empty());
        assert_eq!(analysis.baseline_updates, vec![("latency_p95:/home".to_string(), 220.0)]);
    }

    #[test]
    fn test_error_rate_tiers() {
        let mut samples = logs("api", 4, 1, 95);
        samples.extend(logs("worker", 10, 1, 89));
        samples.extend(logs("web", 1, 0, 99));

        let analysis = analyzer().analyze(&samples, &Baselines::new(), now());
        assert_eq!(analysis.metrics.len(), 2);
        assert_eq!(analysis.metrics[0].subject, "api");
        assert_eq!(analysis.metrics[0].severity, Severity::High);
        assert_eq!(analysis.metrics[1].subject, "worker");
        assert_eq!(analysis.metrics[1].severity, Severity::Critical);
    }

    #[test]
    fn test_baseline_keys_and_lookback() {
        let mut samples = latencies("/a", &[1.0]);
        samples.extend(latencies("/b", &[1.0, 2.0]));
        assert_eq!(
            analyzer().baseline_keys(&samples),
            vec!["latency_p95:/a".to_string(), "latency_p95:/b".to_string()]
        );
        assert_eq!(analyzer().pattern_lookback(), Some(Duration::minutes(60)));

        let cfg = HealthConfig {
            pattern_lookback_minutes: 0,
            ..HealthConfig::default()
        };
        assert_eq!(HealthAnalyzer::new(cfg).pattern_lookback(), None);
    }
}
