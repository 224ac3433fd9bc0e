//! Cost domain: month-end spend projection against a fixed budget.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use tracing::debug;

use super::{from_source, group_by_subject, Analysis, Analyzer, Baselines, DomainKind};
use crate::config::CostConfig;
use crate::detect::action::ActionRules;
use crate::detect::classify::budget_overrun_ladder;
use crate::detect::stats::{group_sum, mean, TimeSeries};
use crate::detect::{CostForecast, Metric, MetricContext, ResourceUsage, Sample, Severity, SourceKind};
use crate::sources::TimeRange;
use crate::storage::UsageEntry;

/// Ledger subject under which each run records the day's total spend.
pub const LEDGER_TOTAL_SUBJECT: &str = "total";

pub struct CostAnalyzer {
    config: CostConfig,
}

impl CostAnalyzer {
    pub fn new(config: CostConfig) -> Self {
        Self { config }
    }

    fn budget_metric(&self, forecast: &CostForecast, now: DateTime<Utc>) -> Option<Metric> {
        let threshold = self.config.deviation_threshold_pct;
        let deviation = forecast.deviation_pct;
        let context = MetricContext::Budget {
            current_spend: forecast.current_spend,
            projected: forecast.projected,
            budget: forecast.budget,
            deviation_pct: deviation,
            trend: forecast.trend,
        };

        if let Some(severity) = budget_overrun_ladder(threshold, self.config.critical_deviation_pct).classify(deviation) {
            let recommendation = format!(
                "Projected spend {:.2} exceeds budget {:.2} by {:.1}%. Review the largest resources before the period closes.",
                forecast.projected, forecast.budget, deviation
            );
            return Some(
                Metric::new(now, "budget", deviation, threshold, severity, context).with_recommendation(recommendation),
            );
        }

        if deviation <= -threshold {
            let recommendation = format!(
                "Projected spend {:.2} is {:.1}% under budget {:.2}; the budget may be oversized.",
                forecast.projected,
                deviation.abs(),
                forecast.budget
            );
            return Some(
                Metric::new(now, "budget", deviation, -threshold, Severity::Low, context)
                    .with_recommendation(recommendation),
            );
        }

        None
    }
}

impl Analyzer for CostAnalyzer {
    fn domain(&self) -> DomainKind {
        DomainKind::Cost
    }

    /// Covers both the ledger history and the whole current month.
    fn window(&self, now: DateTime<Utc>) -> TimeRange {
        let history_start = now - Duration::days(i64::from(self.config.history_days));
        TimeRange::new(history_start.min(month_start(now)), now)
    }

    fn action_rules(&self) -> ActionRules {
        self.config.action_rules()
    }

    fn analyze(&self, samples: &[Sample], _baselines: &Baselines, now: DateTime<Utc>) -> Analysis {
        let today = now.date_naive();
        let period_start = month_start(now);
        let in_period = |s: &Sample| s.source_kind == SourceKind::HostingApi && s.timestamp >= period_start;

        let resources: Vec<ResourceUsage> = group_by_subject(samples, in_period)
            .into_iter()
            .map(|(subject, group)| {
                let quantities: Vec<f64> = group.iter().map(|s| s.value).collect();
                ResourceUsage {
                    subject: subject.to_string(),
                    average_usage: mean(&quantities),
                    total_cost: group.iter().filter_map(|s| s.cost).sum(),
                }
            })
            .collect();

        if resources.is_empty() {
            debug!("no hosting usage in the current period, skipping projection");
            return Analysis::default();
        }

        let current_spend: f64 = resources.iter().map(|r| r.total_cost).sum();
        let today_spend: f64 = samples
            .iter()
            .filter(|s| in_period(*s) && s.timestamp.date_naive() == today)
            .filter_map(|s| s.cost)
            .sum();

        // Completed days only; today's ledger row is this run's own output.
        let ledger = from_source(SourceKind::UsageLedger);
        let history_samples: Vec<&Sample> = samples
            .iter()
            .filter(|s| ledger(*s) && s.timestamp.date_naive() < today)
            .collect();
        let mut daily = group_sum(
            &history_samples,
            |s| Some(s.timestamp.date_naive()),
            |s| s.cost.unwrap_or(s.value),
        );
        daily.sort_by_key(|(day, _)| *day);
        let series = TimeSeries::new(daily.iter().map(|(_, cost)| *cost).collect());

        let elapsed_days = f64::from(today.day());
        let projected = current_spend / elapsed_days * f64::from(days_in_month(today));
        let budget = self.config.budget;
        let deviation_pct = if budget > 0.0 {
            (projected - budget) / budget * 100.0
        } else {
            0.0
        };

        let forecast = CostForecast {
            current_spend,
            projected,
            budget,
            deviation_pct,
            trend: series.trend_label(),
            trend_slope: series.trend_slope(),
            history_days: series.len(),
            resources,
        };
        debug!(
            current_spend,
            projected,
            deviation_pct,
            trend = %forecast.trend,
            history_days = forecast.history_days,
            "cost projection"
        );

        let metrics = self.budget_metric(&forecast, now).into_iter().collect();
        Analysis {
            metrics,
            forecast: Some(forecast),
            baseline_updates: Vec::new(),
            usage: vec![UsageEntry {
                day: today,
                subject: LEDGER_TOTAL_SUBJECT.to_string(),
                cost: today_spend,
            }],
        }
    }
}

fn month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
    Utc.from_utc_datetime(&first.and_time(NaiveTime::MIN))
}

fn days_in_month(date: NaiveDate) -> u32 {
    let (year, month) = if date.month() == 12 {
        (date.year() + 1, 1)
    } else {
        (date.year(), date.month() + 1)
    };
    NaiveDate::from_ymd_opt(year, month, 1)
        .and_then(|next| next.pred_opt())
        .map(|last| last.day())
        .unwrap_or(30)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::stats::TrendLabel;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 9, 25, 12, 0, 0).unwrap()
    }

    fn hosting(day: u32, resource: &str, quantity: f64, cost: f64) -> Sample {
        let ts = Utc.with_ymd_and_hms(2026, 9, day, 8, 0, 0).unwrap();
        Sample::new(ts, SourceKind::HostingApi, "usage", resource, quantity).with_cost(cost)
    }

    fn ledger_days(days: i64, cost: impl Fn(i64) -> f64) -> Vec<Sample> {
        let today = now().date_naive();
        (1..=days)
            .rev()
            .map(|back| {
                let day = today - Duration::days(back);
                let ts = Utc.from_utc_datetime(&day.and_time(NaiveTime::MIN));
                Sample::new(ts, SourceKind::UsageLedger, "daily_cost", "total", cost(back)).with_cost(cost(back))
            })
            .collect()
    }

    fn analyzer() -> CostAnalyzer {
        CostAnalyzer::new(CostConfig::default())
    }

    #[test]
    fn test_overspend_projection_is_high() {
        let mut samples = vec![hosting(3, "web", 40.0, 350.0), hosting(25, "db", 12.0, 250.0)];
        samples.extend(ledger_days(30, |_| 10.0));

        let analysis = analyzer().analyze(&samples, &Baselines::new(), now());
        let forecast = analysis.forecast.unwrap();
        assert_eq!(forecast.current_spend, 600.0);
        assert!((forecast.projected - 720.0).abs() < 1e-9);
        assert!((forecast.deviation_pct - 44.0).abs() < 1e-9);
        assert_eq!(forecast.trend, TrendLabel::Stable);
        assert_eq!(forecast.history_days, 30);
        assert_eq!(forecast.resources.len(), 2);

        assert_eq!(analysis.metrics.len(), 1);
        assert_eq!(analysis.metrics[0].severity, Severity::High);
        assert_eq!(analysis.metrics[0].subject, "budget");

        assert_eq!(
            analysis.usage,
            vec![UsageEntry {
                day: now().date_naive(),
                subject: "total".to_string(),
                cost: 250.0,
            }]
        );
    }

    #[test]
    fn test_large_overspend_is_critical() {
        let samples = vec![hosting(5, "web", 40.0, 800.0)];
        let analysis = analyzer().analyze(&samples, &Baselines::new(), now());
        assert_eq!(analysis.metrics[0].severity, Severity::Critical);
    }

    #[test]
    fn test_on_budget_emits_nothing() {
        // 400 over 25 days of 30 projects to 480, -4%
        let samples = vec![hosting(10, "web", 5.0, 400.0)];
        let analysis = analyzer().analyze(&samples, &Baselines::new(), now());
        assert!(analysis.metrics.is_empty());
        assert!(analysis.forecast.is_some());
    }

    #[test]
    fn test_underspend_is_low() {
        let samples = vec![hosting(10, "web", 5.0, 100.0)];
        let analysis = analyzer().analyze(&samples, &Baselines::new(), now());
        assert_eq!(analysis.metrics.len(), 1);
        assert_eq!(analysis.metrics[0].severity, Severity::Low);
        assert!(analysis.metrics[0].value < -20.0);
    }

    #[test]
    fn test_rising_history_is_increasing() {
        let mut samples = vec![hosting(20, "web", 5.0, 480.0)];
        samples.extend(ledger_days(10, |back| 100.0 - back as f64 * 9.0));
        let forecast = analyzer().analyze(&samples, &Baselines::new(), now()).forecast.unwrap();
        assert_eq!(forecast.trend, TrendLabel::Increasing);
        assert!(forecast.trend_slope > 0.1);
    }

    #[test]
    fn test_no_hosting_samples_means_no_forecast() {
        let samples = ledger_days(30, |_| 10.0);
        let analysis = analyzer().analyze(&samples, &Baselines::new(), now());
        assert!(analysis.forecast.is_none());
        assert!(analysis.metrics.is_empty());
        assert!(analysis.usage.is_empty());
    }

    #[test]
    fn test_previous_month_usage_is_ignored() {
        let old = Utc.with_ymd_and_hms(2026, 8, 30, 8, 0, 0).unwrap();
        let samples = vec![
            Sample::new(old, SourceKind::HostingApi, "usage", "web", 1.0).with_cost(9000.0),
            hosting(2, "web", 1.0, 400.0),
        ];
        let forecast = analyzer().analyze(&samples, &Baselines::new(), now()).forecast.unwrap();
        assert_eq!(forecast.current_spend, 400.0);
    }

    #[test]
    fn test_window_reaches_month_start() {
        let early = Utc.with_ymd_and_hms(2026, 9, 2, 0, 0, 0).unwrap();
        let window = analyzer().window(early);
        assert_eq!(window.start, early - Duration::days(30));

        let cfg = CostConfig {
            history_days: 3,
            ..CostConfig::default()
        };
        let window = CostAnalyzer::new(cfg).window(now());
        assert_eq!(window.start, Utc.with_ymd_and_hms(2026, 9, 1, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(NaiveDate::from_ymd_opt(2026, 2, 10).unwrap()), 28);
        assert_eq!(days_in_month(NaiveDate::from_ymd_opt(2028, 2, 1).unwrap()), 29);
        assert_eq!(days_in_month(NaiveDate::from_ymd_opt(2026, 12, 31).unwrap()), 31);
    }
}
