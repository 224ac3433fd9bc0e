//! Integrity domain: zero-tolerance consistency checks on the application
//! database.

use chrono::{DateTime, Duration, Utc};

use super::{from_source, Analysis, Analyzer, Baselines, DomainKind};
use crate::config::{IntegrityCheck, IntegrityConfig};
use crate::detect::classify::integrity_ladder;
use crate::detect::{Metric, MetricContext, Sample, Severity, SourceKind};
use crate::sources::TimeRange;

pub struct IntegrityAnalyzer {
    config: IntegrityConfig,
}

impl IntegrityAnalyzer {
    pub fn new(config: IntegrityConfig) -> Self {
        Self { config }
    }

    fn check(&self, name: &str) -> Option<&IntegrityCheck> {
        self.config.checks.iter().find(|c| c.name == name)
    }
}

impl Analyzer for IntegrityAnalyzer {
    fn domain(&self) -> DomainKind {
        DomainKind::Integrity
    }

    /// Checks are point-in-time; the window only bounds sample timestamps.
    fn window(&self, now: DateTime<Utc>) -> TimeRange {
        TimeRange::last(Duration::hours(24), now)
    }

    fn analyze(&self, samples: &[Sample], _baselines: &Baselines, now: DateTime<Utc>) -> Analysis {
        let consistency = from_source(SourceKind::Consistency);
        let metrics = samples
            .iter()
            .filter(|s| consistency(*s))
            .filter_map(|s| {
                let severity = self.check(&s.subject).map(|c| c.severity).unwrap_or(Severity::High);
                let ladder = integrity_ladder(severity);
                let severity = ladder.classify(s.value)?;
                let count = s.value.max(0.0) as u64;

                Some(
                    Metric::new(
                        now,
                        s.subject.as_str(),
                        s.value,
                        ladder.threshold(),
                        severity,
                        MetricContext::Integrity {
                            check: s.subject.clone(),
                            count,
                        },
                    )
                    .with_recommendation(recommendation(&s.subject, count)),
                )
            })
            .collect();

        Analysis {
            metrics,
            ..Analysis::default()
        }
    }
}

fn recommendation(check: &str, count: u64) -> String {
    match check {
        "duplicate_emails" => format!(
            "{} email addresses belong to more than one account. Merge the accounts and add a case-insensitive unique index.",
            count
        ),
        "negative_prices" => format!(
            "{} products have a negative price. Correct them and add a CHECK (price >= 0) constraint.",
            count
        ),
        "missing_product_refs" => format!(
            "{} orders reference products that no longer exist. Restore the products or archive the orders, then enforce the foreign key.",
            count
        ),
        "orphaned_sessions" => format!(
            "{} sessions belong to deleted users. Purge them and cascade session deletes from users.",
            count
        ),
        other => format!("Check '{}' found {} offending rows.", other, count),
    }
}
