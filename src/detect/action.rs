//! Action generation: turns metrics, patterns and the cost forecast into a
//! de-duplicated, priority-ordered list of remediation requests.
//!
//! Rules run in a fixed order so identical inputs always produce identical
//! output:
//!
//! 1. budget deviation alert
//! 2. recurring-pattern issue (>= 3 occurrences)
//! 3. latency-pattern scale request
//! 4. per-resource high-usage "optimize" alert
//! 5. increasing cost trend alert
//! 6. alert for every critical non-budget metric

use std::collections::HashMap;

use serde_json::{json, Map, Value};

use crate::detect::pattern::ISSUE_MIN_OCCURRENCES;
use crate::detect::stats::TrendLabel;
use crate::detect::{Action, ActionKind, CostForecast, Metric, MetricKind, Pattern, Priority, Severity};

/// Thresholds consumed by the cost-driven rules (1, 4 and 5).
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRules {
    pub deviation_threshold_pct: f64,
    pub critical_deviation_pct: f64,
    pub trend_alert_deviation_pct: f64,
    pub high_usage_magnitude: f64,
    pub high_usage_budget_share: f64,
}

impl Default for ActionRules {
    fn default() -> Self {
        Self {
            deviation_threshold_pct: 20.0,
            critical_deviation_pct: 50.0,
            trend_alert_deviation_pct: 10.0,
            high_usage_magnitude: 1000.0,
            high_usage_budget_share: 0.3,
        }
    }
}

/// Actions keyed by fingerprint; a repeated fingerprint merges into the first.
#[derive(Debug, Default)]
pub struct ActionSet {
    actions: Vec<Action>,
    index: HashMap<String, usize>,
}

impl ActionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Insert `action`, or merge it into an earlier action with the same
    /// fingerprint: the higher priority wins and missing payload keys are copied.
    pub fn push(&mut self, action: Action) {
        let fingerprint = action.fingerprint();
        match self.index.get(&fingerprint) {
            Some(&i) => {
                let existing = &mut self.actions[i];
                existing.priority = existing.priority.max(action.priority);
                for (key, value) in action.payload {
                    existing.payload.entry(key).or_insert(value);
                }
            }
            None => {
                self.index.insert(fingerprint, self.actions.len());
                self.actions.push(action);
            }
        }
    }

    /// Highest priority first; insertion order is kept within a tier.
    pub fn into_sorted(mut self) -> Vec<Action> {
        self.actions.sort_by(|a, b| b.priority.cmp(&a.priority));
        self.actions
    }
}

pub fn generate_actions(
    metrics: &[Metric],
    patterns: &[Pattern],
    forecast: Option<&CostForecast>,
    rules: &ActionRules,
) -> Vec<Action> {
    let mut set = ActionSet::new();

    if let Some(f) = forecast {
        budget_deviation_rule(f, rules, &mut set);
    }
    recurrence_rule(patterns, &mut set);
    latency_pattern_rule(patterns, &mut set);
    if let Some(f) = forecast {
        high_usage_rule(f, rules, &mut set);
        trend_rule(f, rules, &mut set);
    }
    critical_metric_rule(metrics, &mut set);

    set.into_sorted()
}

fn budget_deviation_rule(f: &CostForecast, rules: &ActionRules, set: &mut ActionSet) {
    if f.deviation_pct.abs() <= rules.deviation_threshold_pct {
        return;
    }
    let priority = if f.deviation_pct > rules.critical_deviation_pct {
        Priority::Critical
    } else {
        Priority::High
    };
    let title = format!(
        "Projected spend {:.2} deviates {:+.1}% from budget {:.2}",
        f.projected, f.deviation_pct, f.budget
    );
    let body = format!(
        "Current spend is {:.2}. At the current rate the period closes at {:.2} against a budget of {:.2}. Spend trend is {}.",
        f.current_spend, f.projected, f.budget, f.trend
    );
    set.push(alert("budget", "projected spend deviation", priority, title, body));
}

fn recurrence_rule(patterns: &[Pattern], set: &mut ActionSet) {
    for p in patterns.iter().filter(|p| p.occurrences >= ISSUE_MIN_OCCURRENCES) {
        let mut payload = Map::new();
        payload.insert("title".to_string(), json!(issue_title(p.kind)));
        payload.insert(
            "body".to_string(),
            json!(format!(
                "{} occurred {} times between {} and {}.\n\nAffected: {}",
                p.kind,
                p.occurrences,
                p.first_seen.to_rfc3339(),
                p.last_seen.to_rfc3339(),
                p.subjects.join(", ")
            )),
        );
        payload.insert("labels".to_string(), json!(["vigil", "recurring", p.kind.as_str()]));

        set.push(Action {
            kind: ActionKind::Issue,
            target: p.kind.as_str().to_string(),
            reason: format!("recurring {}", p.kind),
            priority: Priority::High,
            payload,
        });
    }
}

/// Issue titles double as the tracker-side de-duplication key, so they carry
/// nothing run-specific.
pub fn issue_title(kind: MetricKind) -> String {
    format!("[vigil] Recurring {}", kind)
}

fn latency_pattern_rule(patterns: &[Pattern], set: &mut ActionSet) {
    for p in patterns.iter().filter(|p| p.kind == MetricKind::LatencySpike) {
        // Endpoints drift between runs; only the kind keeps the fingerprint stable.
        let target = p.kind.as_str().to_string();
        let reason = "recurring latency spikes".to_string();
        let mut payload = Map::new();
        payload.insert("target".to_string(), json!(target));
        payload.insert("reason".to_string(), json!(reason));
        payload.insert("endpoints".to_string(), json!(p.subjects));

        set.push(Action {
            kind: ActionKind::ScaleRequest,
            target,
            reason,
            priority: Priority::Medium,
            payload,
        });
    }
}

fn high_usage_rule(f: &CostForecast, rules: &ActionRules, set: &mut ActionSet) {
    let cost_limit = f.budget * rules.high_usage_budget_share;
    for r in &f.resources {
        if r.average_usage > rules.high_usage_magnitude && r.total_cost > cost_limit {
            let title = format!("Optimize {} usage", r.subject);
            let body = format!(
                "{} averages {:.1} units per sample and has cost {:.2} this period ({:.0}% of budget).",
                r.subject,
                r.average_usage,
                r.total_cost,
                r.total_cost / f.budget * 100.0
            );
            set.push(alert(&r.subject, "optimize", Priority::Medium, title, body));
        }
    }
}

fn trend_rule(f: &CostForecast, rules: &ActionRules, set: &mut ActionSet) {
    if f.trend == TrendLabel::Increasing && f.deviation_pct > rules.trend_alert_deviation_pct {
        let title = "Daily spend is trending up".to_string();
        let body = format!(
            "Normalized daily slope is {:+.3} over {} days; projected spend is {:+.1}% against budget.",
            f.trend_slope, f.history_days, f.deviation_pct
        );
        set.push(alert("budget", "increasing cost trend", Priority::Medium, title, body));
    }
}

fn critical_metric_rule(metrics: &[Metric], set: &mut ActionSet) {
    for m in metrics
        .iter()
        .filter(|m| m.severity == Severity::Critical && m.metric_kind != MetricKind::BudgetDeviation)
    {
        let title = format!("Critical {} on {}", m.metric_kind, m.subject);
        let mut body = format!(
            "Observed {:.3} against threshold {:.3} at {}.",
            m.value,
            m.threshold,
            m.timestamp.to_rfc3339()
        );
        if let Some(rec) = &m.recommendation {
            body.push_str("\n\n");
            body.push_str(rec);
        }
        let target = format!("{}:{}", m.metric_kind, m.subject);
        set.push(alert(&target, &format!("critical {}", m.metric_kind), Priority::Critical, title, body));
    }
}

fn alert(target: &str, reason: &str, priority: Priority, title: String, body: String) -> Action {
    let mut payload = Map::new();
    payload.insert("title".to_string(), Value::String(title));
    payload.insert("body".to_string(), Value::String(body));
    payload.insert("priority".to_string(), json!(priority));

    Action {
        kind: ActionKind::Alert,
        target: target.to_string(),
        reason: reason.to_string(),
        priority,
        payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::pattern::detect_patterns;
    use crate::detect::{MetricContext, ResourceUsage};
    use chrono::{TimeZone, Utc};

    fn forecast(deviation_pct: f64, trend: TrendLabel) -> CostForecast {
        CostForecast {
            current_spend: 300.0,
            projected: 500.0 * (1.0 + deviation_pct / 100.0),
            budget: 500.0,
            deviation_pct,
            trend,
            trend_slope: 0.0,
            history_days: 30,
            resources: Vec::new(),
        }
    }

    fn latency(minute: u32, endpoint: &str, severity: Severity) -> Metric {
        Metric::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 9, minute, 0).unwrap(),
            endpoint,
            40.0,
            20.0,
            severity,
            MetricContext::Latency {
                endpoint: endpoint.to_string(),
                p95_ms: 700.0,
                baseline_p95_ms: 500.0,
                increase_pct: 40.0,
                samples: 25,
            },
        )
    }

    #[test]
    fn test_budget_rule_priority_boundary() {
        let rules = ActionRules::default();

        let high = generate_actions(&[], &[], Some(&forecast(44.0, TrendLabel::Stable)), &rules);
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].kind, ActionKind::Alert);
        assert_eq!(high[0].priority, Priority::High);

        let critical = generate_actions(&[], &[], Some(&forecast(50.5, TrendLabel::Stable)), &rules);
        assert_eq!(critical[0].priority, Priority::Critical);

        let none = generate_actions(&[], &[], Some(&forecast(20.0, TrendLabel::Stable)), &rules);
        assert!(none.is_empty());

        let under = generate_actions(&[], &[], Some(&forecast(-35.0, TrendLabel::Stable)), &rules);
        assert_eq!(under[0].priority, Priority::High);
    }

    #[test]
    fn test_trend_rule_adds_second_budget_alert() {
        let actions = generate_actions(
            &[],
            &[],
            Some(&forecast(25.0, TrendLabel::Increasing)),
            &ActionRules::default(),
        );
        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].reason, "projected spend deviation");
        assert_eq!(actions[1].reason, "increasing cost trend");
        assert_eq!(actions[1].priority, Priority::Medium);
    }

    #[test]
    fn test_high_usage_rule_needs_both_conditions() {
        let mut f = forecast(0.0, TrendLabel::Stable);
        f.resources = vec![
            ResourceUsage { subject: "bandwidth".into(), average_usage: 5000.0, total_cost: 200.0 },
            ResourceUsage { subject: "builds".into(), average_usage: 5000.0, total_cost: 20.0 },
            ResourceUsage { subject: "functions".into(), average_usage: 10.0, total_cost: 400.0 },
        ];
        let actions = generate_actions(&[], &[], Some(&f), &ActionRules::default());
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].target, "bandwidth");
        assert_eq!(actions[0].reason, "optimize");
    }

    #[test]
    fn test_latency_pattern_files_issue_and_scale_request() {
        let metrics = vec![
            latency(1, "/search", Severity::High),
            latency(2, "/cart", Severity::Medium),
            latency(3, "/search", Severity::High),
        ];
        let patterns = detect_patterns(&metrics);
        let actions = generate_actions(&metrics, &patterns, None, &ActionRules::default());

        assert_eq!(actions.len(), 2);
        assert_eq!(actions[0].kind, ActionKind::Issue);
        assert_eq!(actions[0].payload["title"], "[vigil] Recurring latency_spike");
        assert_eq!(actions[1].kind, ActionKind::ScaleRequest);
        assert_eq!(actions[1].target, "latency_spike");
        assert_eq!(actions[1].payload["endpoints"], serde_json::json!(["/search", "/cart"]));
    }

    #[test]
    fn test_scale_request_fingerprint_survives_new_endpoints() {
        let earlier = vec![latency(1, "/search", Severity::High), latency(2, "/search", Severity::High)];
        let later = vec![
            latency(1, "/search", Severity::High),
            latency(2, "/search", Severity::High),
            latency(7, "/cart", Severity::High),
        ];

        let scale = |metrics: &[Metric]| -> Action {
            let patterns = detect_patterns(metrics);
            generate_actions(metrics, &patterns, None, &ActionRules::default())
                .into_iter()
                .find(|a| a.kind == ActionKind::ScaleRequest)
                .unwrap()
        };

        let (first, second) = (scale(&earlier), scale(&later));
        assert_eq!(first.fingerprint(), second.fingerprint());
        assert_eq!(first.fingerprint(), "scale_request:latency_spike:recurring latency spikes");
        assert_eq!(second.payload["endpoints"], serde_json::json!(["/search", "/cart"]));
    }

    #[test]
    fn test_two_occurrences_do_not_file_issue() {
        let metrics = vec![latency(1, "/search", Severity::High), latency(2, "/search", Severity::High)];
        let patterns = detect_patterns(&metrics);
        let actions = generate_actions(&metrics, &patterns, None, &ActionRules::default());
        assert!(actions.iter().all(|a| a.kind != ActionKind::Issue));
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_duplicate_critical_metrics_merge() {
        let metrics = vec![
            latency(1, "/search", Severity::Critical),
            latency(5, "/search", Severity::Critical).with_recommendation("scale the search tier"),
        ];
        let actions = generate_actions(&metrics, &[], None, &ActionRules::default());
        assert_eq!(actions.len(), 1);
        assert_eq!(actions[0].fingerprint(), "alert:latency_spike:/search:critical latency_spike");
    }

    #[test]
    fn test_action_set_merge_keeps_first_and_raises_priority() {
        let mut set = ActionSet::new();
        let mut first = alert("budget", "r", Priority::Medium, "a".into(), "b".into());
        first.payload.remove("priority");
        set.push(first);
        set.push(alert("budget", "r", Priority::High, "other".into(), "other".into()));
        assert_eq!(set.len(), 1);

        let actions = set.into_sorted();
        assert_eq!(actions[0].priority, Priority::High);
        assert_eq!(actions[0].payload["title"], "a");
        assert_eq!(actions[0].payload["priority"], "high");
    }

    #[test]
    fn test_generation_is_deterministic() {
        let metrics = vec![
            latency(1, "/search", Severity::Critical),
            latency(2, "/cart", Severity::High),
            latency(3, "/search", Severity::Critical),
        ];
        let patterns = detect_patterns(&metrics);
        let f = forecast(60.0, TrendLabel::Increasing);
        let a = generate_actions(&metrics, &patterns, Some(&f), &ActionRules::default());
        let b = generate_actions(&metrics, &patterns, Some(&f), &ActionRules::default());
        assert_eq!(a, b);
        assert_eq!(
            serde_json::to_string(&a).unwrap(),
            serde_json::to_string(&b).unwrap()
        );
    }
}
