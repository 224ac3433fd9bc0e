//! Severity classification against domain thresholds.
//!
//! A [`SeverityLadder`] holds an entry threshold plus ordered tiers. Tiers are
//! evaluated in the order they were added (highest first by convention) and
//! the first match wins; a value that reaches the threshold but matches no tier
//! gets the ladder's floor severity. Below the threshold nothing is emitted.

use crate::detect::Severity;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bound {
    Above(f64),
    AtLeast(f64),
}

impl Bound {
    fn matches(&self, value: f64) -> bool {
        match *self {
            Bound::Above(limit) => value > limit,
            Bound::AtLeast(limit) => value >= limit,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeverityLadder {
    threshold: f64,
    floor: Severity,
    tiers: Vec<(Bound, Severity)>,
}

impl SeverityLadder {
    /// Values `>= threshold` are classified; anything lower is healthy.
    pub fn new(threshold: f64, floor: Severity) -> Self {
        Self {
            threshold,
            floor,
            tiers: Vec::new(),
        }
    }

    /// Add a tier matched by `value > limit`.
    pub fn above(mut self, limit: f64, severity: Severity) -> Self {
        self.tiers.push((Bound::Above(limit), severity));
        self
    }

    /// Add a tier matched by `value >= limit`.
    pub fn at_least(mut self, limit: f64, severity: Severity) -> Self {
        self.tiers.push((Bound::AtLeast(limit), severity));
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn classify(&self, value: f64) -> Option<Severity> {
        if value.is_nan() || value < self.threshold {
            return None;
        }
        let severity = self
            .tiers
            .iter()
            .find(|(bound, _)| bound.matches(value))
            .map(|(_, severity)| *severity)
            .unwrap_or(self.floor);
        Some(severity)
    }
}

/// Deploy failures in the window: `>= 3` emits, `>= 5` is critical.
pub fn deploy_failure_ladder(threshold: usize, critical_at: usize) -> SeverityLadder {
    SeverityLadder::new(threshold as f64, Severity::High).at_least(critical_at as f64, Severity::Critical)
}

/// Relative p95 increase in percent: `> 50` critical, `> 30` high, else medium.
pub fn latency_ladder(spike_pct: f64) -> SeverityLadder {
    SeverityLadder::new(spike_pct, Severity::Medium)
        .above(50.0, Severity::Critical)
        .above(30.0, Severity::High)
}

/// Error+fatal ratio: `> 0.10` critical, else high.
pub fn error_rate_ladder(threshold: f64, critical_above: f64) -> SeverityLadder {
    SeverityLadder::new(threshold, Severity::High).above(critical_above, Severity::Critical)
}

/// Projected over-spend in percent of budget.
pub fn budget_overrun_ladder(threshold_pct: f64, critical_pct: f64) -> SeverityLadder {
    SeverityLadder::new(threshold_pct, Severity::High).above(critical_pct, Severity::Critical)
}

/// Integrity findings are zero-tolerance: any count reaches the floor severity.
pub fn integrity_ladder(severity: Severity) -> SeverityLadder {
    SeverityLadder::new(1.0, severity)
}
