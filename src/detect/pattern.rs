//! Recurrence detection over a set of classified metrics.

use std::collections::HashMap;

use crate::detect::{Metric, MetricKind, Pattern};

/// Minimum same-kind metrics in one window to report a pattern.
pub const PATTERN_MIN_OCCURRENCES: usize = 2;

/// Occurrence count at which a pattern is escalated to issue filing.
pub const ISSUE_MIN_OCCURRENCES: usize = 3;

/// Group `metrics` by kind and report every kind seen at least
/// [`PATTERN_MIN_OCCURRENCES`] times. Patterns come out in the order their
/// kind was first seen.
pub fn detect_patterns(metrics: &[Metric]) -> Vec<Pattern> {
    let mut index: HashMap<MetricKind, usize> = HashMap::new();
    let mut groups: Vec<Vec<&Metric>> = Vec::new();

    for metric in metrics {
        match index.get(&metric.metric_kind) {
            Some(&i) => groups[i].push(metric),
            None => {
                index.insert(metric.metric_kind, groups.len());
                groups.push(vec![metric]);
            }
        }
    }

    groups
        .into_iter()
        .filter(|group| group.len() >= PATTERN_MIN_OCCURRENCES)
        .filter_map(|group| build_pattern(&group))
        .collect()
}

fn build_pattern(group: &[&Metric]) -> Option<Pattern> {
    let first = group.first()?;
    let first_seen = group.iter().map(|m| m.timestamp).min()?;
    let last_seen = group.iter().map(|m| m.timestamp).max()?;

    let mut subjects: Vec<String> = Vec::new();
    for m in group {
        if !subjects.contains(&m.subject) {
            subjects.push(m.subject.clone());
        }
    }

    let description = format!(
        "{} occurred {} times between {} and {} ({})",
        first.metric_kind,
        group.len(),
        first_seen.to_rfc3339(),
        last_seen.to_rfc3339(),
        subjects.join(", ")
    );

    Some(Pattern {
        kind: first.metric_kind,
        occurrences: group.len(),
        description,
        subjects,
        first_seen,
        last_seen,
    })
}
