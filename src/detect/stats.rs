//! Statistics kernel: trend slope, percentiles and keyed aggregation.
//!
//! Everything here is pure and allocation-light so it can run on any thread.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::hash::Hash;

/// Normalized slope above which a series counts as increasing (and below the
/// negation of which it counts as decreasing).
pub const TREND_THRESHOLD: f64 = 0.1;

/// Direction of a series over its observation window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Increasing,
    Stable,
    Decreasing,
}

impl std::fmt::Display for TrendLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrendLabel::Increasing => write!(f, "increasing"),
            TrendLabel::Stable => write!(f, "stable"),
            TrendLabel::Decreasing => write!(f, "decreasing"),
        }
    }
}

/// A simple position-indexed series for statistical analysis.
pub struct TimeSeries {
    values: Vec<f64>,
}

impl TimeSeries {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn mean(&self) -> f64 {
        mean(&self.values)
    }

    /// Ordinary least-squares slope with x = 0, 1, 2, ...
    pub fn slope(&self) -> f64 {
        let n = self.values.len();
        if n < 2 || self.values.windows(2).all(|w| w[0] == w[1]) {
            return 0.0;
        }
        let x_mean = (n - 1) as f64 / 2.0;
        let y_mean = self.mean();

        let mut num = 0.0;
        let mut den = 0.0;
        for (i, &y) in self.values.iter().enumerate() {
            let dx = i as f64 - x_mean;
            num += dx * (y - y_mean);
            den += dx * dx;
        }
        num / den
    }

    /// Slope divided by the series mean, or the raw slope when the mean is zero.
    pub fn trend_slope(&self) -> f64 {
        let slope = self.slope();
        let mean = self.mean();
        if mean == 0.0 {
            slope
        } else {
            slope / mean
        }
    }

    pub fn trend_label(&self) -> TrendLabel {
        trend_label(self.trend_slope())
    }

    pub fn percentile(&self, p: f64) -> f64 {
        percentile(&self.values, p)
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Normalized least-squares slope of `series`; 0 for fewer than two points.
pub fn trend_slope(series: &[f64]) -> f64 {
    TimeSeries::new(series.to_vec()).trend_slope()
}

pub fn trend_label(normalized_slope: f64) -> TrendLabel {
    if normalized_slope > TREND_THRESHOLD {
        TrendLabel::Increasing
    } else if normalized_slope < -TREND_THRESHOLD {
        TrendLabel::Decreasing
    } else {
        TrendLabel::Stable
    }
}

/// Nearest-rank percentile: index `ceil(p/100 * n) - 1`, clamped to the
/// series. Returns 0 for empty input.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = sorted.len();
    let rank = (p / 100.0 * n as f64).ceil() as i64 - 1;
    let idx = rank.clamp(0, n as i64 - 1) as usize;
    sorted[idx]
}

/// Sum `value(item)` per `key(item)`, keeping keys in first-seen order.
/// Items for which `key` returns `None` are skipped.
pub fn group_sum<T, K, FK, FV>(items: &[T], key: FK, value: FV) -> Vec<(K, f64)>
where
    K: Eq + Hash + Clone,
    FK: Fn(&T) -> Option<K>,
    FV: Fn(&T) -> f64,
{
    let mut index: HashMap<K, usize> = HashMap::new();
    let mut groups: Vec<(K, f64)> = Vec::new();

    for item in items {
        let Some(k) = key(item) else { continue };
        match index.get(&k) {
            Some(&i) => groups[i].1 += value(item),
            None => {
                index.insert(k.clone(), groups.len());
                groups.push((k, value(item)));
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_slope_increasing_series_is_positive() {
        let series: Vec<f64> = (1..=10).map(|i| i as f64 * 5.0).collect();
        assert!(trend_slope(&series) > 0.0);
        assert_eq!(TimeSeries::new(series).trend_label(), TrendLabel::Increasing);
    }

    #[test]
    fn test_trend_slope_constant_series_is_exactly_zero() {
        assert_eq!(trend_slope(&[0.1; 30]), 0.0);
        assert_eq!(trend_slope(&[10.0; 30]), 0.0);
        assert_eq!(trend_label(trend_slope(&[10.0; 30])), TrendLabel::Stable);
    }

    #[test]
    fn test_trend_slope_short_series_is_zero() {
        assert_eq!(trend_slope(&[]), 0.0);
        assert_eq!(trend_slope(&[42.0]), 0.0);
    }

    #[test]
    fn test_trend_slope_normalized_by_mean() {
        // slope 1 per step, mean 2 => 0.5
        let s = trend_slope(&[1.0, 2.0, 3.0]);
        assert!((s - 0.5).abs() < 1e-12);
        // zero mean falls back to the raw slope
        let raw = trend_slope(&[-1.0, 0.0, 1.0]);
        assert!((raw - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_trend_label_thresholds() {
        assert_eq!(trend_label(0.1), TrendLabel::Stable);
        assert_eq!(trend_label(0.11), TrendLabel::Increasing);
        assert_eq!(trend_label(-0.11), TrendLabel::Decreasing);
    }

    #[test]
    fn test_percentile_ceil_rank() {
        let values: Vec<f64> = (1..=10).map(|i| i as f64 * 10.0).collect();
        assert_eq!(percentile(&values, 95.0), 100.0);
        assert_eq!(percentile(&values, 50.0), 50.0);
        assert_eq!(percentile(&values, 0.0), 10.0);
        assert_eq!(percentile(&[], 95.0), 0.0);
    }

    #[test]
    fn test_percentile_sorts_input() {
        assert_eq!(percentile(&[300.0, 100.0, 200.0], 50.0), 200.0);
    }

    #[test]
    fn test_group_sum_preserves_first_seen_order() {
        let items = [("b", 1.0), ("a", 2.0), ("b", 3.0), ("c", 4.0), ("a", 0.5)];
        let groups = group_sum(&items, |(k, _)| Some(*k), |(_, v)| *v);
        assert_eq!(groups, vec![("b", 4.0), ("a", 2.5), ("c", 4.0)]);
    }

    #[test]
    fn test_group_sum_skips_unkeyed_items() {
        let items = [1.0, -2.0, 3.0];
        let groups = group_sum(&items, |v| (*v > 0.0).then_some("pos"), |v| *v);
        assert_eq!(groups, vec![("pos", 4.0)]);
    }
}
