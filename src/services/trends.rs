//! Period-over-period trend detection and single-series anomaly scanning.

use crate::query::{Metric, MetricRow};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Declining,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrendItem {
    pub key: String,
    pub current_value: f64,
    pub previous_value: f64,
    pub percent_change: f64,
    pub direction: TrendDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Drop,
    Spike,
}

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub date: NaiveDate,
    pub metric: Metric,
    pub kind: AnomalyKind,
    pub value: f64,
    pub baseline_value: f64,
    pub percent_change: f64,
}

/// Compare two periods of rows keyed by grouping tuple.
///
/// Keys below `min_volume` in the current period are skipped. A key absent
/// from the previous period counts as previous = 0 and reports as +100%.
/// Items are ordered by absolute value delta, so large movers surface
/// before large-percentage noise.
pub fn detect_trends(
    current: &[MetricRow],
    previous: &[MetricRow],
    metric: Metric,
    min_volume: f64,
    change_threshold_pct: f64,
) -> Vec<TrendItem> {
    let mut previous_by_key: HashMap<String, f64> = HashMap::new();
    for row in previous {
        *previous_by_key.entry(row.key()).or_insert(0.0) += row.metric(metric);
    }

    let mut current_by_key: HashMap<String, f64> = HashMap::new();
    for row in current {
        *current_by_key.entry(row.key()).or_insert(0.0) += row.metric(metric);
    }

    let mut items = Vec::new();
    for (key, current_value) in current_by_key {
        if current_value < min_volume {
            continue;
        }
        let previous_value = previous_by_key.get(&key).copied().unwrap_or(0.0);
        let percent_change = if previous_value > 0.0 {
            (current_value - previous_value) / previous_value * 100.0
        } else if current_value > 0.0 {
            100.0
        } else {
            continue;
        };
        if percent_change.abs() < change_threshold_pct {
            continue;
        }
        items.push(TrendItem {
            key,
            current_value,
            previous_value,
            percent_change,
            direction: if percent_change >= 0.0 {
                TrendDirection::Rising
            } else {
                TrendDirection::Declining
            },
        });
    }

    items.sort_by(|a, b| {
        let delta_a = (a.current_value - a.previous_value).abs();
        let delta_b = (b.current_value - b.previous_value).abs();
        delta_b.total_cmp(&delta_a)
    });
    items
}

/// Scan an ordered daily series for day-over-day outliers.
///
/// `threshold` is a fraction (0.25 means a 25% move). Transitions whose
/// baseline does not exceed `min_volume` are ignored so near-zero series
/// cannot produce noise. Requires at least `window_size` points.
pub fn detect_anomalies(
    series: &[(NaiveDate, f64)],
    metric: Metric,
    window_size: usize,
    threshold: f64,
    min_volume: f64,
) -> Vec<Anomaly> {
    if series.len() < window_size.max(2) {
        return Vec::new();
    }

    let mut anomalies = Vec::new();
    for pair in series.windows(2) {
        let (_, baseline) = pair[0];
        let (date, value) = pair[1];
        if baseline <= min_volume {
            continue;
        }
        let change = (value - baseline) / baseline;
        if change.abs() < threshold {
            continue;
        }
        anomalies.push(Anomaly {
            date,
            metric,
            kind: if change < 0.0 {
                AnomalyKind::Drop
            } else {
                AnomalyKind::Spike
            },
            value,
            baseline_value: baseline,
            percent_change: change * 100.0,
        });
    }
    anomalies
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::row;

    fn date(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).expect("date")
    }

    #[test]
    fn trend_sign_and_magnitude() {
        let current = vec![row(&["shoes"], 200, 2_000, 4.0)];
        let previous = vec![row(&["shoes"], 100, 1_500, 4.5)];
        let items = detect_trends(&current, &previous, Metric::Clicks, 10.0, 20.0);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].direction, TrendDirection::Rising);
        assert!((items[0].percent_change - 100.0).abs() < 1e-9);

        let current = vec![row(&["boots"], 50, 900, 6.0)];
        let previous = vec![row(&["boots"], 100, 1_000, 5.0)];
        let items = detect_trends(&current, &previous, Metric::Clicks, 10.0, 20.0);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].direction, TrendDirection::Declining);
        assert!((items[0].percent_change + 50.0).abs() < 1e-9);
    }

    #[test]
    fn new_key_reports_as_one_hundred_percent() {
        let current = vec![row(&["sandals"], 100, 800, 7.0)];
        let items = detect_trends(&current, &[], Metric::Clicks, 10.0, 20.0);
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].previous_value, 0.0);
        assert!((items[0].percent_change - 100.0).abs() < 1e-9);
    }

    #[test]
    fn trends_sort_by_absolute_delta_not_percent() {
        // "b" moves 200%, "a" moves 25%, but "a" shifts far more volume.
        let current = vec![
            row(&["a"], 1_000, 10_000, 3.0),
            row(&["b"], 30, 400, 9.0),
        ];
        let previous = vec![
            row(&["a"], 800, 9_000, 3.2),
            row(&["b"], 10, 300, 11.0),
        ];
        let items = detect_trends(&current, &previous, Metric::Clicks, 1.0, 20.0);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].key, "a");
        assert_eq!(items[1].key, "b");
    }

    #[test]
    fn low_volume_keys_are_skipped() {
        let current = vec![row(&["niche"], 3, 40, 8.0)];
        let previous = vec![row(&["niche"], 1, 30, 9.0)];
        let items = detect_trends(&current, &previous, Metric::Clicks, 10.0, 20.0);
        assert!(items.is_empty());
    }

    #[test]
    fn single_collapse_yields_exactly_one_drop() {
        let mut series: Vec<(NaiveDate, f64)> = (1..=20).map(|d| (date(d), 100.0)).collect();
        series.push((date(21), 10.0));

        let anomalies = detect_anomalies(&series, Metric::Clicks, 7, 0.25, 5.0);
        assert_eq!(anomalies.len(), 1);
        assert_eq!(anomalies[0].kind, AnomalyKind::Drop);
        assert_eq!(anomalies[0].date, date(21));
        assert_eq!(anomalies[0].value, 10.0);
        assert_eq!(anomalies[0].baseline_value, 100.0);
        assert!((anomalies[0].percent_change + 90.0).abs() < 1e-9);
    }

    #[test]
    fn flat_series_has_no_anomalies() {
        let series: Vec<(NaiveDate, f64)> = (1..=20).map(|d| (date(d), 100.0)).collect();
        assert!(detect_anomalies(&series, Metric::Clicks, 7, 0.25, 5.0).is_empty());
    }

    #[test]
    fn short_series_is_not_scanned() {
        let series = vec![(date(1), 100.0), (date(2), 10.0)];
        assert!(detect_anomalies(&series, Metric::Clicks, 7, 0.25, 5.0).is_empty());
    }

    #[test]
    fn near_zero_baselines_never_flag() {
        let mut series: Vec<(NaiveDate, f64)> = (1..=10).map(|d| (date(d), 2.0)).collect();
        series.push((date(11), 0.0));
        assert!(detect_anomalies(&series, Metric::Clicks, 7, 0.25, 5.0).is_empty());
    }
}
