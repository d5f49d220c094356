//! Time-series bucketing, rolling averages, day-of-week seasonality, and a
//! small least-squares forecaster.
//!
//! Row volume per site is small (hundreds of day buckets at most), so the
//! statistics here stay deliberately closed-form.

use crate::query::{Metric, MetricRow};
use crate::time::{parse_day, week_start};
use anyhow::{bail, Result};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

/// Slopes this close to zero are reported as a stable trend.
const SLOPE_DEAD_ZONE: f64 = 0.05;

/// Seasonality needs at least two full weeks of daily points.
const SEASONALITY_MIN_POINTS: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Granularity {
    Daily,
    Weekly,
}

impl FromStr for Granularity {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "daily" | "day" => Ok(Granularity::Daily),
            "weekly" | "week" => Ok(Granularity::Weekly),
            other => bail!("unknown granularity: {other}"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSeriesPoint {
    /// Day, or the Monday of the ISO week for weekly buckets.
    pub bucket: NaiveDate,
    pub metrics: BTreeMap<Metric, f64>,
    pub rolling_averages: BTreeMap<Metric, f64>,
    pub seasonal_peak: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendLabel {
    Up,
    Down,
    Stable,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForecastResult {
    pub trend: TrendLabel,
    pub forecast: BTreeMap<Metric, Vec<f64>>,
    pub seasonality_strength: f64,
}

#[derive(Default)]
struct BucketAccum {
    sums: BTreeMap<Metric, f64>,
    rows: usize,
}

/// Bucket date-keyed rows by day or ISO week, ascending.
///
/// Count metrics are summed per bucket; rate metrics are averaged. Rows
/// whose first key is not a `YYYY-MM-DD` date are skipped. The trailing
/// simple moving average over `rolling_window` buckets (clipped at the
/// series start) is attached to every point.
pub fn build_series(
    rows: &[MetricRow],
    metrics: &[Metric],
    granularity: Granularity,
    rolling_window: usize,
) -> Vec<TimeSeriesPoint> {
    let mut buckets: BTreeMap<NaiveDate, BucketAccum> = BTreeMap::new();
    for row in rows {
        let Some(day) = parse_day(row.primary_key()) else {
            continue;
        };
        let bucket = match granularity {
            Granularity::Daily => day,
            Granularity::Weekly => week_start(day),
        };
        let accum = buckets.entry(bucket).or_default();
        accum.rows += 1;
        for metric in metrics {
            *accum.sums.entry(*metric).or_insert(0.0) += row.metric(*metric);
        }
    }

    let mut points: Vec<TimeSeriesPoint> = buckets
        .into_iter()
        .map(|(bucket, accum)| {
            let mut values = BTreeMap::new();
            for metric in metrics {
                let sum = accum.sums.get(metric).copied().unwrap_or(0.0);
                let value = if metric.is_summed() {
                    sum
                } else {
                    sum / accum.rows.max(1) as f64
                };
                values.insert(*metric, value);
            }
            TimeSeriesPoint {
                bucket,
                metrics: values,
                rolling_averages: BTreeMap::new(),
                seasonal_peak: false,
            }
        })
        .collect();

    let window = rolling_window.max(1);
    for idx in 0..points.len() {
        let from = idx.saturating_sub(window - 1);
        let span = (idx - from + 1) as f64;
        let mut averages = BTreeMap::new();
        for metric in metrics {
            let sum: f64 = points[from..=idx]
                .iter()
                .map(|p| p.metrics.get(metric).copied().unwrap_or(0.0))
                .sum();
            averages.insert(*metric, sum / span);
        }
        points[idx].rolling_averages = averages;
    }

    points
}

/// Estimate day-of-week seasonality of `metric` over a daily series and
/// mark the peak weekday's points.
///
/// Strength is the standard deviation of the seven weekday means over the
/// grand mean, clamped to [0, 1]; zero when there are fewer than two weeks
/// of points or the series is flat or empty. Points are only marked when
/// the signal is nonzero.
pub fn apply_seasonality(points: &mut [TimeSeriesPoint], metric: Metric) -> f64 {
    if points.len() < SEASONALITY_MIN_POINTS {
        return 0.0;
    }

    let mut sums = [0.0f64; 7];
    let mut counts = [0usize; 7];
    for point in points.iter() {
        let dow = point.bucket.weekday().num_days_from_monday() as usize;
        sums[dow] += point.metrics.get(&metric).copied().unwrap_or(0.0);
        counts[dow] += 1;
    }

    let means: Vec<f64> = (0..7)
        .filter(|&dow| counts[dow] > 0)
        .map(|dow| sums[dow] / counts[dow] as f64)
        .collect();
    if means.is_empty() {
        return 0.0;
    }
    let grand_mean = means.iter().sum::<f64>() / means.len() as f64;
    if grand_mean <= 0.0 {
        return 0.0;
    }
    let variance =
        means.iter().map(|m| (m - grand_mean).powi(2)).sum::<f64>() / means.len() as f64;
    let strength = (variance.sqrt() / grand_mean).min(1.0);
    if strength == 0.0 {
        return 0.0;
    }

    let peak_dow = (0..7)
        .filter(|&dow| counts[dow] > 0)
        .max_by(|&a, &b| (sums[a] / counts[a] as f64).total_cmp(&(sums[b] / counts[b] as f64)));
    if let Some(peak) = peak_dow {
        for point in points.iter_mut() {
            point.seasonal_peak = point.bucket.weekday().num_days_from_monday() as usize == peak;
        }
    }
    strength
}

/// Weekday marked as the seasonal peak, if any point carries the mark.
pub fn peak_weekday(points: &[TimeSeriesPoint]) -> Option<Weekday> {
    points
        .iter()
        .find(|p| p.seasonal_peak)
        .map(|p| p.bucket.weekday())
}

/// Ordinary least squares over `(index, value)`. None below two points.
fn ols(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mut sum_x = 0.0;
    let mut sum_y = 0.0;
    let mut sum_xy = 0.0;
    let mut sum_xx = 0.0;
    for (idx, value) in values.iter().enumerate() {
        let x = idx as f64;
        sum_x += x;
        sum_y += value;
        sum_xy += x * value;
        sum_xx += x * x;
    }
    let denom = n * sum_xx - sum_x * sum_x;
    if denom.abs() < f64::EPSILON {
        return None;
    }
    let slope = (n * sum_xy - sum_x * sum_y) / denom;
    let intercept = (sum_y - slope * sum_x) / n;
    Some((slope, intercept))
}

/// Project `horizon` future buckets per metric with a linear fit.
///
/// Metrics with fewer than two points get an empty projection rather than
/// an error. The trend label follows the primary metric's slope with a
/// dead zone around zero.
pub fn forecast(
    points: &[TimeSeriesPoint],
    metrics: &[Metric],
    primary: Metric,
    horizon: usize,
    seasonality_strength: f64,
) -> ForecastResult {
    let mut projections: BTreeMap<Metric, Vec<f64>> = BTreeMap::new();
    let mut primary_slope = 0.0;

    for metric in metrics {
        let values: Vec<f64> = points
            .iter()
            .map(|p| p.metrics.get(metric).copied().unwrap_or(0.0))
            .collect();
        let Some((slope, intercept)) = ols(&values) else {
            projections.insert(*metric, Vec::new());
            continue;
        };
        if *metric == primary {
            primary_slope = slope;
        }
        let projected: Vec<f64> = (values.len()..values.len() + horizon)
            .map(|idx| (slope * idx as f64 + intercept).max(0.0).round())
            .collect();
        projections.insert(*metric, projected);
    }

    let trend = if primary_slope.abs() <= SLOPE_DEAD_ZONE {
        TrendLabel::Stable
    } else if primary_slope > 0.0 {
        TrendLabel::Up
    } else {
        TrendLabel::Down
    };

    ForecastResult {
        trend,
        forecast: projections,
        seasonality_strength,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::day_row;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn daily_rows(start: NaiveDate, days: u64, clicks: u64) -> Vec<MetricRow> {
        (0..days)
            .map(|offset| {
                let date = start + chrono::Duration::days(offset as i64);
                day_row(date, clicks, clicks * 10)
            })
            .collect()
    }

    #[test]
    fn two_weeks_aggregate_into_two_monday_buckets() {
        // 2024-01-01 is a Monday.
        let rows = daily_rows(day(2024, 1, 1), 14, 10);
        let points = build_series(
            &rows,
            &[Metric::Clicks, Metric::Impressions],
            Granularity::Weekly,
            4,
        );
        assert_eq!(points.len(), 2);
        assert_eq!(points[0].bucket, day(2024, 1, 1));
        assert_eq!(points[1].bucket, day(2024, 1, 8));
        assert_eq!(points[0].metrics[&Metric::Clicks], 70.0);
        assert_eq!(points[1].metrics[&Metric::Clicks], 70.0);
        assert_eq!(points[0].metrics[&Metric::Impressions], 700.0);
    }

    #[test]
    fn rate_metrics_average_instead_of_summing() {
        let rows = daily_rows(day(2024, 1, 1), 7, 10);
        let points = build_series(&rows, &[Metric::Ctr], Granularity::Weekly, 4);
        assert_eq!(points.len(), 1);
        // Every day has ctr 0.1; the weekly bucket averages, not sums.
        assert!((points[0].metrics[&Metric::Ctr] - 0.1).abs() < 1e-9);
    }

    #[test]
    fn rows_without_date_keys_are_skipped() {
        let mut rows = daily_rows(day(2024, 1, 1), 3, 5);
        rows.push(MetricRow {
            keys: vec!["not-a-date".to_string()],
            clicks: 99,
            impressions: 990,
            ctr: 0.1,
            position: 1.0,
        });
        let points = build_series(&rows, &[Metric::Clicks], Granularity::Daily, 4);
        assert_eq!(points.len(), 3);
    }

    #[test]
    fn rolling_average_uses_a_trailing_clipped_window() {
        let rows: Vec<MetricRow> = (0..5)
            .map(|offset| {
                day_row(
                    day(2024, 1, 1) + chrono::Duration::days(offset),
                    (offset + 1) as u64,
                    100,
                )
            })
            .collect();
        let points = build_series(&rows, &[Metric::Clicks], Granularity::Daily, 3);
        let averages: Vec<f64> = points
            .iter()
            .map(|p| p.rolling_averages[&Metric::Clicks])
            .collect();
        assert_eq!(averages, vec![1.0, 1.5, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn weekend_heavy_series_is_seasonal_on_saturdays() {
        let mut rows = Vec::new();
        for offset in 0..28 {
            let date = day(2024, 1, 1) + chrono::Duration::days(offset);
            let clicks = if date.weekday() == Weekday::Sat { 200 } else { 100 };
            rows.push(day_row(date, clicks, clicks * 10));
        }
        let mut points = build_series(&rows, &[Metric::Clicks], Granularity::Daily, 7);
        let strength = apply_seasonality(&mut points, Metric::Clicks);
        assert!(strength > 0.0 && strength <= 1.0);
        for point in &points {
            assert_eq!(point.seasonal_peak, point.bucket.weekday() == Weekday::Sat);
        }
        assert_eq!(peak_weekday(&points), Some(Weekday::Sat));
    }

    #[test]
    fn flat_or_short_series_has_no_seasonality() {
        let rows = daily_rows(day(2024, 1, 1), 28, 100);
        let mut points = build_series(&rows, &[Metric::Clicks], Granularity::Daily, 7);
        assert_eq!(apply_seasonality(&mut points, Metric::Clicks), 0.0);
        assert!(points.iter().all(|p| !p.seasonal_peak));

        let rows = daily_rows(day(2024, 1, 1), 10, 100);
        let mut points = build_series(&rows, &[Metric::Clicks], Granularity::Daily, 7);
        assert_eq!(apply_seasonality(&mut points, Metric::Clicks), 0.0);
    }

    #[test]
    fn rising_series_forecasts_upward() {
        let rows: Vec<MetricRow> = (0..10)
            .map(|offset| {
                day_row(
                    day(2024, 1, 1) + chrono::Duration::days(offset),
                    (10 + offset * 5) as u64,
                    1_000,
                )
            })
            .collect();
        let points = build_series(&rows, &[Metric::Clicks], Granularity::Daily, 7);
        let result = forecast(&points, &[Metric::Clicks], Metric::Clicks, 3, 0.0);
        assert_eq!(result.trend, TrendLabel::Up);
        let projected = &result.forecast[&Metric::Clicks];
        assert_eq!(projected.len(), 3);
        // Slope 5/day from a base of 10: next values continue the line.
        assert_eq!(projected[0], 60.0);
        assert_eq!(projected[2], 70.0);
    }

    #[test]
    fn flat_series_forecasts_stable() {
        let rows = daily_rows(day(2024, 1, 1), 10, 50);
        let points = build_series(&rows, &[Metric::Clicks], Granularity::Daily, 7);
        let result = forecast(&points, &[Metric::Clicks], Metric::Clicks, 5, 0.0);
        assert_eq!(result.trend, TrendLabel::Stable);
        assert_eq!(result.forecast[&Metric::Clicks], vec![50.0; 5]);
    }

    #[test]
    fn degenerate_series_forecasts_empty_without_error() {
        let empty = forecast(&[], &[Metric::Clicks], Metric::Clicks, 5, 0.0);
        assert_eq!(empty.trend, TrendLabel::Stable);
        assert!(empty.forecast[&Metric::Clicks].is_empty());

        let rows = daily_rows(day(2024, 1, 1), 1, 50);
        let points = build_series(&rows, &[Metric::Clicks], Granularity::Daily, 7);
        let single = forecast(&points, &[Metric::Clicks], Metric::Clicks, 5, 0.0);
        assert!(single.forecast[&Metric::Clicks].is_empty());
    }

    #[test]
    fn projections_never_go_negative() {
        let rows: Vec<MetricRow> = (0..6)
            .map(|offset| {
                day_row(
                    day(2024, 1, 1) + chrono::Duration::days(offset),
                    (50 - offset * 10).max(0) as u64,
                    1_000,
                )
            })
            .collect();
        let points = build_series(&rows, &[Metric::Clicks], Granularity::Daily, 7);
        let result = forecast(&points, &[Metric::Clicks], Metric::Clicks, 6, 0.0);
        assert_eq!(result.trend, TrendLabel::Down);
        assert!(result.forecast[&Metric::Clicks].iter().all(|v| *v >= 0.0));
    }
}
