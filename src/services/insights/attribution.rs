//! Attribution for detected traffic drops: device concentration plus
//! correlation with dated, publicly announced ranking-system updates.

use crate::query::MetricRow;
use crate::services::trends::Anomaly;
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::HashMap;

/// Days either side of a drop an external event may still explain it.
pub const EVENT_TOLERANCE_DAYS: i64 = 2;

/// A device counts as disproportionately affected when its decline is at
/// least this many percentage points worse than the site-wide decline.
const DEVICE_MARGIN_PP: f64 = 15.0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalEvent {
    pub date: NaiveDate,
    pub name: String,
}

fn event(y: i32, m: u32, d: u32, name: &str) -> ExternalEvent {
    ExternalEvent {
        date: NaiveDate::from_ymd_opt(y, m, d).expect("valid calendar entry"),
        name: name.to_string(),
    }
}

/// Dated ranking-system updates announced by the major engines.
pub fn known_events() -> Vec<ExternalEvent> {
    vec![
        event(2023, 8, 22, "August 2023 core update"),
        event(2023, 10, 5, "October 2023 core update"),
        event(2023, 10, 4, "October 2023 spam update"),
        event(2023, 11, 2, "November 2023 core update"),
        event(2023, 11, 8, "November 2023 reviews update"),
        event(2024, 3, 5, "March 2024 core update"),
        event(2024, 5, 6, "Site reputation abuse enforcement"),
        event(2024, 6, 20, "June 2024 spam update"),
        event(2024, 8, 15, "August 2024 core update"),
        event(2024, 11, 11, "November 2024 core update"),
        event(2024, 12, 12, "December 2024 core update"),
        event(2024, 12, 19, "December 2024 spam update"),
        event(2025, 3, 13, "March 2025 core update"),
        event(2025, 6, 30, "June 2025 core update"),
    ]
}

/// Events whose date falls within the tolerance of `date`.
pub fn events_near(date: NaiveDate, events: &[ExternalEvent]) -> Vec<ExternalEvent> {
    events
        .iter()
        .filter(|event| (event.date - date).num_days().abs() <= EVENT_TOLERANCE_DAYS)
        .cloned()
        .collect()
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceImpact {
    pub device: String,
    pub drop_day_clicks: f64,
    pub baseline_daily_clicks: f64,
    pub percent_change: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "device", rename_all = "lowercase")]
pub enum DeviceVerdict {
    /// One device fell disproportionately harder than the site overall.
    Concentrated(String),
    /// Every device moved roughly together.
    Uniform,
    /// The backend exposes no device breakdown for this site.
    Unavailable,
}

#[derive(Debug, Clone, Serialize)]
pub struct DropAttribution {
    pub anomaly: Anomaly,
    pub device_verdict: DeviceVerdict,
    pub device_impacts: Vec<DeviceImpact>,
    pub possible_events: Vec<ExternalEvent>,
}

/// Compare drop-day clicks per device against each device's prior daily
/// average.
///
/// `drop_day` rows are grouped by device; `baseline` rows by (date,
/// device) over `baseline_days` days. Devices with no baseline traffic are
/// ignored.
pub fn attribute_devices(
    drop_day: &[MetricRow],
    baseline: &[MetricRow],
    baseline_days: i64,
) -> (DeviceVerdict, Vec<DeviceImpact>) {
    let baseline_days = baseline_days.max(1) as f64;

    let mut baseline_totals: HashMap<&str, f64> = HashMap::new();
    for row in baseline {
        // Device sits in the last key whether or not date is also grouped.
        let Some(device) = row.keys.last() else {
            continue;
        };
        *baseline_totals.entry(device.as_str()).or_insert(0.0) += row.clicks as f64;
    }

    let mut drop_totals: HashMap<&str, f64> = HashMap::new();
    for row in drop_day {
        let Some(device) = row.keys.last() else {
            continue;
        };
        *drop_totals.entry(device.as_str()).or_insert(0.0) += row.clicks as f64;
    }

    if baseline_totals.is_empty() {
        return (DeviceVerdict::Unavailable, Vec::new());
    }

    let mut impacts = Vec::new();
    let mut overall_drop = 0.0;
    let mut overall_baseline = 0.0;
    for (device, total) in &baseline_totals {
        let daily_baseline = total / baseline_days;
        if daily_baseline <= 0.0 {
            continue;
        }
        let drop_clicks = drop_totals.get(device).copied().unwrap_or(0.0);
        overall_drop += drop_clicks;
        overall_baseline += daily_baseline;
        impacts.push(DeviceImpact {
            device: (*device).to_string(),
            drop_day_clicks: drop_clicks,
            baseline_daily_clicks: daily_baseline,
            percent_change: (drop_clicks - daily_baseline) / daily_baseline * 100.0,
        });
    }
    if impacts.is_empty() || overall_baseline <= 0.0 {
        return (DeviceVerdict::Unavailable, Vec::new());
    }

    impacts.sort_by(|a, b| a.percent_change.total_cmp(&b.percent_change));
    let overall_change = (overall_drop - overall_baseline) / overall_baseline * 100.0;
    let worst = &impacts[0];
    let verdict = if worst.percent_change <= overall_change - DEVICE_MARGIN_PP {
        DeviceVerdict::Concentrated(worst.device.clone())
    } else {
        DeviceVerdict::Uniform
    };
    (verdict, impacts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::row;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn events_match_within_two_days_only() {
        let events = vec![event(2024, 3, 5, "March 2024 core update")];
        assert_eq!(events_near(day(2024, 3, 7), &events).len(), 1);
        assert_eq!(events_near(day(2024, 3, 3), &events).len(), 1);
        assert!(events_near(day(2024, 3, 8), &events).is_empty());
        assert!(events_near(day(2024, 3, 2), &events).is_empty());
    }

    #[test]
    fn concentrated_device_drop_is_named() {
        // Mobile collapses, desktop dips mildly.
        let drop_day = vec![
            row(&["MOBILE"], 10, 500, 5.0),
            row(&["DESKTOP"], 90, 900, 4.0),
        ];
        let baseline: Vec<MetricRow> = (1..=7)
            .flat_map(|d| {
                vec![
                    row(&[&format!("2024-03-0{d}"), "MOBILE"], 100, 1_000, 5.0),
                    row(&[&format!("2024-03-0{d}"), "DESKTOP"], 100, 1_000, 4.0),
                ]
            })
            .collect();

        let (verdict, impacts) = attribute_devices(&drop_day, &baseline, 7);
        assert_eq!(verdict, DeviceVerdict::Concentrated("MOBILE".to_string()));
        assert_eq!(impacts.len(), 2);
        assert_eq!(impacts[0].device, "MOBILE");
        assert!((impacts[0].percent_change + 90.0).abs() < 1e-9);
    }

    #[test]
    fn proportional_drop_reads_as_uniform() {
        let drop_day = vec![
            row(&["MOBILE"], 50, 500, 5.0),
            row(&["DESKTOP"], 50, 500, 4.0),
        ];
        let baseline: Vec<MetricRow> = (1..=7)
            .flat_map(|d| {
                vec![
                    row(&[&format!("2024-03-0{d}"), "MOBILE"], 100, 1_000, 5.0),
                    row(&[&format!("2024-03-0{d}"), "DESKTOP"], 100, 1_000, 4.0),
                ]
            })
            .collect();

        let (verdict, impacts) = attribute_devices(&drop_day, &baseline, 7);
        assert_eq!(verdict, DeviceVerdict::Uniform);
        assert_eq!(impacts.len(), 2);
    }

    #[test]
    fn missing_device_breakdown_is_unavailable() {
        let (verdict, impacts) = attribute_devices(&[], &[], 7);
        assert_eq!(verdict, DeviceVerdict::Unavailable);
        assert!(impacts.is_empty());
    }
}
