//! Ranking-opportunity mining over a single fetched row set.

use crate::query::MetricRow;
use serde::Serialize;

/// Conservative CTR an improved ranking is assumed to reach.
pub const ACHIEVABLE_CTR: f64 = 0.15;

/// Expected CTR by rounded position 1..=10.
const CTR_BY_POSITION: [f64; 10] = [
    0.30, 0.18, 0.12, 0.09, 0.07, 0.05, 0.035, 0.025, 0.018, 0.01,
];

/// Flag when actual CTR falls below this share of the benchmark.
const LOW_CTR_RATIO: f64 = 0.60;

#[derive(Debug, Clone, Serialize)]
pub struct OpportunityItem {
    pub key: String,
    pub clicks: u64,
    pub impressions: u64,
    pub ctr: f64,
    pub position: f64,
    /// Estimated additional clicks at the achievable CTR.
    pub potential_clicks: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LowCtrItem {
    pub key: String,
    pub clicks: u64,
    pub impressions: u64,
    pub position: f64,
    pub actual_ctr: f64,
    pub expected_ctr: f64,
}

pub fn expected_ctr(position: f64) -> f64 {
    let rounded = position.round().clamp(1.0, 10.0) as usize;
    CTR_BY_POSITION[rounded - 1]
}

fn potential_clicks(row: &MetricRow) -> u64 {
    let achievable = (row.impressions as f64 * ACHIEVABLE_CTR).round() as i64;
    (achievable - row.clicks as i64).max(0) as u64
}

fn opportunity(row: &MetricRow) -> OpportunityItem {
    OpportunityItem {
        key: row.key(),
        clicks: row.clicks,
        impressions: row.impressions,
        ctr: row.ctr,
        position: row.position,
        potential_clicks: potential_clicks(row),
    }
}

fn in_band(row: &MetricRow, low: f64, high: f64, min_impressions: u64) -> bool {
    row.impressions >= min_impressions && row.position >= low && row.position <= high
}

/// Keys ranking in positions 5-20 with enough impressions, ranked by how
/// many clicks an improved ranking would plausibly add.
pub fn low_hanging_fruit(rows: &[MetricRow], min_impressions: u64) -> Vec<OpportunityItem> {
    let mut items: Vec<OpportunityItem> = rows
        .iter()
        .filter(|row| in_band(row, 5.0, 20.0, min_impressions))
        .map(opportunity)
        .collect();
    items.sort_by(|a, b| b.potential_clicks.cmp(&a.potential_clicks));
    items
}

/// Queries just off the first page (positions 8-15), ranked by impressions.
pub fn striking_distance(rows: &[MetricRow], min_impressions: u64) -> Vec<OpportunityItem> {
    let mut items: Vec<OpportunityItem> = rows
        .iter()
        .filter(|row| in_band(row, 8.0, 15.0, min_impressions))
        .map(opportunity)
        .collect();
    items.sort_by(|a, b| b.impressions.cmp(&a.impressions));
    items
}

/// Page-level variant over positions 11-20, ranked by impressions.
pub fn quick_wins(rows: &[MetricRow], min_impressions: u64) -> Vec<OpportunityItem> {
    let mut items: Vec<OpportunityItem> = rows
        .iter()
        .filter(|row| in_band(row, 11.0, 20.0, min_impressions))
        .map(opportunity)
        .collect();
    items.sort_by(|a, b| b.impressions.cmp(&a.impressions));
    items
}

/// First-page keys whose CTR runs well under the positional benchmark,
/// ranked by impressions.
pub fn low_ctr_opportunities(rows: &[MetricRow], min_impressions: u64) -> Vec<LowCtrItem> {
    let mut items: Vec<LowCtrItem> = rows
        .iter()
        .filter(|row| row.impressions >= min_impressions && row.position <= 10.0)
        .filter_map(|row| {
            let benchmark = expected_ctr(row.position);
            if row.ctr >= benchmark * LOW_CTR_RATIO {
                return None;
            }
            Some(LowCtrItem {
                key: row.key(),
                clicks: row.clicks,
                impressions: row.impressions,
                position: row.position,
                actual_ctr: row.ctr,
                expected_ctr: benchmark,
            })
        })
        .collect();
    items.sort_by(|a, b| b.impressions.cmp(&a.impressions));
    items
}
