//! Keyword cannibalization: several pages competing for one query.

use crate::query::MetricRow;
use serde::Serialize;
use std::collections::BTreeMap;

/// Conflict index above which a split is reported outright. Two pages at
/// roughly 64/36 sit on this line.
const CONFLICT_FLOOR: f64 = 0.45;

/// Runner-up impressions at or above this share of the leader's also count
/// as a real contest.
const RUNNER_UP_SHARE: f64 = 0.50;

#[derive(Debug, Clone, Serialize)]
pub struct CompetingPage {
    pub page: String,
    pub clicks: u64,
    pub impressions: u64,
    pub position: f64,
    pub impression_share: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CannibalizedQuery {
    pub query: String,
    pub total_clicks: u64,
    pub total_impressions: u64,
    /// 1 - sum(share^2): 0 when one page dominates, approaching 1 as
    /// traffic splits evenly across more pages.
    pub conflict: f64,
    pub pages: Vec<CompetingPage>,
}

/// Detect queries whose impressions split across two or more pages.
///
/// Expects rows grouped by (query, page). Ordering is stable: ranked by
/// `total_impressions * conflict` descending, so re-running on the same
/// rows yields the same list.
pub fn detect_cannibalization(rows: &[MetricRow], min_impressions: u64) -> Vec<CannibalizedQuery> {
    let mut by_query: BTreeMap<&str, Vec<&MetricRow>> = BTreeMap::new();
    for row in rows {
        if row.keys.len() < 2 {
            continue;
        }
        by_query.entry(row.keys[0].as_str()).or_default().push(row);
    }

    let mut issues = Vec::new();
    for (query, group) in by_query {
        let mut pages: BTreeMap<&str, (u64, u64, f64, usize)> = BTreeMap::new();
        for row in &group {
            let entry = pages.entry(row.keys[1].as_str()).or_insert((0, 0, 0.0, 0));
            entry.0 += row.clicks;
            entry.1 += row.impressions;
            entry.2 += row.position;
            entry.3 += 1;
        }
        if pages.len() < 2 {
            continue;
        }

        let total_clicks: u64 = pages.values().map(|(clicks, ..)| *clicks).sum();
        let total_impressions: u64 = pages.values().map(|(_, impressions, ..)| *impressions).sum();
        if total_impressions < min_impressions || total_impressions == 0 {
            continue;
        }

        let mut competing: Vec<CompetingPage> = pages
            .into_iter()
            .map(|(page, (clicks, impressions, position_sum, rows))| CompetingPage {
                page: page.to_string(),
                clicks,
                impressions,
                position: position_sum / rows.max(1) as f64,
                impression_share: impressions as f64 / total_impressions as f64,
            })
            .collect();
        competing.sort_by(|a, b| b.impressions.cmp(&a.impressions));

        let concentration: f64 = competing.iter().map(|p| p.impression_share.powi(2)).sum();
        let conflict = 1.0 - concentration;
        let runner_up_contests = competing[1].impressions as f64
            >= competing[0].impressions as f64 * RUNNER_UP_SHARE;
        if conflict <= CONFLICT_FLOOR && !runner_up_contests {
            continue;
        }

        issues.push(CannibalizedQuery {
            query: query.to_string(),
            total_clicks,
            total_impressions,
            conflict,
            pages: competing,
        });
    }

    issues.sort_by(|a, b| {
        let score_a = a.total_impressions as f64 * a.conflict;
        let score_b = b.total_impressions as f64 * b.conflict;
        score_b.total_cmp(&score_a)
    });
    issues
}
