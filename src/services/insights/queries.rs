//! Lost-query detection and brand / non-brand segmentation.

use crate::query::MetricRow;
use regex::RegexBuilder;
use serde::Serialize;
use std::collections::HashMap;

/// Current clicks under this share of prior clicks count as lost.
const LOST_RATIO: f64 = 0.20;

#[derive(Debug, Clone, Serialize)]
pub struct LostQuery {
    pub key: String,
    pub previous_clicks: u64,
    pub current_clicks: u64,
    pub clicks_lost: u64,
}

/// Keys that carried real traffic in the previous period and have since
/// collapsed to zero or near-zero, ranked by absolute clicks lost.
pub fn lost_queries(
    current: &[MetricRow],
    previous: &[MetricRow],
    min_prior_clicks: u64,
) -> Vec<LostQuery> {
    let mut current_by_key: HashMap<String, u64> = HashMap::new();
    for row in current {
        *current_by_key.entry(row.key()).or_insert(0) += row.clicks;
    }

    let mut previous_by_key: HashMap<String, u64> = HashMap::new();
    for row in previous {
        *previous_by_key.entry(row.key()).or_insert(0) += row.clicks;
    }

    let mut lost = Vec::new();
    for (key, previous_clicks) in previous_by_key {
        if previous_clicks < min_prior_clicks {
            continue;
        }
        let current_clicks = current_by_key.get(&key).copied().unwrap_or(0);
        if current_clicks == 0 || (current_clicks as f64) < previous_clicks as f64 * LOST_RATIO {
            lost.push(LostQuery {
                clicks_lost: previous_clicks - current_clicks,
                key,
                previous_clicks,
                current_clicks,
            });
        }
    }

    lost.sort_by(|a, b| b.clicks_lost.cmp(&a.clicks_lost));
    lost
}

/// Brand-term classifier compiled from a caller-supplied pattern.
///
/// Fail-closed: an invalid or oversized pattern yields a matcher that
/// matches nothing, never an error. Matching is case-insensitive and,
/// through the regex engine, runs in time linear in the input.
#[derive(Debug, Clone)]
pub struct BrandMatcher {
    regex: Option<regex::Regex>,
}

impl BrandMatcher {
    pub fn new(pattern: &str) -> Self {
        let regex = if pattern.trim().is_empty() {
            None
        } else {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .size_limit(1 << 20)
                .build()
                .map_err(|err| {
                    tracing::warn!(error = %err, "invalid brand pattern; matching nothing");
                    err
                })
                .ok()
        };
        Self { regex }
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex
            .as_ref()
            .map(|regex| regex.is_match(text))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BrandSegment {
    pub query_count: usize,
    pub clicks: u64,
    pub impressions: u64,
    /// Impression-weighted average position; plain mean when the segment
    /// has rows but no impressions.
    pub avg_position: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BrandSplit {
    pub brand: BrandSegment,
    pub non_brand: BrandSegment,
}

#[derive(Default)]
struct SegmentAccum {
    query_count: usize,
    clicks: u64,
    impressions: u64,
    weighted_position: f64,
    position_sum: f64,
}

impl SegmentAccum {
    fn push(&mut self, row: &MetricRow) {
        self.query_count += 1;
        self.clicks += row.clicks;
        self.impressions += row.impressions;
        self.weighted_position += row.position * row.impressions as f64;
        self.position_sum += row.position;
    }

    fn finish(self) -> BrandSegment {
        let avg_position = if self.impressions > 0 {
            self.weighted_position / self.impressions as f64
        } else if self.query_count > 0 {
            self.position_sum / self.query_count as f64
        } else {
            0.0
        };
        BrandSegment {
            query_count: self.query_count,
            clicks: self.clicks,
            impressions: self.impressions,
            avg_position,
        }
    }
}

/// Split rows into brand and non-brand segments by classifying each row's
/// primary key with the matcher.
pub fn brand_split(rows: &[MetricRow], matcher: &BrandMatcher) -> BrandSplit {
    let mut brand = SegmentAccum::default();
    let mut non_brand = SegmentAccum::default();
    for row in rows {
        if matcher.matches(row.primary_key()) {
            brand.push(row);
        } else {
            non_brand.push(row);
        }
    }
    BrandSplit {
        brand: brand.finish(),
        non_brand: non_brand.finish(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::row;

    #[test]
    fn lost_queries_rank_by_absolute_clicks_lost() {
        let previous = vec![
            row(&["gone"], 100, 2_000, 3.0),
            row(&["faded"], 40, 900, 4.0),
            row(&["steady"], 50, 1_000, 5.0),
            row(&["noise"], 2, 50, 9.0),
        ];
        let current = vec![
            row(&["faded"], 5, 200, 8.0),
            row(&["steady"], 48, 950, 5.0),
        ];
        let lost = lost_queries(&current, &previous, 10);
        assert_eq!(lost.len(), 2);
        assert_eq!(lost[0].key, "gone");
        assert_eq!(lost[0].clicks_lost, 100);
        assert_eq!(lost[1].key, "faded");
        assert_eq!(lost[1].current_clicks, 5);
    }

    #[test]
    fn recovered_queries_are_not_lost() {
        let previous = vec![row(&["fine"], 50, 1_000, 5.0)];
        let current = vec![row(&["fine"], 11, 400, 6.0)];
        // 11 clicks is 22% of prior: above the 20% line.
        assert!(lost_queries(&current, &previous, 10).is_empty());
    }

    #[test]
    fn invalid_brand_pattern_matches_nothing() {
        let matcher = BrandMatcher::new("[unclosed");
        assert!(!matcher.matches("anything"));
        assert!(!matcher.matches(""));

        let empty = BrandMatcher::new("  ");
        assert!(!empty.matches("acme"));
    }

    #[test]
    fn brand_matching_is_case_insensitive() {
        let matcher = BrandMatcher::new("acme|ac-me");
        assert!(matcher.matches("ACME shoes"));
        assert!(matcher.matches("buy Ac-Me boots"));
        assert!(!matcher.matches("generic sneakers"));
    }

    #[test]
    fn split_aggregates_each_side() {
        let rows = vec![
            row(&["acme store"], 100, 1_000, 1.5),
            row(&["acme returns"], 50, 500, 2.0),
            row(&["running shoes"], 30, 3_000, 8.0),
        ];
        let split = brand_split(&rows, &BrandMatcher::new("acme"));
        assert_eq!(split.brand.query_count, 2);
        assert_eq!(split.brand.clicks, 150);
        assert_eq!(split.brand.impressions, 1_500);
        // (1.5 * 1000 + 2.0 * 500) / 1500
        assert!((split.brand.avg_position - 5.0 / 3.0).abs() < 1e-9);
        assert_eq!(split.non_brand.query_count, 1);
        assert_eq!(split.non_brand.impressions, 3_000);
    }
}
