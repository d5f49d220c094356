//! Per-site health verdicts and the severity-sorted fleet report.
//!
//! Each site check runs four independent sub-fetches; any of them failing
//! degrades that signal to a neutral default instead of failing the check.

use crate::query::{AnalyticsQuery, Metric, MetricRow};
use crate::services::engine::InsightsEngine;
use crate::services::scheduler::run_bounded;
use crate::services::source::SitemapEntry;
use crate::services::trends::{Anomaly, AnomalyKind};
use crate::time::DateWindow;
use anyhow::{Context, Result};
use serde::Serialize;
use std::sync::Arc;

const HEALTH_COMPARE_DAYS: i64 = 7;
const ANOMALY_SCAN_DAYS: i64 = 14;

/// Week-over-week decline that flips a site to critical.
const CRITICAL_DECLINE_PCT: f64 = -30.0;

/// Week-over-week decline worth a warning.
const WARNING_DECLINE_PCT: f64 = -15.0;

/// Average position worsening by more than this many spots is an issue.
const POSITION_WORSE_DELTA: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Critical,
    Warning,
    Healthy,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PeriodTotals {
    pub clicks: u64,
    pub impressions: u64,
    pub ctr: f64,
    /// Impression-weighted average position.
    pub position: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct PerformanceComparison {
    pub current: PeriodTotals,
    pub previous: PeriodTotals,
    pub clicks_change_pct: f64,
    pub impressions_change_pct: f64,
    /// Positive means the average position got worse.
    pub position_delta: f64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SitemapSummary {
    pub total: usize,
    pub pending: usize,
    pub with_errors: usize,
    pub errors: u64,
    pub warnings: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub site: String,
    pub status: HealthStatus,
    /// None when the traffic comparison could not be fetched.
    pub performance: Option<PerformanceComparison>,
    /// None when the sitemap listing could not be fetched.
    pub sitemaps: Option<SitemapSummary>,
    pub anomalies: Vec<Anomaly>,
    pub issues: Vec<String>,
}

fn totals_from(rows: &[MetricRow]) -> PeriodTotals {
    let clicks: u64 = rows.iter().map(|row| row.clicks).sum();
    let impressions: u64 = rows.iter().map(|row| row.impressions).sum();
    let weighted: f64 = rows
        .iter()
        .map(|row| row.position * row.impressions as f64)
        .sum();
    PeriodTotals {
        clicks,
        impressions,
        ctr: if impressions > 0 {
            clicks as f64 / impressions as f64
        } else {
            0.0
        },
        position: if impressions > 0 {
            weighted / impressions as f64
        } else {
            0.0
        },
    }
}

fn pct_change(current: f64, previous: f64) -> f64 {
    if previous > 0.0 {
        (current - previous) / previous * 100.0
    } else if current > 0.0 {
        100.0
    } else {
        0.0
    }
}

fn summarize_sitemaps(entries: &[SitemapEntry]) -> SitemapSummary {
    SitemapSummary {
        total: entries.len(),
        pending: entries.iter().filter(|e| e.is_pending).count(),
        with_errors: entries.iter().filter(|e| e.errors > 0).count(),
        errors: entries.iter().map(|e| e.errors).sum(),
        warnings: entries.iter().map(|e| e.warnings).sum(),
    }
}

/// Fold the gathered signals into a status and an ordered issue list.
///
/// Critical outranks everything: a 30%+ traffic collapse or a silent site.
/// Any other recorded issue is a warning; a clean slate is healthy.
fn derive_status(
    performance: Option<&PerformanceComparison>,
    sitemaps: Option<&SitemapSummary>,
    anomalies: &[Anomaly],
) -> (HealthStatus, Vec<String>) {
    let mut issues = Vec::new();
    let mut critical = false;

    if let Some(perf) = performance {
        if perf.current.clicks == 0 && perf.current.impressions == 0 {
            critical = true;
            issues.push("no clicks or impressions in the current period".to_string());
        }
        for (label, change) in [
            ("clicks", perf.clicks_change_pct),
            ("impressions", perf.impressions_change_pct),
        ] {
            if change <= CRITICAL_DECLINE_PCT {
                critical = true;
                issues.push(format!("{label} down {:.0}% week over week", -change));
            } else if change <= WARNING_DECLINE_PCT {
                issues.push(format!("{label} down {:.0}% week over week", -change));
            }
        }
        if perf.position_delta > POSITION_WORSE_DELTA {
            issues.push(format!(
                "average position worsened by {:.1} spots",
                perf.position_delta
            ));
        }
    }

    if let Some(maps) = sitemaps {
        if maps.total == 0 {
            issues.push("no sitemaps submitted".to_string());
        }
        if maps.errors > 0 {
            issues.push(format!(
                "{} crawl errors across {} sitemaps",
                maps.errors, maps.with_errors
            ));
        }
    }

    let drops = anomalies
        .iter()
        .filter(|a| a.kind == AnomalyKind::Drop)
        .count();
    if drops > 0 {
        issues.push(format!(
            "{drops} anomalous traffic drop(s) in the last {ANOMALY_SCAN_DAYS} days"
        ));
    }

    let status = if critical {
        HealthStatus::Critical
    } else if !issues.is_empty() {
        HealthStatus::Warning
    } else {
        HealthStatus::Healthy
    };
    (status, issues)
}

#[derive(Clone)]
pub struct HealthService {
    engine: Arc<InsightsEngine>,
}

impl HealthService {
    pub fn new(engine: Arc<InsightsEngine>) -> Self {
        Self { engine }
    }

    async fn performance_comparison(&self, site: &str) -> Result<PerformanceComparison> {
        let current_window =
            DateWindow::delayed(HEALTH_COMPARE_DAYS, self.engine.settings().reporting_lag_days);
        let previous_window = current_window.preceding();
        let row_limit = self.engine.settings().row_limit;

        let totals_query = |window: DateWindow| {
            AnalyticsQuery::new(site, window.start, window.end).with_row_limit(row_limit)
        };
        let (current, previous) = tokio::join!(
            self.engine.query_analytics(totals_query(current_window)),
            self.engine.query_analytics(totals_query(previous_window)),
        );
        let current = totals_from(&current?);
        let previous = totals_from(&previous?);

        Ok(PerformanceComparison {
            clicks_change_pct: pct_change(current.clicks as f64, previous.clicks as f64),
            impressions_change_pct: pct_change(
                current.impressions as f64,
                previous.impressions as f64,
            ),
            position_delta: current.position - previous.position,
            current,
            previous,
        })
    }

    /// Check one site. Never fails: each failing sub-fetch degrades to a
    /// neutral default and the verdict is derived from what remains.
    pub async fn check_site(&self, site: &str) -> HealthReport {
        let (performance, sitemap_entries, anomalies) = tokio::join!(
            self.performance_comparison(site),
            self.engine.source().list_sitemaps(site),
            self.engine
                .detect_anomalies(site, ANOMALY_SCAN_DAYS, Metric::Clicks),
        );

        let performance = match performance {
            Ok(comparison) => Some(comparison),
            Err(err) => {
                tracing::warn!(error = %err, site, "health check: traffic comparison unavailable");
                None
            }
        };
        let sitemaps = match sitemap_entries {
            Ok(entries) => Some(summarize_sitemaps(&entries)),
            Err(err) => {
                tracing::warn!(error = %err, site, "health check: sitemap listing unavailable");
                None
            }
        };
        let anomalies = match anomalies {
            Ok(anomalies) => anomalies,
            Err(err) => {
                tracing::warn!(error = %err, site, "health check: anomaly scan unavailable");
                Vec::new()
            }
        };

        let (status, issues) = derive_status(performance.as_ref(), sitemaps.as_ref(), &anomalies);
        HealthReport {
            site: site.to_string(),
            status,
            performance,
            sitemaps,
            anomalies,
            issues,
        }
    }

    /// Check every site the credential can read, bounded fan-out, reports
    /// sorted critical, then warning, then healthy.
    pub async fn check_all_sites(&self) -> Result<Vec<HealthReport>> {
        let sites = self
            .engine
            .source()
            .list_sites()
            .await
            .context("listing sites for fleet health check")?;

        let mut units = Vec::with_capacity(sites.len());
        for site in sites {
            let service = self.clone();
            units.push(async move { Ok(service.check_site(&site.url).await) });
        }
        let results =
            run_bounded(units, self.engine.settings().max_concurrent_checks).await;

        let mut reports: Vec<HealthReport> = Vec::with_capacity(results.len());
        for result in results {
            match result {
                Ok(report) => reports.push(report),
                Err(err) => tracing::warn!(error = %err, "site health check unit failed"),
            }
        }
        reports.sort_by(|a, b| a.status.cmp(&b.status).then_with(|| a.site.cmp(&b.site)));
        Ok(reports)
    }
}
