//! The analytics engine: one analytical core parameterized over the
//! metric-source capability, shared by every backend.
//!
//! Every operation builds a validated query, funnels the fetch through the
//! deduplicating cache, and hands the rows to a pure analysis function.
//! Composite operations launch their independent sub-fetches together and
//! combine once all have settled.

use crate::query::{AnalyticsQuery, Dimension, Metric, MetricRow};
use crate::services::cache::RequestCache;
use crate::services::insights::attribution::{
    self, DeviceVerdict, DropAttribution,
};
use crate::services::insights::cannibalization::{self, CannibalizedQuery};
use crate::services::insights::opportunities::{self, LowCtrItem, OpportunityItem};
use crate::services::insights::queries::{self, BrandMatcher, BrandSplit, LostQuery};
use crate::services::insights::{synthesize_recommendations, Recommendation};
use crate::services::source::MetricSource;
use crate::services::timeseries::{self, ForecastResult, Granularity, TimeSeriesPoint};
use crate::services::trends::{self, Anomaly, AnomalyKind, TrendItem};
use crate::time::{parse_day, DateWindow, DEFAULT_REPORTING_LAG_DAYS};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, NaiveDate};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

/// Window used by the opportunity and segmentation analyses.
const OPPORTUNITY_WINDOW_DAYS: i64 = 28;

/// Window scanned when attributing a drop.
const ATTRIBUTION_WINDOW_DAYS: i64 = 28;

/// Days of per-device history a drop day is compared against.
const DEVICE_BASELINE_DAYS: i64 = 7;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub cache_ttl: Duration,
    pub reporting_lag_days: i64,
    pub row_limit: usize,
    pub max_concurrent_checks: usize,
    pub rolling_window: usize,
    pub trend_min_volume: f64,
    pub trend_change_threshold_pct: f64,
    pub anomaly_window: usize,
    /// Fractional day-over-day move that counts as an anomaly.
    pub anomaly_threshold: f64,
    pub anomaly_min_volume: f64,
    pub min_impressions: u64,
    pub cannibalization_min_impressions: u64,
    pub lost_query_min_clicks: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            reporting_lag_days: DEFAULT_REPORTING_LAG_DAYS,
            row_limit: crate::query::DEFAULT_ROW_LIMIT,
            max_concurrent_checks: 5,
            rolling_window: 7,
            trend_min_volume: 10.0,
            trend_change_threshold_pct: 20.0,
            anomaly_window: 7,
            anomaly_threshold: 0.25,
            anomaly_min_volume: 10.0,
            min_impressions: 100,
            cannibalization_min_impressions: 500,
            lost_query_min_clicks: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TimeSeriesInsights {
    pub points: Vec<TimeSeriesPoint>,
    pub forecast: ForecastResult,
}

pub struct InsightsEngine {
    source: Arc<dyn MetricSource>,
    cache: RequestCache<Arc<Vec<MetricRow>>>,
    settings: EngineSettings,
}

impl InsightsEngine {
    pub fn new(source: Arc<dyn MetricSource>, settings: EngineSettings) -> Self {
        Self {
            cache: RequestCache::new(settings.cache_ttl),
            source,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn source(&self) -> &Arc<dyn MetricSource> {
        &self.source
    }

    fn window(&self, days: i64) -> DateWindow {
        DateWindow::delayed(days, self.settings.reporting_lag_days)
    }

    fn query_for(&self, site: &str, window: DateWindow, dimensions: Vec<Dimension>) -> AnalyticsQuery {
        AnalyticsQuery::new(site, window.start, window.end)
            .with_dimensions(dimensions)
            .with_row_limit(self.settings.row_limit)
    }

    async fn fetch_rows(&self, query: AnalyticsQuery) -> Result<Arc<Vec<MetricRow>>> {
        query.validate()?;
        let key = query.fingerprint();
        let source = Arc::clone(&self.source);
        self.cache
            .get_or_fetch(key, || async move {
                let rows = source
                    .fetch_metric_rows(&query)
                    .await
                    .with_context(|| {
                        format!("{} fetch failed for {}", source.name(), query.site)
                    })?;
                tracing::debug!(
                    backend = source.name(),
                    site = %query.site,
                    rows = rows.len(),
                    "fetched metric rows"
                );
                Ok(Arc::new(rows))
            })
            .await
    }

    /// Direct pass-through query; source failures propagate unchanged.
    pub async fn query_analytics(&self, query: AnalyticsQuery) -> Result<Vec<MetricRow>> {
        let rows = self.fetch_rows(query).await?;
        Ok(rows.as_ref().clone())
    }

    pub async fn detect_trends(
        &self,
        site: &str,
        days: i64,
        metric: Metric,
    ) -> Result<Vec<TrendItem>> {
        let current_window = self.window(days);
        let previous_window = current_window.preceding();
        let (current, previous) = tokio::join!(
            self.fetch_rows(self.query_for(site, current_window, vec![Dimension::Query])),
            self.fetch_rows(self.query_for(site, previous_window, vec![Dimension::Query])),
        );
        let (current, previous) = (current?, previous?);
        Ok(trends::detect_trends(
            &current,
            &previous,
            metric,
            self.settings.trend_min_volume,
            self.settings.trend_change_threshold_pct,
        ))
    }

    pub async fn detect_anomalies(
        &self,
        site: &str,
        days: i64,
        metric: Metric,
    ) -> Result<Vec<Anomaly>> {
        let rows = self
            .fetch_rows(self.query_for(site, self.window(days), vec![Dimension::Date]))
            .await?;
        let series = daily_series(&rows, metric);
        Ok(trends::detect_anomalies(
            &series,
            metric,
            self.settings.anomaly_window,
            self.settings.anomaly_threshold,
            self.settings.anomaly_min_volume,
        ))
    }

    pub async fn time_series_insights(
        &self,
        site: &str,
        days: i64,
        granularity: Granularity,
        forecast_days: usize,
    ) -> Result<TimeSeriesInsights> {
        let rows = self
            .fetch_rows(self.query_for(site, self.window(days), vec![Dimension::Date]))
            .await?;
        let metrics = [
            Metric::Clicks,
            Metric::Impressions,
            Metric::Ctr,
            Metric::Position,
        ];
        let mut points =
            timeseries::build_series(&rows, &metrics, granularity, self.settings.rolling_window);
        let seasonality = match granularity {
            Granularity::Daily => timeseries::apply_seasonality(&mut points, Metric::Clicks),
            Granularity::Weekly => 0.0,
        };
        let forecast =
            timeseries::forecast(&points, &metrics, Metric::Clicks, forecast_days, seasonality);
        Ok(TimeSeriesInsights { points, forecast })
    }

    pub async fn find_low_hanging_fruit(&self, site: &str) -> Result<Vec<OpportunityItem>> {
        let rows = self
            .fetch_rows(self.query_for(
                site,
                self.window(OPPORTUNITY_WINDOW_DAYS),
                vec![Dimension::Query],
            ))
            .await?;
        Ok(opportunities::low_hanging_fruit(
            &rows,
            self.settings.min_impressions,
        ))
    }

    pub async fn detect_cannibalization(&self, site: &str) -> Result<Vec<CannibalizedQuery>> {
        let rows = self
            .fetch_rows(self.query_for(
                site,
                self.window(OPPORTUNITY_WINDOW_DAYS),
                vec![Dimension::Query, Dimension::Page],
            ))
            .await?;
        Ok(cannibalization::detect_cannibalization(
            &rows,
            self.settings.cannibalization_min_impressions,
        ))
    }

    pub async fn find_low_ctr_opportunities(&self, site: &str) -> Result<Vec<LowCtrItem>> {
        let rows = self
            .fetch_rows(self.query_for(
                site,
                self.window(OPPORTUNITY_WINDOW_DAYS),
                vec![Dimension::Page],
            ))
            .await?;
        Ok(opportunities::low_ctr_opportunities(
            &rows,
            self.settings.min_impressions,
        ))
    }

    pub async fn find_striking_distance(&self, site: &str) -> Result<Vec<OpportunityItem>> {
        let rows = self
            .fetch_rows(self.query_for(
                site,
                self.window(OPPORTUNITY_WINDOW_DAYS),
                vec![Dimension::Query],
            ))
            .await?;
        Ok(opportunities::striking_distance(
            &rows,
            self.settings.min_impressions,
        ))
    }

    pub async fn find_quick_wins(&self, site: &str) -> Result<Vec<OpportunityItem>> {
        let rows = self
            .fetch_rows(self.query_for(
                site,
                self.window(OPPORTUNITY_WINDOW_DAYS),
                vec![Dimension::Page],
            ))
            .await?;
        Ok(opportunities::quick_wins(&rows, self.settings.min_impressions))
    }

    pub async fn find_lost_queries(&self, site: &str, period_days: i64) -> Result<Vec<LostQuery>> {
        let current_window = self.window(period_days);
        let previous_window = current_window.preceding();
        let (current, previous) = tokio::join!(
            self.fetch_rows(self.query_for(site, current_window, vec![Dimension::Query])),
            self.fetch_rows(self.query_for(site, previous_window, vec![Dimension::Query])),
        );
        let (current, previous) = (current?, previous?);
        Ok(queries::lost_queries(
            &current,
            &previous,
            self.settings.lost_query_min_clicks,
        ))
    }

    pub async fn analyze_brand_split(&self, site: &str, pattern: &str) -> Result<BrandSplit> {
        let rows = self
            .fetch_rows(self.query_for(
                site,
                self.window(OPPORTUNITY_WINDOW_DAYS),
                vec![Dimension::Query],
            ))
            .await?;
        let matcher = BrandMatcher::new(pattern);
        Ok(queries::brand_split(&rows, &matcher))
    }

    /// Explain the most recent click drop, if any, via device concentration
    /// and the external-event calendar.
    ///
    /// The device sub-fetches degrade to "unavailable" when the backend has
    /// no device breakdown or the fetches fail; the anomaly itself and the
    /// calendar correlation are still reported.
    pub async fn analyze_drop_attribution(&self, site: &str) -> Result<Option<DropAttribution>> {
        let anomalies = self
            .detect_anomalies(site, ATTRIBUTION_WINDOW_DAYS, Metric::Clicks)
            .await?;
        let Some(drop) = anomalies
            .into_iter()
            .filter(|a| a.kind == AnomalyKind::Drop)
            .max_by_key(|a| a.date)
        else {
            return Ok(None);
        };

        let drop_window = DateWindow {
            start: drop.date,
            end: drop.date,
        };
        let baseline_window =
            DateWindow::ending_at(drop.date - ChronoDuration::days(1), DEVICE_BASELINE_DAYS);
        let (same_day, baseline) = tokio::join!(
            self.fetch_rows(self.query_for(site, drop_window, vec![Dimension::Device])),
            self.fetch_rows(self.query_for(
                site,
                baseline_window,
                vec![Dimension::Date, Dimension::Device]
            )),
        );

        let (device_verdict, device_impacts) = match (same_day, baseline) {
            (Ok(same_day), Ok(baseline)) => {
                attribution::attribute_devices(&same_day, &baseline, DEVICE_BASELINE_DAYS)
            }
            (Err(err), _) | (_, Err(err)) => {
                tracing::warn!(
                    error = %err,
                    site,
                    "device breakdown unavailable for drop attribution"
                );
                (DeviceVerdict::Unavailable, Vec::new())
            }
        };

        let possible_events = attribution::events_near(drop.date, &attribution::known_events());
        Ok(Some(DropAttribution {
            anomaly: drop,
            device_verdict,
            device_impacts,
            possible_events,
        }))
    }

    /// Run the three opportunity analyses together and fold them into a
    /// prioritized list. A failing analysis contributes nothing instead of
    /// failing the synthesis.
    pub async fn generate_recommendations(&self, site: &str) -> Result<Vec<Recommendation>> {
        let (fruit, cannibalized, wins) = tokio::join!(
            self.find_low_hanging_fruit(site),
            self.detect_cannibalization(site),
            self.find_quick_wins(site),
        );
        let fruit = fruit.unwrap_or_else(|err| {
            tracing::warn!(error = %err, site, "low-hanging fruit analysis failed");
            Vec::new()
        });
        let cannibalized = cannibalized.unwrap_or_else(|err| {
            tracing::warn!(error = %err, site, "cannibalization analysis failed");
            Vec::new()
        });
        let wins = wins.unwrap_or_else(|err| {
            tracing::warn!(error = %err, site, "quick-win analysis failed");
            Vec::new()
        });
        Ok(synthesize_recommendations(&fruit, &cannibalized, &wins))
    }
}

/// Collapse date-keyed rows into an ascending `(date, value)` series.
pub fn daily_series(rows: &[MetricRow], metric: Metric) -> Vec<(NaiveDate, f64)> {
    let mut series: Vec<(NaiveDate, f64)> = rows
        .iter()
        .filter_map(|row| parse_day(row.primary_key()).map(|date| (date, row.metric(metric))))
        .collect();
    series.sort_by_key(|(date, _)| *date);
    series
}
