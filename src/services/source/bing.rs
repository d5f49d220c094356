//! Bing Webmaster Tools adapter.
//!
//! The JSON surface exposes per-query, per-page, and per-day rollups but
//! no device breakdown and no query+page pairing; queries needing those
//! report as unsupported and the core degrades per its error policy.
//! Dates arrive in the .NET `/Date(ms)/` form.

use super::{MetricSource, SiteEntry, SitemapEntry};
use crate::error::{SourceError, SourceResult};
use crate::query::{AnalyticsQuery, Dimension, DimensionFilter, FilterOperator, MetricRow};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://ssl.bing.com/webmaster/api.svc/json";

#[derive(Debug, Clone)]
pub struct BingWebmasterSource {
    http: Client,
    base_url: Url,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: serde::Deserialize<'de>"))]
struct Envelope<T> {
    #[serde(default)]
    d: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct RawTrafficStat {
    #[serde(rename = "Date")]
    date: String,
    #[serde(default, rename = "Clicks")]
    clicks: u64,
    #[serde(default, rename = "Impressions")]
    impressions: u64,
}

#[derive(Debug, Deserialize)]
struct RawQueryStat {
    #[serde(default, rename = "Query")]
    query: String,
    #[serde(default, rename = "Date")]
    date: Option<String>,
    #[serde(default, rename = "Clicks")]
    clicks: u64,
    #[serde(default, rename = "Impressions")]
    impressions: u64,
    #[serde(default, rename = "AvgImpressionPosition")]
    avg_impression_position: f64,
}

#[derive(Debug, Deserialize)]
struct RawPageStat {
    #[serde(default, rename = "Page")]
    page: String,
    #[serde(default, rename = "Date")]
    date: Option<String>,
    #[serde(default, rename = "Clicks")]
    clicks: u64,
    #[serde(default, rename = "Impressions")]
    impressions: u64,
    #[serde(default, rename = "AvgImpressionPosition")]
    avg_impression_position: f64,
}

#[derive(Debug, Deserialize)]
struct RawUserSite {
    #[serde(default, rename = "Url")]
    url: String,
}

#[derive(Debug, Deserialize)]
struct RawFeed {
    #[serde(default, rename = "Url")]
    url: String,
    #[serde(default, rename = "SubmittedDate")]
    submitted_date: Option<String>,
    #[serde(default, rename = "LastCrawled")]
    last_crawled: Option<String>,
}

/// Parse the .NET JSON date form, e.g. `/Date(1712102400000)/` or
/// `/Date(1712102400000-0700)/`.
fn parse_dotnet_date(value: &str) -> Option<NaiveDate> {
    let inner = value.strip_prefix("/Date(")?.strip_suffix(")/")?;
    let bytes = inner.as_bytes();
    let mut end = usize::from(bytes.first() == Some(&b'-'));
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    let millis: i64 = inner[..end].parse().ok()?;
    chrono::DateTime::from_timestamp_millis(millis).map(|dt| dt.date_naive())
}

fn in_window(date: Option<NaiveDate>, query: &AnalyticsQuery) -> bool {
    match date {
        Some(date) => date >= query.start_date && date <= query.end_date,
        // Undated rollups are taken as-is.
        None => true,
    }
}

fn filter_allows(filters: &[DimensionFilter], dimension: Dimension, key: &str) -> bool {
    filters
        .iter()
        .filter(|f| f.dimension == dimension)
        .all(|f| {
            let key = key.to_ascii_lowercase();
            let expr = f.expression.to_ascii_lowercase();
            match f.operator {
                FilterOperator::Equals => key == expr,
                FilterOperator::NotEquals => key != expr,
                FilterOperator::Contains => key.contains(&expr),
                FilterOperator::NotContains => !key.contains(&expr),
            }
        })
}

#[derive(Default)]
struct KeyAccum {
    clicks: u64,
    impressions: u64,
    position_sum: f64,
    entries: usize,
}

fn rows_from_accum(accums: BTreeMap<String, KeyAccum>, limit: usize) -> Vec<MetricRow> {
    let mut rows: Vec<MetricRow> = accums
        .into_iter()
        .map(|(key, accum)| {
            let ctr = if accum.impressions > 0 {
                accum.clicks as f64 / accum.impressions as f64
            } else {
                0.0
            };
            MetricRow {
                keys: vec![key],
                clicks: accum.clicks,
                impressions: accum.impressions,
                ctr,
                position: accum.position_sum / accum.entries.max(1) as f64,
            }
        })
        .collect();
    rows.sort_by(|a, b| b.clicks.cmp(&a.clicks));
    rows.truncate(limit);
    rows
}

impl BingWebmasterSource {
    pub fn new(http: Client, mut base_url: Url, api_key: String) -> Self {
        // Url::join drops the last path segment without this.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Self {
            http,
            base_url,
            api_key,
        }
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        site: Option<&str>,
    ) -> SourceResult<Vec<T>> {
        let mut url = self
            .base_url
            .join(method)
            .map_err(|err| SourceError::Request(format!("bad endpoint {method}: {err}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("apikey", &self.api_key);
            if let Some(site) = site {
                pairs.append_pair("siteUrl", site);
            }
        }
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(SourceError::from_status(
                status,
                format!("{method}: HTTP {status}: {snippet}"),
            ));
        }
        let envelope: Envelope<T> = response
            .json()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))?;
        Ok(envelope.d)
    }

    async fn traffic_rows(&self, query: &AnalyticsQuery) -> SourceResult<Vec<MetricRow>> {
        let stats: Vec<RawTrafficStat> =
            self.call("GetRankAndTrafficStats", Some(&query.site)).await?;
        let mut rows: Vec<MetricRow> = stats
            .into_iter()
            .filter_map(|stat| {
                let date = parse_dotnet_date(&stat.date)?;
                if !in_window(Some(date), query) {
                    return None;
                }
                let ctr = if stat.impressions > 0 {
                    stat.clicks as f64 / stat.impressions as f64
                } else {
                    0.0
                };
                Some(MetricRow {
                    keys: vec![date.to_string()],
                    clicks: stat.clicks,
                    impressions: stat.impressions,
                    ctr,
                    position: 0.0,
                })
            })
            .collect();
        rows.sort_by(|a, b| a.keys.cmp(&b.keys));
        rows.truncate(query.row_limit);
        Ok(rows)
    }

    async fn site_totals(&self, query: &AnalyticsQuery) -> SourceResult<Vec<MetricRow>> {
        let daily = self.traffic_rows(query).await?;
        if daily.is_empty() {
            return Ok(Vec::new());
        }
        let clicks: u64 = daily.iter().map(|row| row.clicks).sum();
        let impressions: u64 = daily.iter().map(|row| row.impressions).sum();
        let ctr = if impressions > 0 {
            clicks as f64 / impressions as f64
        } else {
            0.0
        };
        Ok(vec![MetricRow {
            keys: Vec::new(),
            clicks,
            impressions,
            ctr,
            position: 0.0,
        }])
    }

    async fn query_rows(&self, query: &AnalyticsQuery) -> SourceResult<Vec<MetricRow>> {
        let stats: Vec<RawQueryStat> = self.call("GetQueryStats", Some(&query.site)).await?;
        let mut accums: BTreeMap<String, KeyAccum> = BTreeMap::new();
        for stat in stats {
            let date = stat.date.as_deref().and_then(parse_dotnet_date);
            if !in_window(date, query) {
                continue;
            }
            if !filter_allows(&query.filters, Dimension::Query, &stat.query) {
                continue;
            }
            let accum = accums.entry(stat.query).or_default();
            accum.clicks += stat.clicks;
            accum.impressions += stat.impressions;
            accum.position_sum += stat.avg_impression_position;
            accum.entries += 1;
        }
        Ok(rows_from_accum(accums, query.row_limit))
    }

    async fn page_rows(&self, query: &AnalyticsQuery) -> SourceResult<Vec<MetricRow>> {
        let stats: Vec<RawPageStat> = self.call("GetPageStats", Some(&query.site)).await?;
        let mut accums: BTreeMap<String, KeyAccum> = BTreeMap::new();
        for stat in stats {
            let date = stat.date.as_deref().and_then(parse_dotnet_date);
            if !in_window(date, query) {
                continue;
            }
            if !filter_allows(&query.filters, Dimension::Page, &stat.page) {
                continue;
            }
            let accum = accums.entry(stat.page).or_default();
            accum.clicks += stat.clicks;
            accum.impressions += stat.impressions;
            accum.position_sum += stat.avg_impression_position;
            accum.entries += 1;
        }
        Ok(rows_from_accum(accums, query.row_limit))
    }

    fn unsupported_filters(&self, query: &AnalyticsQuery) -> Option<SourceError> {
        query
            .filters
            .iter()
            .find(|filter| !query.dimensions.contains(&filter.dimension))
            .map(|filter| {
                SourceError::Unsupported(format!(
                    "filter on {} outside the grouped dimensions",
                    filter.dimension
                ))
            })
    }
}

#[async_trait]
impl MetricSource for BingWebmasterSource {
    fn name(&self) -> &'static str {
        "bing"
    }

    async fn fetch_metric_rows(&self, query: &AnalyticsQuery) -> SourceResult<Vec<MetricRow>> {
        if let Some(err) = self.unsupported_filters(query) {
            return Err(err);
        }
        match query.dimensions.as_slice() {
            [] => self.site_totals(query).await,
            [Dimension::Date] => self.traffic_rows(query).await,
            [Dimension::Query] => self.query_rows(query).await,
            [Dimension::Page] => self.page_rows(query).await,
            other => Err(SourceError::Unsupported(format!(
                "dimension set {:?} is not exposed by this backend",
                other.iter().map(|d| d.as_str()).collect::<Vec<_>>()
            ))),
        }
    }

    async fn list_sites(&self) -> SourceResult<Vec<SiteEntry>> {
        let sites: Vec<RawUserSite> = self.call("GetUserSites", None).await?;
        Ok(sites
            .into_iter()
            .filter(|site| !site.url.is_empty())
            .map(|site| SiteEntry {
                url: site.url,
                permission: None,
            })
            .collect())
    }

    async fn list_sitemaps(&self, site: &str) -> SourceResult<Vec<SitemapEntry>> {
        let feeds: Vec<RawFeed> = self.call("GetFeeds", Some(site)).await?;
        Ok(feeds
            .into_iter()
            .map(|feed| SitemapEntry {
                path: feed.url,
                last_submitted: feed
                    .submitted_date
                    .as_deref()
                    .and_then(parse_dotnet_date)
                    .map(|date| date.to_string()),
                // Never crawled means the feed is still queued.
                is_pending: feed.last_crawled.is_none(),
                errors: 0,
                warnings: 0,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    #[test]
    fn dotnet_dates_parse_with_and_without_offsets() {
        // 2024-04-03T00:00:00Z
        assert_eq!(
            parse_dotnet_date("/Date(1712102400000)/"),
            Some(day(2024, 4, 3))
        );
        assert_eq!(
            parse_dotnet_date("/Date(1712102400000-0700)/"),
            Some(day(2024, 4, 3))
        );
        assert_eq!(parse_dotnet_date("2024-04-03"), None);
        assert_eq!(parse_dotnet_date("/Date(abc)/"), None);
    }

    #[test]
    fn query_stats_decode_and_compute_ctr() {
        let envelope: Envelope<RawQueryStat> = serde_json::from_value(json!({
            "d": [
                {"Query": "running shoes", "Clicks": 10, "Impressions": 400,
                 "AvgImpressionPosition": 7.5},
                {"Query": "boots"}
            ]
        }))
        .expect("decode");
        assert_eq!(envelope.d.len(), 2);

        let mut accums: BTreeMap<String, KeyAccum> = BTreeMap::new();
        for stat in envelope.d {
            let accum = accums.entry(stat.query).or_default();
            accum.clicks += stat.clicks;
            accum.impressions += stat.impressions;
            accum.position_sum += stat.avg_impression_position;
            accum.entries += 1;
        }
        let rows = rows_from_accum(accums, 100);
        assert_eq!(rows[0].keys, vec!["running shoes".to_string()]);
        assert!((rows[0].ctr - 0.025).abs() < 1e-9);
        assert_eq!(rows[1].clicks, 0);
        assert_eq!(rows[1].ctr, 0.0);
    }

    #[test]
    fn window_filtering_respects_bounds() {
        let query = AnalyticsQuery::new("https://example.com/", day(2024, 4, 1), day(2024, 4, 30));
        assert!(in_window(Some(day(2024, 4, 1)), &query));
        assert!(in_window(Some(day(2024, 4, 30)), &query));
        assert!(!in_window(Some(day(2024, 3, 31)), &query));
        assert!(in_window(None, &query));
    }

    #[test]
    fn client_side_filters_apply_to_grouped_dimension() {
        let filters = vec![DimensionFilter {
            dimension: Dimension::Query,
            operator: FilterOperator::Contains,
            expression: "shoe".to_string(),
        }];
        assert!(filter_allows(&filters, Dimension::Query, "Running Shoes"));
        assert!(!filter_allows(&filters, Dimension::Query, "boots"));
        // Filters on other dimensions do not constrain this key.
        assert!(filter_allows(&filters, Dimension::Page, "https://example.com/"));
    }
}
