//! Google Search Console adapter.
//!
//! Speaks the Webmasters v3 surface: `searchAnalytics/query` for metric
//! rows, plus site and sitemap listings. Numeric sitemap counters arrive
//! as JSON strings from this API, so they are decoded leniently.

use super::{MetricSource, SiteEntry, SitemapEntry};
use crate::error::{SourceError, SourceResult};
use crate::query::{AnalyticsQuery, MetricRow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use url::form_urlencoded;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/webmasters/v3";

#[derive(Debug, Clone)]
pub struct SearchConsoleSource {
    http: Client,
    base_url: Url,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct QueryEnvelope {
    #[serde(default)]
    rows: Vec<RawAnalyticsRow>,
}

#[derive(Debug, Deserialize)]
struct RawAnalyticsRow {
    #[serde(default)]
    keys: Vec<String>,
    #[serde(default)]
    clicks: Option<f64>,
    #[serde(default)]
    impressions: Option<f64>,
    #[serde(default)]
    ctr: Option<f64>,
    #[serde(default)]
    position: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SitesEnvelope {
    #[serde(default, rename = "siteEntry")]
    site_entry: Vec<RawSiteEntry>,
}

#[derive(Debug, Deserialize)]
struct RawSiteEntry {
    #[serde(rename = "siteUrl")]
    site_url: String,
    #[serde(default, rename = "permissionLevel")]
    permission_level: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SitemapsEnvelope {
    #[serde(default)]
    sitemap: Vec<RawSitemap>,
}

#[derive(Debug, Deserialize)]
struct RawSitemap {
    #[serde(default)]
    path: String,
    #[serde(default, rename = "lastSubmitted")]
    last_submitted: Option<String>,
    #[serde(default, rename = "isPending")]
    is_pending: bool,
    #[serde(default)]
    errors: JsonValue,
    #[serde(default)]
    warnings: JsonValue,
}

/// int64 fields come back as either numbers or decimal strings.
fn lenient_count(value: &JsonValue) -> u64 {
    match value {
        JsonValue::Number(n) => n.as_u64().unwrap_or(0),
        JsonValue::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn normalize_row(raw: RawAnalyticsRow) -> MetricRow {
    let clicks = raw.clicks.unwrap_or(0.0).max(0.0).round() as u64;
    let impressions = raw.impressions.unwrap_or(0.0).max(0.0).round() as u64;
    let ctr = raw.ctr.unwrap_or_else(|| {
        if impressions > 0 {
            clicks as f64 / impressions as f64
        } else {
            0.0
        }
    });
    MetricRow {
        keys: raw.keys,
        clicks,
        impressions,
        ctr: ctr.clamp(0.0, 1.0),
        position: raw.position.unwrap_or(0.0).max(0.0),
    }
}

fn encode_site(site: &str) -> String {
    form_urlencoded::byte_serialize(site.as_bytes()).collect()
}

impl SearchConsoleSource {
    pub fn new(http: Client, mut base_url: Url, access_token: String) -> Self {
        // Url::join drops the last path segment without this.
        if !base_url.path().ends_with('/') {
            base_url.set_path(&format!("{}/", base_url.path()));
        }
        Self {
            http,
            base_url,
            access_token,
        }
    }

    fn endpoint(&self, path: &str) -> SourceResult<Url> {
        self.base_url
            .join(path)
            .map_err(|err| SourceError::Request(format!("bad endpoint {path}: {err}")))
    }

    async fn error_from(response: reqwest::Response, what: &str) -> SourceError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let snippet: String = body.chars().take(200).collect();
        SourceError::from_status(status, format!("{what}: HTTP {status}: {snippet}"))
    }
}

#[async_trait]
impl MetricSource for SearchConsoleSource {
    fn name(&self) -> &'static str {
        "gsc"
    }

    async fn fetch_metric_rows(&self, query: &AnalyticsQuery) -> SourceResult<Vec<MetricRow>> {
        let path = format!(
            "sites/{}/searchAnalytics/query",
            encode_site(&query.site)
        );
        let url = self.endpoint(&path)?;

        let mut body = json!({
            "startDate": query.start_date.to_string(),
            "endDate": query.end_date.to_string(),
            "dimensions": query.dimensions.iter().map(|d| d.as_str()).collect::<Vec<_>>(),
            "rowLimit": query.row_limit,
        });
        if !query.filters.is_empty() {
            let filters: Vec<JsonValue> = query
                .filters
                .iter()
                .map(|filter| {
                    json!({
                        "dimension": filter.dimension.as_str(),
                        "operator": filter.operator.as_str(),
                        "expression": filter.expression,
                    })
                })
                .collect();
            body["dimensionFilterGroups"] = json!([{ "filters": filters }]);
        }

        let response = self
            .http
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, "search analytics query").await);
        }
        let envelope: QueryEnvelope = response
            .json()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))?;
        Ok(envelope.rows.into_iter().map(normalize_row).collect())
    }

    async fn list_sites(&self) -> SourceResult<Vec<SiteEntry>> {
        let url = self.endpoint("sites")?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, "site list").await);
        }
        let envelope: SitesEnvelope = response
            .json()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))?;
        Ok(envelope
            .site_entry
            .into_iter()
            .map(|entry| SiteEntry {
                url: entry.site_url,
                permission: entry.permission_level,
            })
            .collect())
    }

    async fn list_sitemaps(&self, site: &str) -> SourceResult<Vec<SitemapEntry>> {
        let path = format!("sites/{}/sitemaps", encode_site(site));
        let url = self.endpoint(&path)?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(Self::error_from(response, "sitemap list").await);
        }
        let envelope: SitemapsEnvelope = response
            .json()
            .await
            .map_err(|err| SourceError::Decode(err.to_string()))?;
        Ok(envelope
            .sitemap
            .into_iter()
            .map(|raw| SitemapEntry {
                path: raw.path,
                last_submitted: raw.last_submitted,
                is_pending: raw.is_pending,
                errors: lenient_count(&raw.errors),
                warnings: lenient_count(&raw.warnings),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_normalize_with_explicit_defaults() {
        let envelope: QueryEnvelope = serde_json::from_value(json!({
            "rows": [
                {"keys": ["running shoes"], "clicks": 12.0, "impressions": 340.0,
                 "ctr": 0.0353, "position": 6.4},
                {"keys": ["boots"], "impressions": 100.0},
                {"keys": ["sandals"]}
            ]
        }))
        .expect("decode");
        let rows: Vec<MetricRow> = envelope.rows.into_iter().map(normalize_row).collect();

        assert_eq!(rows[0].clicks, 12);
        assert_eq!(rows[0].impressions, 340);
        assert!((rows[0].ctr - 0.0353).abs() < 1e-9);

        // Missing counts default to zero; missing ctr is recomputed.
        assert_eq!(rows[1].clicks, 0);
        assert_eq!(rows[1].impressions, 100);
        assert_eq!(rows[1].ctr, 0.0);
        assert_eq!(rows[2].impressions, 0);
        assert_eq!(rows[2].position, 0.0);
    }

    #[test]
    fn missing_ctr_is_recomputed_from_counts() {
        let raw: RawAnalyticsRow = serde_json::from_value(json!({
            "keys": ["2024-01-05"], "clicks": 25.0, "impressions": 500.0, "position": 3.1
        }))
        .expect("decode");
        let row = normalize_row(raw);
        assert!((row.ctr - 0.05).abs() < 1e-9);
    }

    #[test]
    fn sitemap_counters_decode_from_strings_or_numbers() {
        let envelope: SitemapsEnvelope = serde_json::from_value(json!({
            "sitemap": [
                {"path": "https://example.com/sitemap.xml", "isPending": false,
                 "errors": "3", "warnings": 7},
                {"path": "https://example.com/news.xml"}
            ]
        }))
        .expect("decode");
        assert_eq!(lenient_count(&envelope.sitemap[0].errors), 3);
        assert_eq!(lenient_count(&envelope.sitemap[0].warnings), 7);
        assert_eq!(lenient_count(&envelope.sitemap[1].errors), 0);
    }

    #[test]
    fn site_urls_are_path_encoded() {
        assert_eq!(
            encode_site("https://example.com/"),
            "https%3A%2F%2Fexample.com%2F"
        );
        assert_eq!(encode_site("sc-domain:example.com"), "sc-domain%3Aexample.com");
    }
}
