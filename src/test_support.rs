//! Shared fixtures for unit tests: row builders and a scripted metric
//! source.

use crate::error::{SourceError, SourceResult};
use crate::query::{AnalyticsQuery, MetricRow};
use crate::services::source::{MetricSource, SiteEntry, SitemapEntry};
use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn row(keys: &[&str], clicks: u64, impressions: u64, position: f64) -> MetricRow {
    let ctr = if impressions > 0 {
        clicks as f64 / impressions as f64
    } else {
        0.0
    };
    MetricRow {
        keys: keys.iter().map(|key| key.to_string()).collect(),
        clicks,
        impressions,
        ctr,
        position,
    }
}

pub fn day_row(date: NaiveDate, clicks: u64, impressions: u64) -> MetricRow {
    let date = date.to_string();
    row(&[date.as_str()], clicks, impressions, 5.0)
}

type RowHandler =
    Box<dyn Fn(&AnalyticsQuery) -> SourceResult<Vec<MetricRow>> + Send + Sync + 'static>;

/// Metric source driven by a closure, with a fetch counter for cache and
/// fan-out assertions.
pub struct MockSource {
    handler: RowHandler,
    pub fetch_calls: AtomicUsize,
    sites: Vec<String>,
    sitemaps: HashMap<String, Vec<SitemapEntry>>,
    fail_sitemaps: bool,
}

impl MockSource {
    pub fn new(
        handler: impl Fn(&AnalyticsQuery) -> SourceResult<Vec<MetricRow>> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            fetch_calls: AtomicUsize::new(0),
            sites: Vec::new(),
            sitemaps: HashMap::new(),
            fail_sitemaps: false,
        }
    }

    /// Source that returns the same rows for every fetch.
    pub fn fixed(rows: Vec<MetricRow>) -> Self {
        Self::new(move |_| Ok(rows.clone()))
    }

    pub fn with_sites(mut self, sites: &[&str]) -> Self {
        self.sites = sites.iter().map(|site| site.to_string()).collect();
        self
    }

    pub fn with_sitemaps(mut self, site: &str, sitemaps: Vec<SitemapEntry>) -> Self {
        self.sitemaps.insert(site.to_string(), sitemaps);
        self
    }

    pub fn with_failing_sitemaps(mut self) -> Self {
        self.fail_sitemaps = true;
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MetricSource for MockSource {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn fetch_metric_rows(&self, query: &AnalyticsQuery) -> SourceResult<Vec<MetricRow>> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        (self.handler)(query)
    }

    async fn list_sites(&self) -> SourceResult<Vec<SiteEntry>> {
        Ok(self
            .sites
            .iter()
            .map(|site| SiteEntry {
                url: site.clone(),
                permission: Some("siteOwner".to_string()),
            })
            .collect())
    }

    async fn list_sitemaps(&self, site: &str) -> SourceResult<Vec<SitemapEntry>> {
        if self.fail_sitemaps {
            return Err(SourceError::Request("sitemap listing unavailable".to_string()));
        }
        Ok(self.sitemaps.get(site).cloned().unwrap_or_default())
    }
}
