//! Reporting-backend boundary.
//!
//! Every backend is reduced to one capability: given a site, a date range,
//! grouping dimensions, and filters, produce canonical metric rows. The
//! analytical core is written once against this trait; adapters own all
//! backend-specific wire shapes and normalization.

pub mod bing;
pub mod gsc;

use crate::error::SourceResult;
use crate::query::{AnalyticsQuery, MetricRow};
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct SiteEntry {
    pub url: String,
    pub permission: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SitemapEntry {
    pub path: String,
    pub last_submitted: Option<String>,
    pub is_pending: bool,
    pub errors: u64,
    pub warnings: u64,
}

#[async_trait]
pub trait MetricSource: Send + Sync {
    /// Short backend tag for logs.
    fn name(&self) -> &'static str;

    /// Fetch normalized rows for a validated query.
    ///
    /// Must fail with a distinguishable [`crate::error::SourceError`] on
    /// auth, quota, and not-found conditions; callers do not interpret
    /// failures beyond "this call produced no data".
    async fn fetch_metric_rows(&self, query: &AnalyticsQuery) -> SourceResult<Vec<MetricRow>>;

    /// Sites the configured credential can read.
    async fn list_sites(&self) -> SourceResult<Vec<SiteEntry>>;

    /// Submitted sitemaps with their error and warning counts.
    async fn list_sitemaps(&self, site: &str) -> SourceResult<Vec<SitemapEntry>>;
}
