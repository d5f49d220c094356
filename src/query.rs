use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use xxhash_rust::xxh3::xxh3_64;

pub const MAX_ROW_LIMIT: usize = 25_000;
pub const DEFAULT_ROW_LIMIT: usize = 1_000;

/// Grouping dimensions understood by the reporting backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    Query,
    Page,
    Date,
    Device,
    Country,
}

impl Dimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dimension::Query => "query",
            Dimension::Page => "page",
            Dimension::Date => "date",
            Dimension::Device => "device",
            Dimension::Country => "country",
        }
    }
}

impl FromStr for Dimension {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "query" => Ok(Dimension::Query),
            "page" => Ok(Dimension::Page),
            "date" => Ok(Dimension::Date),
            "device" => Ok(Dimension::Device),
            "country" => Ok(Dimension::Country),
            other => bail!("unknown dimension: {other}"),
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
}

impl FilterOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterOperator::Equals => "equals",
            FilterOperator::NotEquals => "notEquals",
            FilterOperator::Contains => "contains",
            FilterOperator::NotContains => "notContains",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimensionFilter {
    pub dimension: Dimension,
    pub operator: FilterOperator,
    pub expression: String,
}

/// The four metrics every backend row is normalized to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Clicks,
    Impressions,
    Ctr,
    Position,
}

impl Metric {
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Clicks => "clicks",
            Metric::Impressions => "impressions",
            Metric::Ctr => "ctr",
            Metric::Position => "position",
        }
    }

    /// Count metrics are summed per bucket; rate metrics are averaged.
    pub fn is_summed(&self) -> bool {
        matches!(self, Metric::Clicks | Metric::Impressions)
    }
}

impl FromStr for Metric {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "clicks" => Ok(Metric::Clicks),
            "impressions" => Ok(Metric::Impressions),
            "ctr" => Ok(Metric::Ctr),
            "position" => Ok(Metric::Position),
            other => bail!("unknown metric: {other}"),
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical row shape every backend adapter normalizes into.
///
/// `keys` holds one value per requested dimension, in dimension order.
/// Rows arrive unordered; anything that needs an ordering sorts explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRow {
    pub keys: Vec<String>,
    pub clicks: u64,
    pub impressions: u64,
    pub ctr: f64,
    pub position: f64,
}

impl MetricRow {
    pub fn metric(&self, metric: Metric) -> f64 {
        match metric {
            Metric::Clicks => self.clicks as f64,
            Metric::Impressions => self.impressions as f64,
            Metric::Ctr => self.ctr,
            Metric::Position => self.position,
        }
    }

    /// The row's grouping identity: its key tuple joined for map keys and
    /// display.
    pub fn key(&self) -> String {
        self.keys.join("|")
    }

    /// First key value, or empty when the row carries no dimensions.
    pub fn primary_key(&self) -> &str {
        self.keys.first().map(String::as_str).unwrap_or("")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsQuery {
    pub site: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    #[serde(default)]
    pub dimensions: Vec<Dimension>,
    #[serde(default)]
    pub filters: Vec<DimensionFilter>,
    pub row_limit: usize,
}

impl AnalyticsQuery {
    pub fn new(site: impl Into<String>, start_date: NaiveDate, end_date: NaiveDate) -> Self {
        Self {
            site: site.into(),
            start_date,
            end_date,
            dimensions: Vec::new(),
            filters: Vec::new(),
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }

    pub fn with_dimensions(mut self, dimensions: Vec<Dimension>) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn with_filters(mut self, filters: Vec<DimensionFilter>) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_row_limit(mut self, row_limit: usize) -> Self {
        self.row_limit = row_limit;
        self
    }

    /// Reject caller bugs before anything reaches a backend.
    pub fn validate(&self) -> Result<()> {
        if self.site.trim().is_empty() {
            bail!("site must not be empty");
        }
        if self.start_date > self.end_date {
            bail!(
                "start_date {} is after end_date {}",
                self.start_date,
                self.end_date
            );
        }
        if self.row_limit == 0 || self.row_limit > MAX_ROW_LIMIT {
            bail!("row_limit must be in 1..={MAX_ROW_LIMIT}");
        }
        for (idx, dimension) in self.dimensions.iter().enumerate() {
            if self.dimensions[..idx].contains(dimension) {
                bail!("duplicate dimension: {dimension}");
            }
        }
        Ok(())
    }

    /// Stable cache key for this query.
    ///
    /// Filters are sorted before hashing so logically identical queries
    /// with reordered filter lists share one cache entry; the list on the
    /// query itself keeps caller order for the wire request.
    pub fn fingerprint(&self) -> u64 {
        let mut filters: Vec<&DimensionFilter> = self.filters.iter().collect();
        filters.sort_by(|a, b| {
            (a.dimension, a.operator, a.expression.as_str())
                .cmp(&(b.dimension, b.operator, b.expression.as_str()))
        });

        let mut canonical = String::new();
        canonical.push_str(&self.site);
        canonical.push('\u{1f}');
        canonical.push_str(&self.start_date.to_string());
        canonical.push('\u{1f}');
        canonical.push_str(&self.end_date.to_string());
        canonical.push('\u{1f}');
        for dimension in &self.dimensions {
            canonical.push_str(dimension.as_str());
            canonical.push(',');
        }
        canonical.push('\u{1f}');
        for filter in filters {
            canonical.push_str(filter.dimension.as_str());
            canonical.push(':');
            canonical.push_str(filter.operator.as_str());
            canonical.push(':');
            canonical.push_str(&filter.expression);
            canonical.push(',');
        }
        canonical.push('\u{1f}');
        canonical.push_str(&self.row_limit.to_string());
        xxh3_64(canonical.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("date")
    }

    fn base_query() -> AnalyticsQuery {
        AnalyticsQuery::new("https://example.com/", day(2024, 1, 1), day(2024, 1, 28))
            .with_dimensions(vec![Dimension::Query, Dimension::Page])
    }

    #[test]
    fn equivalent_queries_share_a_fingerprint() {
        assert_eq!(base_query().fingerprint(), base_query().fingerprint());
    }

    #[test]
    fn fingerprint_ignores_filter_order() {
        let a = DimensionFilter {
            dimension: Dimension::Device,
            operator: FilterOperator::Equals,
            expression: "MOBILE".to_string(),
        };
        let b = DimensionFilter {
            dimension: Dimension::Country,
            operator: FilterOperator::Equals,
            expression: "usa".to_string(),
        };
        let forward = base_query().with_filters(vec![a.clone(), b.clone()]);
        let reversed = base_query().with_filters(vec![b, a]);
        assert_eq!(forward.fingerprint(), reversed.fingerprint());
    }

    #[test]
    fn fingerprint_changes_with_any_field() {
        let base = base_query();
        let other_site =
            AnalyticsQuery::new("https://other.com/", day(2024, 1, 1), day(2024, 1, 28))
                .with_dimensions(vec![Dimension::Query, Dimension::Page]);
        let other_limit = base_query().with_row_limit(5_000);
        assert_ne!(base.fingerprint(), other_site.fingerprint());
        assert_ne!(base.fingerprint(), other_limit.fingerprint());
    }

    #[test]
    fn validate_rejects_caller_bugs() {
        let inverted = AnalyticsQuery::new("https://example.com/", day(2024, 2, 1), day(2024, 1, 1));
        assert!(inverted.validate().is_err());

        let dupes = base_query().with_dimensions(vec![Dimension::Query, Dimension::Query]);
        assert!(dupes.validate().is_err());

        let oversized = base_query().with_row_limit(MAX_ROW_LIMIT + 1);
        assert!(oversized.validate().is_err());

        assert!(base_query().validate().is_ok());
    }
}
