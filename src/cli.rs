use crate::query::Metric;
use crate::services::timeseries::Granularity;
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendArg {
    Gsc,
    Bing,
}

#[derive(Parser, Debug)]
#[command(
    name = "insightctl",
    version,
    about = "Search-performance analytics from the command line"
)]
pub struct Cli {
    /// Reporting backend to query.
    #[arg(long, value_enum, default_value_t = BackendArg::Gsc)]
    pub backend: BackendArg,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Raw analytics rows for an explicit date range.
    Query {
        site: String,
        #[arg(long)]
        start: NaiveDate,
        #[arg(long)]
        end: NaiveDate,
        /// Repeatable grouping dimension (query, page, date, device, country).
        #[arg(long = "dimension", value_name = "DIM")]
        dimensions: Vec<crate::query::Dimension>,
        #[arg(long, default_value_t = crate::query::DEFAULT_ROW_LIMIT)]
        limit: usize,
    },
    /// Rising and declining keys, current period vs the one before.
    Trends {
        site: String,
        #[arg(long, default_value_t = 28)]
        days: i64,
        #[arg(long, default_value = "clicks")]
        metric: Metric,
    },
    /// Day-over-day outliers in a single metric series.
    Anomalies {
        site: String,
        #[arg(long, default_value_t = 28)]
        days: i64,
        #[arg(long, default_value = "clicks")]
        metric: Metric,
    },
    /// Bucketed series with rolling averages, seasonality, and a forecast.
    Timeseries {
        site: String,
        #[arg(long, default_value_t = 90)]
        days: i64,
        #[arg(long, default_value = "daily")]
        granularity: Granularity,
        #[arg(long, default_value_t = 7)]
        forecast_days: usize,
    },
    /// Queries in positions 5-20 with unrealized click potential.
    LowHangingFruit { site: String },
    /// Queries splitting impressions across competing pages.
    Cannibalization { site: String },
    /// First-page pages whose CTR runs under the positional benchmark.
    LowCtr { site: String },
    /// Queries just off the first page, ranked by impressions.
    StrikingDistance { site: String },
    /// Pages in positions 11-20 where on-page fixes move rankings.
    QuickWins { site: String },
    /// Queries whose clicks collapsed versus the previous period.
    LostQueries {
        site: String,
        #[arg(long, default_value_t = 28)]
        period_days: i64,
    },
    /// Brand vs non-brand split using a regex pattern.
    Brand {
        site: String,
        /// Defaults to INSIGHTS_BRAND_PATTERN.
        #[arg(long)]
        pattern: Option<String>,
    },
    /// Explain the most recent traffic drop.
    DropAttribution { site: String },
    /// Prioritized recommendations from the opportunity analyses.
    Recommend { site: String },
    /// Health verdict for one site, or the whole fleet when omitted.
    Health { site: Option<String> },
}
