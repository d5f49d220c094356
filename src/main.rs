use anyhow::{bail, Context, Result};
use clap::Parser;
use reqwest::Client;
use search_insights_rs::cli::{BackendArg, Cli, Commands};
use search_insights_rs::config::CoreConfig;
use search_insights_rs::query::AnalyticsQuery;
use search_insights_rs::services::engine::InsightsEngine;
use search_insights_rs::services::health::HealthService;
use search_insights_rs::services::source::{bing, gsc, MetricSource};
use serde::Serialize;
use std::sync::Arc;
use url::Url;

fn build_source(backend: BackendArg, config: &CoreConfig) -> Result<Arc<dyn MetricSource>> {
    let http = Client::new();
    match backend {
        BackendArg::Gsc => {
            let token = config.gsc_access_token()?.to_string();
            let base = Url::parse(&config.gsc_api_base)
                .with_context(|| format!("invalid INSIGHTS_GSC_API_BASE: {}", config.gsc_api_base))?;
            Ok(Arc::new(gsc::SearchConsoleSource::new(http, base, token)))
        }
        BackendArg::Bing => {
            let key = config.bing_api_key()?.to_string();
            let base = Url::parse(&config.bing_api_base)
                .with_context(|| format!("invalid INSIGHTS_BING_API_BASE: {}", config.bing_api_base))?;
            Ok(Arc::new(bing::BingWebmasterSource::new(http, base, key)))
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = CoreConfig::from_env();
    let source = build_source(cli.backend, &config)?;
    let engine = Arc::new(InsightsEngine::new(source, config.engine_settings()));

    match cli.command {
        Commands::Query {
            site,
            start,
            end,
            dimensions,
            limit,
        } => {
            let query = AnalyticsQuery::new(site, start, end)
                .with_dimensions(dimensions)
                .with_row_limit(limit);
            print_json(&engine.query_analytics(query).await?)?;
        }
        Commands::Trends { site, days, metric } => {
            print_json(&engine.detect_trends(&site, days, metric).await?)?;
        }
        Commands::Anomalies { site, days, metric } => {
            print_json(&engine.detect_anomalies(&site, days, metric).await?)?;
        }
        Commands::Timeseries {
            site,
            days,
            granularity,
            forecast_days,
        } => {
            print_json(
                &engine
                    .time_series_insights(&site, days, granularity, forecast_days)
                    .await?,
            )?;
        }
        Commands::LowHangingFruit { site } => {
            print_json(&engine.find_low_hanging_fruit(&site).await?)?;
        }
        Commands::Cannibalization { site } => {
            print_json(&engine.detect_cannibalization(&site).await?)?;
        }
        Commands::LowCtr { site } => {
            print_json(&engine.find_low_ctr_opportunities(&site).await?)?;
        }
        Commands::StrikingDistance { site } => {
            print_json(&engine.find_striking_distance(&site).await?)?;
        }
        Commands::QuickWins { site } => {
            print_json(&engine.find_quick_wins(&site).await?)?;
        }
        Commands::LostQueries { site, period_days } => {
            print_json(&engine.find_lost_queries(&site, period_days).await?)?;
        }
        Commands::Brand { site, pattern } => {
            let pattern = pattern
                .or_else(|| config.brand_pattern.clone())
                .unwrap_or_default();
            if pattern.trim().is_empty() {
                bail!("provide --pattern or set INSIGHTS_BRAND_PATTERN");
            }
            print_json(&engine.analyze_brand_split(&site, &pattern).await?)?;
        }
        Commands::DropAttribution { site } => {
            print_json(&engine.analyze_drop_attribution(&site).await?)?;
        }
        Commands::Recommend { site } => {
            print_json(&engine.generate_recommendations(&site).await?)?;
        }
        Commands::Health { site } => {
            let health = HealthService::new(engine.clone());
            match site {
                Some(site) => print_json(&health.check_site(&site).await)?,
                None => print_json(&health.check_all_sites().await?)?,
            }
        }
    }

    Ok(())
}
