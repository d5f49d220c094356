use crate::services::engine::EngineSettings;
use crate::services::source::{bing, gsc};
use crate::time::DEFAULT_REPORTING_LAG_DAYS;
use anyhow::{Context, Result};
use std::time::Duration;

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_optional_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Which reporting backend a run talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Gsc,
    Bing,
}

#[derive(Debug, Clone)]
pub struct CoreConfig {
    pub gsc_api_base: String,
    pub gsc_access_token: Option<String>,
    pub bing_api_base: String,
    pub bing_api_key: Option<String>,
    pub cache_ttl_seconds: u64,
    pub max_concurrent_checks: usize,
    pub reporting_lag_days: i64,
    pub row_limit: usize,
    pub brand_pattern: Option<String>,
}

impl CoreConfig {
    pub fn from_env() -> Self {
        Self {
            gsc_api_base: env_string("INSIGHTS_GSC_API_BASE", gsc::DEFAULT_API_BASE),
            gsc_access_token: env_optional_string("INSIGHTS_GSC_ACCESS_TOKEN"),
            bing_api_base: env_string("INSIGHTS_BING_API_BASE", bing::DEFAULT_API_BASE),
            bing_api_key: env_optional_string("INSIGHTS_BING_API_KEY"),
            cache_ttl_seconds: env_u64("INSIGHTS_CACHE_TTL_SECONDS", 300),
            max_concurrent_checks: env_usize("INSIGHTS_MAX_CONCURRENT_CHECKS", 5).max(1),
            reporting_lag_days: env_i64("INSIGHTS_REPORTING_LAG_DAYS", DEFAULT_REPORTING_LAG_DAYS)
                .max(0),
            row_limit: env_usize("INSIGHTS_ROW_LIMIT", crate::query::DEFAULT_ROW_LIMIT)
                .clamp(1, crate::query::MAX_ROW_LIMIT),
            brand_pattern: env_optional_string("INSIGHTS_BRAND_PATTERN"),
        }
    }

    pub fn gsc_access_token(&self) -> Result<&str> {
        self.gsc_access_token
            .as_deref()
            .context("INSIGHTS_GSC_ACCESS_TOKEN must be set for the gsc backend")
    }

    pub fn bing_api_key(&self) -> Result<&str> {
        self.bing_api_key
            .as_deref()
            .context("INSIGHTS_BING_API_KEY must be set for the bing backend")
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            cache_ttl: Duration::from_secs(self.cache_ttl_seconds),
            reporting_lag_days: self.reporting_lag_days,
            row_limit: self.row_limit,
            max_concurrent_checks: self.max_concurrent_checks,
            ..EngineSettings::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_settings_carry_configured_values() {
        let config = CoreConfig {
            gsc_api_base: gsc::DEFAULT_API_BASE.to_string(),
            gsc_access_token: None,
            bing_api_base: bing::DEFAULT_API_BASE.to_string(),
            bing_api_key: Some("key".to_string()),
            cache_ttl_seconds: 120,
            max_concurrent_checks: 8,
            reporting_lag_days: 2,
            row_limit: 500,
            brand_pattern: None,
        };
        let settings = config.engine_settings();
        assert_eq!(settings.cache_ttl, Duration::from_secs(120));
        assert_eq!(settings.max_concurrent_checks, 8);
        assert_eq!(settings.reporting_lag_days, 2);
        assert_eq!(settings.row_limit, 500);

        assert!(config.gsc_access_token().is_err());
        assert_eq!(config.bing_api_key().expect("key"), "key");
    }
}
