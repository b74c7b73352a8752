use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{COUNTRY_MAX_LEN, CURRENCY_MAX_LEN};

pub const DEFAULT_COUNTRY_ID: &str = "india";
pub const DEFAULT_CURRENCY: &str = "INR";
pub const DEFAULT_WORKFLOW_ID: &str = "fuel_price_etl";
pub const DEFAULT_FEED_BASE_URL: &str =
    "https://daily-petrol-diesel-lpg-cng-fuel-prices-in-india.p.rapidapi.com/v1/fuel-prices";
pub const DEFAULT_FEED_HOST: &str = "daily-petrol-diesel-lpg-cng-fuel-prices-in-india.p.rapidapi.com";

/// A slope needs two points; smaller configured minimums are raised to this.
pub const MIN_TREND_POINTS: usize = 2;
/// Ten years of daily prices.
pub const MAX_TREND_WINDOW_DAYS: u32 = 3650;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CityTarget {
    pub state_id: String,
    pub city_id: String,
}

impl CityTarget {
    pub fn new(state_id: impl Into<String>, city_id: impl Into<String>) -> Self {
        Self {
            state_id: state_id.into(),
            city_id: city_id.into(),
        }
    }
}

pub fn default_cities() -> Vec<CityTarget> {
    vec![
        CityTarget::new("maharashtra", "mumbai"),
        CityTarget::new("delhi", "delhi"),
        CityTarget::new("karnataka", "bengaluru"),
        CityTarget::new("tamil-nadu", "chennai"),
        CityTarget::new("west-bengal", "kolkata"),
        CityTarget::new("telangana", "hyderabad"),
    ]
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct FeedConfig {
    pub base_url: String,
    pub api_host: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_FEED_BASE_URL.to_string(),
            api_host: DEFAULT_FEED_HOST.to_string(),
            api_key: None,
            timeout_secs: 30,
            max_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

/// Every tunable and every global default lives here.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub country_id: String,
    pub currency: String,
    pub workflow_id: String,
    pub trend_window_days: u32,
    pub trend_min_points: usize,
    pub fetch_concurrency: usize,
    pub cities: Vec<CityTarget>,
    pub feed: FeedConfig,
    pub database: DatabaseConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            country_id: DEFAULT_COUNTRY_ID.to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            workflow_id: DEFAULT_WORKFLOW_ID.to_string(),
            trend_window_days: 30,
            trend_min_points: MIN_TREND_POINTS,
            fetch_concurrency: 4,
            cities: default_cities(),
            feed: FeedConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Defaults, then the optional TOML file, then the process environment.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&contents)?
            }
            None => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("DATABASE_URL")
            .or_else(|| lookup("FUELFLUX_DATABASE_URL"))
            .or_else(|| lookup("ETL_DATABASE_URL"))
        {
            self.database.url = Some(url);
        }
        if let Some(key) = lookup("RAPIDAPI_KEY") {
            self.feed.api_key = Some(key);
        }
        if let Some(host) = lookup("RAPIDAPI_HOST") {
            self.feed.api_host = host;
        }
        if let Some(days) = lookup("FUELFLUX_TREND_WINDOW_DAYS") {
            self.trend_window_days = days.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "FUELFLUX_TREND_WINDOW_DAYS",
                value: days.clone(),
            })?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.trend_window_days == 0 || self.trend_window_days > MAX_TREND_WINDOW_DAYS {
            return Err(ConfigError::InvalidValue {
                key: "trend_window_days",
                value: self.trend_window_days.to_string(),
            });
        }
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "fetch_concurrency",
                value: self.fetch_concurrency.to_string(),
            });
        }
        if self.country_id.trim().is_empty() {
            return Err(ConfigError::Missing("country_id"));
        }
        if self.country_id.chars().count() > COUNTRY_MAX_LEN {
            return Err(ConfigError::InvalidValue {
                key: "country_id",
                value: self.country_id.clone(),
            });
        }
        if self.currency.trim().is_empty() {
            return Err(ConfigError::Missing("currency"));
        }
        if self.currency.chars().count() > CURRENCY_MAX_LEN {
            return Err(ConfigError::InvalidValue {
                key: "currency",
                value: self.currency.clone(),
            });
        }
        Ok(())
    }

    pub fn database_url(&self) -> Result<&str, ConfigError> {
        self.database
            .url
            .as_deref()
            .ok_or(ConfigError::Missing("DATABASE_URL (or FUELFLUX_DATABASE_URL)"))
    }

    pub fn trend_min_points(&self) -> usize {
        self.trend_min_points.max(MIN_TREND_POINTS)
    }
}
