use chrono::{NaiveDate, TimeZone, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::period::WindowLength;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid date {value:?} for {field} (expected YYYY-MM-DD)")]
    BadDate { field: &'static str, value: String },
    #[error("collection range is empty: start {start} is not before end {end}")]
    EmptyRange { start: String, end: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub subgraph: SubgraphConfig,
    #[serde(default)]
    pub collect: CollectConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubgraphConfig {
    /// Activity subgraph GraphQL endpoint
    #[serde(default = "default_subgraph_url")]
    pub url: String,
    /// Total attempts per query, including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectConfig {
    /// First day of the collection range (UTC, inclusive).
    #[serde(default = "default_start")]
    pub start: String,
    /// Day after the last collected day (UTC, exclusive).
    #[serde(default = "default_end")]
    pub end: String,
    /// Window size: "month", "<n>d" or "<n>h".
    #[serde(default)]
    pub window: WindowLength,
    /// Records requested per page.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Pause between pages of the same window.
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    /// Pause between windows.
    #[serde(default = "default_window_delay_ms")]
    pub window_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

fn default_subgraph_url() -> String {
    "https://api.goldsky.com/api/public/project_cl6mb8i9h0003e201j6li0diw/subgraphs/activity-subgraph/0.0.4/gn"
        .to_string()
}
fn default_max_attempts() -> u32 {
    5
}
fn default_request_timeout() -> u64 {
    30
}
fn default_start() -> String {
    "2025-01-01".to_string()
}
fn default_end() -> String {
    "2026-01-01".to_string()
}
fn default_batch_size() -> usize {
    1000
}
fn default_page_delay_ms() -> u64 {
    500
}
fn default_window_delay_ms() -> u64 {
    1000
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("polymarket_data_2025")
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SubgraphConfig {
    fn default() -> Self {
        Self {
            url: default_subgraph_url(),
            max_attempts: default_max_attempts(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            end: default_end(),
            window: WindowLength::default(),
            batch_size: default_batch_size(),
            page_delay_ms: default_page_delay_ms(),
            window_delay_ms: default_window_delay_ms(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl CollectConfig {
    /// The configured range as unix seconds, `[start, end)`.
    pub fn range(&self) -> Result<(i64, i64), ConfigError> {
        let start = parse_day("collect.start", &self.start)?;
        let end = parse_day("collect.end", &self.end)?;
        if end <= start {
            return Err(ConfigError::EmptyRange {
                start: self.start.clone(),
                end: self.end.clone(),
            });
        }
        Ok((start, end))
    }
}

fn parse_day(field: &'static str, value: &str) -> Result<i64, ConfigError> {
    let bad = || ConfigError::BadDate {
        field,
        value: value.to_string(),
    };
    let date = NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| bad())?;
    let midnight = date.and_hms_opt(0, 0, 0).ok_or_else(bad)?;
    Ok(Utc.from_utc_datetime(&midnight).timestamp())
}

impl Config {
    /// Load config from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;
        config.apply_env();
        Ok(config)
    }

    /// Defaults plus environment overrides (no file needed).
    pub fn from_env() -> Self {
        let mut config = Config {
            subgraph: SubgraphConfig::default(),
            collect: CollectConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        };
        config.apply_env();
        config
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("POLYCOHORT_SUBGRAPH_URL") {
            if !url.is_empty() {
                self.subgraph.url = url;
            }
        }
        if let Ok(dir) = std::env::var("POLYCOHORT_DATA_DIR") {
            if !dir.is_empty() {
                self.storage.data_dir = PathBuf::from(dir);
            }
        }
    }
}
