//! Pipeline configuration.
//!
//! Values come from an optional YAML file and are then overridden by CLI
//! flags (see [`crate::cli::Cli::apply`]). Every field has a default, so an
//! empty file or no file at all is a valid configuration.

use crate::error::ConfigError;
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument};

/// How near-duplicates are detected.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum DedupMode {
    /// Exact SHA-256 match on the whitespace-collapsed body.
    #[default]
    Content,
    /// SimHash within a Hamming threshold.
    Simhash,
}

/// Which publish times count as recent for flash feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecentWindow {
    /// Same calendar day as "now" in the display zone (UTC+8).
    Today,
    /// Published no earlier than this many hours before "now".
    Hours(u32),
}

/// What the chainer does with an item outside the recent window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundaryPolicy {
    /// Stop the whole chain at the first out-of-window item.
    ///
    /// Only correct while the feed returns items in strictly descending
    /// publish order; an out-of-order page loses every later in-window item.
    #[default]
    StopAtBoundary,
    /// Skip out-of-window items and stop only once an entire page is outside
    /// the window.
    FilterOnly,
}

/// Paths of the feed endpoints relative to the base URL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FeedEndpoints {
    /// Categorized list feed, paged by `offset`.
    pub list: String,
    /// Single item detail, looked up by `id`.
    pub detail: String,
    /// Flash feed, paged by `last_id`.
    pub flash: String,
    /// Category catalogue.
    pub categories: String,
}

impl Default for FeedEndpoints {
    /// Paths served by the production news API; override them for feeds that
    /// expose the list and detail roles under other names.
    fn default() -> Self {
        Self {
            list: "news".to_string(),
            detail: "news/detail".to_string(),
            flash: "flash".to_string(),
            categories: "category".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub base_url: String,
    pub endpoints: FeedEndpoints,
    /// Category name to filter the list feed by.
    pub category: Option<String>,
    pub start_offset: i64,
    pub fetch_all: bool,
    pub per_category: bool,
    pub flash_mode: bool,
    pub only_important: bool,
    pub max_pages: usize,
    /// Page budget of each chain when crawling category by category.
    pub per_category_max_pages: usize,
    pub dedup_mode: DedupMode,
    pub simhash_threshold: u32,
    /// Restrict flash items to the current day instead of `window_hours`.
    pub today_only: bool,
    pub window_hours: u32,
    pub boundary_policy: BoundaryPolicy,
    pub detail_concurrency: usize,
    pub flash_page_limit: u32,
    pub request_timeout_secs: u64,
    pub list_page_delay_ms: u64,
    pub flash_page_delay_ms: u64,
    /// Extra attempts for a failing page before the chain gives up.
    pub page_retries: usize,
    pub retry_base_delay_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.mktnews.net/api/".to_string(),
            endpoints: FeedEndpoints::default(),
            category: None,
            start_offset: 0,
            fetch_all: false,
            per_category: false,
            flash_mode: false,
            only_important: false,
            max_pages: 2000,
            per_category_max_pages: 300,
            dedup_mode: DedupMode::Content,
            simhash_threshold: 5,
            today_only: false,
            window_hours: 36,
            boundary_policy: BoundaryPolicy::default(),
            detail_concurrency: 10,
            flash_page_limit: 50,
            request_timeout_secs: 20,
            list_page_delay_ms: 100,
            flash_page_delay_ms: 200,
            page_retries: 2,
            retry_base_delay_ms: 500,
        }
    }
}

impl PipelineConfig {
    pub fn window(&self) -> RecentWindow {
        if self.today_only {
            RecentWindow::Today
        } else {
            RecentWindow::Hours(self.window_hours)
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn list_page_delay(&self) -> Duration {
        Duration::from_millis(self.list_page_delay_ms)
    }

    pub fn flash_page_delay(&self) -> Duration {
        Duration::from_millis(self.flash_page_delay_ms)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

/// Parse a YAML document into a config, filling absent fields with defaults.
pub fn from_yaml(path: &str, yaml: &str) -> Result<PipelineConfig, ConfigError> {
    serde_yaml::from_str(yaml).map_err(|source| ConfigError::Yaml {
        path: path.to_string(),
        source,
    })
}

/// Load the config file at `path`, or the defaults when no path is given.
#[instrument(level = "info")]
pub async fn load(path: Option<&str>) -> Result<PipelineConfig, ConfigError> {
    let Some(path) = path else {
        return Ok(PipelineConfig::default());
    };
    let yaml = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
    let config = from_yaml(path, &yaml)?;
    info!(path, "Loaded configuration");
    Ok(config)
}
