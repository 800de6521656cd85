//! Command-line interface definitions for Flash Digest.
//!
//! Flags override the values loaded from the optional YAML config file.
//! Output and service locations can also be given through environment
//! variables.

use crate::config::{DedupMode, PipelineConfig};
use clap::Parser;

/// Command-line arguments for the Flash Digest application.
///
/// # Examples
///
/// ```sh
/// # Latest page of the categorized feed, printed to stdout
/// flash_digest
///
/// # Today's important flash items, summarized and written to ./reports
/// flash_digest --flash --today --only-important -o ./reports --summarizer-url http://localhost:8080/summarize
///
/// # Every category, near-duplicate detection
/// flash_digest --all --per-category --dedup simhash
/// ```
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Category name (or id) to filter the list feed by
    #[arg(long)]
    pub category: Option<String>,

    /// Starting offset of the list feed
    #[arg(long)]
    pub offset: Option<i64>,

    /// Crawl every page instead of a single one
    #[arg(long)]
    pub all: bool,

    /// With --all, crawl each category separately
    #[arg(long)]
    pub per_category: bool,

    /// Read the flash feed instead of the categorized list
    #[arg(long)]
    pub flash: bool,

    /// Keep only flash items marked important
    #[arg(long)]
    pub only_important: bool,

    /// Limit flash items to today (UTC+8) instead of the last --hours
    #[arg(long)]
    pub today: bool,

    /// Page budget per chain
    #[arg(long)]
    pub max_pages: Option<usize>,

    /// Duplicate detection mode
    #[arg(long, value_enum)]
    pub dedup: Option<DedupMode>,

    /// Maximum Hamming distance for simhash duplicates
    #[arg(long)]
    pub simhash_threshold: Option<u32>,

    /// Recency window in hours for flash items
    #[arg(long)]
    pub hours: Option<u32>,

    /// Base URL of the news API
    #[arg(long, env = "FEED_BASE_URL")]
    pub base_url: Option<String>,

    /// Concurrent detail requests
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Optional path to a config.yaml file
    #[arg(short, long)]
    pub config: Option<String>,

    /// Directory for the Markdown report; stdout when omitted
    #[arg(short, long, env = "OUTPUT_DIR")]
    pub output_dir: Option<String>,

    /// Summarization service endpoint; plain rendering when omitted
    #[arg(long, env = "SUMMARIZER_URL")]
    pub summarizer_url: Option<String>,
}

impl Cli {
    /// Overlay the flags that were given onto `config`.
    pub fn apply(&self, mut config: PipelineConfig) -> PipelineConfig {
        if let Some(category) = &self.category {
            config.category = Some(category.clone());
        }
        if let Some(offset) = self.offset {
            config.start_offset = offset;
        }
        config.fetch_all |= self.all;
        config.per_category |= self.per_category;
        config.flash_mode |= self.flash;
        config.only_important |= self.only_important;
        config.today_only |= self.today;
        if let Some(max_pages) = self.max_pages {
            config.max_pages = max_pages;
        }
        if let Some(mode) = self.dedup {
            config.dedup_mode = mode;
        }
        if let Some(threshold) = self.simhash_threshold {
            config.simhash_threshold = threshold;
        }
        if let Some(hours) = self.hours {
            config.window_hours = hours;
        }
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(concurrency) = self.concurrency {
            config.detail_concurrency = concurrency;
        }
        config
    }
}
