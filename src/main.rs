//! # Flash Digest
//!
//! An ingestion pipeline for financial news feeds. It walks paginated flash
//! and categorized article feeds, normalizes and deduplicates the items, and
//! assembles a time-ordered corpus that is handed to a summarization service.
//!
//! ## Features
//!
//! - Offset-chained crawl of the categorized list feed, optionally per category
//! - Cursor-chained crawl of the flash feed within a recent window
//! - Bounded-concurrency detail fetching, tolerant to per-item failures
//! - Exact (SHA-256) or approximate (SimHash) duplicate detection
//! - Summarized report with a plain-text fallback, written as Markdown
//!
//! ## Usage
//!
//! ```sh
//! flash_digest --flash --today -o ./reports
//! ```
//!
//! ## Architecture
//!
//! 1. **Pagination**: chain feed pages until exhaustion, budget or window boundary
//! 2. **Details**: fetch full bodies for list items (10 at a time)
//! 3. **Assembly**: normalize, sort newest first, deduplicate
//! 4. **Output**: summarize the corpus and write the report

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod corpus;
mod dedup;
mod detail;
mod error;
mod feed;
mod models;
mod normalize;
mod pagination;
mod pipeline;
mod sink;
mod summarize;
mod utils;

use cli::Cli;
use feed::HttpFeedClient;
use sink::{DocumentSink, MarkdownFileSink};
use summarize::{HttpSummarizer, RetrySummarizer, produce_report};
use utils::ensure_writable_dir;

const SUMMARIZER_TIMEOUT: Duration = Duration::from_secs(300);

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .with_writer(std::io::stderr)
        .init();

    let start_time = std::time::Instant::now();
    info!("flash_digest starting up");

    let args = Cli::parse();
    debug!(?args, "Parsed CLI arguments");

    let config = args.apply(config::load(args.config.as_deref()).await?);
    info!(
        base_url = %config.base_url,
        flash = config.flash_mode,
        fetch_all = config.fetch_all,
        dedup = ?config.dedup_mode,
        "Configuration ready"
    );

    // Early check: fail before crawling if the report cannot be written
    if let Some(dir) = &args.output_dir {
        if let Err(e) = ensure_writable_dir(dir).await {
            error!(path = %dir, error = %e, "Output directory is not writable");
            return Err(e.into());
        }
    }

    let feed = HttpFeedClient::from_config(&config)?;
    let now = Utc::now();
    let outcome = pipeline::run(&feed, &config, now).await;
    info!(stats = ?outcome.stats, "Ingestion complete");

    if outcome.corpus.is_empty() {
        warn!("No records after filtering; nothing to do");
        return Ok(());
    }

    let summarizer = match &args.summarizer_url {
        Some(url) => match HttpSummarizer::new(url, SUMMARIZER_TIMEOUT) {
            Ok(client) => Some(RetrySummarizer::new(
                client,
                summarize::DEFAULT_RETRIES,
                summarize::DEFAULT_BASE_DELAY,
            )),
            Err(e) => {
                warn!(error = %e, "Could not build summarizer client; continuing without it");
                None
            }
        },
        None => None,
    };

    let report = produce_report(summarizer.as_ref(), &outcome.corpus, outcome.kind, now).await;
    info!(title = %report.title, degraded = report.degraded, "Report ready");

    match &args.output_dir {
        Some(dir) => {
            let sink = MarkdownFileSink::new(dir);
            if let Err(e) = sink.write(&report.title, &report.body).await {
                error!(error = %e, "Failed to write report");
            }
            if let Err(e) = sink.write_records(&report.title, outcome.corpus.records()).await {
                error!(error = %e, "Failed to write corpus records");
            }
        }
        None => println!("# {}\n\n{}", report.title, report.body),
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
