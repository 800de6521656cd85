//! One ingestion run, from feed pages to an assembled corpus.
//!
//! The run plan is chosen from the configuration:
//!
//! | Plan | Trigger | Chains |
//! |------|---------|--------|
//! | flash | `flash_mode` | one cursor chain over the flash feed, recent window applied |
//! | per-category crawl | `fetch_all` + `per_category` | one offset chain per catalogue category, in sequence |
//! | crawl | `fetch_all` | one offset chain, optionally filtered to a category |
//! | single page | default | one list page at `start_offset` |
//!
//! List plans collect stubs, drop repeated ids, and fetch details
//! concurrently. Flash items already carry their body and are normalized as
//! they are. Deduplication happens once, after everything is collected.

use crate::config::PipelineConfig;
use crate::corpus::{Corpus, CorpusAssembler};
use crate::dedup::for_mode;
use crate::detail::{DetailBatch, DetailFetcher, FetchProgress};
use crate::feed::FeedSource;
use crate::models::{Category, ItemId, ItemStub, RawItem, ReportKind};
use crate::normalize::normalize;
use crate::pagination::{ChainOptions, ChainOutcome, ChainRequest, ChainState, Chainer, WindowFilter};
use chrono::{DateTime, Utc};
use itertools::Itertools;
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{error, info, instrument, warn};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunStats {
    pub pages: usize,
    pub raw_items: usize,
    pub detail_requested: usize,
    pub detail_succeeded: usize,
    pub duplicates_rejected: usize,
    /// Terminal state of every chain, in the order the chains ran.
    pub chain_states: Vec<ChainState>,
    pub stalled_chains: usize,
}

#[derive(Debug)]
pub struct RunOutcome {
    pub corpus: Corpus,
    pub kind: ReportKind,
    pub stats: RunStats,
}

/// Run one ingestion pass.
///
/// # Arguments
///
/// * `feed` - Where pages and details come from
/// * `config` - Plan selection, budgets, filters and dedup mode
/// * `now` - Reference time for the recency window and fallback timestamps
///
/// # Returns
///
/// The assembled corpus, the report kind it belongs to, and counters for the
/// run. An empty corpus is a normal outcome.
#[instrument(level = "info", skip_all, fields(
    flash = config.flash_mode,
    fetch_all = config.fetch_all,
    per_category = config.per_category,
))]
pub async fn run<F: FeedSource>(feed: &F, config: &PipelineConfig, now: DateTime<Utc>) -> RunOutcome {
    let mut stats = RunStats::default();
    let mut assembler = CorpusAssembler::new();

    let kind = if config.flash_mode {
        let items = run_flash(feed, config, now, &mut stats).await;
        assembler.extend(items.iter().map(|item| normalize(item, now)));
        ReportKind::Flash
    } else {
        let items = collect_list_items(feed, config, &mut stats).await;
        let batch = fetch_details(feed, config, &items, now).await;
        stats.detail_requested = batch.requested;
        stats.detail_succeeded = batch.records.len();
        assembler.extend(batch.records);
        ReportKind::Categorized
    };

    let mut dedup = for_mode(config.dedup_mode, config.simhash_threshold);
    let (corpus, rejected) = assembler.assemble(dedup.as_mut());
    stats.duplicates_rejected = rejected;

    info!(
        kind = kind.tag(),
        pages = stats.pages,
        raw_items = stats.raw_items,
        records = corpus.len(),
        duplicates = rejected,
        "Run finished"
    );
    RunOutcome { corpus, kind, stats }
}

fn chain_options(config: &PipelineConfig, budget: usize, delay: Duration) -> ChainOptions {
    ChainOptions::new(budget)
        .with_page_delay(delay)
        .with_retries(config.page_retries, config.retry_base_delay())
}

fn record_chain(stats: &mut RunStats, outcome: &ChainOutcome, check_stall: bool) {
    stats.pages += outcome.pages;
    stats.raw_items += outcome.items.len();
    stats.chain_states.push(outcome.state);
    if check_stall {
        if let Some(stall) = outcome.stall() {
            error!(error = %stall, "Chain stalled");
            stats.stalled_chains += 1;
        }
    }
}

async fn run_flash<F: FeedSource>(
    feed: &F,
    config: &PipelineConfig,
    now: DateTime<Utc>,
    stats: &mut RunStats,
) -> Vec<RawItem> {
    let window = WindowFilter {
        window: config.window(),
        policy: config.boundary_policy,
        now,
    };
    let options = chain_options(config, config.max_pages, config.flash_page_delay())
        .only_important(config.only_important)
        .with_window(window);

    let outcome = Chainer::new(options)
        .run(feed, &ChainRequest::cursor(config.flash_page_limit))
        .await;
    record_chain(stats, &outcome, true);
    outcome.items
}

async fn collect_list_items<F: FeedSource>(
    feed: &F,
    config: &PipelineConfig,
    stats: &mut RunStats,
) -> Vec<RawItem> {
    if config.fetch_all && config.per_category {
        match feed.fetch_categories().await {
            Ok(categories) if !categories.is_empty() => {
                return crawl_categories(feed, config, &categories, stats).await;
            }
            Ok(_) => warn!("Category catalogue is empty; crawling without a filter"),
            Err(e) => warn!(error = %e, "Could not load categories; crawling without a filter"),
        }
    }

    let category = match config.category.as_deref() {
        Some(name) => resolve_category(feed, name).await,
        None => None,
    };

    let (budget, delay) = if config.fetch_all {
        (config.max_pages, config.list_page_delay())
    } else {
        (1, Duration::ZERO)
    };
    let outcome = Chainer::new(chain_options(config, budget, delay))
        .run(feed, &ChainRequest::offset(config.start_offset, category))
        .await;
    record_chain(stats, &outcome, config.fetch_all);
    outcome.items
}

async fn crawl_categories<F: FeedSource>(
    feed: &F,
    config: &PipelineConfig,
    categories: &[Category],
    stats: &mut RunStats,
) -> Vec<RawItem> {
    let chainer = Chainer::new(chain_options(
        config,
        config.per_category_max_pages,
        config.list_page_delay(),
    ));

    let mut items = Vec::new();
    for category in categories {
        info!(id = %category.id, name = %category.name, "Crawling category");
        let request = ChainRequest::offset(config.start_offset, Some(category.id.clone()));
        let outcome = chainer.run(feed, &request).await;
        record_chain(stats, &outcome, true);
        items.extend(outcome.items);
    }
    items
}

/// Look a category up by name (case-insensitive) or id. Unknown names and
/// catalogue failures mean no filter.
pub async fn resolve_category<F: FeedSource>(feed: &F, name: &str) -> Option<ItemId> {
    let wanted = name.trim();
    let categories = match feed.fetch_categories().await {
        Ok(categories) => categories,
        Err(e) => {
            warn!(category = wanted, error = %e, "Could not load categories; ignoring filter");
            return None;
        }
    };

    let found = categories
        .into_iter()
        .find(|c| c.name.eq_ignore_ascii_case(wanted) || c.id.0 == wanted);
    match found {
        Some(category) => {
            info!(id = %category.id, name = %category.name, "Resolved category");
            Some(category.id)
        }
        None => {
            warn!(category = wanted, "Unknown category; ignoring filter");
            None
        }
    }
}

async fn fetch_details<F: FeedSource>(
    feed: &F,
    config: &PipelineConfig,
    items: &[RawItem],
    now: DateTime<Utc>,
) -> DetailBatch {
    let without_id = items.iter().filter(|item| item.id.is_none()).count();
    if without_id > 0 {
        warn!(count = without_id, "Skipping list items without an id");
    }
    let stubs: Vec<ItemStub> = items
        .iter()
        .filter_map(ItemStub::from_raw)
        .unique_by(|stub| stub.id.clone())
        .collect();
    info!(stubs = stubs.len(), items = items.len(), "Prepared detail requests");

    let progress = FetchProgress::new(stubs.len());
    let fetcher = DetailFetcher::new(config.detail_concurrency);
    let fetch = fetcher.fetch_all(feed, stubs, &progress, now);
    tokio::pin!(fetch);

    let mut ticker = interval(PROGRESS_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await;
    loop {
        tokio::select! {
            batch = &mut fetch => break batch,
            _ = ticker.tick() => {
                info!(completed = progress.completed(), total = progress.total(), "Detail fetch progress");
            }
        }
    }
}
