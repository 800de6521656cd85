//! Chained pagination over a [`FeedSource`].
//!
//! A chain walks one feed page after page. The continuation token of the next
//! request comes from the last item of the current page, never from a counter:
//!
//! - offset chaining (list feed): the last item's own `offset` field
//! - cursor chaining (flash feed): the last item's `id`, sent as `last_id`
//!
//! ```text
//!            empty page
//! RUNNING ──────────────────▶ DONE
//!    │  page budget spent
//!    ├──────────────────────▶ STOPPED_BY_BUDGET
//!    │  item outside window
//!    ├──────────────────────▶ STOPPED_BY_DATE
//!    │  retries exhausted
//!    └──────────────────────▶ FAILED
//! ```
//!
//! A feed that keeps answering with the same token never reaches DONE on its
//! own; the page budget is what ends it, and [`ChainOutcome::stall`] reports
//! that case as a [`StallError`].
//!
//! With [`BoundaryPolicy::StopAtBoundary`] the chain trusts the feed to list
//! items newest first and stops at the first item outside the recent window.
//! That ordering is a contract of the upstream feed and is not verified here.

use crate::config::{BoundaryPolicy, RecentWindow};
use crate::error::{FetchError, StallError};
use crate::feed::FeedSource;
use crate::models::{ItemId, RawItem};
use crate::normalize::publish_time;
use crate::utils::{backoff_delay, display_zone};
use chrono::{DateTime, TimeDelta, Utc};
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, instrument, warn};

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainState {
    Running,
    Done,
    StoppedByBudget,
    StoppedByDate,
    Failed,
}

/// Position of a chain in its feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageToken {
    Offset(i64),
    /// `None` requests the newest page.
    Cursor(Option<ItemId>),
}

impl PageToken {
    /// Token for the page after `items`; unchanged when the page gives no hint.
    pub fn advance(&self, items: &[RawItem]) -> PageToken {
        let last = items.last();
        match self {
            PageToken::Offset(current) => {
                PageToken::Offset(last.and_then(|item| item.offset).unwrap_or(*current))
            }
            PageToken::Cursor(current) => PageToken::Cursor(
                last.and_then(|item| item.id.clone())
                    .or_else(|| current.clone()),
            ),
        }
    }
}

impl fmt::Display for PageToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageToken::Offset(offset) => write!(f, "offset {offset}"),
            PageToken::Cursor(Some(id)) => write!(f, "cursor {id}"),
            PageToken::Cursor(None) => f.write_str("cursor start"),
        }
    }
}

/// Where a chain starts and what it asks for.
#[derive(Debug, Clone)]
pub struct ChainRequest {
    pub start: PageToken,
    pub category: Option<ItemId>,
    /// Page size for cursor chains.
    pub limit: u32,
}

impl ChainRequest {
    pub fn offset(start: i64, category: Option<ItemId>) -> Self {
        Self {
            start: PageToken::Offset(start),
            category,
            limit: 0,
        }
    }

    pub fn cursor(limit: u32) -> Self {
        Self {
            start: PageToken::Cursor(None),
            category: None,
            limit,
        }
    }
}

/// Recency filter applied to every item of a chain.
#[derive(Debug, Clone, Copy)]
pub struct WindowFilter {
    pub window: RecentWindow,
    /// What to do with the first item outside the window.
    pub policy: BoundaryPolicy,
    /// Reference time the window is measured from.
    pub now: DateTime<Utc>,
}

impl WindowFilter {
    pub fn contains(&self, ts: &DateTime<Utc>) -> bool {
        match self.window {
            RecentWindow::Today => {
                let zone = display_zone();
                ts.with_timezone(&zone).date_naive() == self.now.with_timezone(&zone).date_naive()
            }
            // A cutoff before the representable range leaves the window unbounded.
            RecentWindow::Hours(hours) => TimeDelta::try_hours(i64::from(hours))
                .and_then(|span| self.now.checked_sub_signed(span))
                .is_none_or(|cutoff| *ts >= cutoff),
        }
    }
}

/// Limits and filters of one chain.
#[derive(Debug, Clone)]
pub struct ChainOptions {
    /// Page budget; reaching it ends the chain in STOPPED_BY_BUDGET.
    pub max_pages: usize,
    /// Pause between consecutive page requests.
    pub page_delay: Duration,
    /// Extra attempts per page after a failure.
    pub retries: usize,
    /// Delay before the first retry; doubles with each attempt.
    pub retry_base_delay: Duration,
    /// Skip items whose `important` flag is below 1.
    pub only_important: bool,
    /// Recency filter; `None` accepts every publish time.
    pub window: Option<WindowFilter>,
}

impl ChainOptions {
    pub fn new(max_pages: usize) -> Self {
        Self {
            max_pages,
            page_delay: Duration::ZERO,
            retries: 0,
            retry_base_delay: Duration::ZERO,
            only_important: false,
            window: None,
        }
    }

    pub fn with_page_delay(mut self, delay: Duration) -> Self {
        self.page_delay = delay;
        self
    }

    pub fn with_retries(mut self, retries: usize, base_delay: Duration) -> Self {
        self.retries = retries;
        self.retry_base_delay = base_delay;
        self
    }

    pub fn only_important(mut self, only: bool) -> Self {
        self.only_important = only;
        self
    }

    pub fn with_window(mut self, window: WindowFilter) -> Self {
        self.window = Some(window);
        self
    }
}

/// Everything a finished chain produced.
#[derive(Debug)]
pub struct ChainOutcome {
    pub items: Vec<RawItem>,
    pub state: ChainState,
    /// Pages fetched successfully, the terminating empty page included.
    pub pages: usize,
    /// Consecutive trailing pages that left the token unchanged.
    pub stalled_pages: usize,
    pub last_token: PageToken,
}

impl ChainOutcome {
    /// The budget ran out while the token was stuck.
    pub fn stall(&self) -> Option<StallError> {
        (self.state == ChainState::StoppedByBudget && self.stalled_pages > 0).then(|| StallError {
            token: self.last_token.to_string(),
            pages: self.pages,
            stalled_pages: self.stalled_pages,
        })
    }
}

/// Drives one chain at a time; chains are sequential by nature.
#[derive(Debug, Clone)]
pub struct Chainer {
    options: ChainOptions,
}

impl Chainer {
    pub fn new(options: ChainOptions) -> Self {
        Self { options }
    }

    #[instrument(level = "info", skip_all, fields(start = %request.start, category = ?request.category))]
    pub async fn run<F: FeedSource>(&self, feed: &F, request: &ChainRequest) -> ChainOutcome {
        let mut token = request.start.clone();
        let mut outcome = ChainOutcome {
            items: Vec::new(),
            state: ChainState::Running,
            pages: 0,
            stalled_pages: 0,
            last_token: token.clone(),
        };

        while outcome.state == ChainState::Running {
            if outcome.pages >= self.options.max_pages {
                outcome.state = ChainState::StoppedByBudget;
                break;
            }
            if outcome.pages > 0 && !self.options.page_delay.is_zero() {
                sleep(self.options.page_delay).await;
            }

            let page = match self.fetch_with_retry(feed, request, &token).await {
                Ok(page) => page,
                Err(e) => {
                    error!(%token, error = %e, "Giving up on chain");
                    outcome.state = ChainState::Failed;
                    break;
                }
            };
            outcome.pages += 1;

            if page.is_empty() {
                outcome.state = ChainState::Done;
                break;
            }

            let next = token.advance(&page);
            let page_len = page.len();
            if !self.take_page(page, &mut outcome.items) {
                outcome.state = ChainState::StoppedByDate;
            }

            if next == token {
                outcome.stalled_pages += 1;
                warn!(%token, stalled_pages = outcome.stalled_pages, "Page did not advance the token");
            } else {
                outcome.stalled_pages = 0;
            }
            debug!(
                page = outcome.pages,
                page_len,
                collected = outcome.items.len(),
                %next,
                "Fetched page"
            );
            token = next;
        }

        outcome.last_token = token;
        info!(
            state = ?outcome.state,
            pages = outcome.pages,
            items = outcome.items.len(),
            "Chain finished"
        );
        outcome
    }

    /// Move the page's accepted items into `out`. Returns `false` once the
    /// chain has crossed the window boundary.
    fn take_page(&self, page: Vec<RawItem>, out: &mut Vec<RawItem>) -> bool {
        let mut in_window = 0usize;
        let mut out_of_window = 0usize;

        for item in page {
            if self.options.only_important && !item.is_important() {
                continue;
            }
            if let Some(filter) = &self.options.window {
                let ts = publish_time(&item).unwrap_or(filter.now);
                if !filter.contains(&ts) {
                    match filter.policy {
                        BoundaryPolicy::StopAtBoundary => {
                            debug!(id = ?item.id, %ts, "Reached window boundary");
                            return false;
                        }
                        BoundaryPolicy::FilterOnly => {
                            out_of_window += 1;
                            continue;
                        }
                    }
                }
            }
            in_window += 1;
            out.push(item);
        }

        !(in_window == 0 && out_of_window > 0)
    }

    async fn fetch_with_retry<F: FeedSource>(
        &self,
        feed: &F,
        request: &ChainRequest,
        token: &PageToken,
    ) -> Result<Vec<RawItem>, FetchError> {
        let mut attempt = 0usize;
        loop {
            let result = match token {
                PageToken::Offset(offset) => feed.fetch_list(*offset, request.category.as_ref()).await,
                PageToken::Cursor(last_id) => feed.fetch_flash(request.limit, last_id.as_ref()).await,
            };
            match result {
                Ok(items) => return Ok(items),
                Err(e) => {
                    attempt += 1;
                    if attempt > self.options.retries {
                        return Err(e);
                    }
                    let delay = backoff_delay(attempt, self.options.retry_base_delay, MAX_RETRY_DELAY);
                    warn!(attempt, max = self.options.retries, ?delay, %token, error = %e, "Page fetch failed; backing off");
                    sleep(delay).await;
                }
            }
        }
    }
}
