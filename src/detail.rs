//! Bounded-concurrency detail fetching.
//!
//! Each [`ItemStub`] becomes one detail request; at most `concurrency`
//! requests are in flight at a time. A request that fails (transport error,
//! HTTP error, malformed payload) drops that item and nothing else. Results
//! arrive in completion order, so callers must not rely on submission order.
//!
//! The only shared state is [`FetchProgress`], a single atomic counter that
//! can be read from anywhere while the batch is still running.

use crate::error::FetchError;
use crate::feed::FeedSource;
use crate::models::{ItemStub, NormalizedRecord};
use crate::normalize::normalize;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_CONCURRENCY: usize = 10;

/// Completed-request counter for one batch.
#[derive(Debug)]
pub struct FetchProgress {
    completed: AtomicUsize,
    total: usize,
}

impl FetchProgress {
    pub fn new(total: usize) -> Self {
        Self {
            completed: AtomicUsize::new(0),
            total,
        }
    }

    /// Requests finished so far, successful or not. Never decreases.
    pub fn completed(&self) -> usize {
        self.completed.load(Ordering::Acquire)
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn record(&self) -> usize {
        self.completed.fetch_add(1, Ordering::AcqRel) + 1
    }
}

/// Outcome of a detail batch.
#[derive(Debug)]
pub struct DetailBatch {
    /// Successfully fetched records, in completion order.
    pub records: Vec<NormalizedRecord>,
    /// Number of stubs submitted.
    pub requested: usize,
}

impl DetailBatch {
    pub fn failed(&self) -> usize {
        self.requested - self.records.len()
    }
}

/// Fetches detail payloads with a bounded number of requests in flight.
#[derive(Debug, Clone)]
pub struct DetailFetcher {
    /// Maximum concurrent detail requests, at least 1.
    concurrency: usize,
}

impl Default for DetailFetcher {
    fn default() -> Self {
        Self::new(DEFAULT_CONCURRENCY)
    }
}

impl DetailFetcher {
    pub fn new(concurrency: usize) -> Self {
        Self {
            concurrency: concurrency.max(1),
        }
    }

    /// Fetch and normalize the detail of every stub.
    ///
    /// # Arguments
    ///
    /// * `feed` - Source of detail payloads
    /// * `stubs` - Items to fetch; their title and publish time fill gaps in the detail
    /// * `progress` - Counter bumped as each request finishes, readable while this runs
    /// * `ingested_at` - Fallback publish time for unparseable timestamps
    ///
    /// # Returns
    ///
    /// The successful records in completion order, plus the requested count.
    #[instrument(level = "info", skip_all, fields(requested = stubs.len(), concurrency = self.concurrency))]
    pub async fn fetch_all<F: FeedSource>(
        &self,
        feed: &F,
        stubs: Vec<ItemStub>,
        progress: &FetchProgress,
        ingested_at: DateTime<Utc>,
    ) -> DetailBatch {
        let requested = stubs.len();

        let records: Vec<NormalizedRecord> = stream::iter(stubs)
            .map(|stub| async move {
                let result = fetch_one(feed, &stub, ingested_at).await;
                let completed = progress.record();
                debug!(completed, total = progress.total(), id = %stub.id, "Detail request finished");
                match result {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(id = %stub.id, error = %e, "Detail fetch failed; dropping item");
                        None
                    }
                }
            })
            .buffer_unordered(self.concurrency)
            .filter_map(|record| std::future::ready(record))
            .collect()
            .await;

        let batch = DetailBatch { records, requested };
        info!(
            requested,
            succeeded = batch.records.len(),
            failed = batch.failed(),
            "Completed detail fetch"
        );
        batch
    }
}

/// Fetch one detail payload, filling gaps from the list stub.
async fn fetch_one<F: FeedSource>(
    feed: &F,
    stub: &ItemStub,
    ingested_at: DateTime<Utc>,
) -> Result<NormalizedRecord, FetchError> {
    let mut detail = feed.fetch_detail(&stub.id).await?;

    if detail.id.is_none() {
        detail.id = Some(stub.id.clone());
    }
    if detail.title.as_deref().is_none_or(|t| t.trim().is_empty()) {
        detail.title = stub.title.clone();
    }
    if detail.publish_time.as_deref().is_none_or(|t| t.trim().is_empty()) {
        detail.publish_time = stub.publish_time.clone();
    }
    Ok(normalize(&detail, ingested_at))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::stub::{ScriptedFeed, detail_item};
    use crate::models::{ItemId, RawItem};
    use chrono::TimeZone;
    use std::time::Duration;

    fn stub(id: i64) -> ItemStub {
        ItemStub {
            id: ItemId(id.to_string()),
            title: Some(format!("List title {id}")),
            publish_time: Some("2025-11-28T01:00:00Z".to_string()),
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 28, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_failures_are_dropped_not_fatal() {
        let feed = ScriptedFeed::new()
            .with_detail(detail_item(1, "One", "<p>First</p>", "2025-11-28T03:00:00Z"))
            .with_detail(detail_item(3, "Three", "<p>Third</p>", "2025-11-28T05:00:00Z"))
            .with_failing_detail("2");
        let stubs = vec![stub(1), stub(2), stub(3), stub(4)];
        let progress = FetchProgress::new(stubs.len());

        let batch = DetailFetcher::default()
            .fetch_all(&feed, stubs, &progress, now())
            .await;

        assert_eq!(batch.requested, 4);
        assert_eq!(batch.records.len(), 2);
        assert_eq!(batch.failed(), 2);
        assert_eq!(progress.completed(), 4);
        let mut bodies: Vec<_> = batch.records.iter().map(|r| r.body.as_str()).collect();
        bodies.sort();
        assert_eq!(bodies, vec!["First", "Third"]);
    }

    #[tokio::test]
    async fn test_stub_fallbacks_fill_missing_fields() {
        let bare = RawItem {
            id: Some(ItemId("5".to_string())),
            content: Some("<div>Body five</div>".to_string()),
            ..Default::default()
        };
        let feed = ScriptedFeed::new().with_detail(bare);
        let progress = FetchProgress::new(1);

        let batch = DetailFetcher::new(2)
            .fetch_all(&feed, vec![stub(5)], &progress, now())
            .await;

        let record = &batch.records[0];
        assert_eq!(record.title, "List title 5");
        assert_eq!(record.body, "Body five");
        assert_eq!(
            record.published_at,
            Utc.with_ymd_and_hms(2025, 11, 28, 1, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let mut feed = ScriptedFeed::new().with_detail_delay(Duration::from_millis(5));
        for id in 0..12 {
            feed = feed.with_detail(detail_item(id, "t", "<p>b</p>", "2025-11-28T03:00:00Z"));
        }
        let stubs: Vec<_> = (0..12).map(stub).collect();
        let progress = FetchProgress::new(stubs.len());

        let batch = DetailFetcher::new(3)
            .fetch_all(&feed, stubs, &progress, now())
            .await;

        assert_eq!(batch.records.len(), 12);
        let peak = feed.max_in_flight.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in flight {peak}");
        assert!(peak >= 2, "requests never overlapped");
    }

    #[tokio::test]
    async fn test_progress_observable_while_running() {
        let mut feed = ScriptedFeed::new().with_detail_delay(Duration::from_millis(10));
        for id in 0..6 {
            feed = feed.with_detail(detail_item(id, "t", "<p>b</p>", "2025-11-28T03:00:00Z"));
        }
        let stubs: Vec<_> = (0..6).map(stub).collect();
        let progress = FetchProgress::new(stubs.len());
        let fetcher = DetailFetcher::new(2);

        let observer = async {
            let mut seen = Vec::new();
            while progress.completed() < progress.total() {
                seen.push(progress.completed());
                tokio::time::sleep(Duration::from_millis(3)).await;
            }
            seen
        };
        let (batch, seen) = tokio::join!(fetcher.fetch_all(&feed, stubs, &progress, now()), observer);

        assert_eq!(batch.records.len(), 6);
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert!(seen.iter().any(|&c| c < 6), "observer never saw a partial count");
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let feed = ScriptedFeed::new();
        let progress = FetchProgress::new(0);
        let batch = DetailFetcher::default()
            .fetch_all(&feed, Vec::new(), &progress, now())
            .await;
        assert_eq!(batch.requested, 0);
        assert!(batch.records.is_empty());
    }
}
