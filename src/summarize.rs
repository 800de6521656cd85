//! Report production: summarizer client with exponential backoff retry.
//!
//! - [`Summarizer`]: turns a rendered corpus into report text
//! - [`HttpSummarizer`]: posts `{"kind", "content"}` to a service and reads `{"text"}`
//! - [`RetrySummarizer`]: decorator adding backoff retries to any [`Summarizer`]
//!
//! [`produce_report`] never fails: when no summarizer is configured, or it
//! fails, or it answers with blank text, the report degrades to the plain
//! corpus rendering.
//!
//! # Retry Strategy
//!
//! - 5 retry attempts by default
//! - Exponential backoff starting at 1 second, capped at 30 seconds
//! - Random jitter added to every delay

use crate::corpus::Corpus;
use crate::error::AnalysisError;
use crate::models::ReportKind;
use crate::utils::{backoff_delay, display_date, truncate_for_log};
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

pub const DEFAULT_RETRIES: usize = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);
const MAX_DELAY: Duration = Duration::from_secs(30);

pub trait Summarizer {
    /// Summarize a rendered corpus of the given kind.
    async fn summarize(&self, text: &str, kind: ReportKind) -> Result<String, AnalysisError>;
}

/// Adds exponential backoff retries to a [`Summarizer`].
///
/// ```text
/// delay = min(base_delay * 2^(attempt-1), max_delay) + jitter
/// ```
pub struct RetrySummarizer<T> {
    /// The summarizer being wrapped.
    inner: T,
    /// Attempts after the first one before giving up.
    max_retries: usize,
    /// Delay before the first retry; doubles with each attempt.
    base_delay: Duration,
    /// Cap on the delay between attempts.
    max_delay: Duration,
}

impl<T> RetrySummarizer<T>
where
    T: Summarizer,
{
    /// Wrap `inner` with retry logic.
    ///
    /// # Arguments
    ///
    /// * `inner` - The summarizer to wrap
    /// * `max_retries` - Maximum number of retry attempts (5 recommended)
    /// * `base_delay` - Initial delay between retries (1 second recommended)
    ///
    /// # Example
    ///
    /// ```ignore
    /// let client = HttpSummarizer::new(url, Duration::from_secs(120))?;
    /// let summarizer = RetrySummarizer::new(client, 5, Duration::from_secs(1));
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: MAX_DELAY,
        }
    }
}

impl<T> fmt::Debug for RetrySummarizer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetrySummarizer")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> Summarizer for RetrySummarizer<T>
where
    T: Summarizer + fmt::Debug,
{
    #[instrument(level = "info", skip_all, fields(kind = kind.tag()))]
    async fn summarize(&self, text: &str, kind: ReportKind) -> Result<String, AnalysisError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.summarize(text, kind).await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis(),
                            elapsed_ms_total = total_dt.as_millis(),
                            error = %e,
                            "summarize() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = backoff_delay(attempt, self.base_delay, self.max_delay);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis(),
                        elapsed_ms_total = total_dt.as_millis(),
                        ?delay,
                        error = %e,
                        "summarize() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct SummaryRequest<'a> {
    kind: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    text: String,
}

/// Summarization service reached over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSummarizer {
    client: Client,
    /// Endpoint receiving the `POST`.
    url: String,
}

impl HttpSummarizer {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, AnalysisError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
        })
    }
}

impl Summarizer for HttpSummarizer {
    #[instrument(level = "info", skip_all, fields(url = %self.url, chars = text.len()))]
    async fn summarize(&self, text: &str, kind: ReportKind) -> Result<String, AnalysisError> {
        let t0 = Instant::now();
        let resp = self
            .client
            .post(&self.url)
            .json(&SummaryRequest {
                kind: kind.tag(),
                content: text,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            warn!(
                elapsed_ms = t0.elapsed().as_millis(),
                status = status.as_u16(),
                "Summarizer call failed"
            );
            return Err(AnalysisError::Status(status.as_u16()));
        }

        let body: SummaryResponse = resp.json().await?;
        if body.text.trim().is_empty() {
            return Err(AnalysisError::Empty);
        }
        info!(elapsed_ms = t0.elapsed().as_millis(), "Summarizer call succeeded");
        Ok(body.text)
    }
}

/// A finished report, ready for a document sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub title: String,
    pub body: String,
    /// The body is the plain corpus rendering, not a summary.
    pub degraded: bool,
}

pub fn report_title(kind: ReportKind, now: &DateTime<Utc>) -> String {
    format!("{} - {}", kind.title_prefix(), display_date(now))
}

/// Build the report for `corpus`.
///
/// # Arguments
///
/// * `summarizer` - Service to summarize with; `None` skips straight to the fallback
/// * `corpus` - Deduplicated records, newest first
/// * `kind` - Feed family, used for the summarizer tag and the title
/// * `now` - Run time; its UTC+8 date goes into the title
///
/// # Returns
///
/// A [`Report`] whose `degraded` flag tells whether the body is the plain
/// rendering instead of a summary.
#[instrument(level = "info", skip_all, fields(kind = kind.tag(), records = corpus.len()))]
pub async fn produce_report<S: Summarizer>(
    summarizer: Option<&S>,
    corpus: &Corpus,
    kind: ReportKind,
    now: DateTime<Utc>,
) -> Report {
    let title = report_title(kind, &now);

    let summary = match summarizer {
        Some(summarizer) => match summarizer.summarize(&corpus.render(kind), kind).await {
            Ok(text) if !text.trim().is_empty() => Some(text),
            Ok(_) => {
                warn!(error = %AnalysisError::Empty, "Falling back to plain rendering");
                None
            }
            Err(e) => {
                warn!(error = %e, "Falling back to plain rendering");
                None
            }
        },
        None => {
            info!("No summarizer configured; using plain rendering");
            None
        }
    };

    match summary {
        Some(body) => {
            info!(preview = %truncate_for_log(&body, 200), "Summary produced");
            Report {
                title,
                body,
                degraded: false,
            }
        }
        None => Report {
            title,
            body: corpus.render_plain(),
            degraded: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::corpus::CorpusAssembler;
    use crate::dedup::ContentDedup;
    use crate::models::{ItemId, NormalizedRecord};
    use crate::normalize::content_hash;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails `failures` times, then answers with `text`.
    #[derive(Debug)]
    struct FlakySummarizer {
        failures: usize,
        text: String,
        calls: AtomicUsize,
        seen_kind: std::sync::Mutex<Option<ReportKind>>,
    }

    impl FlakySummarizer {
        fn new(failures: usize, text: &str) -> Self {
            Self {
                failures,
                text: text.to_string(),
                calls: AtomicUsize::new(0),
                seen_kind: std::sync::Mutex::new(None),
            }
        }
    }

    impl Summarizer for FlakySummarizer {
        async fn summarize(&self, _text: &str, kind: ReportKind) -> Result<String, AnalysisError> {
            *self.seen_kind.lock().unwrap() = Some(kind);
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(AnalysisError::Status(503))
            } else {
                Ok(self.text.clone())
            }
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 11, 28, 20, 0, 0).unwrap()
    }

    fn corpus() -> Corpus {
        let mut assembler = CorpusAssembler::new();
        assembler.extend(vec![NormalizedRecord {
            id: Some(ItemId("1".to_string())),
            title: "Fed holds rates".to_string(),
            body: "The Fed held rates steady.".to_string(),
            published_at: now(),
            content_hash: content_hash("The Fed held rates steady."),
        }]);
        assembler.assemble(&mut ContentDedup::default()).0
    }

    #[test]
    fn test_report_titles_use_display_date() {
        // 20:00 UTC is already the next day in UTC+8
        assert_eq!(report_title(ReportKind::Flash, &now()), "Flash Analysis - 2025-11-29");
        assert_eq!(
            report_title(ReportKind::Categorized, &now()),
            "Market Analysis - 2025-11-29"
        );
    }

    #[tokio::test]
    async fn test_retry_recovers_after_failures() {
        let inner = FlakySummarizer::new(2, "summary");
        let retry = RetrySummarizer::new(inner, 5, Duration::ZERO);
        let text = retry.summarize("input", ReportKind::Flash).await.unwrap();
        assert_eq!(text, "summary");
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_retries() {
        let retry = RetrySummarizer::new(FlakySummarizer::new(usize::MAX, ""), 2, Duration::ZERO);
        let result = retry.summarize("input", ReportKind::Flash).await;
        assert!(matches!(result, Err(AnalysisError::Status(503))));
        assert_eq!(retry.inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_report_uses_summary() {
        let summarizer = FlakySummarizer::new(0, "Rates unchanged; markets calm.");
        let report = produce_report(Some(&summarizer), &corpus(), ReportKind::Categorized, now()).await;
        assert!(!report.degraded);
        assert_eq!(report.title, "Market Analysis - 2025-11-29");
        assert_eq!(report.body, "Rates unchanged; markets calm.");
        assert_eq!(*summarizer.seen_kind.lock().unwrap(), Some(ReportKind::Categorized));
    }

    #[tokio::test]
    async fn test_report_degrades_on_failure() {
        let summarizer = FlakySummarizer::new(usize::MAX, "");
        let corpus = corpus();
        let report = produce_report(Some(&summarizer), &corpus, ReportKind::Flash, now()).await;
        assert!(report.degraded);
        assert_eq!(report.body, corpus.render_plain());
    }

    #[tokio::test]
    async fn test_report_degrades_on_blank_summary() {
        let summarizer = FlakySummarizer::new(0, "   \n");
        let report = produce_report(Some(&summarizer), &corpus(), ReportKind::Flash, now()).await;
        assert!(report.degraded);
        assert!(report.body.starts_with("【Fed holds rates】"));
    }

    #[tokio::test]
    async fn test_report_without_summarizer() {
        let report = produce_report(None::<&FlakySummarizer>, &corpus(), ReportKind::Flash, now()).await;
        assert!(report.degraded);
        assert_eq!(report.title, "Flash Analysis - 2025-11-29");
    }

    #[test]
    fn test_summary_request_shape() {
        let json = serde_json::to_value(SummaryRequest {
            kind: ReportKind::Flash.tag(),
            content: "abc",
        })
        .unwrap();
        assert_eq!(json, serde_json::json!({"kind": "flash", "content": "abc"}));
        let resp: SummaryResponse = serde_json::from_str("{}").unwrap();
        assert!(resp.text.is_empty());
    }
}
