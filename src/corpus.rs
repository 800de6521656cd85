//! Corpus assembly and rendering.
//!
//! The assembler gathers records from every path (list + detail, flash),
//! orders them newest first, and runs them through the run's
//! [`Deduplicator`] in that order, so the newest copy of a duplicated story
//! is the one that survives. The sort is stable: records with the same
//! publish time keep their arrival order.

use crate::dedup::Deduplicator;
use crate::models::{NormalizedRecord, ReportKind};
use crate::utils::format_display_time;
use std::fmt::Write;
use tracing::{debug, info, instrument};

/// Upper bound on the summarizer input, in characters.
pub const MAX_CONTEXT_CHARS: usize = 100_000;
const TRUNCATION_MARKER: &str = "\n...(truncated)...";

#[derive(Debug, Default)]
pub struct CorpusAssembler {
    pending: Vec<NormalizedRecord>,
}

impl CorpusAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn extend<I: IntoIterator<Item = NormalizedRecord>>(&mut self, records: I) {
        self.pending.extend(records);
    }

    /// Sort newest first, then keep what the deduplicator accepts.
    ///
    /// Returns the corpus and the number of records rejected as duplicates.
    #[instrument(level = "info", skip_all, fields(pending = self.pending.len()))]
    pub fn assemble(self, dedup: &mut dyn Deduplicator) -> (Corpus, usize) {
        let mut pending = self.pending;
        pending.sort_by(|a, b| b.published_at.cmp(&a.published_at));

        let total = pending.len();
        let records: Vec<NormalizedRecord> = pending
            .into_iter()
            .filter(|record| {
                let accept = dedup.should_accept(record);
                if !accept {
                    debug!(id = ?record.id, title = %record.title, "Rejected duplicate");
                }
                accept
            })
            .collect();
        let rejected = total - records.len();

        info!(accepted = records.len(), rejected, "Assembled corpus");
        (Corpus { records }, rejected)
    }
}

/// Deduplicated records, newest first.
#[derive(Debug, Default, Clone)]
pub struct Corpus {
    records: Vec<NormalizedRecord>,
}

impl Corpus {
    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Summarizer input: a header, then numbered, timestamped entries.
    pub fn render(&self, kind: ReportKind) -> String {
        let mut out = String::new();
        let header = match kind {
            ReportKind::Flash => "[Flash news digest]",
            ReportKind::Categorized => "[Key market news digest]",
        };
        let _ = writeln!(out, "{header}\n");
        for (i, record) in self.records.iter().enumerate() {
            let _ = writeln!(
                out,
                "No.{} [{}] {}\n{}\n{}",
                i + 1,
                format_display_time(&record.published_at),
                record.title,
                record.body,
                "-".repeat(40)
            );
        }
        truncate_chars(out, MAX_CONTEXT_CHARS)
    }

    /// Degraded output used when no summary is available.
    pub fn render_plain(&self) -> String {
        self.records
            .iter()
            .map(|record| format!("【{}】\n{}\n{}", record.title, record.body, "-".repeat(30)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

fn truncate_chars(mut text: String, max_chars: usize) -> String {
    if let Some((cut, _)) = text.char_indices().nth(max_chars) {
        text.truncate(cut);
        text.push_str(TRUNCATION_MARKER);
    }
    text
}
