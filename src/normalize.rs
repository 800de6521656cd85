//! Conversion of raw feed items into [`NormalizedRecord`]s.
//!
//! Feeds disagree about where an item keeps its text: detail payloads carry
//! HTML in `content`, flash items nest a headline and text under `data`, list
//! items only have an `introduction`. Instead of probing fields ad hoc, each
//! output field has an ordered list of [`Field`] rules and the first non-empty
//! match wins.
//!
//! Body cleanup runs in a fixed order:
//! 1. drop `<script>` / `<style>` blocks
//! 2. replace every remaining tag with a newline so words never run together
//! 3. decode entities
//! 4. collapse runs of blank lines
//! 5. delete boilerplate phrases (plain substring match, so a phrase embedded
//!    in a longer word is removed as well)
//! 6. trim

use crate::error::ParseError;
use crate::models::{NormalizedRecord, RawItem};
use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use scraper::Html;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use tracing::debug;

static SCRIPT_STYLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<script\b.*?</script\s*>|<style\b.*?</style\s*>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());
static BLANK_LINES_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n(?:[ \t\r]*\n)+").unwrap());

/// Disclaimers, sponsorship notes and share-widget labels that leak into bodies.
pub const NOISE_PHRASES: &[&str] = &[
    "免责声明",
    "市场有风险",
    "仅供参考",
    "广告",
    "赞助",
    "未经授权",
    "版权所有",
    "For reference only",
    "Not investment advice",
    "Share this article",
    "Copy link",
    "Twitter",
    "Facebook",
    "分享",
    "复制链接",
];

static NOISE_RE: Lazy<Regex> = Lazy::new(|| {
    let alternation = NOISE_PHRASES
        .iter()
        .map(|p| regex::escape(p))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!("(?i){alternation}")).unwrap()
});

/// A place in a [`RawItem`] that may hold a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    PayloadTitle,
    ContentText,
    ContentHtml,
    Content,
    /// Flash items: nested headline and text joined by a newline.
    PayloadHeadlineAndText,
    Introduction,
    PublishTime,
    Time,
    DatePublished,
}

impl Field {
    fn extract<'a>(self, item: &'a RawItem) -> Option<Cow<'a, str>> {
        let payload = item.data.as_ref();
        let value: Option<Cow<'a, str>> = match self {
            Field::Title => item.title.as_deref().map(Cow::Borrowed),
            Field::PayloadTitle => payload.and_then(|p| p.title.as_deref()).map(Cow::Borrowed),
            Field::ContentText => item.content_text.as_deref().map(Cow::Borrowed),
            Field::ContentHtml => item.content_html.as_deref().map(Cow::Borrowed),
            Field::Content => item.content.as_deref().map(Cow::Borrowed),
            Field::PayloadHeadlineAndText => payload.map(|p| {
                let joined = [p.title.as_deref(), p.content.as_deref()]
                    .into_iter()
                    .flatten()
                    .filter(|s| !s.trim().is_empty())
                    .collect::<Vec<_>>()
                    .join("\n");
                Cow::Owned(joined)
            }),
            Field::Introduction => item.introduction.as_deref().map(Cow::Borrowed),
            Field::PublishTime => item.publish_time.as_deref().map(Cow::Borrowed),
            Field::Time => item.time.as_deref().map(Cow::Borrowed),
            Field::DatePublished => item.date_published.as_deref().map(Cow::Borrowed),
        };
        value.filter(|v| !v.trim().is_empty())
    }
}

pub const TITLE_RULES: &[Field] = &[Field::Title, Field::PayloadTitle];
pub const BODY_RULES: &[Field] = &[
    Field::ContentText,
    Field::ContentHtml,
    Field::Content,
    Field::PayloadHeadlineAndText,
    Field::Introduction,
    Field::Title,
];
pub const TIMESTAMP_RULES: &[Field] = &[Field::PublishTime, Field::Time, Field::DatePublished];

/// Evaluate `rules` in order and return the first non-empty value.
pub fn first_match<'a>(rules: &[Field], item: &'a RawItem) -> Option<Cow<'a, str>> {
    rules.iter().find_map(|rule| rule.extract(item))
}

/// Convert a raw item into its canonical form.
///
/// Never fails: an unusable timestamp is replaced by `ingested_at`.
pub fn normalize(item: &RawItem, ingested_at: DateTime<Utc>) -> NormalizedRecord {
    let title = first_match(TITLE_RULES, item)
        .map(|t| t.trim().to_string())
        .unwrap_or_default();
    let body = first_match(BODY_RULES, item)
        .map(|b| clean_text(&b))
        .unwrap_or_default();
    let published_at = publish_time(item).unwrap_or_else(|e| {
        debug!(id = ?item.id, error = %e, "Falling back to ingestion time");
        ingested_at
    });
    let content_hash = content_hash(&body);

    NormalizedRecord {
        id: item.id.clone(),
        title,
        body,
        published_at,
        content_hash,
    }
}

/// Publish time of an item according to [`TIMESTAMP_RULES`].
pub fn publish_time(item: &RawItem) -> Result<DateTime<Utc>, ParseError> {
    match first_match(TIMESTAMP_RULES, item) {
        Some(raw) => parse_timestamp(&raw),
        None => Err(ParseError::MissingTimestamp),
    }
}

/// Parse the ISO-8601 shapes the feeds emit, plus Unix epoch values.
///
/// Offset-less timestamps are taken as UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, ParseError> {
    let s = raw.trim();
    if s.is_empty() {
        return Err(ParseError::MissingTimestamp);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    if s.bytes().all(|b| b.is_ascii_digit()) {
        return parse_epoch(s);
    }
    let naive = s.strip_suffix('Z').unwrap_or(s);
    const FORMATS: &[&str] = &[
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];
    FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ParseError::Timestamp(s.to_string()))
}

/// Unix time in seconds, or in milliseconds when it has 13 or more digits.
fn parse_epoch(s: &str) -> Result<DateTime<Utc>, ParseError> {
    let value: i64 = s.parse().map_err(|_| ParseError::Timestamp(s.to_string()))?;
    let parsed = if s.len() >= 13 {
        DateTime::from_timestamp_millis(value)
    } else {
        DateTime::from_timestamp(value, 0)
    };
    parsed.ok_or_else(|| ParseError::Timestamp(s.to_string()))
}

/// Turn an HTML or plain-text body into clean plain text.
pub fn clean_text(input: &str) -> String {
    let text = SCRIPT_STYLE_RE.replace_all(input, "");
    let text = TAG_RE.replace_all(&text, "\n");
    let text = unescape_entities(&text);
    let text = BLANK_LINES_RE.replace_all(&text, "\n");
    let text = NOISE_RE.replace_all(&text, "");
    // Deleting a phrase can leave an empty line behind.
    let text = BLANK_LINES_RE.replace_all(&text, "\n");
    text.trim().to_string()
}

/// Decode character references with the HTML parser.
///
/// Tags are already gone at this point; a stray `<` is escaped first so the
/// parser treats everything as text.
fn unescape_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }
    let escaped = text.replace('<', "&lt;");
    let fragment = Html::parse_fragment(&escaped);
    fragment.root_element().text().collect()
}

/// Collapse every whitespace run to one space and trim.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Hex SHA-256 of the whitespace-collapsed text.
pub fn content_hash(text: &str) -> String {
    let digest = Sha256::digest(collapse_whitespace(text).as_bytes());
    hex::encode(digest)
}
