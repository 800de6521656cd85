//! Data models for feed payloads and the records derived from them.
//!
//! - [`RawItem`]: one item exactly as a feed page returned it
//! - [`ItemStub`]: the reference to an item whose detail still has to be fetched
//! - [`NormalizedRecord`]: canonical text, timestamp and digest of an item
//! - [`Category`]: an entry of the feed's category catalogue
//!
//! Feed payloads are loosely typed (ids and offsets arrive as numbers or
//! strings, most fields are optional), so deserialization is lenient and the
//! normalizer decides which field wins.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Identifier of a feed item. Numeric ids are kept in their decimal form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ItemId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(i64),
            Float(f64),
            Text(String),
        }
        Ok(match Repr::deserialize(deserializer)? {
            Repr::Number(n) => ItemId(n.to_string()),
            Repr::Float(f) if f.fract() == 0.0 => ItemId((f as i64).to_string()),
            Repr::Float(f) => ItemId(f.to_string()),
            Repr::Text(s) => ItemId(s),
        })
    }
}

/// Accept integers, numeric strings, or null.
fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Repr {
        Number(i64),
        Float(f64),
        Text(String),
    }
    Ok(match Option::<Repr>::deserialize(deserializer)? {
        Some(Repr::Number(n)) => Some(n),
        Some(Repr::Float(f)) => Some(f as i64),
        Some(Repr::Text(s)) => s.trim().parse().ok(),
        None => None,
    })
}

/// Accept strings, numbers and booleans as text; anything else is absent.
///
/// Epoch timestamps arrive as integers on some endpoints.
fn lenient_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    })
}

/// The `{data: ...}` wrapper every feed endpoint responds with.
#[derive(Debug, Deserialize)]
pub struct Envelope<T> {
    pub data: Option<T>,
}

/// One item of a list, detail or flash payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawItem {
    #[serde(default)]
    pub id: Option<ItemId>,
    /// Continuation offset reported by the list feed for this item.
    #[serde(default, deserialize_with = "lenient_i64")]
    pub offset: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub introduction: Option<String>,
    /// HTML body of a detail payload.
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content_html: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub publish_time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub date_published: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub important: Option<i64>,
    /// Nested payload: headline and text for flash items, source info for list items.
    #[serde(default)]
    pub data: Option<ItemPayload>,
}

impl RawItem {
    /// Flash items carry an `important` flag; anything below 1 is routine.
    pub fn is_important(&self) -> bool {
        self.important.unwrap_or(0) >= 1
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemPayload {
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: Option<String>,
}

/// An entry of the category catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Category {
    pub id: ItemId,
    pub name: String,
}

/// A list entry whose full body must be fetched separately.
///
/// The title and publish time act as fallbacks when the detail payload
/// leaves them out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStub {
    pub id: ItemId,
    pub title: Option<String>,
    pub publish_time: Option<String>,
}

impl ItemStub {
    /// Build a stub from a list item. Items without an id cannot be detailed.
    pub fn from_raw(item: &RawItem) -> Option<Self> {
        Some(Self {
            id: item.id.clone()?,
            title: item.title.clone(),
            publish_time: item.publish_time.clone(),
        })
    }
}

/// Canonical form of a feed item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NormalizedRecord {
    pub id: Option<ItemId>,
    pub title: String,
    /// Plain text with markup and boilerplate removed.
    pub body: String,
    pub published_at: DateTime<Utc>,
    /// Hex SHA-256 of the whitespace-collapsed body.
    pub content_hash: String,
}

/// Which feed family a report was built from; passed to the summarizer as a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportKind {
    Flash,
    Categorized,
}

impl ReportKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ReportKind::Flash => "flash",
            ReportKind::Categorized => "categorized",
        }
    }

    pub fn title_prefix(&self) -> &'static str {
        match self {
            ReportKind::Flash => "Flash Analysis",
            ReportKind::Categorized => "Market Analysis",
        }
    }
}
