//! Error taxonomy for the ingestion pipeline.
//!
//! Each stage owns one error type so callers can decide how to recover:
//!
//! | Error | Raised by | Recovery |
//! |-------|-----------|----------|
//! | [`FetchError`] | feed transport | skip the page or item |
//! | [`ParseError`] | timestamp parsing | fall back to ingestion time |
//! | [`StallError`] | pagination chainer | abandon that chain only |
//! | [`AnalysisError`] | summarizer | fall back to the plain corpus rendering |
//! | [`SinkError`] | document sink | log and finish the run |
//! | [`ConfigError`] | config file loading | fatal at startup |

use thiserror::Error;

/// A transport, HTTP or payload failure from the feed.
///
/// Carries no retry logic of its own; the pagination chainer decides whether
/// to try again.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid feed url {url}: {source}")]
    Url {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },
    #[error("malformed payload from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

/// A field that could not be interpreted.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unrecognised timestamp {0:?}")]
    Timestamp(String),
    #[error("missing timestamp")]
    MissingTimestamp,
}

/// The chain kept receiving pages without its continuation token moving.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("pagination stalled at {token} after {pages} pages ({stalled_pages} without progress)")]
pub struct StallError {
    pub token: String,
    pub pages: usize,
    pub stalled_pages: usize,
}

/// The summarizer collaborator could not produce a report.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("summarizer request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("summarizer returned HTTP {0}")]
    Status(u16),
    #[error("summarizer returned an empty report")]
    Empty,
}

/// The document sink could not persist a report.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output directory {path} is not writable: {source}")]
    NotWritable {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// The configuration file could not be loaded.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Yaml {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}
