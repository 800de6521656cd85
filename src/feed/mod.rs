//! Feed transport.
//!
//! [`FeedSource`] is the seam between the pipeline and the news API: the
//! pagination chainer and the detail fetcher only ever talk to this trait.
//! [`http::HttpFeedClient`] is the production implementation; tests use the
//! scripted feed in [`stub`].
//!
//! | Call | Endpoint | Response |
//! |------|----------|----------|
//! | [`FeedSource::fetch_list`] | `GET <base>/<list>?offset&category_id` | `{data: [item]}` |
//! | [`FeedSource::fetch_detail`] | `GET <base>/<detail>?id` | `{data: item}` |
//! | [`FeedSource::fetch_flash`] | `GET <base>/<flash>?limit&last_id` | `{data: [item]}` |
//! | [`FeedSource::fetch_categories`] | `GET <base>/<category>` | `{data: [{id, name}]}` |
//!
//! Implementations must not retry; a failure is reported once as a
//! [`FetchError`] and the caller decides what to do.

use crate::error::FetchError;
use crate::models::{Category, ItemId, RawItem};

pub mod http;
#[cfg(test)]
pub mod stub;

pub use http::HttpFeedClient;

pub trait FeedSource {
    /// One page of the categorized list feed starting at `offset`.
    async fn fetch_list(
        &self,
        offset: i64,
        category: Option<&ItemId>,
    ) -> Result<Vec<RawItem>, FetchError>;

    /// Full detail payload of a single item.
    async fn fetch_detail(&self, id: &ItemId) -> Result<RawItem, FetchError>;

    /// One page of the flash feed, continuing after `last_id` when given.
    async fn fetch_flash(
        &self,
        limit: u32,
        last_id: Option<&ItemId>,
    ) -> Result<Vec<RawItem>, FetchError>;

    async fn fetch_categories(&self) -> Result<Vec<Category>, FetchError>;
}
