//! HTTP implementation of [`FeedSource`] on top of `reqwest`.

use super::FeedSource;
use crate::config::{FeedEndpoints, PipelineConfig};
use crate::error::FetchError;
use crate::models::{Category, Envelope, ItemId, RawItem};
use reqwest::{Client, ClientBuilder};
use reqwest::header::{ACCEPT, HeaderMap, HeaderValue, USER_AGENT};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument, warn};
use url::Url;

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120 Safari/537.36";

fn client_builder(timeout: Duration) -> ClientBuilder {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
    headers.insert(
        ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    Client::builder().default_headers(headers).timeout(timeout)
}

/// Decode page items one at a time.
///
/// An item that still does not fit [`RawItem`] is logged and skipped. A
/// non-empty page where no item fits is reported as malformed.
fn decode_items(url: &str, values: Vec<Value>) -> Result<Vec<RawItem>, FetchError> {
    let total = values.len();
    let items: Vec<RawItem> = values
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(url, index, error = %e, "Skipping malformed feed item");
                None
            }
        })
        .collect();

    if total > 0 && items.is_empty() {
        return Err(FetchError::Malformed {
            url: url.to_string(),
            reason: format!("none of the {total} items could be decoded"),
        });
    }
    Ok(items)
}

/// JSON feed client with a per-request timeout.
#[derive(Debug, Clone)]
pub struct HttpFeedClient {
    client: Client,
    base: Url,
    endpoints: FeedEndpoints,
}

impl HttpFeedClient {
    /// Build a client for the feed at `base_url`.
    ///
    /// # Arguments
    ///
    /// * `base_url` - Root of the news API; a trailing slash is added if missing
    /// * `endpoints` - Endpoint paths relative to `base_url`
    /// * `timeout` - Per-request timeout
    pub fn new(
        base_url: &str,
        endpoints: FeedEndpoints,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        Self::with_builder(base_url, endpoints, client_builder(timeout))
    }

    fn with_builder(
        base_url: &str,
        endpoints: FeedEndpoints,
        builder: ClientBuilder,
    ) -> Result<Self, FetchError> {
        // Url::join drops the last segment unless the base ends with a slash.
        let normalized = if base_url.ends_with('/') {
            base_url.to_string()
        } else {
            format!("{base_url}/")
        };
        let base = Url::parse(&normalized).map_err(|source| FetchError::Url {
            url: base_url.to_string(),
            source,
        })?;

        let client = builder.build().map_err(|source| FetchError::Transport {
            url: base.to_string(),
            source,
        })?;

        Ok(Self {
            client,
            base,
            endpoints,
        })
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, FetchError> {
        Self::new(
            &config.base_url,
            config.endpoints.clone(),
            config.request_timeout(),
        )
    }

    fn endpoint_url(&self, path: &str, query: &[(&str, String)]) -> Result<Url, FetchError> {
        let mut url = self.base.join(path).map_err(|source| FetchError::Url {
            url: format!("{}{}", self.base, path),
            source,
        })?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (key, value) in query {
                pairs.append_pair(key, value);
            }
        }
        Ok(url)
    }

    /// GET `path` and decode the `data` member of the response envelope.
    #[instrument(level = "debug", skip(self, query))]
    async fn get_data<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>, FetchError> {
        let url = self.endpoint_url(path, query)?;
        let url_str = url.to_string();

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url_str.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url_str, status = status.as_u16(), "Feed returned error status");
            return Err(FetchError::Status {
                url: url_str,
                status: status.as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|source| FetchError::Transport {
                url: url_str.clone(),
                source,
            })?;
        let envelope: Envelope<T> =
            serde_json::from_slice(&bytes).map_err(|e| FetchError::Malformed {
                url: url_str.clone(),
                reason: e.to_string(),
            })?;
        debug!(url = %url_str, bytes = bytes.len(), "Fetched feed payload");
        Ok(envelope.data)
    }
}

impl HttpFeedClient {
    /// GET a page of items, decoding each item separately.
    async fn get_items(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<RawItem>, FetchError> {
        let values: Vec<Value> = self.get_data(path, query).await?.unwrap_or_default();
        decode_items(path, values)
    }
}

impl FeedSource for HttpFeedClient {
    async fn fetch_list(
        &self,
        offset: i64,
        category: Option<&ItemId>,
    ) -> Result<Vec<RawItem>, FetchError> {
        let mut query = vec![("offset", offset.to_string())];
        if let Some(id) = category {
            query.push(("category_id", id.0.clone()));
        }
        self.get_items(&self.endpoints.list, &query).await
    }

    async fn fetch_detail(&self, id: &ItemId) -> Result<RawItem, FetchError> {
        let query = [("id", id.0.clone())];
        self.get_data(&self.endpoints.detail, &query)
            .await?
            .ok_or_else(|| FetchError::Malformed {
                url: format!("{}{}?id={}", self.base, self.endpoints.detail, id),
                reason: "detail payload has no data".to_string(),
            })
    }

    async fn fetch_flash(
        &self,
        limit: u32,
        last_id: Option<&ItemId>,
    ) -> Result<Vec<RawItem>, FetchError> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(id) = last_id {
            query.push(("last_id", id.0.clone()));
        }
        self.get_items(&self.endpoints.flash, &query).await
    }

    async fn fetch_categories(&self) -> Result<Vec<Category>, FetchError> {
        Ok(self
            .get_data(&self.endpoints.categories, &[])
            .await?
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answer exactly one request on a local port with a canned response.
    async fn serve_once(status_line: &'static str, body: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let response = format!(
                "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            let _ = socket.shutdown().await;
        });
        format!("http://{addr}/api")
    }

    /// Client for a local server; system proxies must not intercept it.
    fn local_client(base: &str) -> HttpFeedClient {
        let builder = client_builder(Duration::from_secs(5)).no_proxy();
        HttpFeedClient::with_builder(base, FeedEndpoints::default(), builder).unwrap()
    }

    #[tokio::test]
    async fn test_error_status_is_reported() {
        let base = serve_once("503 Service Unavailable", "{}").await;
        let err = local_client(&base).fetch_list(0, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { status: 503, .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_invalid_json_is_malformed() {
        let base = serve_once("200 OK", "{\"data\": [").await;
        let err = local_client(&base).fetch_flash(50, None).await.unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_detail_without_data_is_malformed() {
        let base = serve_once("200 OK", "{\"data\": null}").await;
        let err = local_client(&base)
            .fetch_detail(&ItemId("9".to_string()))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_list_without_data_is_empty_page() {
        let base = serve_once("200 OK", "{\"data\": null}").await;
        let items = local_client(&base).fetch_list(40, None).await.unwrap();
        assert!(items.is_empty());
    }

    #[tokio::test]
    async fn test_bad_item_does_not_reject_the_page() {
        let base = serve_once(
            "200 OK",
            r#"{"data": [
                {"id": 1, "offset": 10, "publish_time": "2025-11-28T06:29:54Z"},
                {"id": [2], "offset": 20},
                {"id": 3, "offset": 30, "publish_time": 1764311394}
            ]}"#,
        )
        .await;

        let items = local_client(&base).fetch_list(0, None).await.unwrap();

        let ids: Vec<_> = items.iter().map(|i| i.id.clone().unwrap().0).collect();
        assert_eq!(ids, vec!["1", "3"]);
        assert_eq!(items[1].publish_time.as_deref(), Some("1764311394"));
        assert_eq!(items[1].offset, Some(30));
    }

    #[test]
    fn test_page_of_only_bad_items_is_malformed() {
        let values = vec![serde_json::json!({"id": {"nested": 1}}), serde_json::json!("text")];
        let err = decode_items("news", values).unwrap_err();
        assert!(matches!(err, FetchError::Malformed { .. }));
        assert!(decode_items("news", Vec::new()).unwrap().is_empty());
    }

    fn client(base: &str) -> HttpFeedClient {
        HttpFeedClient::new(base, FeedEndpoints::default(), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_endpoint_url_keeps_base_path() {
        let c = client("https://feed.test/api");
        let url = c
            .endpoint_url("news", &[("offset", "40".to_string())])
            .unwrap();
        assert_eq!(url.as_str(), "https://feed.test/api/news?offset=40");
    }

    #[test]
    fn test_endpoint_url_encodes_query() {
        let c = client("https://feed.test/api/");
        let url = c
            .endpoint_url("flash", &[("limit", "50".to_string()), ("last_id", "a b".to_string())])
            .unwrap();
        assert_eq!(url.as_str(), "https://feed.test/api/flash?limit=50&last_id=a+b");
    }

    #[test]
    fn test_endpoint_url_without_query() {
        let c = client("https://feed.test/api/");
        let url = c.endpoint_url("category", &[]).unwrap();
        assert_eq!(url.as_str(), "https://feed.test/api/category");
    }

    #[test]
    fn test_invalid_base_url() {
        let err = HttpFeedClient::new("not a url", FeedEndpoints::default(), Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, FetchError::Url { .. }));
    }
}
