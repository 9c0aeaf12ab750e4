//! HTTP client for the leader's metadata API (bucketd).

use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tracing::{debug, trace};
use url::Url;

use mdsync_types::Item;

use crate::error::NetError;
use crate::http::HttpConfig;
use crate::retry::RetryPolicy;
use crate::traits::MetadataService;

/// Number of keys requested per listing page.
pub const DEFAULT_LISTING_PAGE_SIZE: usize = 1000;

/// Raw listing entry as returned by a `Basic` listing.
#[derive(Debug, Deserialize)]
struct ListingEntry {
    key: String,
    value: serde_json::Value,
}

impl ListingEntry {
    /// Listing values are normally JSON strings holding the metadata; an
    /// inline object is re-serialized as-is.
    fn into_item(self, bucket: &str) -> Item {
        let value = match self.value {
            serde_json::Value::String(raw) => raw,
            other => other.to_string(),
        };
        Item::new(format!("{bucket}/{}", self.key), value)
    }
}

/// Metadata-service client reusing one keep-alive connection pool.
#[derive(Debug, Clone)]
pub struct BucketdClient {
    http: Client,
    base: Url,
    retry: RetryPolicy,
}

impl BucketdClient {
    /// Create a client for `host:port` (an `http://` URL is accepted too)
    /// with the default timeouts.
    pub fn new(endpoint: &str, retry: RetryPolicy) -> Result<Self, NetError> {
        Self::with_http_config(endpoint, retry, &HttpConfig::default())
    }

    /// Create a client with explicit connection settings.
    pub fn with_http_config(
        endpoint: &str,
        retry: RetryPolicy,
        http: &HttpConfig,
    ) -> Result<Self, NetError> {
        let base = parse_endpoint(endpoint)?;
        let http = http.build_client()?;
        debug!(%base, "bucketd client ready");
        Ok(Self { http, base, retry })
    }

    fn bucket_url(&self, bucket: &str) -> Result<Url, NetError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| NetError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend(["default", "bucket", bucket]);
        Ok(url)
    }

    fn object_url(&self, bucket: &str, key: &str) -> Result<Url, NetError> {
        let mut url = self.bucket_url(bucket)?;
        url.path_segments_mut()
            .map_err(|_| NetError::InvalidEndpoint(self.base.to_string()))?
            .push(key);
        Ok(url)
    }

    fn listing_url(
        &self,
        bucket: &str,
        gt: Option<&str>,
        lte: Option<&str>,
        max_keys: usize,
    ) -> Result<Url, NetError> {
        let mut url = self.bucket_url(bucket)?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("listingType", "Basic")
                .append_pair("maxKeys", &max_keys.to_string());
            if let Some(gt) = gt {
                query.append_pair("gt", gt);
            }
            if let Some(lte) = lte {
                query.append_pair("lte", lte);
            }
        }
        Ok(url)
    }
}

#[async_trait::async_trait]
impl MetadataService for BucketdClient {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<String>, NetError> {
        let url = &self.object_url(bucket, key)?;
        self.retry
            .run("bucketd get object", move || async move {
                let resp = self.http.get(url.clone()).send().await?;
                match resp.status() {
                    StatusCode::OK => Ok(Some(resp.text().await?)),
                    StatusCode::NOT_FOUND => Ok(None),
                    _ => Err(status_error("GET", url, resp).await),
                }
            })
            .await
    }

    async fn put_object(&self, bucket: &str, key: &str, value: &str) -> Result<(), NetError> {
        let url = &self.object_url(bucket, key)?;
        self.retry
            .run("bucketd put object", move || async move {
                let resp = self
                    .http
                    .post(url.clone())
                    .body(value.to_string())
                    .send()
                    .await?;
                if resp.status() != StatusCode::OK {
                    return Err(status_error("POST", url, resp).await);
                }
                Ok(())
            })
            .await?;
        debug!(bucket, key = %key.escape_default(), "wrote object metadata");
        Ok(())
    }

    async fn list_range(
        &self,
        bucket: &str,
        gt: Option<&str>,
        lte: Option<&str>,
        max_keys: usize,
    ) -> Result<Vec<Item>, NetError> {
        let url = &self.listing_url(bucket, gt, lte, max_keys)?;
        let items = self
            .retry
            .run("bucketd listing", move || async move {
                let resp = self.http.get(url.clone()).send().await?;
                match resp.status() {
                    StatusCode::OK => {
                        let body = resp.text().await?;
                        let entries: Vec<ListingEntry> =
                            serde_json::from_str(&body).map_err(|e| {
                                NetError::InvalidResponse {
                                    url: url.to_string(),
                                    reason: e.to_string(),
                                }
                            })?;
                        Ok(entries
                            .into_iter()
                            .map(|entry| entry.into_item(bucket))
                            .collect::<Vec<_>>())
                    }
                    StatusCode::NOT_FOUND => Ok(Vec::new()),
                    _ => Err(status_error("GET", url, resp).await),
                }
            })
            .await?;
        trace!(bucket, count = items.len(), "listed range");
        Ok(items)
    }
}

/// Accept either a bare `host:port` or a full URL.
pub(crate) fn parse_endpoint(endpoint: &str) -> Result<Url, NetError> {
    let url = if endpoint.contains("://") {
        Url::parse(endpoint)?
    } else {
        Url::parse(&format!("http://{endpoint}"))?
    };
    if url.cannot_be_a_base() {
        return Err(NetError::InvalidEndpoint(endpoint.to_string()));
    }
    Ok(url)
}

/// Turn a non-success response into a [`NetError::Status`], keeping the body
/// for diagnostics.
pub(crate) async fn status_error(method: &'static str, url: &Url, resp: Response) -> NetError {
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    NetError::Status {
        method,
        url: url.to_string(),
        status,
        body,
    }
}
