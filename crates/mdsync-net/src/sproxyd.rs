//! HTTP client for the blob store (sproxyd).

use reqwest::{Client, StatusCode};
use tracing::{debug, info};
use url::Url;

use crate::bucketd::{parse_endpoint, status_error};
use crate::error::NetError;
use crate::http::HttpConfig;
use crate::retry::RetryPolicy;
use crate::traits::{BlobStatus, BlobStore};

/// Configuration key holding the ring driver settings in `/.conf`.
const RING_DRIVER: &str = "ring_driver:0";

/// Blob-store client probing blob existence under a ring alias.
#[derive(Debug, Clone)]
pub struct SproxydClient {
    http: Client,
    base: Url,
    alias: String,
    retry: RetryPolicy,
}

impl SproxydClient {
    /// Connect to `host:port` and discover the ring alias from `/.conf`,
    /// with the default timeouts.
    pub async fn connect(endpoint: &str, retry: RetryPolicy) -> Result<Self, NetError> {
        Self::connect_with(endpoint, retry, &HttpConfig::default()).await
    }

    /// Same as [`connect`](Self::connect) with explicit connection settings.
    pub async fn connect_with(
        endpoint: &str,
        retry: RetryPolicy,
        http: &HttpConfig,
    ) -> Result<Self, NetError> {
        let base = parse_endpoint(endpoint)?;
        let http = http.build_client()?;
        let conf_url = &base.join(".conf")?;
        let client = &http;
        let alias = retry
            .run("sproxyd conf", move || async move {
                let resp = client.get(conf_url.clone()).send().await?;
                if resp.status() != StatusCode::OK {
                    return Err(status_error("GET", conf_url, resp).await);
                }
                let body = resp.text().await?;
                parse_alias(conf_url, &body)
            })
            .await?;
        info!(%base, alias, "sproxyd alias discovered");
        Ok(Self {
            http,
            base,
            alias,
            retry,
        })
    }

    /// Build a client with a known alias, skipping discovery.
    #[cfg(test)]
    pub fn with_alias(endpoint: &str, alias: &str, retry: RetryPolicy) -> Result<Self, NetError> {
        Ok(Self {
            http: HttpConfig::default().build_client()?,
            base: parse_endpoint(endpoint)?,
            alias: alias.to_string(),
            retry,
        })
    }

    /// The ring alias blob keys are resolved under.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    fn blob_url(&self, blob_key: &str) -> Result<Url, NetError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| NetError::InvalidEndpoint(self.base.to_string()))?
            .pop_if_empty()
            .extend([self.alias.as_str(), blob_key]);
        Ok(url)
    }
}

#[async_trait::async_trait]
impl BlobStore for SproxydClient {
    async fn probe(&self, blob_key: &str) -> Result<BlobStatus, NetError> {
        let url = &self.blob_url(blob_key)?;
        let status = self
            .retry
            .run("sproxyd probe", move || async move {
                let resp = self.http.head(url.clone()).send().await?;
                match resp.status() {
                    StatusCode::OK => Ok(BlobStatus::Present),
                    StatusCode::NOT_FOUND => Ok(BlobStatus::Missing),
                    _ => Err(status_error("HEAD", url, resp).await),
                }
            })
            .await?;
        debug!(blob_key, ?status, "probed blob");
        Ok(status)
    }
}

fn parse_alias(url: &Url, body: &str) -> Result<String, NetError> {
    let invalid = |reason: String| NetError::InvalidResponse {
        url: url.to_string(),
        reason,
    };
    let conf: serde_json::Value = serde_json::from_str(body).map_err(|e| invalid(e.to_string()))?;
    conf.get(RING_DRIVER)
        .and_then(|driver| driver.get("alias"))
        .and_then(|alias| alias.as_str())
        .map(str::to_string)
        .ok_or_else(|| invalid(format!("missing {RING_DRIVER}.alias")))
}
