//! Service traits consumed by the diff engine and the repair orchestrator.

use mdsync_types::Item;

use crate::error::NetError;

/// Outcome of a blob existence probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobStatus {
    /// The blob exists.
    Present,
    /// The blob store reported the key as not found.
    Missing,
}

/// The leader's metadata API.
///
/// Implementations are expected to retry transient failures themselves;
/// an error returned from here is final for the call.
#[async_trait::async_trait]
pub trait MetadataService: Send + Sync {
    /// Current metadata of `bucket/key`, `None` if the key does not exist.
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<String>, NetError>;

    /// Overwrite the metadata of `bucket/key` with a raw JSON value.
    async fn put_object(&self, bucket: &str, key: &str, value: &str) -> Result<(), NetError>;

    /// List up to `max_keys` items of a bucket in key order, with object keys
    /// strictly after `gt` and at most `lte`.
    ///
    /// Returned items carry full `bucket/objectKey` keys.
    async fn list_range(
        &self,
        bucket: &str,
        gt: Option<&str>,
        lte: Option<&str>,
        max_keys: usize,
    ) -> Result<Vec<Item>, NetError>;
}

/// The data store backing object content.
#[async_trait::async_trait]
pub trait BlobStore: Send + Sync {
    /// Check whether a blob exists.
    async fn probe(&self, blob_key: &str) -> Result<BlobStatus, NetError>;
}
