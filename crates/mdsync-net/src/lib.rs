//! Network clients for mdsync.
//!
//! This crate provides:
//!
//! - [`MetadataService`] — object GET/POST and ranged listing against the
//!   leader's metadata API, implemented over HTTP by [`BucketdClient`].
//! - [`BlobStore`] — existence probes on the data store, implemented over
//!   HTTP by [`SproxydClient`].
//! - [`RetryPolicy`] — the bounded exponential backoff every outbound call
//!   goes through.
//! - [`HttpConfig`] — request and connect timeouts of both clients.

pub mod bucketd;
pub mod error;
pub mod http;
pub mod retry;
pub mod sproxyd;
pub mod traits;

pub use bucketd::{BucketdClient, DEFAULT_LISTING_PAGE_SIZE};
pub use error::NetError;
pub use http::HttpConfig;
pub use retry::RetryPolicy;
pub use sproxyd::SproxydClient;
pub use traits::{BlobStatus, BlobStore, MetadataService};
