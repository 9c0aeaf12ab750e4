//! Follower metadata database wrapping Fjall.
//!
//! [`FollowerDb`] exposes the local, ordered side of a follower/leader
//! comparison: a single `metadata` keyspace mapping `bucket/objectKey` to the
//! raw JSON metadata, scanned in key order by [`FollowerDb::scan`].

mod error;
mod store;

pub use error::DbError;
pub use store::{FollowerDb, SYSTEM_DATABASES, is_system_database};
