//! Streaming merge-diff engine for mdsync.
//!
//! This crate provides:
//!
//! - [`MergeState`] — the buffering state machine cutting the ordered local
//!   input into per-bucket [`PendingChunk`]s, each paired with the leader
//!   [`RangeQuery`] that covers it.
//! - [`ChunkMerge`] — the two-pointer comparison of one chunk against the
//!   leader's items for its range, bounded by the buffer size on both sides.
//! - [`RangeListing`] — the paginator over a leader range.
//! - [`DiffEngine`] — the async driver reading a [`LocalSource`] and sending
//!   [`DiffEntry`](mdsync_types::DiffEntry) records to a bounded channel.
//! - [`DigestIndex`] — optional index of key ranges already known identical.

pub mod digest;
pub mod engine;
pub mod error;
pub mod listing;
pub mod merge;
pub mod source;

pub use digest::DigestIndex;
pub use engine::{
    DEFAULT_MAX_BUFFER_SIZE, DiffConfig, DiffEngine, DiffProgress, DiffProgressSnapshot,
};
pub use error::DiffError;
pub use listing::RangeListing;
pub use merge::{ChunkMerge, MergeState, PendingChunk, RangeQuery, merge_sorted};
pub use source::{LocalSource, spawn_db_reader};
