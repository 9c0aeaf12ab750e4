//! Chunking of the local input and per-chunk comparison.
//!
//! Both halves are synchronous and side-effect free; [`DiffEngine`] wires
//! them to the local source, the leader listing and the output channel.
//!
//! [`DiffEngine`]: crate::DiffEngine

use std::cmp::Ordering;
use std::sync::Arc;

use mdsync_types::{DiffEntry, Item, TypeError};
use tracing::trace;

use crate::digest::DigestIndex;

/// The leader range covering one chunk of local items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeQuery {
    /// Bucket the range belongs to.
    pub bucket: String,
    /// Exclusive lower bound (object key), `None` for the bucket start.
    pub marker: Option<String>,
    /// Inclusive upper bound (object key), `None` for the bucket end.
    pub last_key: Option<String>,
}

/// A flushed run of local items together with the range to compare it with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChunk {
    /// Leader range covering the items.
    pub query: RangeQuery,
    /// Local items in key order, possibly empty after a digest skip.
    pub items: Vec<Item>,
}

/// Buffering state of the local side.
///
/// Items are buffered per bucket up to `max_buffer_size`. The buffer is
/// flushed when a new item arrives while it is full (the range ends at the
/// last buffered key) or when the new item belongs to another bucket (the
/// range runs to the end of the bucket). Consecutive chunks of one bucket
/// chain their ranges through the marker.
pub struct MergeState {
    max_buffer_size: usize,
    buffer: Vec<Item>,
    current_bucket: Option<String>,
    marker: Option<String>,
    digests: Option<Arc<dyn DigestIndex>>,
    skip_through: Option<String>,
    skipped: u64,
}

impl MergeState {
    /// Create an empty state flushing every `max_buffer_size` items.
    pub fn new(max_buffer_size: usize) -> Self {
        Self {
            max_buffer_size: max_buffer_size.max(1),
            buffer: Vec::new(),
            current_bucket: None,
            marker: None,
            digests: None,
            skip_through: None,
            skipped: 0,
        }
    }

    /// Consult `digests` to skip ranges already known identical.
    pub fn with_digests(mut self, digests: Arc<dyn DigestIndex>) -> Self {
        self.digests = Some(digests);
        self
    }

    /// Feed the next local item, in key order.
    ///
    /// Returns the chunk that must be compared before the item is taken
    /// into account, if any.
    pub fn advance(&mut self, item: Item) -> Result<Option<PendingChunk>, TypeError> {
        let (bucket, object_key) = mdsync_types::split_key(&item.key)
            .ok_or_else(|| TypeError::MissingBucket(item.key.clone()))?;

        let new_bucket = self
            .current_bucket
            .as_deref()
            .is_some_and(|current| current != bucket);

        let chunk = if new_bucket {
            let chunk = self.flush(None);
            self.marker = None;
            self.skip_through = None;
            chunk
        } else if self.buffer.len() >= self.max_buffer_size {
            let last_key = self
                .buffer
                .last()
                .and_then(Item::object_key)
                .map(str::to_string);
            let chunk = self.flush(last_key.clone());
            self.marker = last_key;
            chunk
        } else {
            None
        };

        if self.current_bucket.as_deref() != Some(bucket) {
            self.current_bucket = Some(bucket.to_string());
        }

        if self.buffer.is_empty() && self.skippable(bucket, object_key) {
            trace!(key = %item.key.escape_default(), "skipping key covered by digest");
            self.skipped += 1;
            return Ok(chunk);
        }

        self.buffer.push(item);
        Ok(chunk)
    }

    /// Flush whatever is left at end of input; the range runs to the end of
    /// the bucket.
    pub fn finish(&mut self) -> Option<PendingChunk> {
        let chunk = self.flush(None);
        self.current_bucket = None;
        self.marker = None;
        self.skip_through = None;
        chunk
    }

    /// Number of local items skipped thanks to digests since the last call.
    pub fn take_skipped(&mut self) -> u64 {
        std::mem::take(&mut self.skipped)
    }

    fn flush(&mut self, last_key: Option<String>) -> Option<PendingChunk> {
        // A bucket whose items were all skipped still needs the tail of its
        // range checked, so flushing only depends on having a bucket.
        let bucket = self.current_bucket.clone()?;
        Some(PendingChunk {
            query: RangeQuery {
                bucket,
                marker: self.marker.clone(),
                last_key,
            },
            items: std::mem::take(&mut self.buffer),
        })
    }

    /// Whether `object_key` lies inside a span known identical, starting at
    /// the current marker. Moves the marker past every span consumed.
    fn skippable(&mut self, bucket: &str, object_key: &str) -> bool {
        let Some(index) = self.digests.clone() else {
            return false;
        };
        loop {
            if let Some(end) = self.skip_through.as_deref() {
                if object_key <= end {
                    return true;
                }
                self.skip_through = None;
            }
            let marker = self.marker.as_deref();
            let Some(end) = index
                .identical_through(bucket, marker)
                .filter(|end| marker.is_none_or(|m| end.as_str() > m))
            else {
                return false;
            };
            self.marker = Some(end.clone());
            self.skip_through = Some(end);
        }
    }
}

/// Comparison of one local chunk against the leader's items for its range.
///
/// Leader items are accumulated up to `max_buffer_size`; when that many are
/// held they are compared against the local items up to the largest leader
/// key and both compared prefixes are dropped.
pub struct ChunkMerge {
    local: Vec<Item>,
    remote: Vec<Item>,
    max_buffer_size: usize,
}

impl ChunkMerge {
    /// Start comparing `local`, which must be in key order.
    pub fn new(local: Vec<Item>, max_buffer_size: usize) -> Self {
        Self {
            local,
            remote: Vec::new(),
            max_buffer_size: max_buffer_size.max(1),
        }
    }

    /// Feed the next leader item, in key order. Returns the differences
    /// found if this filled the leader buffer.
    pub fn push_remote(&mut self, item: Item) -> Vec<DiffEntry> {
        self.remote.push(item);
        if self.remote.len() < self.max_buffer_size {
            return Vec::new();
        }
        let remote = std::mem::take(&mut self.remote);
        let split = match remote.last() {
            Some(max) => self.local.partition_point(|item| item.key <= max.key),
            None => 0,
        };
        let local: Vec<Item> = self.local.drain(..split).collect();
        merge_sorted(local, remote)
    }

    /// Compare everything still held once the leader range is exhausted.
    pub fn finish(self) -> Vec<DiffEntry> {
        merge_sorted(self.local, self.remote)
    }
}

/// Two-pointer merge of two key-ordered runs.
///
/// Keys present on one side only yield a one-sided entry, keys present on
/// both with different values yield a two-sided entry, identical pairs
/// yield nothing.
pub fn merge_sorted(local: Vec<Item>, remote: Vec<Item>) -> Vec<DiffEntry> {
    let mut diffs = Vec::new();
    let mut local = local.into_iter().peekable();
    let mut remote = remote.into_iter().peekable();

    loop {
        let order = match (local.peek(), remote.peek()) {
            (Some(l), Some(r)) => l.key.cmp(&r.key),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => break,
        };
        match order {
            Ordering::Less => {
                if let Some(item) = local.next() {
                    diffs.push(DiffEntry::only_on_follower(item));
                }
            }
            Ordering::Greater => {
                if let Some(item) = remote.next() {
                    diffs.push(DiffEntry::only_on_leader(item));
                }
            }
            Ordering::Equal => {
                if let (Some(l), Some(r)) = (local.next(), remote.next()) {
                    if l.value != r.value {
                        diffs.push(DiffEntry::differing(l, r));
                    }
                }
            }
        }
    }
    diffs
}
