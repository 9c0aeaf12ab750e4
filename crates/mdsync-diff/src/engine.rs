//! Async driver of the merge-diff.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use mdsync_net::{DEFAULT_LISTING_PAGE_SIZE, MetadataService};
use mdsync_types::{DiffEntry, DiffKind};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::digest::DigestIndex;
use crate::error::DiffError;
use crate::listing::RangeListing;
use crate::merge::{ChunkMerge, MergeState, PendingChunk};
use crate::source::LocalSource;

/// Default number of items buffered on each side of a comparison.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1000;

/// Tuning of a [`DiffEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffConfig {
    /// Items buffered per side before a comparison is forced.
    pub max_buffer_size: usize,
    /// Keys requested per leader listing page.
    pub listing_page_size: usize,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            max_buffer_size: DEFAULT_MAX_BUFFER_SIZE,
            listing_page_size: DEFAULT_LISTING_PAGE_SIZE,
        }
    }
}

/// Scan counters, shared between concurrent scans.
#[derive(Debug, Default)]
pub struct DiffProgress {
    keys_scanned: AtomicU64,
    keys_skipped: AtomicU64,
    only_on_follower: AtomicU64,
    only_on_leader: AtomicU64,
    differing_value: AtomicU64,
    range_queries: AtomicU64,
}

/// Point-in-time copy of [`DiffProgress`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffProgressSnapshot {
    /// Local items read.
    pub keys_scanned: u64,
    /// Local items skipped thanks to digests.
    pub keys_skipped: u64,
    /// Keys found on the follower only.
    pub only_on_follower: u64,
    /// Keys found on the leader only.
    pub only_on_leader: u64,
    /// Keys found on both sides with different values.
    pub differing_value: u64,
    /// Leader ranges compared.
    pub range_queries: u64,
}

impl DiffProgressSnapshot {
    /// Total number of differences found.
    pub fn differences(&self) -> u64 {
        self.only_on_follower + self.only_on_leader + self.differing_value
    }
}

impl DiffProgress {
    /// Read all counters.
    pub fn snapshot(&self) -> DiffProgressSnapshot {
        DiffProgressSnapshot {
            keys_scanned: self.keys_scanned.load(Ordering::Relaxed),
            keys_skipped: self.keys_skipped.load(Ordering::Relaxed),
            only_on_follower: self.only_on_follower.load(Ordering::Relaxed),
            only_on_leader: self.only_on_leader.load(Ordering::Relaxed),
            differing_value: self.differing_value.load(Ordering::Relaxed),
            range_queries: self.range_queries.load(Ordering::Relaxed),
        }
    }

    /// Log the counters at `info`.
    pub fn log(&self, message: &str) {
        let s = self.snapshot();
        info!(
            keys_scanned = s.keys_scanned,
            keys_skipped = s.keys_skipped,
            only_on_follower = s.only_on_follower,
            only_on_leader = s.only_on_leader,
            differing_value = s.differing_value,
            range_queries = s.range_queries,
            "{message}"
        );
    }

    fn record(&self, kind: DiffKind) {
        let counter = match kind {
            DiffKind::OnlyOnFollower => &self.only_on_follower,
            DiffKind::OnlyOnLeader => &self.only_on_leader,
            DiffKind::DifferingValue => &self.differing_value,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Compares an ordered local source against the leader.
pub struct DiffEngine {
    leader: Arc<dyn MetadataService>,
    config: DiffConfig,
    digests: Option<Arc<dyn DigestIndex>>,
    progress: Arc<DiffProgress>,
}

impl DiffEngine {
    /// Create an engine listing ranges from `leader`.
    pub fn new(leader: Arc<dyn MetadataService>, config: DiffConfig) -> Self {
        Self {
            leader,
            config,
            digests: None,
            progress: Arc::new(DiffProgress::default()),
        }
    }

    /// Skip ranges reported identical by `digests`.
    pub fn with_digests(mut self, digests: Arc<dyn DigestIndex>) -> Self {
        self.digests = Some(digests);
        self
    }

    /// Count into an existing (possibly shared) progress tracker.
    pub fn with_progress(mut self, progress: Arc<DiffProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// The progress tracker this engine counts into.
    pub fn progress(&self) -> &Arc<DiffProgress> {
        &self.progress
    }

    /// Compare every item of `source` against the leader, sending one
    /// [`DiffEntry`] per disagreeing key to `sink`, in key order.
    ///
    /// Each chunk is fully compared before the next local item is read, and
    /// every send waits for room in the channel.
    pub async fn run<S: LocalSource>(
        &self,
        mut source: S,
        sink: &mpsc::Sender<DiffEntry>,
    ) -> Result<(), DiffError> {
        let mut state = MergeState::new(self.config.max_buffer_size);
        if let Some(digests) = &self.digests {
            state = state.with_digests(Arc::clone(digests));
        }

        while let Some(item) = source.next_item().await? {
            self.progress.keys_scanned.fetch_add(1, Ordering::Relaxed);
            let chunk = state.advance(item)?;
            let skipped = state.take_skipped();
            if skipped > 0 {
                self.progress.keys_skipped.fetch_add(skipped, Ordering::Relaxed);
            }
            if let Some(chunk) = chunk {
                self.compare_chunk(chunk, sink).await?;
            }
        }
        if let Some(chunk) = state.finish() {
            self.compare_chunk(chunk, sink).await?;
        }
        Ok(())
    }

    async fn compare_chunk(
        &self,
        chunk: PendingChunk,
        sink: &mpsc::Sender<DiffEntry>,
    ) -> Result<(), DiffError> {
        let PendingChunk { query, items } = chunk;
        debug!(
            bucket = %query.bucket,
            marker = ?query.marker,
            last_key = ?query.last_key,
            local_items = items.len(),
            "comparing range"
        );
        self.progress.range_queries.fetch_add(1, Ordering::Relaxed);

        let mut merge = ChunkMerge::new(items, self.config.max_buffer_size);
        let mut listing =
            RangeListing::new(self.leader.as_ref(), &query, self.config.listing_page_size);
        while let Some(page) = listing.next_page().await? {
            for item in page {
                for diff in merge.push_remote(item) {
                    self.emit(diff, sink).await?;
                }
            }
        }
        for diff in merge.finish() {
            self.emit(diff, sink).await?;
        }
        Ok(())
    }

    async fn emit(&self, diff: DiffEntry, sink: &mpsc::Sender<DiffEntry>) -> Result<(), DiffError> {
        self.progress.record(diff.kind());
        sink.send(diff).await.map_err(|_| DiffError::SinkClosed)
    }
}
