//! Sequential repair of difference records.
//!
//! Each entry goes through readability checks on both sides, a leader
//! re-read and (for version keys) a master-key lookup, all run
//! concurrently, then gets classified by [`decide`] and, for automatic
//! repairs, written back to the leader.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use mdsync_net::{BlobStatus, BlobStore, MetadataService, NetError};
use mdsync_types::{DiffEntry, Item, ObjectMetadata, ObjectRef};
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{debug, error, info, warn};

use crate::error::RepairError;
use crate::strategy::{LeaderState, RepairSource, RepairStatus, ReplicaState, decide};

/// Settings of a [`RepairRunner`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairConfig {
    /// Leave alone objects whose readable side was modified at or after
    /// this instant.
    pub older_than: Option<DateTime<Utc>>,
}

/// Terminal state of one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairOutcome {
    /// Classified as anything but an automatic repair; nothing written.
    Skipped(RepairStatus),
    /// Metadata written back from `source`.
    Repaired {
        /// Side the metadata was taken from.
        source: RepairSource,
        /// Whether the master key was written too.
        master_mirrored: bool,
    },
    /// A leader read or write failed after retries.
    Failed,
}

/// Per-status totals of a repair run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RepairCounters {
    /// Entries classified `AutoRepair`, failed writes included.
    pub auto_repair: u64,
    /// Automatic repairs whose write failed.
    pub auto_repair_error: u64,
    /// Entries classified `ManualRepair`.
    pub manual_repair: u64,
    /// Entries classified `NotRepairable`.
    pub not_repairable: u64,
    /// Entries classified `UpdatedByClient`.
    pub updated_by_client: u64,
    /// Entries classified `TooRecent`.
    pub too_recent: u64,
    /// Entries whose leader re-read failed.
    pub lookup_error: u64,
}

#[derive(Debug, Default)]
struct Counters {
    auto_repair: AtomicU64,
    auto_repair_error: AtomicU64,
    manual_repair: AtomicU64,
    not_repairable: AtomicU64,
    updated_by_client: AtomicU64,
    too_recent: AtomicU64,
    lookup_error: AtomicU64,
}

impl Counters {
    fn record(&self, status: RepairStatus) {
        let counter = match status {
            RepairStatus::AutoRepair => &self.auto_repair,
            RepairStatus::ManualRepair => &self.manual_repair,
            RepairStatus::NotRepairable => &self.not_repairable,
            RepairStatus::UpdatedByClient => &self.updated_by_client,
            RepairStatus::TooRecent => &self.too_recent,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> RepairCounters {
        RepairCounters {
            auto_repair: self.auto_repair.load(Ordering::Relaxed),
            auto_repair_error: self.auto_repair_error.load(Ordering::Relaxed),
            manual_repair: self.manual_repair.load(Ordering::Relaxed),
            not_repairable: self.not_repairable.load(Ordering::Relaxed),
            updated_by_client: self.updated_by_client.load(Ordering::Relaxed),
            too_recent: self.too_recent.load(Ordering::Relaxed),
            lookup_error: self.lookup_error.load(Ordering::Relaxed),
        }
    }
}

/// Repairs difference records one at a time.
pub struct RepairRunner {
    leader: Arc<dyn MetadataService>,
    blobs: Arc<dyn BlobStore>,
    config: RepairConfig,
    counters: Counters,
}

impl RepairRunner {
    /// Create a runner repairing through `leader` and probing `blobs`.
    pub fn new(
        leader: Arc<dyn MetadataService>,
        blobs: Arc<dyn BlobStore>,
        config: RepairConfig,
    ) -> Self {
        Self {
            leader,
            blobs,
            config,
            counters: Counters::default(),
        }
    }

    /// Totals so far; valid even if a run was interrupted.
    pub fn counters(&self) -> RepairCounters {
        self.counters.snapshot()
    }

    /// Log the totals at `info`.
    pub fn log_counters(&self, message: &str) {
        let c = self.counters();
        info!(
            auto_repair = c.auto_repair,
            auto_repair_error = c.auto_repair_error,
            manual_repair = c.manual_repair,
            not_repairable = c.not_repairable,
            updated_by_client = c.updated_by_client,
            too_recent = c.too_recent,
            lookup_error = c.lookup_error,
            "{message}"
        );
    }

    /// Repair every record of a newline-delimited JSON input.
    ///
    /// Blank lines are ignored. An undecodable line or malformed metadata
    /// ends the run; per-entry network failures are counted and the run
    /// goes on.
    pub async fn run<R>(&self, input: R) -> Result<RepairCounters, RepairError>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = input.lines();
        let mut line_no = 0_u64;
        while let Some(line) = lines.next_line().await? {
            line_no += 1;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let entry: DiffEntry = serde_json::from_str(line).map_err(|source| {
                RepairError::MalformedEntry {
                    line: line_no,
                    source,
                }
            })?;
            self.repair_entry(&entry).await?;
        }
        Ok(self.counters())
    }

    /// Classify one difference and apply the repair when it is automatic.
    pub async fn repair_entry(&self, entry: &DiffEntry) -> Result<RepairOutcome, RepairError> {
        let object = ObjectRef::parse(entry.key())?;
        let follower_md = parse_metadata(entry.follower.as_ref(), &object)?;
        let leader_md = parse_metadata(entry.leader.as_ref(), &object)?;

        let (follower_readable, leader_readable, refreshed, master) = tokio::join!(
            self.is_readable(&object, follower_md.as_ref()),
            self.is_readable(&object, leader_md.as_ref()),
            self.leader.get_object(&object.bucket, &object.key),
            self.coupled_master(&object),
        );

        let refreshed = match refreshed {
            Ok(refreshed) => refreshed,
            Err(e) => {
                error!(%object, error = %e, "failed to re-read object metadata prior to repair");
                self.counters.lookup_error.fetch_add(1, Ordering::Relaxed);
                return Ok(RepairOutcome::Failed);
            }
        };
        let master = match master {
            Ok(master) => master,
            Err(e) => {
                error!(%object, error = %e, "failed to read master key prior to repair");
                self.counters.lookup_error.fetch_add(1, Ordering::Relaxed);
                return Ok(RepairOutcome::Failed);
            }
        };

        let follower = ReplicaState::observed(value_of(entry.follower.as_ref()), follower_readable);
        let leader = LeaderState {
            observed: ReplicaState::observed(value_of(entry.leader.as_ref()), leader_readable),
            refreshed_md: refreshed.as_deref(),
        };
        let strategy = decide(&follower, &leader, self.config.older_than);

        if strategy.status == RepairStatus::NotRepairable {
            warn!(%object, status = %strategy.status, "{}", strategy.message);
        } else {
            info!(%object, status = %strategy.status, "{}", strategy.message);
        }
        self.counters.record(strategy.status);

        let Some(source) = strategy.source else {
            return Ok(RepairOutcome::Skipped(strategy.status));
        };
        let repair_md = match source {
            RepairSource::Follower => follower.diff_md,
            RepairSource::Leader => leader.observed.diff_md,
        };
        let Some(repair_md) = repair_md else {
            return Ok(RepairOutcome::Skipped(strategy.status));
        };

        if let Err(e) = self.write(&object.bucket, &object.key, repair_md).await {
            error!(%object, error = %e, "failed to repair object metadata");
            self.counters.auto_repair_error.fetch_add(1, Ordering::Relaxed);
            return Ok(RepairOutcome::Failed);
        }
        if let Some(master_key) = master.as_deref() {
            if let Err(e) = self.write(&object.bucket, master_key, repair_md).await {
                error!(%object, master_key, error = %e, "failed to repair master key metadata");
                self.counters.auto_repair_error.fetch_add(1, Ordering::Relaxed);
                return Ok(RepairOutcome::Failed);
            }
        }

        info!(
            %object,
            status = %RepairStatus::AutoRepair,
            %source,
            master_mirrored = master.is_some(),
            "repaired object metadata successfully"
        );
        Ok(RepairOutcome::Repaired {
            source,
            master_mirrored: master.is_some(),
        })
    }

    async fn write(&self, bucket: &str, key: &str, value: &str) -> Result<(), NetError> {
        self.leader.put_object(bucket, key, value).await
    }

    /// Whether every blob referenced by `md` is present.
    ///
    /// Probes run in location order and stop at the first missing blob or
    /// failed probe.
    async fn is_readable(&self, object: &ObjectRef, md: Option<&ObjectMetadata>) -> bool {
        let Some(md) = md else {
            return false;
        };
        for location in md.locations() {
            match self.blobs.probe(&location.key).await {
                Ok(BlobStatus::Present) => {
                    debug!(%object, blob_key = %location.key, "blob store check returned success");
                }
                Ok(BlobStatus::Missing) => {
                    error!(%object, blob_key = %location.key, "blob store reported missing key");
                    return false;
                }
                Err(e) => {
                    error!(%object, blob_key = %location.key, error = %e, "blob store check error");
                    return false;
                }
            }
        }
        true
    }

    /// For a version key, the master key a repair must be mirrored onto:
    /// the master is absent, or points at this very version.
    async fn coupled_master(&self, object: &ObjectRef) -> Result<Option<String>, NetError> {
        let (Some(master_key), Some(version_id)) = (object.master_key(), object.version_id())
        else {
            return Ok(None);
        };
        let Some(raw) = self.leader.get_object(&object.bucket, master_key).await? else {
            return Ok(Some(master_key.to_string()));
        };
        match ObjectMetadata::parse(&raw) {
            Ok(md) if md.version_id.as_deref() == Some(version_id) => {
                Ok(Some(master_key.to_string()))
            }
            Ok(_) => Ok(None),
            Err(e) => {
                warn!(%object, master_key, error = %e, "unparsable master key metadata, not mirroring");
                Ok(None)
            }
        }
    }
}

fn value_of(item: Option<&Item>) -> Option<&str> {
    item.map(|item| item.value.as_str())
}

fn parse_metadata(
    item: Option<&Item>,
    object: &ObjectRef,
) -> Result<Option<ObjectMetadata>, RepairError> {
    item.map(|item| {
        ObjectMetadata::parse(&item.value).map_err(|source| RepairError::MalformedMetadata {
            key: object.to_string(),
            source,
        })
    })
    .transpose()
}
