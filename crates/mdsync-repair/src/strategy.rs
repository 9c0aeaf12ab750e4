//! Classification of a difference into a repair strategy.

use std::fmt;

use chrono::{DateTime, Utc};
use mdsync_types::ObjectMetadata;

/// Outcome class of a difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairStatus {
    /// Exactly one side is readable; its metadata can be written back.
    AutoRepair,
    /// Both sides are readable but disagree; a human must choose.
    ManualRepair,
    /// No side holds readable data worth restoring.
    NotRepairable,
    /// The leader changed since the scan; a client got there first.
    UpdatedByClient,
    /// A readable side was modified too recently to be touched.
    TooRecent,
}

impl RepairStatus {
    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStatus::AutoRepair => "AutoRepair",
            RepairStatus::ManualRepair => "ManualRepair",
            RepairStatus::NotRepairable => "NotRepairable",
            RepairStatus::UpdatedByClient => "UpdatedByClient",
            RepairStatus::TooRecent => "TooRecent",
        }
    }
}

impl fmt::Display for RepairStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Side whose metadata is written back on an automatic repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RepairSource {
    /// The follower's scanned value.
    Follower,
    /// The leader's scanned value.
    Leader,
}

impl fmt::Display for RepairSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RepairSource::Follower => "Follower",
            RepairSource::Leader => "Leader",
        })
    }
}

/// What to do with one difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RepairStrategy {
    /// Classification.
    pub status: RepairStatus,
    /// Human-readable reason.
    pub message: &'static str,
    /// Set for [`RepairStatus::AutoRepair`] only.
    pub source: Option<RepairSource>,
}

impl RepairStrategy {
    fn new(status: RepairStatus, message: &'static str) -> Self {
        Self {
            status,
            message,
            source: None,
        }
    }
}

/// Facts about one side of a difference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReplicaState<'a> {
    /// Raw metadata observed during the scan, `None` if absent.
    pub diff_md: Option<&'a str>,
    /// `last-modified` of `diff_md`, when present and valid.
    pub last_modified: Option<DateTime<Utc>>,
    /// Whether every blob referenced by `diff_md` is retrievable.
    pub is_readable: bool,
}

impl<'a> ReplicaState<'a> {
    /// Build a state from a raw scanned value.
    ///
    /// An absent value is never readable.
    pub fn observed(diff_md: Option<&'a str>, is_readable: bool) -> Self {
        let last_modified = diff_md
            .and_then(|raw| ObjectMetadata::parse(raw).ok())
            .and_then(|md| md.last_modified_at());
        Self {
            diff_md,
            last_modified,
            is_readable: is_readable && diff_md.is_some(),
        }
    }

    fn readable(&self) -> bool {
        self.is_readable && self.diff_md.is_some()
    }

    fn too_recent(&self, older_than: Option<DateTime<Utc>>) -> bool {
        match (older_than, self.last_modified) {
            (Some(limit), Some(modified)) => self.readable() && modified >= limit,
            _ => false,
        }
    }
}

/// Facts about the leader side, including its value re-read at repair time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LeaderState<'a> {
    /// The leader as seen during the scan.
    pub observed: ReplicaState<'a>,
    /// The leader's current value, `None` if the key is now absent.
    pub refreshed_md: Option<&'a str>,
}

/// Classify a difference. The first matching rule wins:
///
/// 1. the leader moved since the scan → `UpdatedByClient`;
/// 2. a readable side was modified at or after `older_than` → `TooRecent`;
/// 3. nothing readable to restore → `NotRepairable`;
/// 4. both sides readable → `ManualRepair`;
/// 5. otherwise → `AutoRepair` from the readable side.
pub fn decide(
    follower: &ReplicaState<'_>,
    leader: &LeaderState<'_>,
    older_than: Option<DateTime<Utc>>,
) -> RepairStrategy {
    match (leader.refreshed_md, leader.observed.diff_md) {
        (Some(_), None) => {
            return RepairStrategy::new(
                RepairStatus::UpdatedByClient,
                "changed on leader's view (exists but expected to be missing)",
            );
        }
        (Some(refreshed), Some(scanned)) if refreshed != scanned => {
            return RepairStrategy::new(
                RepairStatus::UpdatedByClient,
                "changed on leader's view (metadata changed)",
            );
        }
        (None, Some(_)) => {
            return RepairStrategy::new(
                RepairStatus::UpdatedByClient,
                "changed on leader's view (missing but expected to exist)",
            );
        }
        _ => {}
    }

    if leader.observed.too_recent(older_than) || follower.too_recent(older_than) {
        return RepairStrategy::new(
            RepairStatus::TooRecent,
            "last-modified too recent, not repairing",
        );
    }

    let follower_readable = follower.readable();
    let leader_readable = leader.observed.readable();

    if follower.diff_md.is_none() && !leader_readable {
        return RepairStrategy::new(
            RepairStatus::NotRepairable,
            "absent from follower's view and not readable from leader's view",
        );
    }
    if leader.observed.diff_md.is_none() && !follower_readable {
        return RepairStrategy::new(
            RepairStatus::NotRepairable,
            "absent from leader's view and not readable from follower's view",
        );
    }
    if !leader_readable && !follower_readable {
        return RepairStrategy::new(
            RepairStatus::NotRepairable,
            "not readable from neither leader's view nor follower's view",
        );
    }
    if leader_readable && follower_readable {
        return RepairStrategy::new(
            RepairStatus::ManualRepair,
            "readable from both leader's view and follower's view but metadata is different",
        );
    }

    let (source, message) = if follower_readable {
        (RepairSource::Follower, "readable from follower's view only")
    } else {
        (RepairSource::Leader, "readable from leader's view only")
    };
    RepairStrategy {
        status: RepairStatus::AutoRepair,
        message,
        source: Some(source),
    }
}
