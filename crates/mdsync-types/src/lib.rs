//! Shared types for mdsync.
//!
//! This crate defines the records that flow between every stage of the
//! follower/leader reconciliation pipeline:
//!
//! - [`Item`] — one `bucket/objectKey` → raw metadata pair.
//! - [`DiffEntry`] — one key on which the follower and the leader disagree,
//!   serialized as the `[followerItem|null, leaderItem|null]` JSON array.
//! - [`ObjectRef`] — a parsed `bucket/objectKey`, aware of version keys.
//! - [`ObjectMetadata`] — the handful of metadata fields the repair logic
//!   inspects (`location`, `versionId`, `last-modified`).

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Separator between an object key and its version ID in a version key.
pub const VERSION_ID_SEPARATOR: char = '\0';

/// Separator between the bucket name and the object key in a full key.
pub const BUCKET_SEPARATOR: char = '/';

/// Errors produced while interpreting keys and diff records.
#[derive(Debug, thiserror::Error)]
pub enum TypeError {
    /// The key has no `/`, so no bucket can be derived from it.
    #[error("key {0:?} has no bucket prefix")]
    MissingBucket(String),

    /// A diff record had neither a follower nor a leader item.
    #[error("diff entry must have at least one side")]
    EmptyDiffEntry,
}

/// Split a full key into `(bucket, objectKey)` at the first `/`.
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    key.split_once(BUCKET_SEPARATOR)
}

// ---------------------------------------------------------------------------
// Items
// ---------------------------------------------------------------------------

/// A key/value record as stored in a metadata database.
///
/// Items order byte-lexicographically on the full key, which keeps all keys
/// of one bucket contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// `"<bucket>/<objectKey>"`.
    pub key: String,
    /// Raw JSON metadata.
    pub value: String,
}

impl Item {
    /// Build an item from anything string-like.
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// The object key part of the key.
    pub fn object_key(&self) -> Option<&str> {
        split_key(&self.key).map(|(_, key)| key)
    }
}

// ---------------------------------------------------------------------------
// Diff records
// ---------------------------------------------------------------------------

/// How the two sides of a [`DiffEntry`] disagree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffKind {
    /// Present on the follower, absent on the leader.
    OnlyOnFollower,
    /// Absent on the follower, present on the leader.
    OnlyOnLeader,
    /// Present on both with different values.
    DifferingValue,
}

/// One key on which the follower and the leader disagree.
///
/// At least one side is always present; this is enforced when decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    try_from = "(Option<Item>, Option<Item>)",
    into = "(Option<Item>, Option<Item>)"
)]
pub struct DiffEntry {
    /// The item as seen on the follower.
    pub follower: Option<Item>,
    /// The item as seen on the leader.
    pub leader: Option<Item>,
}

impl DiffEntry {
    /// A key only the follower has.
    pub fn only_on_follower(item: Item) -> Self {
        Self {
            follower: Some(item),
            leader: None,
        }
    }

    /// A key only the leader has.
    pub fn only_on_leader(item: Item) -> Self {
        Self {
            follower: None,
            leader: Some(item),
        }
    }

    /// A key both sides have, with different values.
    pub fn differing(follower: Item, leader: Item) -> Self {
        Self {
            follower: Some(follower),
            leader: Some(leader),
        }
    }

    /// Classify the disagreement.
    pub fn kind(&self) -> DiffKind {
        match (&self.follower, &self.leader) {
            (Some(_), None) => DiffKind::OnlyOnFollower,
            (None, Some(_)) => DiffKind::OnlyOnLeader,
            _ => DiffKind::DifferingValue,
        }
    }

    /// The full key of the entry, taken from the follower side when present.
    pub fn key(&self) -> &str {
        match (&self.follower, &self.leader) {
            (Some(item), _) | (None, Some(item)) => &item.key,
            (None, None) => "",
        }
    }
}

impl TryFrom<(Option<Item>, Option<Item>)> for DiffEntry {
    type Error = TypeError;

    fn try_from((follower, leader): (Option<Item>, Option<Item>)) -> Result<Self, Self::Error> {
        if follower.is_none() && leader.is_none() {
            return Err(TypeError::EmptyDiffEntry);
        }
        Ok(Self { follower, leader })
    }
}

impl From<DiffEntry> for (Option<Item>, Option<Item>) {
    fn from(entry: DiffEntry) -> Self {
        (entry.follower, entry.leader)
    }
}

// ---------------------------------------------------------------------------
// Object references
// ---------------------------------------------------------------------------

/// A parsed `bucket/objectKey` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    /// Bucket name.
    pub bucket: String,
    /// Object key within the bucket, possibly a version key.
    pub key: String,
}

impl ObjectRef {
    /// Parse a full `bucket/objectKey` key.
    pub fn parse(full_key: &str) -> Result<Self, TypeError> {
        let (bucket, key) =
            split_key(full_key).ok_or_else(|| TypeError::MissingBucket(full_key.to_string()))?;
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    /// For a version key, the unversioned master key it belongs to.
    pub fn master_key(&self) -> Option<&str> {
        self.key
            .split_once(VERSION_ID_SEPARATOR)
            .map(|(master, _)| master)
    }

    /// For a version key, the version ID it encodes.
    pub fn version_id(&self) -> Option<&str> {
        self.key
            .split_once(VERSION_ID_SEPARATOR)
            .map(|(_, version_id)| version_id)
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Version separators are not printable, show them escaped.
        write!(f, "{}/{}", self.bucket, self.key.escape_default())
    }
}

// ---------------------------------------------------------------------------
// Object metadata
// ---------------------------------------------------------------------------

/// One blob reference in an object's location list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// Key of the blob in the blob store.
    pub key: String,
}

/// The subset of object metadata inspected during repair.
///
/// Unknown fields are ignored; the raw JSON is what gets written back.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Blob references holding the object data, in order.
    #[serde(default)]
    pub location: Option<Vec<Location>>,
    /// Version ID, for versioned objects.
    #[serde(rename = "versionId", default)]
    pub version_id: Option<String>,
    /// Last modification time as an RFC 3339 string.
    #[serde(rename = "last-modified", default)]
    pub last_modified: Option<String>,
}

impl ObjectMetadata {
    /// Parse raw metadata JSON.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// The blob references, empty when the object has no location list.
    pub fn locations(&self) -> &[Location] {
        self.location.as_deref().unwrap_or_default()
    }

    /// `last-modified` as a timestamp; `None` when absent or unparsable.
    pub fn last_modified_at(&self) -> Option<DateTime<Utc>> {
        let raw = self.last_modified.as_deref()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|ts| ts.with_timezone(&Utc))
    }
}
