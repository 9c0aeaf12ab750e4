//! Index of key ranges already known to be identical on both replicas.

/// Source of precomputed range digests.
///
/// A digest covers a contiguous range of object keys of one bucket and is
/// known to match on the follower and on the leader. The engine uses it to
/// skip both buffering the local items of such a range and querying the
/// leader for it.
pub trait DigestIndex: Send + Sync {
    /// The last object key of the identical span starting right after
    /// `marker` (or at the start of `bucket` when `marker` is `None`), if
    /// there is one.
    fn identical_through(&self, bucket: &str, marker: Option<&str>) -> Option<String>;
}
