//! Error types for repair operations.

/// Errors that abort a repair run.
///
/// Failures confined to one entry (blob probes, leader reads, writes) are
/// counted and logged instead.
#[derive(Debug, thiserror::Error)]
pub enum RepairError {
    /// A line of the input is not a valid difference record.
    #[error("malformed difference record on line {line}: {source}")]
    MalformedEntry {
        /// 1-based line number.
        line: u64,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// The metadata of a difference record is not valid JSON.
    #[error("malformed metadata for {key}: {source}")]
    MalformedMetadata {
        /// Object the metadata belongs to.
        key: String,
        /// Decoding error.
        #[source]
        source: serde_json::Error,
    },

    /// The key of a difference record has no bucket.
    #[error("invalid key: {0}")]
    Key(#[from] mdsync_types::TypeError),

    /// Reading the input failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
