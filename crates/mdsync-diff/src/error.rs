//! Error types for the diff engine.

/// Errors that end a database scan.
#[derive(Debug, thiserror::Error)]
pub enum DiffError {
    /// The leader listing failed after retries.
    #[error("leader listing failed: {0}")]
    Net(#[from] mdsync_net::NetError),

    /// A local key could not be interpreted.
    #[error("malformed local key: {0}")]
    Key(#[from] mdsync_types::TypeError),

    /// The follower database could not be read.
    #[error("follower database error: {0}")]
    Db(#[from] mdsync_db::DbError),

    /// The receiver of difference records went away.
    #[error("difference sink closed")]
    SinkClosed,
}
