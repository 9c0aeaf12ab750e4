//! Error types for the follower database.

/// Errors returned by [`FollowerDb`](crate::FollowerDb) operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Fjall database error.
    #[error("fjall error: {0}")]
    Fjall(#[from] fjall::Error),

    /// I/O error (e.g. from Fjall guard operations).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A stored key or value is not valid UTF-8.
    #[error("non utf-8 entry in database: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}
