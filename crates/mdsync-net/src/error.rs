//! Error types for network operations.

/// Errors that can occur while talking to the metadata service or blob store.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// Transport-level failure (connect, timeout, reset, body read).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an unexpected status code.
    #[error("{method} {url} returned status {status}: {body}")]
    Status {
        /// HTTP method of the request.
        method: &'static str,
        /// Request URL.
        url: String,
        /// Status code received.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// A URL could not be built from the configured endpoint.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),

    /// The configured endpoint cannot carry path segments.
    #[error("endpoint {0} cannot be used as a base url")]
    InvalidEndpoint(String),

    /// The response body did not have the expected shape.
    #[error("invalid response from {url}: {reason}")]
    InvalidResponse {
        /// Request URL.
        url: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A retryable failure persisted through every attempt.
    #[error("giving up after {attempts} attempts: {last}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// The error of the final attempt.
        #[source]
        last: Box<NetError>,
    },
}

impl NetError {
    /// Whether another attempt may succeed.
    ///
    /// Transport errors and server-side statuses (5xx, 408, 429) are
    /// transient; anything else is final.
    pub fn is_retryable(&self) -> bool {
        match self {
            NetError::Http(_) => true,
            NetError::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}
