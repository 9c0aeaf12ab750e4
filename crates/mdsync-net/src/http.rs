//! Connection settings shared by the HTTP clients.

use std::time::Duration;

use reqwest::Client;

use crate::error::NetError;

/// Timeouts applied to every request of a client.
///
/// A request that exceeds either limit fails with a transport error, which
/// the [`RetryPolicy`](crate::RetryPolicy) treats as transient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpConfig {
    /// Limit on a whole request, from connect to the end of the body.
    pub request_timeout: Duration,
    /// Limit on establishing the TCP connection.
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl HttpConfig {
    /// Build a keep-alive client honoring these timeouts.
    pub(crate) fn build_client(&self) -> Result<Client, NetError> {
        Ok(Client::builder()
            .timeout(self.request_timeout)
            .connect_timeout(self.connect_timeout)
            .build()?)
    }
}
