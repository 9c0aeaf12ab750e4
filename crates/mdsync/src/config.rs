//! TOML configuration for the mdsync tool.
//!
//! Every section is optional; command-line flags and their environment
//! variables override what the file sets.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use mdsync_diff::DiffConfig;
use mdsync_net::{HttpConfig, RetryPolicy};
use serde::Deserialize;

/// Top-level configuration, parsed from TOML.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Leader metadata service.
    pub bucketd: EndpointSection,
    /// Blob store.
    pub sproxyd: EndpointSection,
    /// Scan settings.
    pub diff: DiffSection,
    /// Repair settings.
    pub repair: RepairSection,
    /// Retry policy of every outbound call.
    pub retry: RetrySection,
    /// HTTP client timeouts.
    pub http: HttpSection,
    /// Logging configuration.
    pub log: LogSection,
}

/// `[bucketd]` and `[sproxyd]` sections.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct EndpointSection {
    /// `host:port` of the service.
    pub endpoint: Option<String>,
}

/// `[diff]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct DiffSection {
    /// Follower database directories to scan.
    pub databases: Vec<PathBuf>,
    /// Difference file to create.
    pub output: Option<PathBuf>,
    /// Items buffered per side before a comparison is forced.
    pub max_buffer_size: Option<usize>,
    /// Keys requested per leader listing page.
    pub listing_page_size: Option<usize>,
    /// Databases scanned concurrently.
    pub parallel_scans: Option<usize>,
    /// Seconds between progress log lines.
    pub progress_interval_secs: Option<u64>,
}

/// `[repair]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RepairSection {
    /// Only repair objects last modified before this RFC 3339 instant.
    pub older_than: Option<String>,
}

/// `[retry]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    /// Attempts per call, the first one included.
    pub max_attempts: Option<u32>,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: Option<u64>,
    /// Cap on any retry delay, in milliseconds.
    pub max_delay_ms: Option<u64>,
}

/// `[http]` section.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    /// Limit on a whole request, in milliseconds.
    pub request_timeout_ms: Option<u64>,
    /// Limit on establishing a connection, in milliseconds.
    pub connect_timeout_ms: Option<u64>,
}

/// `[log]` section.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Log level filter (e.g. `"info"`, `"debug"`, `"warn"`).
    pub level: String,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl CliConfig {
    /// Load config from a TOML file, or use defaults if no path given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(p) => {
                let content = std::fs::read_to_string(p)
                    .with_context(|| format!("failed to read {}", p.display()))?;
                let config: CliConfig = toml::from_str(&content)?;
                Ok(config)
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse config from a TOML string (used in tests).
    #[cfg(test)]
    pub fn from_toml(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Effective retry policy.
    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        RetryPolicy {
            max_attempts: self.retry.max_attempts.unwrap_or(defaults.max_attempts),
            base_delay: self
                .retry
                .base_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.base_delay),
            max_delay: self
                .retry
                .max_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.max_delay),
        }
    }

    /// Effective HTTP client timeouts.
    pub fn http_config(&self) -> HttpConfig {
        let defaults = HttpConfig::default();
        HttpConfig {
            request_timeout: self
                .http
                .request_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.request_timeout),
            connect_timeout: self
                .http
                .connect_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.connect_timeout),
        }
    }

    /// Effective diff engine settings.
    pub fn diff_config(&self) -> DiffConfig {
        let defaults = DiffConfig::default();
        DiffConfig {
            max_buffer_size: self.diff.max_buffer_size.unwrap_or(defaults.max_buffer_size),
            listing_page_size: self
                .diff
                .listing_page_size
                .unwrap_or(defaults.listing_page_size),
        }
    }

    /// Effective number of concurrent database scans.
    ///
    /// Defaults to 4.
    pub fn parallel_scans(&self) -> usize {
        self.diff.parallel_scans.unwrap_or(4).max(1)
    }

    /// Effective progress logging period.
    ///
    /// Defaults to 10 seconds.
    pub fn progress_interval(&self) -> Duration {
        Duration::from_secs(self.diff.progress_interval_secs.unwrap_or(10).max(1))
    }

    /// Effective repair freshness limit: the configured instant, or one
    /// week before `now`.
    pub fn older_than(&self, now: DateTime<Utc>) -> anyhow::Result<DateTime<Utc>> {
        match self.repair.older_than.as_deref() {
            Some(raw) => parse_timestamp(raw),
            None => Ok(now - chrono::Duration::days(7)),
        }
    }
}

/// Parse an RFC 3339 timestamp.
pub fn parse_timestamp(raw: &str) -> anyhow::Result<DateTime<Utc>> {
    let ts = DateTime::parse_from_rfc3339(raw.trim())
        .with_context(|| format!("{raw:?} is an invalid date"))?;
    Ok(ts.with_timezone(&Utc))
}
