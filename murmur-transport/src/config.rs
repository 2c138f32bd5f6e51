// SPDX-License-Identifier: MIT OR Apache-2.0

use std::time::Duration;

use murmur_core::TopicMatching;
use murmur_core::request::DEFAULT_LIMIT;
use serde::{Deserialize, Serialize};

/// Minimum time between two requests for the same set of topics.
pub const DEFAULT_REQUESTS_DELAY: Duration = Duration::from_secs(3);

/// How long to wait for a mailserver to answer a single request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// How often filters which are only used for publishing get removed.
pub const DEFAULT_CLEAN_FILTERS_INTERVAL: Duration = Duration::from_secs(5 * 60);

const DEFAULT_RETRY_BASE_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_RETRY_STEP_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_MAX_RETRIES: u32 = 3;

const DEFAULT_CONNECTIONS_TARGET: usize = 1;
const DEFAULT_MAX_FAILURES: usize = 1;
const DEFAULT_TIMEOUT_WAIT_ADDED: Duration = Duration::from_secs(5);

/// Configuration of the transport service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Window in which a second request for the same topics is rejected as a duplicate. Zero
    /// disables deduplication.
    ///
    /// Default: 3 seconds.
    pub requests_delay: Duration,

    /// Time after which a request without a response is given up.
    ///
    /// Default: 10 seconds.
    pub request_timeout: Duration,

    /// Maximum number of envelopes a mailserver delivers per request.
    ///
    /// Default: 100.
    pub page_limit: u32,

    /// How requested topics are communicated to mailservers.
    ///
    /// Default: exact topics and bloom.
    pub topic_matching: TopicMatching,

    /// Retry policy when following cursors with `request_messages`.
    pub retry: RetryConfig,

    /// Listen on the well-known discovery topic next to the personal one.
    ///
    /// Default: true.
    pub generic_discovery_topic_enabled: bool,

    /// Interval of the worker removing filters which are only used for publishing.
    ///
    /// Default: 5 minutes.
    pub clean_filters_interval: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            requests_delay: DEFAULT_REQUESTS_DELAY,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            page_limit: DEFAULT_LIMIT,
            topic_matching: TopicMatching::default(),
            retry: RetryConfig::default(),
            generic_discovery_topic_enabled: true,
            clean_filters_interval: DEFAULT_CLEAN_FILTERS_INTERVAL,
        }
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests_delay(mut self, delay: Duration) -> Self {
        self.requests_delay = delay;
        self
    }

    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn page_limit(mut self, limit: u32) -> Self {
        self.page_limit = limit;
        self
    }

    pub fn topic_matching(mut self, matching: TopicMatching) -> Self {
        self.topic_matching = matching;
        self
    }

    pub fn retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn generic_discovery_topic_enabled(mut self, enabled: bool) -> Self {
        self.generic_discovery_topic_enabled = enabled;
        self
    }

    pub fn clean_filters_interval(mut self, interval: Duration) -> Self {
        self.clean_filters_interval = interval;
        self
    }
}

/// Timeouts of consecutive attempts to fetch a page of historic messages.
///
/// Attempt `n` (starting at zero) waits `base_timeout + n * step_timeout`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Default: 10 seconds.
    pub base_timeout: Duration,

    /// Default: 1 second.
    pub step_timeout: Duration,

    /// Retries after the first attempt.
    ///
    /// Default: 3.
    pub max_retries: u32,
}

impl RetryConfig {
    pub fn timeout(&self, attempt: u32) -> Duration {
        self.base_timeout + self.step_timeout * attempt
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_timeout: DEFAULT_RETRY_BASE_TIMEOUT,
            step_timeout: DEFAULT_RETRY_STEP_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

/// Configuration of the mailserver connection manager.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionManagerConfig {
    /// Number of mailservers to stay connected with.
    ///
    /// Default: 1.
    pub connections_target: usize,

    /// Expired requests after which a mailserver gets replaced.
    ///
    /// Default: 1.
    pub max_failures: usize,

    /// How long to wait for connections after the set of mailservers changed. Zero doesn't wait.
    ///
    /// Default: 5 seconds.
    pub timeout_wait_added: Duration,
}

impl Default for ConnectionManagerConfig {
    fn default() -> Self {
        Self {
            connections_target: DEFAULT_CONNECTIONS_TARGET,
            max_failures: DEFAULT_MAX_FAILURES,
            timeout_wait_added: DEFAULT_TIMEOUT_WAIT_ADDED,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use murmur_core::TopicMatching;

    use super::{RetryConfig, TransportConfig};

    #[test]
    fn retry_timeouts_grow() {
        let retry = RetryConfig::default();
        assert_eq!(retry.timeout(0), Duration::from_secs(10));
        assert_eq!(retry.timeout(3), Duration::from_secs(13));
    }

    #[test]
    fn partial_config_from_json() {
        let config: TransportConfig = serde_json::from_str(
            r#"{ "requests_delay": { "secs": 0, "nanos": 0 }, "topic_matching": "bloom_only" }"#,
        )
        .unwrap();
        assert_eq!(config.requests_delay, Duration::ZERO);
        assert_eq!(config.topic_matching, TopicMatching::BloomOnly);
        assert_eq!(config.request_timeout, Duration::from_secs(10));
        assert_eq!(config.page_limit, 100);
        assert!(config.generic_discovery_topic_enabled);
    }
}
