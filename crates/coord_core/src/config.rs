use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys::DEFAULT_TABLE_NAME;

pub const DEFAULT_DISCOVERY_INTERVAL_MS: u64 = 10_000;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;
pub const DEFAULT_RETRY_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_BASE_DELAY_MS: u64 = 200;
pub const DEFAULT_RETRY_MAX_DELAY_MS: u64 = 5_000;

/// One week, matching the expiry the view counter writes on event records.
pub const DEFAULT_EVENT_TTL_SECS: u64 = 60 * 60 * 24 * 7;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseTableConfig {
    pub table_name: String,
    #[serde(default = "default_event_ttl_secs")]
    pub event_ttl_secs: u64,
}

impl Default for LeaseTableConfig {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            event_ttl_secs: DEFAULT_EVENT_TTL_SECS,
        }
    }
}

impl LeaseTableConfig {
    pub fn event_ttl(&self) -> Duration {
        Duration::from_secs(self.event_ttl_secs)
    }
}

/// Exponential backoff for transient failures: attempt `n` (1-based) waits
/// `min(base * 2^(n-1), max)` before the next try.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_retry_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_retry_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_retry_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_RETRY_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_RETRY_MAX_DELAY_MS,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let delay = self
            .base_delay_ms
            .saturating_mul(1u64 << exponent)
            .min(self.max_delay_ms);
        Duration::from_millis(delay)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WatcherConfig {
    #[serde(default = "default_discovery_interval_ms")]
    pub discovery_interval_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            discovery_interval_ms: DEFAULT_DISCOVERY_INTERVAL_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            retry: RetryPolicy::default(),
        }
    }
}

impl WatcherConfig {
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_event_ttl_secs() -> u64 {
    DEFAULT_EVENT_TTL_SECS
}

fn default_retry_max_attempts() -> u32 {
    DEFAULT_RETRY_MAX_ATTEMPTS
}

fn default_retry_base_delay_ms() -> u64 {
    DEFAULT_RETRY_BASE_DELAY_MS
}

fn default_retry_max_delay_ms() -> u64 {
    DEFAULT_RETRY_MAX_DELAY_MS
}

fn default_discovery_interval_ms() -> u64 {
    DEFAULT_DISCOVERY_INTERVAL_MS
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}
