// Lock configuration
// Key naming and polling settings shared by every lock created from one creator

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{
    DEFAULT_LOCK_KEY_PREFIX, DEFAULT_POLL_INTERVAL_MS, DEFAULT_QUEUE_KEY_PREFIX,
    DEFAULT_TOKEN_PREFIX,
};

/// Configuration for lock creators
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LockConfig {
    /// Prefix of the key holding the holder token (default: "DistributedLock_")
    pub lock_key_prefix: String,

    /// Prefix of the wait queue list (default: "DistributedLockQueue_")
    pub queue_key_prefix: String,

    /// Prefix of generated tokens (default: "lockId_")
    pub token_prefix: String,

    /// Interval between active acquire attempts while contended (default: 300ms)
    pub poll_interval_ms: u64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lock_key_prefix: DEFAULT_LOCK_KEY_PREFIX.to_string(),
            queue_key_prefix: DEFAULT_QUEUE_KEY_PREFIX.to_string(),
            token_prefix: DEFAULT_TOKEN_PREFIX.to_string(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }
}

impl LockConfig {
    /// Override the active poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis())
            .unwrap_or(u64::MAX)
            .max(1);
        self
    }

    /// Get poll interval as Duration
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}
