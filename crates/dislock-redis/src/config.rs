// Redis connection settings

use serde::{Deserialize, Serialize};

/// Default Redis endpoint
pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379/0";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Connection URL, e.g. `redis://:password@host:6379/0`
    pub url: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_REDIS_URL.to_string(),
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}
