// Store key derivation for a named lock

use dislock_common::LockConfig;

/// Store keys derived from a lock name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockKeys {
    name: String,
    lock_key: String,
    queue_key: String,
}

impl LockKeys {
    pub fn new(name: &str, config: &LockConfig) -> Self {
        Self {
            name: name.to_string(),
            lock_key: format!("{}{}", config.lock_key_prefix, name),
            queue_key: format!("{}{}", config.queue_key_prefix, name),
        }
    }

    /// Caller-supplied lock name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Key whose value is the current holder token
    pub fn lock_key(&self) -> &str {
        &self.lock_key
    }

    /// List of queued waiter tokens
    pub fn queue_key(&self) -> &str {
        &self.queue_key
    }

    /// `KEYS` argument shared by every lock script: lock key first, queue key second
    pub(crate) fn script_keys(&self) -> [String; 2] {
        [self.lock_key.clone(), self.queue_key.clone()]
    }
}
