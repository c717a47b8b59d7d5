//! Lock creator
//!
//! A [`LockCreator`] is bound to one lock name and one store. Every [`LockCreator::acquire`]
//! call is an independent attempt with its own token, so a single creator can be shared by many
//! tasks contending for the same lock.

use std::sync::Arc;
use std::time::Duration;

use dislock_common::{LockConfig, LockError, MAX_TTL_MS, MIN_TTL_MS, Result};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::atomic::AtomicScripts;
use crate::handle::LockHandle;
use crate::keys::LockKeys;
use crate::metrics;
use crate::script::ScriptTable;
use crate::store::LockStore;
use crate::token::Token;
use crate::waiting::Attempt;

struct CreatorInner {
    keys: LockKeys,
    scripts: AtomicScripts,
    config: LockConfig,
}

#[derive(Clone)]
pub struct LockCreator {
    inner: Arc<CreatorInner>,
}

/// Create a creator for `name` with the default configuration
pub async fn create_lock_creator(name: &str, store: Arc<dyn LockStore>) -> Result<LockCreator> {
    LockCreator::with_config(name, store, LockConfig::default()).await
}

impl LockCreator {
    /// Validate the name and check that the store is reachable
    pub async fn with_config(
        name: &str,
        store: Arc<dyn LockStore>,
        config: LockConfig,
    ) -> Result<Self> {
        if name.is_empty() {
            return Err(LockError::InvalidLockName);
        }
        store
            .ping()
            .await
            .map_err(|e| LockError::ConnectionFailed(e.to_string()))?;

        let keys = LockKeys::new(name, &config);
        info!(
            lock = %name,
            lock_key = %keys.lock_key(),
            poll_interval_ms = config.poll_interval_ms,
            "Lock creator ready"
        );
        Ok(Self {
            inner: Arc::new(CreatorInner {
                keys,
                scripts: AtomicScripts::new(store, ScriptTable::standard()),
                config,
            }),
        })
    }

    pub fn lock_name(&self) -> &str {
        self.inner.keys.name()
    }

    pub fn keys(&self) -> &LockKeys {
        &self.inner.keys
    }

    pub fn config(&self) -> &LockConfig {
        &self.inner.config
    }

    /// Acquire the lock with a lease of `ttl`, waiting at most `wait_timeout`.
    ///
    /// `ttl` must lie between 3ms and 3650 days. `wait_timeout` is unbounded.
    ///
    /// The returned handle's lease is not renewed until
    /// [`LockHandle::start_auto_refresh`] runs.
    pub async fn acquire(&self, ttl: Duration, wait_timeout: Duration) -> Result<LockHandle> {
        if !(MIN_TTL_MS..=MAX_TTL_MS).contains(&ttl.as_millis()) {
            return Err(LockError::InvalidTtl(ttl));
        }

        let inner = &self.inner;
        let token = Token::generate(&inner.config.token_prefix);
        let started = Instant::now();
        debug!(lock = %self.lock_name(), token = %token, ttl_ms = ttl.as_millis() as u64, "Acquiring lock");

        let attempt = Attempt::new(
            inner.scripts.clone(),
            inner.keys.clone(),
            token.clone(),
            ttl,
            wait_timeout,
            inner.config.poll_interval(),
        );
        let result = attempt.run().await;

        let waited = started.elapsed();
        match &result {
            Ok(()) => metrics::record_acquire("acquired", waited),
            Err(e) if e.is_timeout() => metrics::record_acquire("timeout", waited),
            Err(_) => metrics::record_acquire("error", waited),
        }
        result?;

        debug!(
            lock = %self.lock_name(),
            token = %token,
            waited_ms = waited.as_millis() as u64,
            "Lock acquired"
        );
        Ok(LockHandle::new(
            inner.scripts.clone(),
            inner.keys.clone(),
            token,
            ttl,
        ))
    }
}

impl std::fmt::Debug for LockCreator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockCreator")
            .field("keys", &self.inner.keys)
            .field("config", &self.inner.config)
            .finish()
    }
}
