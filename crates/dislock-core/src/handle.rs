// Held lock handle

use std::sync::Arc;
use std::time::Duration;

use dislock_common::{LockError, Result};
use tracing::{debug, warn};

use crate::atomic::AtomicScripts;
use crate::keys::LockKeys;
use crate::metrics;
use crate::token::Token;
use crate::watchdog::RenewalWatchdog;

struct HandleInner {
    scripts: AtomicScripts,
    keys: LockKeys,
    token: Token,
    ttl: Duration,
    watchdog: RenewalWatchdog,
}

/// A successfully acquired lock
///
/// Cloning is cheap and every clone refers to the same acquisition, so a clone can be moved into
/// the task running [`LockHandle::start_auto_refresh`].
#[derive(Clone)]
pub struct LockHandle {
    inner: Arc<HandleInner>,
}

impl LockHandle {
    pub(crate) fn new(scripts: AtomicScripts, keys: LockKeys, token: Token, ttl: Duration) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                scripts,
                keys,
                token,
                ttl,
                watchdog: RenewalWatchdog::new(ttl),
            }),
        }
    }

    pub fn lock_name(&self) -> &str {
        self.inner.keys.name()
    }

    pub fn token(&self) -> &Token {
        &self.inner.token
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    /// Extend the lease once by its full TTL
    pub async fn refresh(&self) -> Result<()> {
        let inner = &self.inner;
        let result = inner.scripts.refresh(&inner.keys, &inner.token, inner.ttl).await;
        metrics::record_refresh(if result.is_ok() { "ok" } else { "error" });
        result
    }

    /// Keep the lease alive until the lock is released.
    ///
    /// Runs in the calling task, so callers usually spawn it:
    ///
    /// ```ignore
    /// let keeper = handle.clone();
    /// tokio::spawn(async move { keeper.start_auto_refresh().await });
    /// ```
    pub async fn start_auto_refresh(&self) {
        debug!(
            lock = %self.lock_name(),
            token = %self.token(),
            interval_ms = self.inner.watchdog.interval().as_millis() as u64,
            "Starting lease renewal"
        );
        self.inner.watchdog.run(|| self.refresh()).await;
    }

    /// Release the lock, stopping renewal first. Errors are logged and not retried.
    pub async fn release(&self) {
        if let Err(e) = self.try_release().await {
            warn!(lock = %self.lock_name(), token = %self.token(), error = %e, "Failed to release lock");
        }
    }

    /// Like [`release`](Self::release) but returns the error.
    ///
    /// A second release of the same handle fails with [`LockError::TokenMismatch`].
    pub async fn try_release(&self) -> Result<()> {
        let inner = &self.inner;
        inner.watchdog.terminate();

        let result = inner.scripts.release(&inner.keys, &inner.token).await;
        metrics::record_release(match &result {
            Ok(()) => "ok",
            Err(LockError::TokenMismatch) => "token_mismatch",
            Err(_) => "error",
        });
        if result.is_ok() {
            debug!(lock = %self.lock_name(), token = %self.token(), "Lock released");
        }
        result
    }

    pub fn is_renewal_stopped(&self) -> bool {
        self.inner.watchdog.is_terminated()
    }
}

impl std::fmt::Debug for LockHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockHandle")
            .field("lock", &self.inner.keys.name())
            .field("token", &self.inner.token)
            .field("ttl", &self.inner.ttl)
            .finish()
    }
}
