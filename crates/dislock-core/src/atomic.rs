//! Atomic script layer
//!
//! Typed wrappers around the protocol scripts. Each method runs one script through the
//! [`LockStore`] and translates its return code into an outcome or a [`LockError`].

use std::sync::Arc;
use std::time::Duration;

use dislock_common::{LockError, MAX_WAKE_FANOUT, Result};
use tracing::debug;

use crate::clock::FAR_FUTURE;
use crate::keys::LockKeys;
use crate::script::{ScriptName, ScriptTable};
use crate::store::LockStore;
use crate::token::Token;

/// Result of an attempt to set the lock key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired,
    Blocked,
}

#[derive(Clone)]
pub struct AtomicScripts {
    store: Arc<dyn LockStore>,
    table: Arc<ScriptTable>,
}

fn millis(duration: Duration) -> String {
    duration.min(FAR_FUTURE).as_millis().max(1).to_string()
}

impl AtomicScripts {
    pub fn new(store: Arc<dyn LockStore>, table: Arc<ScriptTable>) -> Self {
        Self { store, table }
    }

    pub fn store(&self) -> &Arc<dyn LockStore> {
        &self.store
    }

    async fn run(&self, name: ScriptName, keys: &LockKeys, args: &[String]) -> Result<i64> {
        let code = self
            .store
            .eval(self.table.get(name), &keys.script_keys(), args)
            .await?;
        debug!(script = %name, lock = %keys.name(), code, "Script executed");
        Ok(code)
    }

    /// Fast-path acquire: set the lock key if absent
    pub async fn acquire(&self, keys: &LockKeys, token: &Token, ttl: Duration) -> Result<AcquireOutcome> {
        let code = self
            .run(ScriptName::Acquire, keys, &[token.to_string(), millis(ttl)])
            .await
            .map_err(|e| LockError::AcquireFailed(e.to_string()))?;
        Ok(if code == 1 {
            AcquireOutcome::Acquired
        } else {
            AcquireOutcome::Blocked
        })
    }

    /// Periodic acquire attempt while contended; drops the caller's reservation on success
    pub async fn poll_acquire(
        &self,
        keys: &LockKeys,
        token: &Token,
        ttl: Duration,
    ) -> Result<AcquireOutcome> {
        let code = self
            .run(ScriptName::PollAcquire, keys, &[token.to_string(), millis(ttl)])
            .await
            .map_err(|e| LockError::ActiveAcquireFailed(e.to_string()))?;
        Ok(if code == 1 {
            AcquireOutcome::Acquired
        } else {
            AcquireOutcome::Blocked
        })
    }

    /// Extend the lease if `token` still holds the lock
    pub async fn refresh(&self, keys: &LockKeys, token: &Token, ttl: Duration) -> Result<()> {
        let code = self
            .run(ScriptName::Refresh, keys, &[token.to_string(), millis(ttl)])
            .await
            .map_err(|e| LockError::RefreshFailed(e.to_string()))?;
        match code {
            1 => Ok(()),
            -1 => Err(LockError::TokenMismatch),
            code => Err(LockError::UnknownScriptResult {
                script: ScriptName::Refresh.as_str(),
                code,
            }),
        }
    }

    /// Delete the lock key if `token` holds it and wake up to [`MAX_WAKE_FANOUT`] waiters
    pub async fn release(&self, keys: &LockKeys, token: &Token) -> Result<()> {
        let code = self
            .run(
                ScriptName::Release,
                keys,
                &[token.to_string(), MAX_WAKE_FANOUT.to_string()],
            )
            .await
            .map_err(|e| LockError::ReleaseFailed(e.to_string()))?;
        match code {
            1 => Ok(()),
            -1 => Err(LockError::TokenMismatch),
            -2 => Err(LockError::ReleaseDeleteFailed),
            code => Err(LockError::UnknownScriptResult {
                script: ScriptName::Release.as_str(),
                code,
            }),
        }
    }

    /// Create the reservation entry for `remaining` and join the wait queue
    pub async fn reserve(&self, keys: &LockKeys, token: &Token, remaining: Duration) -> Result<()> {
        let code = self
            .run(ScriptName::Reserve, keys, &[token.to_string(), millis(remaining)])
            .await
            .map_err(|e| LockError::QueueUpFailed(e.to_string()))?;
        match code {
            1 => Ok(()),
            -1 => Err(LockError::QueueUpFailed("reservation exists".to_string())),
            -2 => Err(LockError::QueueUpFailed("push fail".to_string())),
            code => Err(LockError::UnknownScriptResult {
                script: ScriptName::Reserve.as_str(),
                code,
            }),
        }
    }

    /// Try the lock after a wake; otherwise reserve again and rejoin the queue
    pub async fn reacquire(
        &self,
        keys: &LockKeys,
        token: &Token,
        ttl: Duration,
        remaining: Duration,
    ) -> Result<AcquireOutcome> {
        let code = self
            .run(
                ScriptName::Reacquire,
                keys,
                &[token.to_string(), millis(ttl), millis(remaining)],
            )
            .await
            .map_err(|e| LockError::AcquireFailed(e.to_string()))?;
        match code {
            1 => Ok(AcquireOutcome::Acquired),
            0 => Ok(AcquireOutcome::Blocked),
            -1 => Err(LockError::QueueUpFailed("reset fail".to_string())),
            -2 => Err(LockError::QueueUpFailed("rejoin fail".to_string())),
            code => Err(LockError::UnknownScriptResult {
                script: ScriptName::Reacquire.as_str(),
                code,
            }),
        }
    }

    /// Leave the queue and drop the reservation entry
    pub async fn abandon(&self, keys: &LockKeys, token: &Token) -> Result<()> {
        self.run(ScriptName::Abandon, keys, &[token.to_string()]).await?;
        Ok(())
    }
}
