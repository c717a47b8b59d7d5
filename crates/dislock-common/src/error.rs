//! Error types for dislock
//!
//! This module defines:
//! - `StoreError`: failures reported by a key-value store backend
//! - `LockError`: errors surfaced by the lock creator, the waiting protocol and lock handles
//! - `ErrorKind`: coarse classification so callers can tell contention from broken infrastructure

use std::time::Duration;

/// Errors reported by a store backend
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("subscribe error: {0}")]
    Subscribe(String),
}

/// Coarse error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Rejected before any store I/O
    Configuration,
    /// Store unreachable or a script failed to execute
    Fatal,
    /// Wait budget exhausted while the lock stayed held
    Timeout,
    /// Refresh or release by a caller that no longer holds the lock
    TokenMismatch,
    /// A script returned a code outside its contract
    Protocol,
}

/// Lock errors
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LockError {
    #[error("lock name is invalid, the length should be greater than zero")]
    InvalidLockName,

    #[error("ttl {0:?} is out of range, it must be between 3ms and 3650 days")]
    InvalidTtl(Duration),

    #[error("connect store fail: {0}")]
    ConnectionFailed(String),

    #[error("acquire lock fail: {0}")]
    AcquireFailed(String),

    #[error("active acquire fail: {0}")]
    ActiveAcquireFailed(String),

    #[error("queue up fail: {0}")]
    QueueUpFailed(String),

    #[error("subscribe wake channel fail: {0}")]
    SubscribeFailed(String),

    #[error("token does not match")]
    TokenMismatch,

    #[error("refresh lock fail: {0}")]
    RefreshFailed(String),

    #[error("release lock fail: {0}")]
    ReleaseFailed(String),

    #[error("delete key fail in the process of releasing the lock")]
    ReleaseDeleteFailed,

    #[error("waiting for lock timeout")]
    Timeout,

    #[error("script '{script}' returned unknown code {code}")]
    UnknownScriptResult { script: &'static str, code: i64 },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl LockError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LockError::InvalidLockName | LockError::InvalidTtl(_) => ErrorKind::Configuration,
            LockError::Timeout => ErrorKind::Timeout,
            LockError::TokenMismatch => ErrorKind::TokenMismatch,
            LockError::UnknownScriptResult { .. } => ErrorKind::Protocol,
            LockError::ConnectionFailed(_)
            | LockError::AcquireFailed(_)
            | LockError::ActiveAcquireFailed(_)
            | LockError::QueueUpFailed(_)
            | LockError::SubscribeFailed(_)
            | LockError::RefreshFailed(_)
            | LockError::ReleaseFailed(_)
            | LockError::ReleaseDeleteFailed
            | LockError::Store(_) => ErrorKind::Fatal,
        }
    }

    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}

pub type Result<T> = std::result::Result<T, LockError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_error_display() {
        let err = LockError::InvalidTtl(Duration::from_millis(2));
        assert_eq!(
            err.to_string(),
            "ttl 2ms is out of range, it must be between 3ms and 3650 days"
        );

        let err = LockError::AcquireFailed("broken pipe".to_string());
        assert_eq!(err.to_string(), "acquire lock fail: broken pipe");

        let err = LockError::UnknownScriptResult {
            script: "refresh",
            code: 0,
        };
        assert_eq!(err.to_string(), "script 'refresh' returned unknown code 0");

        let err: LockError = StoreError::Connection("refused".to_string()).into();
        assert_eq!(err.to_string(), "store error: connection error: refused");
    }

    #[test]
    fn test_error_kind() {
        assert_eq!(LockError::InvalidLockName.kind(), ErrorKind::Configuration);
        assert_eq!(
            LockError::InvalidTtl(Duration::ZERO).kind(),
            ErrorKind::Configuration
        );
        assert_eq!(LockError::TokenMismatch.kind(), ErrorKind::TokenMismatch);
        assert_eq!(LockError::ReleaseDeleteFailed.kind(), ErrorKind::Fatal);
        assert_eq!(
            LockError::UnknownScriptResult {
                script: "release",
                code: 7
            }
            .kind(),
            ErrorKind::Protocol
        );
        assert!(LockError::Timeout.is_timeout());
        assert!(!LockError::Timeout.is_fatal());
        assert!(LockError::QueueUpFailed("rejoin".to_string()).is_fatal());
    }
}
