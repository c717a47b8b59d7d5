//! Dislock Common - Shared types and constants
//!
//! This crate provides the foundational types used across all dislock components:
//! - Error types and the error taxonomy
//! - Lock configuration
//! - Common constants

pub mod config;
pub mod error;

// Re-exports for convenience
pub use config::LockConfig;
pub use error::{ErrorKind, LockError, Result, StoreError};

/// Default prefix of the key holding the current holder's token
pub const DEFAULT_LOCK_KEY_PREFIX: &str = "DistributedLock_";

/// Default prefix of the list holding queued waiter tokens
pub const DEFAULT_QUEUE_KEY_PREFIX: &str = "DistributedLockQueue_";

/// Default prefix of generated tokens
pub const DEFAULT_TOKEN_PREFIX: &str = "lockId_";

/// Default interval between active acquire attempts while contended
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 300;

/// Shortest lease accepted by `acquire`. The renewal interval is a third of the lease,
/// so anything shorter would tick at zero milliseconds.
pub const MIN_TTL_MS: u128 = 3;

/// Longest lease accepted by `acquire` (3650 days)
pub const MAX_TTL_MS: u128 = 3650 * 24 * 60 * 60 * 1000;

/// Maximum number of queued waiters a single release wakes up
pub const MAX_WAKE_FANOUT: u32 = 3;
