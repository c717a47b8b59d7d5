//! Dislock Core - distributed mutual-exclusion lock
//!
//! Processes sharing a key-value store with pub/sub and atomic scripting serialize access to a
//! named resource through this crate:
//! - [`LockCreator`] validates the lock name, checks the store and runs acquisition attempts
//! - [`LockHandle`] releases the lock and keeps its lease alive
//! - [`LockStore`] is the store boundary; [`MemoryStore`] implements it in-process
//!
//! ```ignore
//! let creator = create_lock_creator("orders", store).await?;
//! let handle = creator.acquire(Duration::from_secs(30), Duration::from_secs(3)).await?;
//! let keeper = handle.clone();
//! tokio::spawn(async move { keeper.start_auto_refresh().await });
//! // critical section
//! handle.release().await;
//! ```

pub mod atomic;
mod clock;
pub mod creator;
pub mod handle;
pub mod keys;
pub mod memory;
pub mod metrics;
pub mod script;
pub mod store;
pub mod token;
mod waiting;
pub mod watchdog;

pub use atomic::{AcquireOutcome, AtomicScripts};
pub use creator::{LockCreator, create_lock_creator};
pub use handle::LockHandle;
pub use keys::LockKeys;
pub use memory::MemoryStore;
pub use self::metrics::describe_metrics;
pub use script::{Script, ScriptName, ScriptTable};
pub use store::{LockStore, MessageStream};
pub use token::Token;
pub use watchdog::RenewalWatchdog;

pub use dislock_common::{ErrorKind, LockConfig, LockError, Result, StoreError};
