//! Dislock Redis - Redis backend for the lock protocol
//!
//! [`RedisStore`] runs the protocol scripts with `EVALSHA` (falling back to `EVAL` on a cold
//! script cache), multiplexes commands over a reconnecting connection manager, and opens a
//! dedicated pub/sub connection for every waiter subscription.

pub mod config;
pub mod store;

pub use config::{DEFAULT_REDIS_URL, RedisConfig};
pub use store::RedisStore;
