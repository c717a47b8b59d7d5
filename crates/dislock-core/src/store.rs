//! Store abstraction
//!
//! The lock needs three things from a key-value store: a liveness check, indivisible
//! execution of the named scripts in [`crate::script`], and subscription to a pub/sub channel.
//! Backends implement [`LockStore`]; the lock never talks to a store any other way.

use async_trait::async_trait;
use dislock_common::StoreError;
use futures::stream::BoxStream;

use crate::script::Script;

/// Payloads published on a subscribed channel
pub type MessageStream = BoxStream<'static, String>;

#[async_trait]
pub trait LockStore: Send + Sync {
    /// Check that the store is reachable
    async fn ping(&self) -> Result<(), StoreError>;

    /// Execute `script` atomically and return its integer result
    ///
    /// `keys` and `args` follow the layout documented on each [`crate::script::ScriptName`].
    async fn eval(&self, script: &Script, keys: &[String], args: &[String])
    -> Result<i64, StoreError>;

    /// Subscribe to `channel`
    ///
    /// The subscription must be active on the store when this returns, so that a message
    /// published afterwards is delivered on the stream. The stream ends if the subscription
    /// is lost.
    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError>;
}
