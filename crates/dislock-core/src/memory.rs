//! In-process store
//!
//! Implements the script contracts of [`crate::script`] natively over a mutex-guarded map, with
//! lazy key expiry and in-process pub/sub. Every script runs under a single lock acquisition, so
//! scripts are atomic with respect to each other exactly as they are on a real store.
//!
//! Used by tests and by the demo when no external store is configured.

use std::collections::{HashMap, VecDeque};
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use dislock_common::StoreError;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use crate::clock::instant_after;
use crate::script::{Script, ScriptName};
use crate::store::{LockStore, MessageStream};

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

#[derive(Default)]
struct State {
    strings: HashMap<String, StringEntry>,
    lists: HashMap<String, VecDeque<String>>,
    channels: HashMap<String, Vec<mpsc::UnboundedSender<String>>>,
}

impl State {
    fn get(&mut self, key: &str) -> Option<&str> {
        let now = Instant::now();
        if self.strings.get(key).is_some_and(|e| e.is_expired(now)) {
            self.strings.remove(key);
        }
        self.strings.get(key).map(|e| e.value.as_str())
    }

    fn set_nx_px(&mut self, key: &str, value: &str, ttl: Duration) -> bool {
        if self.get(key).is_some() {
            return false;
        }
        self.strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(instant_after(ttl)),
            },
        );
        true
    }

    fn del(&mut self, key: &str) -> bool {
        self.get(key).is_some() && self.strings.remove(key).is_some()
    }

    fn pexpire(&mut self, key: &str, ttl: Duration) -> bool {
        if self.get(key).is_none() {
            return false;
        }
        if let Some(entry) = self.strings.get_mut(key) {
            entry.expires_at = Some(instant_after(ttl));
        }
        true
    }

    fn rpush(&mut self, key: &str, value: &str) -> usize {
        let list = self.lists.entry(key.to_string()).or_default();
        list.push_back(value.to_string());
        list.len()
    }

    fn lpush(&mut self, key: &str, value: &str) -> usize {
        let list = self.lists.entry(key.to_string()).or_default();
        list.push_front(value.to_string());
        list.len()
    }

    fn lpop(&mut self, key: &str) -> Option<String> {
        let list = self.lists.get_mut(key)?;
        let value = list.pop_front();
        if list.is_empty() {
            self.lists.remove(key);
        }
        value
    }

    fn lrem(&mut self, key: &str, value: &str) {
        if let Some(list) = self.lists.get_mut(key) {
            list.retain(|v| v != value);
            if list.is_empty() {
                self.lists.remove(key);
            }
        }
    }

    /// Returns the number of subscribers that received the message
    fn publish(&mut self, channel: &str, message: &str) -> usize {
        let Some(subscribers) = self.channels.get_mut(channel) else {
            return 0;
        };
        subscribers.retain(|tx| tx.send(message.to_string()).is_ok());
        let delivered = subscribers.len();
        if delivered == 0 {
            self.channels.remove(channel);
        }
        delivered
    }
}

/// Receiving end of an in-process subscription; unregisters itself when dropped
struct Subscription {
    messages: UnboundedReceiverStream<String>,
    state: Arc<Mutex<State>>,
    channel: String,
}

impl Stream for Subscription {
    type Item = String;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<String>> {
        Pin::new(&mut self.messages).poll_next(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.messages.close();
        let mut state = self.state.lock();
        let unused = match state.channels.get_mut(&self.channel) {
            Some(subscribers) => {
                subscribers.retain(|tx| !tx.is_closed());
                subscribers.is_empty()
            }
            None => false,
        };
        if unused {
            state.channels.remove(&self.channel);
        }
    }
}

/// In-process implementation of [`LockStore`]
#[derive(Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    offline: AtomicBool,
    published: AtomicU64,
}

fn arg<'a>(args: &'a [String], index: usize) -> Result<&'a str, StoreError> {
    args.get(index)
        .map(String::as_str)
        .ok_or_else(|| StoreError::Command(format!("missing argument {}", index + 1)))
}

fn millis_arg(args: &[String], index: usize) -> Result<Duration, StoreError> {
    let raw = arg(args, index)?;
    match raw.parse::<u64>() {
        Ok(ms) if ms > 0 => Ok(Duration::from_millis(ms)),
        _ => Err(StoreError::Command(format!(
            "invalid expire time '{}' in argument {}",
            raw,
            index + 1
        ))),
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate the store becoming unreachable (or reachable again)
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Current value of a string key
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.lock().get(key).map(str::to_string)
    }

    /// Remaining time to live of a string key
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut state = self.state.lock();
        state.get(key)?;
        let now = Instant::now();
        state
            .strings
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(now))
    }

    /// Snapshot of a list
    pub fn list(&self, key: &str) -> Vec<String> {
        self.state
            .lock()
            .lists
            .get(key)
            .map(|l| l.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Unconditionally write a string key, like a plain `SET key value PX ttl`
    pub fn set(&self, key: &str, value: &str, ttl: Duration) {
        self.state.lock().strings.insert(
            key.to_string(),
            StringEntry {
                value: value.to_string(),
                expires_at: Some(instant_after(ttl)),
            },
        );
    }

    /// Number of channels with at least one live subscriber
    pub fn channel_count(&self) -> usize {
        self.state.lock().channels.len()
    }

    /// Total number of messages delivered to at least one subscriber
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::SeqCst)
    }

    fn check_online(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("store is offline".to_string()));
        }
        Ok(())
    }

    fn release(&self, state: &mut State, keys: &[String], args: &[String]) -> Result<i64, StoreError> {
        let (lock_key, queue_key) = (arg(keys, 0)?, arg(keys, 1)?);
        let token = arg(args, 0)?;
        let limit = arg(args, 1)?
            .parse::<u64>()
            .map_err(|e| StoreError::Command(format!("invalid wake limit: {}", e)))?;

        if state.get(lock_key) != Some(token) {
            return Ok(-1);
        }
        if !state.del(lock_key) {
            return Ok(-2);
        }

        let mut woken = 0;
        while woken < limit {
            let Some(waiter) = state.lpop(queue_key) else {
                break;
            };
            state.lrem(queue_key, &waiter);

            if state.get(&waiter) == Some(waiter.as_str())
                && state.del(&waiter)
                && waiter != token
                && state.publish(&waiter, &waiter) == 1
            {
                self.published.fetch_add(1, Ordering::SeqCst);
                woken += 1;
            }
        }
        debug!(lock = %lock_key, woken, "Released lock");
        Ok(1)
    }
}

#[async_trait]
impl LockStore for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.check_online()
    }

    async fn eval(&self, script: &Script, keys: &[String], args: &[String]) -> Result<i64, StoreError> {
        self.check_online()?;
        let mut state = self.state.lock();

        let code = match script.name() {
            ScriptName::Acquire => {
                let acquired = state.set_nx_px(arg(keys, 0)?, arg(args, 0)?, millis_arg(args, 1)?);
                i64::from(acquired)
            }
            ScriptName::PollAcquire => {
                let token = arg(args, 0)?;
                if state.set_nx_px(arg(keys, 0)?, token, millis_arg(args, 1)?) {
                    state.del(token);
                    1
                } else {
                    0
                }
            }
            ScriptName::Refresh => {
                let lock_key = arg(keys, 0)?;
                if state.get(lock_key) != Some(arg(args, 0)?) {
                    -1
                } else {
                    i64::from(state.pexpire(lock_key, millis_arg(args, 1)?))
                }
            }
            ScriptName::Release => self.release(&mut state, keys, args)?,
            ScriptName::Reserve => {
                let token = arg(args, 0)?;
                if !state.set_nx_px(token, token, millis_arg(args, 1)?) {
                    -1
                } else if state.rpush(arg(keys, 1)?, token) == 0 {
                    -2
                } else {
                    1
                }
            }
            ScriptName::Reacquire => {
                let token = arg(args, 0)?;
                if state.set_nx_px(arg(keys, 0)?, token, millis_arg(args, 1)?) {
                    1
                } else if !state.set_nx_px(token, token, millis_arg(args, 2)?) {
                    -1
                } else if state.lpush(arg(keys, 1)?, token) == 0 {
                    -2
                } else {
                    0
                }
            }
            ScriptName::Abandon => {
                let token = arg(args, 0)?;
                state.lrem(arg(keys, 1)?, token);
                if state.get(token) == Some(token) {
                    state.del(token);
                }
                1
            }
        };
        Ok(code)
    }

    async fn subscribe(&self, channel: &str) -> Result<MessageStream, StoreError> {
        self.check_online()?;
        let (tx, rx) = mpsc::unbounded_channel();
        self.state
            .lock()
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        Ok(Subscription {
            messages: UnboundedReceiverStream::new(rx),
            state: self.state.clone(),
            channel: channel.to_string(),
        }
        .boxed())
    }
}
