//! Waiting protocol
//!
//! An acquisition attempt first tries the lock once. If it is held, two tasks race for the lock
//! until one of them produces a result:
//!
//! - the poll task retries the lock every poll interval;
//! - the subscribe task joins the wait queue and retries whenever the releasing holder wakes it.
//!
//! The caller side owns the wait deadline and offers a timeout when it passes, even while a
//! store call is still in flight. The first result offered to the [`ResultSlot`] wins. A task that obtains the lock after the slot
//! was taken releases it again, so a caller that saw an error never holds the lock.

use std::sync::{Arc, Weak};
use std::time::Duration;

use dislock_common::{LockError, Result};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::atomic::{AcquireOutcome, AtomicScripts};
use crate::clock::{FAR_FUTURE, instant_after};
use crate::keys::LockKeys;
use crate::token::Token;

/// Holds the sender for the attempt's result; only the first offer is delivered
struct ResultSlot {
    sender: Mutex<Option<oneshot::Sender<Result<()>>>>,
}

impl ResultSlot {
    fn new(sender: oneshot::Sender<Result<()>>) -> Self {
        Self {
            sender: Mutex::new(Some(sender)),
        }
    }

    /// Returns `true` if `result` reached the waiting caller
    fn offer(&self, result: Result<()>) -> bool {
        match self.sender.lock().take() {
            Some(sender) => sender.send(result).is_ok(),
            None => false,
        }
    }
}

/// One acquisition attempt by one token
pub(crate) struct Attempt {
    scripts: AtomicScripts,
    keys: LockKeys,
    token: Token,
    ttl: Duration,
    deadline: Instant,
    poll_interval: Duration,
}

impl Attempt {
    pub(crate) fn new(
        scripts: AtomicScripts,
        keys: LockKeys,
        token: Token,
        ttl: Duration,
        wait_timeout: Duration,
        poll_interval: Duration,
    ) -> Self {
        Self {
            scripts,
            keys,
            token,
            ttl,
            deadline: instant_after(wait_timeout),
            poll_interval: poll_interval.clamp(Duration::from_millis(1), FAR_FUTURE),
        }
    }

    /// Wait budget left, or `None` once it drops below one millisecond
    fn remaining(&self) -> Option<Duration> {
        let left = self.deadline.saturating_duration_since(Instant::now());
        (left >= Duration::from_millis(1)).then_some(left)
    }

    /// Run the attempt to completion. `Ok` means the token now holds the lock.
    pub(crate) async fn run(self) -> Result<()> {
        match self.scripts.acquire(&self.keys, &self.token, self.ttl).await? {
            AcquireOutcome::Acquired => {
                debug!(lock = %self.keys.name(), token = %self.token, "Lock acquired on fast path");
                return Ok(());
            }
            AcquireOutcome::Blocked => {
                debug!(lock = %self.keys.name(), token = %self.token, "Lock held, contending");
            }
        }

        let attempt = Arc::new(self);
        let quit = CancellationToken::new();
        // Stops both tasks if the caller drops this future
        let _quit_on_drop = quit.clone().drop_guard();

        let (sender, mut receiver) = oneshot::channel();
        let slot = Arc::new(ResultSlot::new(sender));
        // Weak, so the receiver still errors if both tasks exit without a result
        let deadline_slot: Weak<ResultSlot> = Arc::downgrade(&slot);

        let poller = tokio::spawn(attempt.clone().poll(slot.clone(), quit.clone()));
        let subscriber = tokio::spawn(attempt.clone().subscribe(slot, quit.clone()));

        let deadline = tokio::time::sleep_until(attempt.deadline);
        tokio::pin!(deadline);
        let delivered = tokio::select! {
            biased;
            delivered = &mut receiver => delivered,
            _ = &mut deadline => {
                if deadline_slot.upgrade().is_some_and(|slot| slot.offer(Err(LockError::Timeout))) {
                    debug!(lock = %attempt.keys.name(), token = %attempt.token, "Wait deadline passed");
                }
                (&mut receiver).await
            }
        };
        let result = delivered.unwrap_or_else(|_| {
            Err(LockError::AcquireFailed(
                "waiting tasks exited without a result".to_string(),
            ))
        });
        quit.cancel();

        let (polled, subscribed) = tokio::join!(poller, subscriber);
        for joined in [polled, subscribed] {
            if let Err(e) = joined {
                warn!(lock = %attempt.keys.name(), error = %e, "Waiting task failed");
            }
        }

        if matches!(result, Err(LockError::Timeout)) {
            if let Err(e) = attempt.scripts.abandon(&attempt.keys, &attempt.token).await {
                debug!(lock = %attempt.keys.name(), error = %e, "Failed to leave wait queue");
            }
        }
        result
    }

    /// Deliver a win, or give the lock back if another result was already delivered
    async fn settle_acquired(&self, slot: &ResultSlot, quit: &CancellationToken) {
        if slot.offer(Ok(())) {
            quit.cancel();
            return;
        }
        debug!(lock = %self.keys.name(), token = %self.token, "Lock obtained after attempt finished, releasing");
        if let Err(e) = self.scripts.release(&self.keys, &self.token).await {
            warn!(lock = %self.keys.name(), token = %self.token, error = %e, "Failed to release late lock");
        }
    }

    fn settle_failed(&self, slot: &ResultSlot, quit: &CancellationToken, error: LockError) {
        debug!(lock = %self.keys.name(), token = %self.token, error = %error, "Attempt failed");
        slot.offer(Err(error));
        quit.cancel();
    }

    async fn poll(self: Arc<Self>, slot: Arc<ResultSlot>, quit: CancellationToken) {
        let mut ticker =
            tokio::time::interval_at(instant_after(self.poll_interval), self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = quit.cancelled() => return,
                _ = ticker.tick() => {
                    match self.scripts.poll_acquire(&self.keys, &self.token, self.ttl).await {
                        Ok(AcquireOutcome::Acquired) => {
                            self.settle_acquired(&slot, &quit).await;
                            return;
                        }
                        Ok(AcquireOutcome::Blocked) => {}
                        Err(e) => {
                            self.settle_failed(&slot, &quit, e);
                            return;
                        }
                    }
                }
            }
        }
    }

    async fn subscribe(self: Arc<Self>, slot: Arc<ResultSlot>, quit: CancellationToken) {
        let mut messages = tokio::select! {
            biased;
            _ = quit.cancelled() => return,
            subscribed = self.scripts.store().subscribe(self.token.as_str()) => match subscribed {
                Ok(messages) => messages,
                Err(e) => {
                    self.settle_failed(&slot, &quit, LockError::SubscribeFailed(e.to_string()));
                    return;
                }
            },
        };

        let Some(remaining) = self.remaining() else {
            self.settle_failed(&slot, &quit, LockError::Timeout);
            return;
        };
        if let Err(e) = self.scripts.reserve(&self.keys, &self.token, remaining).await {
            self.settle_failed(&slot, &quit, e);
            return;
        }
        debug!(lock = %self.keys.name(), token = %self.token, "Joined wait queue");

        loop {
            let message = tokio::select! {
                biased;
                _ = quit.cancelled() => return,
                message = messages.next() => message,
            };
            if message.is_none() {
                self.settle_failed(
                    &slot,
                    &quit,
                    LockError::SubscribeFailed("subscription closed".to_string()),
                );
                return;
            }

            let Some(remaining) = self.remaining() else {
                self.settle_failed(&slot, &quit, LockError::Timeout);
                return;
            };
            debug!(lock = %self.keys.name(), token = %self.token, "Woken, retrying lock");
            match self
                .scripts
                .reacquire(&self.keys, &self.token, self.ttl, remaining)
                .await
            {
                Ok(AcquireOutcome::Acquired) => {
                    self.settle_acquired(&slot, &quit).await;
                    return;
                }
                Ok(AcquireOutcome::Blocked) => {}
                Err(e) => {
                    self.settle_failed(&slot, &quit, e);
                    return;
                }
            }
        }
    }
}
