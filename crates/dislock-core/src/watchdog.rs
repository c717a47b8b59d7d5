//! Lease renewal watchdog
//!
//! Re-extends a held lease every third of its TTL until terminated. A failed refresh is retried
//! once right away; if the retry fails too, the watchdog waits for the next tick. It never stops
//! on its own: only [`RenewalWatchdog::terminate`] ends the loop.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use dislock_common::Result;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::clock::{FAR_FUTURE, instant_after};

pub struct RenewalWatchdog {
    interval: Duration,
    terminated: AtomicBool,
    cancel: CancellationToken,
}

impl RenewalWatchdog {
    /// Create a stopped watchdog for a lease of `ttl`
    pub fn new(ttl: Duration) -> Self {
        let third = u64::try_from(ttl.as_millis() / 3).unwrap_or(u64::MAX);
        let interval = Duration::from_millis(third.max(1)).min(FAR_FUTURE);
        Self {
            interval,
            terminated: AtomicBool::new(false),
            cancel: CancellationToken::new(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Stop the renewal loop. Returns `false` if it was already terminated.
    pub fn terminate(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.cancel.cancel();
        true
    }

    /// Run the renewal loop until [`terminate`](Self::terminate) is called
    pub async fn run<F, Fut>(&self, mut refresh: F)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        if self.is_terminated() {
            return;
        }

        let mut ticker = tokio::time::interval_at(instant_after(self.interval), self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let renew = async {
                        if let Err(e) = refresh().await {
                            debug!(error = %e, "Lease refresh failed, retrying");
                            if let Err(e) = refresh().await {
                                warn!(error = %e, "Lease refresh retry failed, waiting for next tick");
                            }
                        }
                    };
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => break,
                        _ = renew => {}
                    }
                }
            }
        }
        debug!("Renewal watchdog terminated");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dislock_common::LockError;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_interval_is_third_of_ttl() {
        assert_eq!(
            RenewalWatchdog::new(Duration::from_secs(30)).interval(),
            Duration::from_secs(10)
        );
        assert_eq!(
            RenewalWatchdog::new(Duration::from_millis(3)).interval(),
            Duration::from_millis(1)
        );
        assert_eq!(
            RenewalWatchdog::new(Duration::from_millis(100)).interval(),
            Duration::from_millis(33)
        );
    }

    #[test]
    fn test_interval_for_huge_ttl() {
        let watchdog = RenewalWatchdog::new(Duration::MAX);
        assert_eq!(watchdog.interval(), FAR_FUTURE);
    }

    #[tokio::test]
    async fn test_huge_ttl_runs_until_terminated() {
        let watchdog = Arc::new(RenewalWatchdog::new(Duration::MAX));
        let handle = {
            let watchdog = watchdog.clone();
            tokio::spawn(async move { watchdog.run(|| async { Ok(()) }).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(watchdog.terminate());
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_terminate_once() {
        let watchdog = RenewalWatchdog::new(Duration::from_secs(3));
        assert!(!watchdog.is_terminated());
        assert!(watchdog.terminate());
        assert!(!watchdog.terminate());
        assert!(watchdog.is_terminated());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refreshes_every_tick() {
        let watchdog = Arc::new(RenewalWatchdog::new(Duration::from_millis(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = {
            let watchdog = watchdog.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                watchdog
                    .run(|| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(watchdog.terminate());
        handle.await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_refresh_retried_once_and_loop_survives() {
        let watchdog = Arc::new(RenewalWatchdog::new(Duration::from_millis(30)));
        let calls = Arc::new(AtomicUsize::new(0));

        let handle = {
            let watchdog = watchdog.clone();
            let calls = calls.clone();
            tokio::spawn(async move {
                watchdog
                    .run(|| {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            Err(LockError::TokenMismatch)
                        }
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(35)).await;
        assert!(!handle.is_finished());
        watchdog.terminate();
        handle.await.unwrap();
        // three ticks, each with one retry
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_run_after_terminate_returns_immediately() {
        let watchdog = RenewalWatchdog::new(Duration::from_secs(30));
        watchdog.terminate();
        tokio::time::timeout(Duration::from_millis(100), watchdog.run(|| async { Ok(()) }))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_terminate_interrupts_slow_refresh() {
        let watchdog = Arc::new(RenewalWatchdog::new(Duration::from_millis(3)));
        let handle = {
            let watchdog = watchdog.clone();
            tokio::spawn(async move {
                watchdog
                    .run(|| async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    })
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        watchdog.terminate();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
