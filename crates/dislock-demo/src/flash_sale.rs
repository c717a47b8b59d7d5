//! Flash-sale simulation
//!
//! Buyers decrement a shared stock counter with a non-atomic read, pause, write sequence.
//! Without coordination several buyers read the same count and the shop sells more items than it
//! has. Wrapping the sequence in the distributed lock makes every sale observe the previous one.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::time::Duration;

use dislock_core::LockCreator;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::settings::SaleSettings;

/// Shared stock counter with deliberately separate read and write steps
struct Shelf {
    stock: AtomicI64,
    sold: AtomicU32,
}

impl Shelf {
    fn new(stock: u32) -> Self {
        Self {
            stock: AtomicI64::new(i64::from(stock)),
            sold: AtomicU32::new(0),
        }
    }

    /// Returns `true` if the buyer got an item
    async fn buy(&self, work: Duration) -> bool {
        let seen = self.stock.load(Ordering::SeqCst);
        if seen <= 0 {
            return false;
        }
        tokio::time::sleep(work).await;
        self.stock.store(seen - 1, Ordering::SeqCst);
        self.sold.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SaleReport {
    pub buyers: u32,
    pub stock: u32,
    pub sold: u32,
    /// Buyers that gave up waiting for the lock
    pub timed_out: u32,
    /// Buyers that failed for any other reason
    pub failed: u32,
}

impl SaleReport {
    /// Items sold beyond the available stock
    pub fn oversold(&self) -> u32 {
        self.sold.saturating_sub(self.stock)
    }
}

enum Outcome {
    Bought,
    SoldOut,
    TimedOut,
    Failed,
}

fn report(settings: &SaleSettings, shelf: &Shelf, outcomes: Vec<Outcome>) -> SaleReport {
    let mut report = SaleReport {
        buyers: settings.contenders,
        stock: settings.stock,
        sold: shelf.sold.load(Ordering::SeqCst),
        ..SaleReport::default()
    };
    for outcome in outcomes {
        match outcome {
            Outcome::TimedOut => report.timed_out += 1,
            Outcome::Failed => report.failed += 1,
            Outcome::Bought | Outcome::SoldOut => {}
        }
    }
    report
}

async fn join_all(mut buyers: JoinSet<Outcome>) -> Vec<Outcome> {
    let mut outcomes = Vec::new();
    while let Some(joined) = buyers.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => {
                warn!(error = %e, "Buyer task failed");
                outcomes.push(Outcome::Failed);
            }
        }
    }
    outcomes
}

fn jitter() -> Duration {
    Duration::from_micros(rand::random_range(0..500))
}

/// Run the sale with every buyer racing on the shelf directly
pub async fn run_unlocked(settings: &SaleSettings) -> SaleReport {
    let shelf = Arc::new(Shelf::new(settings.stock));
    let mut buyers = JoinSet::new();

    for _ in 0..settings.contenders {
        let shelf = shelf.clone();
        let work = settings.work();
        buyers.spawn(async move {
            tokio::time::sleep(jitter()).await;
            if shelf.buy(work).await {
                Outcome::Bought
            } else {
                Outcome::SoldOut
            }
        });
    }

    let outcomes = join_all(buyers).await;
    report(settings, &shelf, outcomes)
}

/// Run the sale with each purchase inside the distributed lock
pub async fn run_locked(settings: &SaleSettings, creator: &LockCreator) -> SaleReport {
    let shelf = Arc::new(Shelf::new(settings.stock));
    let mut buyers = JoinSet::new();

    for buyer in 0..settings.contenders {
        let shelf = shelf.clone();
        let creator = creator.clone();
        let (ttl, wait, work) = (settings.ttl(), settings.wait_timeout(), settings.work());
        buyers.spawn(async move {
            tokio::time::sleep(jitter()).await;
            let handle = match creator.acquire(ttl, wait).await {
                Ok(handle) => handle,
                Err(e) if e.is_timeout() => {
                    debug!(buyer, "Gave up waiting for the lock");
                    return Outcome::TimedOut;
                }
                Err(e) => {
                    warn!(buyer, error = %e, "Failed to acquire lock");
                    return Outcome::Failed;
                }
            };

            let keeper = handle.clone();
            let renewal = tokio::spawn(async move { keeper.start_auto_refresh().await });

            let bought = shelf.buy(work).await;
            handle.release().await;
            if let Err(e) = renewal.await {
                warn!(buyer, error = %e, "Renewal task failed");
            }

            if bought {
                debug!(buyer, token = %handle.token(), "Bought an item");
                Outcome::Bought
            } else {
                Outcome::SoldOut
            }
        });
    }

    let outcomes = join_all(buyers).await;
    report(settings, &shelf, outcomes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dislock_common::LockConfig;
    use dislock_core::{LockStore, MemoryStore};

    fn settings(contenders: u32, stock: u32) -> SaleSettings {
        SaleSettings {
            contenders,
            stock,
            wait_ms: 10_000,
            work_ms: 5,
            ..SaleSettings::default()
        }
    }

    #[test]
    fn test_oversold() {
        let report = SaleReport {
            stock: 3,
            sold: 5,
            ..SaleReport::default()
        };
        assert_eq!(report.oversold(), 2);
        assert_eq!(SaleReport::default().oversold(), 0);
    }

    #[tokio::test]
    async fn test_unlocked_sale_oversells() {
        let report = run_unlocked(&settings(20, 5)).await;
        assert!(report.oversold() > 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_locked_sale_never_oversells() {
        let store: Arc<dyn LockStore> = Arc::new(MemoryStore::new());
        let config = LockConfig::default().with_poll_interval(Duration::from_millis(20));
        let creator = LockCreator::with_config("sale", store, config).await.unwrap();

        let report = run_locked(&settings(20, 5), &creator).await;
        assert_eq!(report.sold, 5);
        assert_eq!(report.oversold(), 0);
        assert_eq!(report.timed_out, 0);
        assert_eq!(report.failed, 0);
    }
}
