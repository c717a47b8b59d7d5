// Flash-sale demo
// Runs the same sale twice, first uncoordinated and then under the distributed lock

mod flash_sale;
mod logging;
mod settings;

use std::sync::Arc;

use dislock_core::{LockCreator, LockStore, MemoryStore, describe_metrics};
use dislock_redis::RedisStore;
use tracing::info;

use crate::flash_sale::SaleReport;
use crate::logging::{LoggingConfig, init_logging};
use crate::settings::{Backend, DemoSettings};

fn log_report(mode: &str, report: &SaleReport) {
    info!(
        mode,
        buyers = report.buyers,
        stock = report.stock,
        sold = report.sold,
        oversold = report.oversold(),
        timed_out = report.timed_out,
        failed = report.failed,
        "Sale finished"
    );
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = DemoSettings::load()?;
    let _logging_guard = init_logging(&LoggingConfig::from(&settings.log))?;
    describe_metrics();

    let store: Arc<dyn LockStore> = match settings.backend {
        Backend::Memory => Arc::new(MemoryStore::new()),
        Backend::Redis => Arc::new(RedisStore::connect(&settings.redis).await?),
    };
    info!(backend = ?settings.backend, "Store ready");

    let sale = &settings.sale;
    let unlocked = flash_sale::run_unlocked(sale).await;
    log_report("unlocked", &unlocked);

    let creator = LockCreator::with_config(&sale.lock_name, store, settings.lock.clone()).await?;
    let locked = flash_sale::run_locked(sale, &creator).await;
    log_report("locked", &locked);

    if locked.oversold() > 0 {
        anyhow::bail!("locked sale oversold {} items", locked.oversold());
    }
    Ok(())
}
