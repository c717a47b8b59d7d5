//! Demo settings
//!
//! Layered in increasing priority: `conf/dislock.yml` (optional), `DISLOCK.*` environment
//! variables, then command-line flags.

use std::time::Duration;

use clap::{Parser, ValueEnum};
use config::{Config, Environment, File};
use dislock_common::LockConfig;
use dislock_redis::RedisConfig;
use serde::{Deserialize, Serialize};

pub const DEFAULT_CONFIG_FILE: &str = "conf/dislock.yml";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process store, no server needed
    #[default]
    Memory,
    Redis,
}

impl Backend {
    fn as_str(&self) -> &'static str {
        match self {
            Backend::Memory => "memory",
            Backend::Redis => "redis",
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "dislock-demo", about = "Flash-sale simulation with and without a distributed lock")]
struct Cli {
    #[arg(short = 'c', long = "config", default_value = DEFAULT_CONFIG_FILE)]
    config: String,
    #[arg(short = 'b', long = "backend", value_enum)]
    backend: Option<Backend>,
    #[arg(long = "redis-url", env = "REDIS_URL")]
    redis_url: Option<String>,
    #[arg(short = 'n', long = "contenders")]
    contenders: Option<u32>,
    #[arg(short = 's', long = "stock")]
    stock: Option<u32>,
    #[arg(long = "ttl-ms")]
    ttl_ms: Option<u64>,
    #[arg(long = "wait-ms")]
    wait_ms: Option<u64>,
    #[arg(short = 'l', long = "log-level")]
    log_level: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SaleSettings {
    pub lock_name: String,
    /// Number of concurrent buyers
    pub contenders: u32,
    /// Items for sale
    pub stock: u32,
    pub ttl_ms: u64,
    pub wait_ms: u64,
    /// Time each buyer spends between reading and writing the stock
    pub work_ms: u64,
}

impl Default for SaleSettings {
    fn default() -> Self {
        Self {
            lock_name: "flash_sale".to_string(),
            contenders: 50,
            stock: 10,
            ttl_ms: 30_000,
            wait_ms: 10_000,
            work_ms: 5,
        }
    }
}

impl SaleSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }

    pub fn work(&self) -> Duration {
        Duration::from_millis(self.work_ms)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    pub level: String,
    pub console: bool,
    /// Directory for daily rolling log files; file logging is off when unset
    pub dir: Option<String>,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console: true,
            dir: None,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    pub backend: Backend,
    pub redis: RedisConfig,
    pub lock: LockConfig,
    pub sale: SaleSettings,
    pub log: LogSettings,
}

impl DemoSettings {
    /// Load from the config file, environment and command line
    pub fn load() -> anyhow::Result<Self> {
        let args = Cli::parse();

        let mut builder = Config::builder()
            .add_source(File::with_name(&args.config).required(false))
            .add_source(
                Environment::with_prefix("DISLOCK")
                    .separator(".")
                    .try_parsing(true),
            );

        if let Some(v) = args.backend {
            builder = builder.set_override("backend", v.as_str())?;
        }
        if let Some(v) = args.redis_url {
            builder = builder.set_override("redis.url", v)?;
        }
        if let Some(v) = args.contenders {
            builder = builder.set_override("sale.contenders", u64::from(v))?;
        }
        if let Some(v) = args.stock {
            builder = builder.set_override("sale.stock", u64::from(v))?;
        }
        if let Some(v) = args.ttl_ms {
            builder = builder.set_override("sale.ttl_ms", v)?;
        }
        if let Some(v) = args.wait_ms {
            builder = builder.set_override("sale.wait_ms", v)?;
        }
        if let Some(v) = args.log_level {
            builder = builder.set_override("log.level", v)?;
        }

        Ok(builder.build()?.try_deserialize()?)
    }
}
