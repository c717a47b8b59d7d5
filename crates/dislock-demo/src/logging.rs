//! Logging initialization
//!
//! Console output plus an optional daily rolling `dislock.log`. `RUST_LOG` takes precedence
//! over the configured level for every layer.

use std::path::PathBuf;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt};

use crate::settings::LogSettings;

const LOG_FILE_NAME: &str = "dislock.log";

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    pub level: String,
    pub console_output: bool,
    /// File logging is enabled when set
    pub log_dir: Option<PathBuf>,
}

impl From<&LogSettings> for LoggingConfig {
    fn from(settings: &LogSettings) -> Self {
        Self {
            level: settings.level.clone(),
            console_output: settings.console,
            log_dir: settings.dir.as_ref().map(PathBuf::from),
        }
    }
}

/// Keeps the non-blocking file writer alive; buffered output is flushed on drop
pub struct LoggingGuard {
    _file_guard: Option<WorkerGuard>,
}

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<LoggingGuard> {
    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    let mut file_guard = None;

    if config.console_output {
        let console_layer = fmt::layer()
            .with_target(true)
            .with_thread_names(true)
            .with_filter(filter(&config.level));
        layers.push(Box::new(console_layer));
    }

    if let Some(log_dir) = &config.log_dir {
        std::fs::create_dir_all(log_dir)?;
        let appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_NAME);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        file_guard = Some(guard);

        let file_layer = fmt::layer()
            .with_writer(writer)
            .with_target(true)
            .with_thread_names(true)
            .with_ansi(false)
            .with_filter(filter(&config.level));
        layers.push(Box::new(file_layer));
    }

    Registry::default()
        .with(layers)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    if let Some(log_dir) = &config.log_dir {
        tracing::info!(log_dir = %log_dir.display(), "File logging initialized");
    }

    Ok(LoggingGuard {
        _file_guard: file_guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_settings() {
        let settings = LogSettings {
            level: "debug".to_string(),
            console: false,
            dir: Some("logs".to_string()),
        };
        let config = LoggingConfig::from(&settings);
        assert_eq!(config.level, "debug");
        assert!(!config.console_output);
        assert_eq!(config.log_dir, Some(PathBuf::from("logs")));
    }

    #[test]
    fn test_file_logging_off_by_default() {
        let config = LoggingConfig::from(&LogSettings::default());
        assert!(config.console_output);
        assert!(config.log_dir.is_none());
    }
}
