use std::path::PathBuf;

use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Registry};

pub struct LoggingConfig {
    pub level: String,
    pub console_output: bool,
    pub file_output: bool,
    pub log_dir: PathBuf,
    pub rotation: Rotation,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            console_output: true,
            file_output: true,
            log_dir: PathBuf::from("./logs"),
            rotation: Rotation::DAILY,
        }
    }
}

pub fn init_logging(config: LoggingConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.log_dir)?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let subscriber = Registry::default().with(env_filter);

    match (config.console_output, config.file_output) {
        (true, true) => {
            let file_appender =
                RollingFileAppender::new(config.rotation, &config.log_dir, "spayd.log");

            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_current_span(true)
                .with_span_list(true);

            let console_layer = fmt::layer()
                .pretty()
                .with_thread_ids(true)
                .with_target(true);

            subscriber.with(file_layer).with(console_layer).init();
        }
        (true, false) => {
            let console_layer = fmt::layer()
                .pretty()
                .with_thread_ids(true)
                .with_target(true);

            subscriber.with(console_layer).init();
        }
        (false, true) => {
            let file_appender =
                RollingFileAppender::new(config.rotation, &config.log_dir, "spayd.log");

            let file_layer = fmt::layer()
                .json()
                .with_writer(file_appender)
                .with_current_span(true)
                .with_span_list(true);

            subscriber.with(file_layer).init();
        }
        (false, false) => {
            return Err(anyhow::anyhow!(
                "At least one output (console or file) must be enabled"
            ));
        }
    }

    Ok(())
}
