use std::sync::Arc;

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

const LOG_FILE_NAME: &str = "roomwatch.log";

/// Initialize structured logging based on configuration
///
/// Supports both JSON and pretty formats. When `debug` is set the level is
/// forced to `debug` regardless of the configured one; `RUST_LOG` still wins.
pub fn init_logging(config: &LoggingConfig, debug: bool) -> anyhow::Result<()> {
    let level = if debug { "debug" } else { config.level.as_str() };
    let log_level = parse_log_level(level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);
    let file_writer = file_writer(config)?;

    if config.format.as_str() == "json" {
        let json_layer = fmt::layer()
            .json()
            .with_span_events(FmtSpan::CLOSE)
            .with_current_span(true)
            .with_target(true)
            .with_line_number(true);

        match file_writer {
            Some(writer) => registry.with(json_layer.with_writer(writer)).try_init()?,
            None => registry.with(json_layer).try_init()?,
        }
    } else {
        let pretty_layer = fmt::layer()
            .with_target(true)
            .with_line_number(true)
            .with_file(false);

        match file_writer {
            Some(writer) => registry
                .with(pretty_layer.with_ansi(false).with_writer(writer))
                .try_init()?,
            None => registry.with(pretty_layer).try_init()?,
        }
    }

    Ok(())
}

/// Pick the file sink: daily rotation keeps every run, a truncated single
/// file keeps only the latest one.
fn file_writer(config: &LoggingConfig) -> anyhow::Result<Option<BoxMakeWriter>> {
    let Some(folder) = &config.out_put_folder else {
        return Ok(None);
    };

    if config.save_every_log {
        std::fs::create_dir_all(folder)?;
        let appender = tracing_appender::rolling::daily(folder, LOG_FILE_NAME);
        return Ok(Some(BoxMakeWriter::new(appender)));
    }

    if config.save_last_log {
        std::fs::create_dir_all(folder)?;
        let file = std::fs::File::create(folder.join(LOG_FILE_NAME))?;
        return Ok(Some(BoxMakeWriter::new(Arc::new(file))));
    }

    Ok(None)
}

/// Parse log level string to tracing Level
pub fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}
