//! Tracing subscriber setup
//!
//! Console output always goes to stdout in the configured format. When
//! `logging.file` is set, a second copy of every event is appended to that
//! file in its own format. `RUST_LOG` overrides the configured level.

use std::fs::OpenOptions;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer,
    Registry,
};

use crate::config::{LogFileConfig, LogFormat, LoggingConfig};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = build_filter(&config.level)?;

    let mut layers = vec![console_layer(config.format)];
    if let Some(file) = &config.file {
        layers.push(file_layer(file)?);
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()?;
    Ok(())
}

fn build_filter(level: &str) -> anyhow::Result<EnvFilter> {
    let level =
        Level::from_str(level).map_err(|_| anyhow::anyhow!("Invalid log level: {level}"))?;

    Ok(EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy())
}

fn console_layer(format: LogFormat) -> BoxedLayer {
    match format {
        LogFormat::Json => fmt::layer().json().with_current_span(true).boxed(),
        LogFormat::Pretty => fmt::layer().pretty().with_file(false).boxed(),
    }
}

fn file_layer(config: &LogFileConfig) -> anyhow::Result<BoxedLayer> {
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&config.path)
        .with_context(|| format!("Failed to open log file {}", config.path))?;
    let writer = Arc::new(file);

    Ok(match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_writer(writer)
            .boxed(),
        // plain single-line text, no colour codes in files
        LogFormat::Pretty => fmt::layer().with_ansi(false).with_writer(writer).boxed(),
    })
}
