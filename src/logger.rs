use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;

pub const LOG_FILE: &str = "nodekit.log";
pub const EVENT_FILE: &str = "nodekit.json";

/// Install the global subscriber.
///
/// - `log_level` is an `EnvFilter` directive (e.g. `"info"`); `RUST_LOG`
///   wins when set.
/// - Human readable output always goes to stderr.
/// - With a `log_dir`, a plain text rolling log and a newline-delimited
///   JSON rolling log are written there as well.
pub fn init_tracing(log_level: &str, log_dir: Option<&Path>) -> Result<()> {
    let env_filter = build_filter(log_level, std::env::var(EnvFilter::DEFAULT_ENV).ok())?;

    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (txt_layer, json_layer) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("could not create log dir {}", dir.display()))?;
            let txt_appender = RollingFileAppender::new(Rotation::DAILY, dir, LOG_FILE);
            let json_appender = RollingFileAppender::new(Rotation::DAILY, dir, EVENT_FILE);
            (
                Some(fmt::layer().with_writer(txt_appender).with_ansi(false)),
                Some(fmt::layer().json().with_writer(json_appender).with_target(true)),
            )
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(txt_layer)
        .with(json_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(())
}

fn build_filter(log_level: &str, rust_log: Option<String>) -> Result<EnvFilter> {
    let directives =
        rust_log.filter(|d| !d.trim().is_empty()).unwrap_or_else(|| log_level.to_string());
    EnvFilter::try_new(&directives).with_context(|| format!("invalid log level '{directives}'"))
}
