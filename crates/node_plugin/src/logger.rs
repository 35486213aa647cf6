use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use strum_macros::{AsRefStr, Display, EnumString};

/// Severity of a plugin log record.
/// Higher-value variants are more severe.
#[repr(C)]
#[derive(
    Debug, Copy, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, PartialOrd, Ord, Hash,
    EnumString, AsRefStr, Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    Warn = 3,
    Error = 4,
}

/// Where plugin log records end up. Fire and forget: a sink never fails.
pub trait LogSink: Send + Sync {
    fn log(&self, level: LogLevel, target: &str, message: &str);
}

/// Sink that drops everything.
pub struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _level: LogLevel, _target: &str, _message: &str) {}
}

/// Sink that re-emits records as `tracing` events, with the plugin's
/// target kept as a field.
pub struct TracingSink;

impl LogSink for TracingSink {
    fn log(&self, level: LogLevel, target: &str, message: &str) {
        forward_to_tracing(level, target, message);
    }
}

pub fn forward_to_tracing(level: LogLevel, target: &str, message: &str) {
    match level {
        LogLevel::Trace => tracing::trace!(plugin = target, "{message}"),
        LogLevel::Debug => tracing::debug!(plugin = target, "{message}"),
        LogLevel::Info => tracing::info!(plugin = target, "{message}"),
        LogLevel::Warn => tracing::warn!(plugin = target, "{message}"),
        LogLevel::Error => tracing::error!(plugin = target, "{message}"),
    }
}

/// The log capability handed to a plugin at creation.
///
/// Plugins should keep this around and use it instead of calling
/// `tracing` directly, since a plugin has no subscriber of its own.
#[derive(Clone)]
pub struct PluginLogger {
    sink: Arc<dyn LogSink>,
    target: String,
}

impl PluginLogger {
    pub fn new(sink: Arc<dyn LogSink>, target: impl Into<String>) -> Self {
        Self { sink, target: target.into() }
    }

    /// A logger that goes nowhere, for tests and metadata-only loads.
    pub fn null(target: impl Into<String>) -> Self {
        Self::new(Arc::new(NullSink), target)
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.sink.log(level, &self.target, message);
    }

    pub fn trace(&self, message: &str) {
        self.log(LogLevel::Trace, message);
    }

    pub fn debug(&self, message: &str) {
        self.log(LogLevel::Debug, message);
    }

    pub fn info(&self, message: &str) {
        self.log(LogLevel::Info, message);
    }

    pub fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message);
    }

    pub fn error(&self, message: &str) {
        self.log(LogLevel::Error, message);
    }
}

impl std::fmt::Debug for PluginLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginLogger").field("target", &self.target).finish()
    }
}
