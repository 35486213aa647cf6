//! Guest-side adapter for the component binding.
//!
//! The component interface exposes an instance as a resource whose methods
//! take `&self`. [`ComponentInstance`] maps those methods onto the shared
//! lifecycle core and flattens errors into the `string` the interface
//! carries. The host always calls `cleanup` before dropping the resource,
//! and the resource destructor runs afterwards regardless; releasing state
//! is idempotent so the second step is a no-op.

use std::sync::Arc;

use crate::error::PluginError;
use crate::lifecycle::{InstanceCell, InstanceState};
use crate::logger::{LogLevel, LogSink, PluginLogger};
use crate::metadata::NodeMetadata;
use crate::node::{NodePlugin, OutputSink};
use crate::packet::Packet;

/// Version reported by the component interface's `api-version` export.
pub const COMPONENT_API_VERSION: u32 = 1;

/// Log capability backed by an imported host function.
pub struct HostLogSink(pub fn(LogLevel, &str, &str));

impl LogSink for HostLogSink {
    fn log(&self, level: LogLevel, target: &str, message: &str) {
        (self.0)(level, target, message)
    }
}

pub struct ComponentInstance<P: NodePlugin> {
    cell: InstanceCell<P>,
}

impl<P: NodePlugin> ComponentInstance<P> {
    pub fn create(
        metadata: Arc<NodeMetadata>,
        params: Option<&str>,
        logger: PluginLogger,
    ) -> Result<Self, String> {
        InstanceCell::create(metadata, params, logger)
            .map(|cell| Self { cell })
            .map_err(|e| e.to_string())
    }

    pub fn state(&self) -> Result<InstanceState, PluginError> {
        self.cell.state()
    }

    pub fn process(
        &self,
        pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> Result<(), String> {
        self.cell.process(pin, packet, output).map_err(|e| e.to_string())
    }

    pub fn update_params(&self, params: Option<&str>) -> Result<(), String> {
        self.cell.update_params(params).map_err(|e| e.to_string())
    }

    pub fn flush(&self, output: &mut dyn OutputSink) -> Result<(), String> {
        self.cell.flush(output).map_err(|e| e.to_string())
    }

    /// Release the instance state. Safe to call any number of times.
    pub fn cleanup(&self) {
        self.cell.destroy();
    }
}
