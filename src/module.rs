use std::path::Path;

use node_plugin::CallResult;
use node_plugin::metadata::NodeMetadata;
use node_plugin::node::OutputSink;
use node_plugin::packet::Packet;
use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumString};

use crate::error::HostError;

/// Which binding a module was loaded through.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, EnumString, AsRefStr, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModuleVariant {
    Native,
    Wasm,
}

impl ModuleVariant {
    /// Pick the binding from a file extension. Text-format components count as wasm.
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str())? {
            "wasm" | "wat" => Some(ModuleVariant::Wasm),
            "so" | "dylib" | "dll" => Some(ModuleVariant::Native),
            _ => None,
        }
    }
}

/// A loaded module: version checked and metadata read, ready to create
/// instances.
pub trait PluginModule: Send + Sync {
    fn variant(&self) -> ModuleVariant;

    /// Metadata read once at load time.
    fn metadata(&self) -> &NodeMetadata;

    fn create(&self, params: Option<&str>) -> Result<Box<dyn PluginInstance>, HostError>;
}

/// One live instance behind either binding.
///
/// Dropping the box destroys the instance, exactly once.
pub trait PluginInstance: Send {
    fn process(
        &mut self,
        pin: &str,
        packet: &Packet<'_>,
        output: &mut dyn OutputSink,
    ) -> CallResult;

    fn update_params(&mut self, params: Option<&str>) -> CallResult;

    fn flush(&mut self, output: &mut dyn OutputSink) -> CallResult;
}
