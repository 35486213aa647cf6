use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::lifecycle::InstanceState;

/// Errors a node operation can report back to the host.
///
/// None of these are fatal for the stream: they become a failed
/// [`CallResult`](crate::result::CallResult) and the host decides what to do.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub enum PluginError {
    /// The named pin does not exist on this node.
    #[error("unknown pin '{0}'")]
    UnknownPin(String),

    /// The pin exists but does not accept this packet type.
    #[error("pin '{pin}' does not accept {offered}")]
    UnsupportedPacket { pin: String, offered: String },

    /// The instance is not in a state where this operation is valid.
    #[error("operation not allowed while instance is {0}")]
    InvalidState(InstanceState),

    /// Another call on the same instance is still in flight.
    #[error("instance is busy with another call")]
    Busy,

    /// The packet could not be decoded from its wire form.
    #[error("invalid packet: {0}")]
    InvalidPacket(String),

    /// Something went wrong reading or writing JSON.
    #[error("JSON error: {0}")]
    Json(String),

    /// The plugin returned an unspecified failure.
    #[error("plugin error: {0}")]
    Other(String),
}

impl PluginError {
    pub fn other(message: impl Into<String>) -> Self {
        PluginError::Other(message.into())
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> PluginError {
        PluginError::Json(err.to_string())
    }
}

impl From<String> for PluginError {
    fn from(message: String) -> PluginError {
        PluginError::Other(message)
    }
}

impl From<&str> for PluginError {
    fn from(message: &str) -> PluginError {
        PluginError::Other(message.to_string())
    }
}
