//! The node plugin contract.
//!
//! One [`NodePlugin`](node::NodePlugin) implementation can be exported two
//! ways: as a native module through the C table in [`abi`] (see
//! [`native_plugin_entry!`]), or as a component through the adapter in
//! [`component`]. Both go through the same lifecycle core in [`lifecycle`].

pub mod abi;
pub mod buffer;
pub mod component;
pub mod conversions;
pub mod error;
pub mod export;
pub mod handle;
pub mod lifecycle;
pub mod logger;
pub mod metadata;
pub mod node;
pub mod packet;
pub mod params;
pub mod result;
pub mod types;

pub use error::PluginError;
pub use result::CallResult;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::buffer::{BorrowedView, OwnedBuffer};
    pub use crate::error::PluginError;
    pub use crate::logger::{LogLevel, PluginLogger};
    pub use crate::metadata::{InputPin, NodeMetadata, OutputPin};
    pub use crate::node::{NodePlugin, OutputSink};
    pub use crate::packet::{AudioFrame, CustomPacket, OwnedPacket, Packet};
    pub use crate::params::{NumberParam, param_schema};
    pub use crate::result::CallResult;
    pub use crate::types::{
        AudioFormat, CustomEncoding, PacketMetadata, PacketType, SampleFormat, can_connect,
        can_connect_any,
    };
    pub use crate::{native_plugin_api, native_plugin_entry};
}
