//! Host runtime for node plugins.
//!
//! Modules come in two bindings: native libraries exporting the C call
//! table, and WebAssembly components implementing the `node` interface.
//! Both end up behind [`PluginModule`](module::PluginModule) and are driven
//! through [`NodeHost`].

pub mod config;
pub mod error;
pub mod logger;
pub mod module;
pub mod native;
pub mod registry;
pub mod schema;
pub mod wasm;

pub use error::HostError;
pub use registry::NodeHost;
