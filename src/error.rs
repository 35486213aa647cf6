use std::path::PathBuf;

use node_plugin::handle::InstanceId;
use thiserror::Error;

/// Everything the host can fail at before or around a plugin call.
///
/// A plugin operation that runs and fails is not a `HostError`; it comes
/// back as a failed [`CallResult`](node_plugin::CallResult).
#[derive(Debug, Error)]
pub enum HostError {
    #[error("plugin api version mismatch: host expects {expected}, module reports {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error("module does not export '{0}'")]
    MissingSymbol(String),

    #[error("failed to load module '{path}': {reason}")]
    Load { path: PathBuf, reason: String },

    #[error("invalid node metadata: {0}")]
    InvalidMetadata(String),

    #[error("invalid node kind '{kind}': {reason}")]
    InvalidKind { kind: String, reason: String },

    #[error("failed to create '{kind}' instance: {reason}")]
    CreateFailed { kind: String, reason: String },

    #[error("unknown node kind '{0}'")]
    UnknownKind(String),

    #[error("node kind '{kind}' has no pin '{pin}'")]
    UnknownPin { kind: String, pin: String },

    #[error("instance {0} does not exist or was destroyed")]
    UnknownInstance(InstanceId),

    #[error("{from} cannot feed {to}")]
    IncompatiblePins { from: String, to: String },

    #[error("wasm runtime error: {0}")]
    Wasm(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl HostError {
    pub(crate) fn wasm(err: impl std::fmt::Display) -> Self {
        HostError::Wasm(format!("{err:#}"))
    }

    pub(crate) fn load(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        HostError::Load { path: path.into(), reason: reason.to_string() }
    }
}
