//! Error types shared across the engine.

use std::path::PathBuf;

/// First blocking syntax fault in a document. Line and column are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{line}:{column}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub column: usize,
    /// Characters covered by the fault (at least 1).
    pub length: usize,
    pub message: String,
}

impl ParseError {
    pub fn new(line: usize, column: usize, message: impl Into<String>) -> Self {
        ParseError {
            line,
            column,
            length: 1,
            message: message.into(),
        }
    }
}

/// The visual model could not be rendered as DSL text. Unreachable for
/// models built through [`crate::visual::VisualModel::apply`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SerializeError {
    #[error("unrepresentable model: {0}")]
    Unrepresentable(String),
    #[error("duplicate device scope: {0}")]
    DuplicateDevice(String),
    #[error("generated text failed validation: {0}")]
    Invalid(String),
}

/// A visual edit was rejected before touching the model.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EditError {
    #[error("unknown scope: {0}")]
    UnknownScope(String),
    #[error("unknown layer {layer} in scope {scope}")]
    UnknownLayer { scope: String, layer: String },
    #[error("layer {layer} already exists in scope {scope}")]
    LayerExists { scope: String, layer: String },
    #[error("device pattern already has a scope: {0}")]
    DeviceExists(String),
    #[error("the base layer cannot be removed")]
    BaseLayer,
    #[error("no mapping for key {key} in {scope}/{layer}")]
    UnknownKey {
        scope: String,
        layer: String,
        key: String,
    },
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid profile name: {0:?}")]
    InvalidName(String),
    #[error("profile {profile} changed on disk since it was loaded")]
    Conflict { profile: String },
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("corrupt device registry {path}: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid setting: {0}")]
    Invalid(String),
}

/// Failures surfaced by [`crate::controller::SyncController`].
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("no profile is open")]
    NoProfile,
    #[error("text edits are still pending; wait for them to settle")]
    TextPending,
    #[error("the source has {0} blocking error(s); fix the text first")]
    SourceInvalid(usize),
    #[error("save blocked by {0} error(s)")]
    SaveBlocked(usize),
    #[error("edit rejected: {0}")]
    Edit(#[from] EditError),
    #[error("serialization failed: {0}")]
    Serialize(#[from] SerializeError),
    #[error("storage: {0}")]
    Store(#[from] StoreError),
    #[error("device registry: {0}")]
    Registry(#[from] RegistryError),
}
