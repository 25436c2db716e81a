//! Error types for mmhost

use crate::model::ModelId;
use std::time::Duration;
use thiserror::Error;

/// Main error type for mmhost
///
/// Errors are `Clone` so that the outcome of a single coalesced load can be
/// handed verbatim to every caller waiting on it.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum HostError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Identifier failed syntactic validation
    #[error("Invalid model identifier '{id}': {reason}")]
    InvalidModelId { id: String, reason: String },

    /// Artifact location could not be parsed
    #[error("Invalid artifact location '{0}'")]
    InvalidLocation(String),

    /// Identifier was never registered in the inventory
    #[error("Unknown model: {0}")]
    UnknownModel(ModelId),

    /// Artifact is missing from the store
    #[error("Artifact not found for {id}: {message}")]
    NotFound { id: ModelId, message: String },

    /// Connectivity or IO failure talking to the store (retryable)
    #[error("Transient store error for {id}: {message}")]
    TransientStore { id: ModelId, message: String },

    /// Downloaded bytes failed the integrity check
    #[error("Corrupt artifact for {id}: {message}")]
    Corrupt { id: ModelId, message: String },

    /// Artifact bytes could not be turned into a model
    #[error("Deserialization error for {id}: {message}")]
    Deserialization { id: ModelId, message: String },

    /// Not enough memory headroom to instantiate the model
    #[error("Resource exhausted loading {id}: {message}")]
    ResourceExhausted { id: ModelId, message: String },

    /// Every resident entry stayed pinned for the whole eviction wait
    #[error("Cache full while inserting {id} (waited {waited:?})")]
    CacheFull { id: ModelId, waited: Duration },

    /// Fetch or load failed; wraps the store or loader error
    #[error("Failed to load {id}: {source}")]
    LoadFailed {
        id: ModelId,
        #[source]
        source: Box<HostError>,
    },

    /// Malformed features or numeric failure during prediction
    #[error("Inference error for {id}: {message}")]
    Inference { id: ModelId, message: String },

    /// Backpressure: the cache cannot make room for the model
    #[error("Overloaded serving {id}: {message}")]
    Overloaded { id: ModelId, message: String },

    /// A caller's own wait ran out
    #[error("Timed out after {waited:?} waiting for {id}")]
    Timeout { id: ModelId, waited: Duration },

    /// IO error
    #[error("IO error: {0}")]
    Io(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for mmhost operations
pub type HostResult<T> = Result<T, HostError>;

impl HostError {
    /// Stable wire name of the error kind
    pub fn kind(&self) -> &'static str {
        match self {
            HostError::Config(_) => "Config",
            HostError::InvalidModelId { .. } => "InvalidModelId",
            HostError::InvalidLocation(_) => "InvalidLocation",
            HostError::UnknownModel(_) => "UnknownModel",
            HostError::NotFound { .. } => "NotFound",
            HostError::TransientStore { .. } => "TransientStoreError",
            HostError::Corrupt { .. } => "Corrupt",
            HostError::Deserialization { .. } => "DeserializationError",
            HostError::ResourceExhausted { .. } => "ResourceExhausted",
            HostError::CacheFull { .. } => "CacheFull",
            HostError::LoadFailed { .. } => "LoadFailed",
            HostError::Inference { .. } => "InferenceError",
            HostError::Overloaded { .. } => "Overloaded",
            HostError::Timeout { .. } => "Timeout",
            HostError::Io(_) => "Io",
            HostError::Serialization(_) => "Serialization",
            HostError::Internal(_) => "Internal",
        }
    }

    /// Identifier the error originated from, if any
    pub fn model_id(&self) -> Option<&ModelId> {
        match self {
            HostError::UnknownModel(id)
            | HostError::NotFound { id, .. }
            | HostError::TransientStore { id, .. }
            | HostError::Corrupt { id, .. }
            | HostError::Deserialization { id, .. }
            | HostError::ResourceExhausted { id, .. }
            | HostError::CacheFull { id, .. }
            | HostError::LoadFailed { id, .. }
            | HostError::Inference { id, .. }
            | HostError::Overloaded { id, .. }
            | HostError::Timeout { id, .. } => Some(id),
            _ => None,
        }
    }

    /// Whether retrying the same operation unchanged may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, HostError::TransientStore { .. })
    }

    /// Whether the error came from the store or loader stage of a cold load
    pub fn is_load_stage(&self) -> bool {
        matches!(
            self,
            HostError::NotFound { .. }
                | HostError::TransientStore { .. }
                | HostError::Corrupt { .. }
                | HostError::Deserialization { .. }
                | HostError::Io(_)
                | HostError::Internal(_)
        )
    }
}

impl From<std::io::Error> for HostError {
    fn from(err: std::io::Error) -> Self {
        HostError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for HostError {
    fn from(err: serde_json::Error) -> Self {
        HostError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for HostError {
    fn from(err: toml::de::Error) -> Self {
        HostError::Config(err.to_string())
    }
}
