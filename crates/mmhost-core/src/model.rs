//! Model identifier, artifact, inventory and request type definitions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::error::{HostError, HostResult};

/// Maximum length of a model identifier in bytes
pub const MAX_MODEL_ID_LEN: usize = 1024;

/// Opaque key naming an artifact in the store and an entry in the cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelId(String);

impl ModelId {
    /// Validate and wrap an identifier
    pub fn parse(raw: impl Into<String>) -> HostResult<Self> {
        let raw = raw.into();
        let reject = |reason: &str| HostError::InvalidModelId {
            id: raw.clone(),
            reason: reason.to_string(),
        };

        if raw.is_empty() {
            return Err(reject("identifier is empty"));
        }
        if raw.len() > MAX_MODEL_ID_LEN {
            return Err(reject("identifier is longer than 1024 bytes"));
        }
        if let Some(c) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '/' | ':')))
        {
            return Err(reject(&format!("character {:?} is not allowed", c)));
        }
        if raw.starts_with('/') {
            return Err(reject("identifier must not start with '/'"));
        }
        if raw
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(reject("identifier contains an empty or relative path segment"));
        }

        Ok(Self(raw))
    }

    /// Borrow the identifier as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Identifier rendered as a single safe file name
    pub fn file_stem(&self) -> String {
        self.0.replace(['/', ':'], "_")
    }
}

impl fmt::Display for ModelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ModelId {
    type Error = HostError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ModelId::parse(value)
    }
}

impl From<ModelId> for String {
    fn from(id: ModelId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ModelId {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ModelId::parse(s)
    }
}

/// Where an artifact lives in durable storage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ArtifactLocation {
    /// File in a locally mounted store
    File(PathBuf),
    /// Object reachable over HTTP(S)
    Http(String),
}

impl ArtifactLocation {
    /// Parse `file://`, `http(s)://` or bare absolute path locations
    pub fn parse(raw: &str) -> HostResult<Self> {
        if let Some(path) = raw.strip_prefix("file://") {
            if path.is_empty() {
                return Err(HostError::InvalidLocation(raw.to_string()));
            }
            return Ok(ArtifactLocation::File(PathBuf::from(path)));
        }
        if raw.starts_with("http://") || raw.starts_with("https://") {
            return Ok(ArtifactLocation::Http(raw.to_string()));
        }
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            Ok(ArtifactLocation::File(path))
        } else {
            Err(HostError::InvalidLocation(raw.to_string()))
        }
    }

    /// URL scheme of the location
    pub fn scheme(&self) -> &'static str {
        match self {
            ArtifactLocation::File(_) => "file",
            ArtifactLocation::Http(url) if url.starts_with("https://") => "https",
            ArtifactLocation::Http(_) => "http",
        }
    }
}

impl fmt::Display for ArtifactLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactLocation::File(path) => write!(f, "file://{}", path.display()),
            ArtifactLocation::Http(url) => f.write_str(url),
        }
    }
}

impl TryFrom<String> for ArtifactLocation {
    type Error = HostError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ArtifactLocation::parse(&value)
    }
}

impl From<ArtifactLocation> for String {
    fn from(location: ArtifactLocation) -> Self {
        location.to_string()
    }
}

/// Inventory entry: identifier → artifact location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryRecord {
    /// Model identifier
    pub id: ModelId,
    /// Artifact location in the store
    pub location: ArtifactLocation,
    /// Expected SHA-256 of the artifact, lowercase hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    /// Registration timestamp
    pub registered_at: DateTime<Utc>,
}

impl InventoryRecord {
    /// Create a new record registered now
    pub fn new(id: ModelId, location: ArtifactLocation) -> Self {
        Self {
            id,
            location,
            sha256: None,
            registered_at: Utc::now(),
        }
    }

    /// Attach an expected digest
    pub fn with_sha256(mut self, sha256: impl Into<String>) -> Self {
        self.sha256 = Some(sha256.into().to_ascii_lowercase());
        self
    }
}

/// Reference to artifact bytes at a known store location
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactHandle {
    /// Model identifier
    pub id: ModelId,
    /// Location the bytes were fetched from
    pub location: ArtifactLocation,
    /// Size in bytes
    pub size: u64,
    /// Last-modified timestamp reported by the store
    pub last_modified: Option<DateTime<Utc>>,
    /// SHA-256 of the fetched bytes, lowercase hex
    pub sha256: String,
}

/// Inbound prediction request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    /// Target model
    pub model_identifier: ModelId,
    /// Ordered numeric features
    pub features: Vec<f64>,
}

/// Successful prediction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Model that produced the prediction
    pub model_identifier: ModelId,
    /// Predicted value
    pub prediction: f64,
    /// Whether the model was already resident when the request arrived
    pub warm: bool,
}

/// Several feature rows against one model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchPredictRequest {
    /// Target model
    pub model_identifier: ModelId,
    /// Feature rows
    pub instances: Vec<Vec<f64>>,
}

/// Predictions for a batch, in row order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchPrediction {
    /// Model that produced the predictions
    pub model_identifier: ModelId,
    /// Predicted values
    pub predictions: Vec<f64>,
    /// Whether the model was already resident when the request arrived
    pub warm: bool,
}

/// Structured error body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable error kind
    pub error_kind: String,
    /// Human readable message
    pub message: String,
    /// Originating identifier, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_identifier: Option<String>,
}

impl From<&HostError> for ErrorBody {
    fn from(err: &HostError) -> Self {
        Self {
            error_kind: err.kind().to_string(),
            message: err.to_string(),
            model_identifier: err.model_id().map(|id| id.to_string()),
        }
    }
}
