//! Loader and model trait definitions

use chrono::{DateTime, Utc};
use mmhost_core::{ArtifactHandle, HostError, HostResult, ModelId};
use mmhost_store::StagedArtifact;
use std::fmt;

/// A deserialized model that can score one feature row.
///
/// Implementations are immutable once built, so `predict` may run from many
/// threads at once against the same instance.
pub trait InferenceModel: Send + Sync {
    /// Number of features a row must have
    fn num_features(&self) -> usize;

    /// Score a row that has already been checked for length and finiteness
    fn predict(&self, features: &[f64]) -> f64;

    /// Estimated resident size in bytes
    fn footprint_bytes(&self) -> u64;

    /// Short model family name
    fn kind(&self) -> &'static str;
}

/// Turns a staged artifact into an invocable model
pub trait ModelLoader: Send + Sync {
    /// Load the staged bytes.
    ///
    /// `headroom` is the memory the cache can free for this model, which
    /// excludes pinned entries only; a model whose estimated footprint
    /// exceeds it fails with `ResourceExhausted`.
    fn load(&self, artifact: &StagedArtifact, headroom: Option<u64>) -> HostResult<LoadedModel>;

    /// Get the loader name
    fn name(&self) -> &'static str;
}

/// In-memory model produced by a loader
pub struct LoadedModel {
    id: ModelId,
    artifact: ArtifactHandle,
    loaded_at: DateTime<Utc>,
    footprint_bytes: u64,
    model: Box<dyn InferenceModel>,
}

impl LoadedModel {
    pub fn new(artifact: ArtifactHandle, model: Box<dyn InferenceModel>) -> Self {
        Self {
            id: artifact.id.clone(),
            footprint_bytes: model.footprint_bytes(),
            loaded_at: Utc::now(),
            artifact,
            model,
        }
    }

    pub fn id(&self) -> &ModelId {
        &self.id
    }

    /// Artifact the model was loaded from
    pub fn artifact(&self) -> &ArtifactHandle {
        &self.artifact
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn footprint_bytes(&self) -> u64 {
        self.footprint_bytes
    }

    pub fn kind(&self) -> &'static str {
        self.model.kind()
    }

    pub fn num_features(&self) -> usize {
        self.model.num_features()
    }

    /// Run inference on one feature row
    pub fn infer(&self, features: &[f64]) -> HostResult<f64> {
        let expected = self.model.num_features();
        if features.len() != expected {
            return Err(self.inference_error(format!(
                "expected {} features, got {}",
                expected,
                features.len()
            )));
        }
        if let Some(pos) = features.iter().position(|v| !v.is_finite()) {
            return Err(self.inference_error(format!("feature {} is not a finite number", pos)));
        }

        let prediction = self.model.predict(features);
        if !prediction.is_finite() {
            return Err(self.inference_error("prediction is not a finite number".to_string()));
        }
        Ok(prediction)
    }

    fn inference_error(&self, message: String) -> HostError {
        HostError::Inference {
            id: self.id.clone(),
            message,
        }
    }
}

impl fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedModel")
            .field("id", &self.id)
            .field("kind", &self.model.kind())
            .field("footprint_bytes", &self.footprint_bytes)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}
