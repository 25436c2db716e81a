//! JSON artifact loader

use mmhost_core::{HostError, HostResult};
use mmhost_store::StagedArtifact;
use tracing::debug;

use crate::models::ModelSpec;
use crate::traits::{LoadedModel, ModelLoader};

/// Loads `kind`-tagged JSON artifacts (see [`ModelSpec`])
#[derive(Debug, Clone, Default)]
pub struct JsonModelLoader;

impl JsonModelLoader {
    pub fn new() -> Self {
        Self
    }

    fn deserialization_error(artifact: &StagedArtifact, message: String) -> HostError {
        HostError::Deserialization {
            id: artifact.id().clone(),
            message,
        }
    }
}

impl ModelLoader for JsonModelLoader {
    fn load(&self, artifact: &StagedArtifact, headroom: Option<u64>) -> HostResult<LoadedModel> {
        let bytes = std::fs::read(artifact.path()).map_err(|e| HostError::TransientStore {
            id: artifact.id().clone(),
            message: format!("reading staged artifact {}: {}", artifact.path().display(), e),
        })?;

        let spec: ModelSpec = serde_json::from_slice(&bytes)
            .map_err(|e| Self::deserialization_error(artifact, e.to_string()))?;
        spec.validate()
            .map_err(|message| Self::deserialization_error(artifact, message))?;

        let model = spec.into_model();
        let footprint = model.footprint_bytes();
        if let Some(available) = headroom {
            if footprint > available {
                return Err(HostError::ResourceExhausted {
                    id: artifact.id().clone(),
                    message: format!(
                        "model needs {} bytes, {} available",
                        footprint, available
                    ),
                });
            }
        }

        debug!(
            model_id = %artifact.id(),
            kind = model.kind(),
            footprint = footprint,
            "Deserialized model"
        );

        Ok(LoadedModel::new(artifact.handle.clone(), model))
    }

    fn name(&self) -> &'static str {
        "json"
    }
}
