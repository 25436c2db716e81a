//! Scoped access to a resident model

use mmhost_core::ModelId;
use mmhost_runtime::LoadedModel;
use std::ops::Deref;
use std::sync::Arc;

use crate::cache::CacheInner;

/// A pinned reference to a loaded model.
///
/// While a lease is alive the entry it came from cannot be evicted. Dropping
/// the lease releases the pin. If the entry was invalidated in the meantime
/// the model stays usable through this lease, and releasing it touches
/// nothing.
pub struct ModelLease {
    pub(crate) cache: Arc<CacheInner>,
    pub(crate) id: ModelId,
    pub(crate) generation: u64,
    pub(crate) model: Arc<LoadedModel>,
    pub(crate) warm: bool,
}

impl ModelLease {
    pub fn id(&self) -> &ModelId {
        &self.id
    }

    pub fn model(&self) -> &Arc<LoadedModel> {
        &self.model
    }

    /// True when the model was already resident at lookup time
    pub fn is_warm(&self) -> bool {
        self.warm
    }

    /// Residency generation this lease pinned
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Release the pin now rather than at end of scope
    pub fn release(self) {}
}

impl Deref for ModelLease {
    type Target = LoadedModel;

    fn deref(&self) -> &Self::Target {
        &self.model
    }
}

impl Drop for ModelLease {
    fn drop(&mut self) {
        self.cache.release(&self.id, self.generation);
    }
}

impl std::fmt::Debug for ModelLease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelLease")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("warm", &self.warm)
            .finish()
    }
}
