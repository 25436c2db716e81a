//! mmhost-cache: Bounded cache of loaded models
//!
//! Keeps recently used models resident, evicts the least recently used idle
//! one when full, and never evicts a model that a request is still using.
//! Concurrent misses for the same model share a single fetch and load.

mod budget;
mod cache;
mod entry;
mod lease;

pub use budget::{plan_eviction, Budget, CacheSettings, Candidate};
pub use cache::{CacheStats, LoadBackend, ModelCache};
pub use entry::EntrySnapshot;
pub use lease::ModelLease;
