//! mmhost-store: Artifact storage and inventory
//!
//! This crate provides everything on the cold-storage side of the host:
//! - The artifact store client trait and its filesystem and HTTP clients
//! - Local staging of fetched artifacts, with integrity checks
//! - Bounded retry of transient fetch failures
//! - The inventory of registered artifacts

pub mod fs;
pub mod http;
pub mod inventory;
pub mod store;

pub use fs::{scan_dir, FsArtifactStore};
pub use http::{HttpArtifactStore, LocationStore};
pub use inventory::Inventory;
pub use store::{
    fetch_with_retry, ArtifactStore, RetryPolicy, StagedArtifact, StagingArea, StagingWriter,
};
