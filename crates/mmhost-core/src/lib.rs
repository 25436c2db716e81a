//! mmhost-core: Core types for the multi-model inference host
//!
//! This crate provides the fundamental types used throughout mmhost:
//! - Model identifiers, artifact locations and handles
//! - Inventory records
//! - Prediction request and response shapes
//! - Configuration types
//! - Error handling

pub mod config;
pub mod error;
pub mod model;

pub use config::*;
pub use error::*;
pub use model::*;
