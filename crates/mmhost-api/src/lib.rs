//! mmhost-api: REST API server for mmhost
//!
//! This crate provides the REST API for interacting with the host:
//! - Invocations (single and batch)
//! - Inventory management
//! - Cache inspection and invalidation
//! - System status

pub mod error;
pub mod rest;

pub use error::ApiError;
pub use rest::{apply_layers, create_router, AppState};
