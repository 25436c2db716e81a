//! mmhost-runtime: Model loading and inference
//!
//! This crate turns staged artifacts into invocable models:
//! - The loader and model traits
//! - A JSON loader for linear and tree-ensemble regression models

pub mod loader;
pub mod models;
pub mod traits;

pub use loader::JsonModelLoader;
pub use models::{LinearModel, ModelSpec, TreeEnsemble, TreeNode};
pub use traits::{InferenceModel, LoadedModel, ModelLoader};
