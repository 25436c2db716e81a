//! mmhost-dispatch: Request dispatch for mmhost
//!
//! Resolves a model through the cache, runs inference and maps internal
//! failures onto the errors callers see.

pub mod dispatcher;

pub use dispatcher::{surface_error, Dispatcher};
