//! Regression model implementations.
//!
//! Models are a tagged enum with pure evaluators so that the sampler and the
//! predictive engine can stay generic over them.

pub mod model;

pub use model::*;
