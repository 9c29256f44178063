//! Posterior sampling.
//!
//! Responsibilities:
//!
//! - warm-up adaptation (step size, diagonal metric)
//! - single-chain NUTS transitions
//! - running chains in parallel and merging their draws

pub mod adapt;
pub mod nuts;
pub mod sampler;

pub use nuts::{Phase, Progress};
pub use sampler::*;
