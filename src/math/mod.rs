//! Mathematical utilities: log-densities with gradients and draw statistics.

pub mod density;
pub mod seed;
pub mod stats;

pub use density::*;
pub use seed::*;
pub use stats::*;
