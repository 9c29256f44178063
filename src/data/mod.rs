//! Input preparation: derived columns from raw route counts, and synthetic samples.

pub mod etl;
pub mod sample;

pub use etl::*;
pub use sample::*;
