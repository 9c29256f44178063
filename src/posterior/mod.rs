//! Turning posterior draws into numbers people read: parameter summaries and
//! predictive curves.

pub mod predict;
pub mod summary;

pub use predict::*;
pub use summary::*;
