//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the engine's input table (`DataSet`, `Observation`, `ClassTable`)
//! - configuration (`SamplerConfig`, `ModelKind`, `FailurePolicy`)
//! - fit and prediction outputs (`PosteriorDraws`, `ParamSummary`, `PredictionSummary`, diagnostics)

pub mod types;

pub use types::*;
