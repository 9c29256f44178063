//! `ridership-bayes` library crate.
//!
//! Bayesian regression of transit ridership change on service-hours change,
//! sampled with NUTS. The binary (`rb`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the sampler and predictive engine can be driven from other front-ends

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod logging;
pub mod math;
pub mod models;
pub mod plot;
pub mod posterior;
pub mod report;
