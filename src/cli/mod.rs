//! Command-line parsing for the ridership regression engine.
//!
//! The goal of this module is to keep **argument parsing** and **command dispatch**
//! separate from the sampling/prediction code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::data::SyntheticConfig;
use crate::domain::{
    ClassTable, DEFAULT_INTERVAL_MASS, DEFAULT_SERVICE_CHANGE_THRESHOLD, FailurePolicy, ModelKind,
    PredictorGridPoint, SamplerConfig,
};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "rb", version, about = "Bayesian ridership-change regression (NUTS)")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit a model to an observation CSV (or a synthetic sample) and print the posterior summary.
    Fit(FitArgs),
    /// Summarise the posterior predictive over a grid, from a saved posterior JSON.
    Predict(PredictArgs),
    /// Write a synthetic observation CSV with a known generating model.
    Simulate(SimulateArgs),
    /// Derive the observation table from raw 2015/2019 route counts.
    Derive(DeriveArgs),
}

/// Sampler options shared by every command that fits.
#[derive(Debug, Args, Clone)]
pub struct SamplerArgs {
    /// Number of independent chains.
    #[arg(long, default_value_t = 4)]
    pub chains: usize,

    /// Worker-thread ceiling (also capped by the host's core count).
    #[arg(long, default_value_t = 4)]
    pub cores: usize,

    /// RNG seed; omit for a fresh seed (printed in the report).
    #[arg(long)]
    pub seed: Option<u64>,

    /// Warm-up iterations per chain (discarded).
    #[arg(long, default_value_t = 1000)]
    pub warmup: usize,

    /// Retained iterations per chain.
    #[arg(long, default_value_t = 1000)]
    pub samples: usize,

    /// Target mean acceptance statistic for step-size adaptation.
    #[arg(long, default_value_t = 0.9)]
    pub target_accept: f64,

    /// Maximum tree depth (2^depth leapfrog steps).
    #[arg(long, default_value_t = 15)]
    pub max_depth: usize,

    /// What to do when a chain fails.
    #[arg(long, value_enum, default_value_t = FailurePolicy::BestEffort)]
    pub failure_policy: FailurePolicy,
}

impl SamplerArgs {
    pub fn to_config(&self) -> SamplerConfig {
        SamplerConfig {
            chains: self.chains,
            cores: self.cores,
            seed: self.seed,
            warmup_iterations: self.warmup,
            sampling_iterations: self.samples,
            target_accept: self.target_accept,
            max_depth: self.max_depth,
            failure_policy: self.failure_policy,
        }
    }
}

/// Options for `rb fit`.
#[derive(Debug, Parser, Clone)]
pub struct FitArgs {
    /// Observation CSV (`route,class,hoursChangeFraction,responseLogRate`).
    #[arg(long, value_name = "CSV", required_unless_present = "synthetic")]
    pub data: Option<PathBuf>,

    /// Fit a default synthetic sample instead of a CSV.
    #[arg(long, conflicts_with = "data")]
    pub synthetic: bool,

    /// Which model to fit.
    #[arg(long, value_enum, default_value_t = ModelKind::Hierarchical)]
    pub model: ModelKind,

    #[command(flatten)]
    pub sampler: SamplerArgs,

    /// Credible-interval mass for the parameter table.
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MASS)]
    pub interval_mass: f64,

    /// Render a ribbon plot of the fitted per-class lines.
    #[arg(long)]
    pub plot: bool,

    /// Interval mass of the plotted band.
    #[arg(long, default_value_t = 0.93)]
    pub plot_mass: f64,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Export draws to CSV (`chain,draw,<params>`).
    #[arg(long = "export-draws", value_name = "CSV")]
    pub export_draws: Option<PathBuf>,

    /// Save the posterior (draws + diagnostics) to JSON for `rb predict`.
    #[arg(long = "export-posterior", value_name = "JSON")]
    pub export_posterior: Option<PathBuf>,
}

/// Options for `rb predict`.
#[derive(Debug, Parser, Clone)]
pub struct PredictArgs {
    /// Posterior JSON written by `rb fit --export-posterior`.
    #[arg(long, value_name = "JSON")]
    pub posterior: PathBuf,

    /// Grid CSV (`class,hoursChangeFraction`). Without it, every class is swept.
    #[arg(long, value_name = "CSV")]
    pub grid: Option<PathBuf>,

    /// Lowest hours-change fraction of the sweep.
    #[arg(long, default_value_t = -0.5, allow_hyphen_values = true)]
    pub hours_min: f64,

    /// Highest hours-change fraction of the sweep.
    #[arg(long, default_value_t = 0.5, allow_hyphen_values = true)]
    pub hours_max: f64,

    /// Points per class in the sweep.
    #[arg(long, default_value_t = 11)]
    pub steps: usize,

    /// Credible-interval mass.
    #[arg(long, default_value_t = DEFAULT_INTERVAL_MASS)]
    pub interval_mass: f64,

    /// Report `muhat(TO) - muhat(FROM)`; points are `CLASS:HOURS`.
    #[arg(long, num_args = 2, value_names = ["FROM", "TO"], value_parser = parse_grid_point, allow_hyphen_values = true)]
    pub contrast: Option<Vec<PredictorGridPoint>>,

    /// Render a ribbon plot.
    #[arg(long)]
    pub plot: bool,

    /// Plot width (columns).
    #[arg(long, default_value_t = 100)]
    pub width: usize,

    /// Plot height (rows).
    #[arg(long, default_value_t = 25)]
    pub height: usize,

    /// Export predictions to CSV.
    #[arg(long, value_name = "CSV")]
    pub export: Option<PathBuf>,
}

/// Options for `rb simulate`.
#[derive(Debug, Parser, Clone)]
pub struct SimulateArgs {
    /// Output observation CSV.
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,

    #[arg(long, default_value_t = 50)]
    pub routes_per_class: usize,

    /// Intercept step per class index.
    #[arg(long, default_value_t = 0.1, allow_hyphen_values = true)]
    pub class_offset: f64,

    #[arg(long, default_value_t = -0.3, allow_hyphen_values = true)]
    pub slope: f64,

    /// Residual standard deviation.
    #[arg(long, default_value_t = 0.1, allow_hyphen_values = true)]
    pub noise: f64,

    #[arg(long, default_value_t = -0.5, allow_hyphen_values = true)]
    pub hours_min: f64,

    #[arg(long, default_value_t = 0.5, allow_hyphen_values = true)]
    pub hours_max: f64,

    #[arg(long, default_value_t = 1)]
    pub seed: u64,
}

impl SimulateArgs {
    pub fn to_config(&self) -> SyntheticConfig {
        SyntheticConfig {
            classes: ClassTable::route_types_v1(),
            routes_per_class: self.routes_per_class,
            class_offset: self.class_offset,
            slope: self.slope,
            noise: self.noise,
            hours_min: self.hours_min,
            hours_max: self.hours_max,
            seed: self.seed,
        }
    }
}

/// Options for `rb derive`.
#[derive(Debug, Parser, Clone)]
pub struct DeriveArgs {
    /// Raw CSV (`route,class,rides_2015,rides_2019,hours_2015,hours_2019`).
    #[arg(long, value_name = "CSV")]
    pub input: PathBuf,

    /// Output CSV with derived columns (readable by `rb fit --data`).
    #[arg(long, value_name = "CSV")]
    pub out: PathBuf,

    /// `|hours change|` fraction at or above which a route is labelled a service change.
    #[arg(long, default_value_t = DEFAULT_SERVICE_CHANGE_THRESHOLD)]
    pub service_change_threshold: f64,
}

/// Parse `CLASS:HOURS`, e.g. `1:0.5` or `CoreLoc:-0.2`. Labels are resolved later.
fn parse_grid_point(raw: &str) -> Result<PredictorGridPoint, String> {
    let (class, hours) = raw
        .split_once(':')
        .ok_or_else(|| format!("expected CLASS:HOURS, got '{raw}'"))?;
    let class = ClassTable::route_types_v1()
        .resolve(class)
        .or_else(|| class.trim().parse::<usize>().ok())
        .ok_or_else(|| format!("unknown class '{class}'"))?;
    let hours = hours
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("invalid hours '{hours}'"))?;
    Ok(PredictorGridPoint::new(class, hours))
}
