//! Shared domain types.
//!
//! These types are intentionally kept lightweight and serializable so they can be:
//!
//! - used in-memory during sampling and prediction
//! - exported to JSON/CSV
//! - reloaded later for prediction or plotting without refitting

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::models::ModelSpec;

/// Default credible-interval mass for summaries.
pub const DEFAULT_INTERVAL_MASS: f64 = 0.89;

/// Default `|hours change|` fraction above which a route counts as a service change.
pub const DEFAULT_SERVICE_CHANGE_THRESHOLD: f64 = 0.30;

/// Explicit, versioned mapping from route-class labels to dense 1-based indices.
///
/// The order of `labels` is the contract: label `labels[i]` maps to index `i + 1`.
/// Nothing downstream re-derives the order from the data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassTable {
    pub version: u32,
    pub labels: Vec<String>,
}

impl ClassTable {
    /// Route-type table used by the 2015/2019 ridership analysis.
    pub fn route_types_v1() -> Self {
        Self {
            version: 1,
            labels: ["CoreLoc", "CommExp", "SuburbL", "Support"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn new(version: u32, labels: Vec<String>) -> Result<Self, EngineError> {
        if labels.is_empty() {
            return Err(EngineError::InvalidConfig("class table must have at least one label".into()));
        }
        for (i, a) in labels.iter().enumerate() {
            if labels[..i].iter().any(|b| b.eq_ignore_ascii_case(a)) {
                return Err(EngineError::InvalidConfig(format!("duplicate class label '{a}'")));
            }
        }
        Ok(Self { version, labels })
    }

    /// Number of categories (K).
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Resolve a class cell: either a label (case-insensitive) or an integer in `1..=K`.
    pub fn resolve(&self, raw: &str) -> Option<usize> {
        let raw = raw.trim();
        if let Some(pos) = self.labels.iter().position(|l| l.eq_ignore_ascii_case(raw)) {
            return Some(pos + 1);
        }
        match raw.parse::<usize>() {
            Ok(idx) if self.contains(idx) => Some(idx),
            _ => None,
        }
    }

    pub fn contains(&self, class: usize) -> bool {
        (1..=self.labels.len()).contains(&class)
    }

    /// Label for a 1-based class index.
    pub fn label(&self, class: usize) -> Option<&str> {
        class.checked_sub(1).and_then(|i| self.labels.get(i)).map(String::as_str)
    }
}

impl Default for ClassTable {
    fn default() -> Self {
        Self::route_types_v1()
    }
}

/// One route's derived observation, as consumed by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub route: String,
    /// Dense 1-based class index into the data set's `ClassTable`.
    pub class: usize,
    pub hours_change_fraction: f64,
    /// `ln(rides_2019 / rides_2015)`.
    pub response_log_rate: f64,
}

/// The engine's input table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataSet {
    pub classes: ClassTable,
    pub observations: Vec<Observation>,
}

impl DataSet {
    pub fn new(classes: ClassTable, observations: Vec<Observation>) -> Self {
        Self { classes, observations }
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    /// Number of observations per class (index 0 is class 1).
    pub fn class_counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.classes.len()];
        for obs in &self.observations {
            if let Some(slot) = obs.class.checked_sub(1).and_then(|i| counts.get_mut(i)) {
                *slot += 1;
            }
        }
        counts
    }
}

/// Which model to fit (CLI-facing).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    /// Single global mean and residual scale.
    Pooled,
    /// Per-class intercepts and slopes with shared parent distributions.
    Hierarchical,
}

impl ModelKind {
    pub fn display_name(self) -> &'static str {
        match self {
            ModelKind::Pooled => "pooled",
            ModelKind::Hierarchical => "hierarchical",
        }
    }
}

/// What happens to the fit when one chain fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Abort the whole fit on the first failed chain.
    FailFast,
    /// Keep the chains that succeeded and report the failed ones.
    BestEffort,
}

/// Sampler configuration. Everything the sampler needs is passed here; there is no global state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SamplerConfig {
    pub chains: usize,
    /// Worker-count ceiling (further capped by the host's core count).
    pub cores: usize,
    /// `None` draws a fresh seed from the OS.
    pub seed: Option<u64>,
    pub warmup_iterations: usize,
    pub sampling_iterations: usize,
    pub target_accept: f64,
    pub max_depth: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            chains: 1,
            cores: 1,
            seed: None,
            warmup_iterations: 1000,
            sampling_iterations: 1000,
            target_accept: 0.9,
            max_depth: 15,
            failure_policy: FailurePolicy::BestEffort,
        }
    }
}

impl SamplerConfig {
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.chains == 0 {
            return Err(EngineError::InvalidConfig("chains must be >= 1".into()));
        }
        if self.cores == 0 {
            return Err(EngineError::InvalidConfig("cores must be >= 1".into()));
        }
        if self.sampling_iterations == 0 {
            return Err(EngineError::InvalidConfig("sampling_iterations must be >= 1".into()));
        }
        if !(self.target_accept > 0.0 && self.target_accept < 1.0) {
            return Err(EngineError::InvalidConfig(format!(
                "target_accept must be in (0, 1), got {}",
                self.target_accept
            )));
        }
        if self.max_depth == 0 || self.max_depth > 30 {
            return Err(EngineError::InvalidConfig(format!(
                "max_depth must be in 1..=30, got {}",
                self.max_depth
            )));
        }
        Ok(())
    }
}

/// Check a credible-interval mass.
pub fn validate_interval_mass(mass: f64) -> Result<(), EngineError> {
    if mass.is_finite() && mass > 0.0 && mass < 1.0 {
        Ok(())
    } else {
        Err(EngineError::InvalidConfig(format!(
            "interval_mass must be in (0, 1), got {mass}"
        )))
    }
}

/// A caller-supplied point at which to evaluate the linear predictor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictorGridPoint {
    /// 1-based class index.
    pub class: usize,
    pub hours_change_fraction: f64,
}

impl PredictorGridPoint {
    pub fn new(class: usize, hours_change_fraction: f64) -> Self {
        Self {
            class,
            hours_change_fraction,
        }
    }
}

/// Mean and credible interval of the expected response at one grid point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionSummary {
    pub class: usize,
    pub hours_change_fraction: f64,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    pub mass: f64,
}

/// Per-parameter posterior summary row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSummary {
    pub name: String,
    pub mean: f64,
    pub sd: f64,
    pub median: f64,
    pub lower: f64,
    pub upper: f64,
    pub mass: f64,
    /// Split-R̂; only available with two or more chains.
    pub rhat: Option<f64>,
    pub ess: f64,
}

/// Sampler health for one chain or merged over chains.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingDiagnostics {
    pub iterations: usize,
    pub divergences: usize,
    pub max_depth_hits: usize,
    pub mean_tree_depth: f64,
    pub mean_accept_stat: f64,
    /// Mean of the per-chain adapted step sizes.
    pub step_size: f64,
}

impl SamplingDiagnostics {
    pub fn divergence_rate(&self) -> f64 {
        if self.iterations == 0 {
            0.0
        } else {
            self.divergences as f64 / self.iterations as f64
        }
    }

    /// Iteration-weighted merge of per-chain diagnostics.
    pub fn merge(parts: &[SamplingDiagnostics]) -> Self {
        let iterations: usize = parts.iter().map(|d| d.iterations).sum();
        if parts.is_empty() {
            return Self::default();
        }
        let weighted = |f: fn(&SamplingDiagnostics) -> f64| {
            if iterations == 0 {
                0.0
            } else {
                parts.iter().map(|d| f(d) * d.iterations as f64).sum::<f64>() / iterations as f64
            }
        };
        Self {
            iterations,
            divergences: parts.iter().map(|d| d.divergences).sum(),
            max_depth_hits: parts.iter().map(|d| d.max_depth_hits).sum(),
            mean_tree_depth: weighted(|d| d.mean_tree_depth),
            mean_accept_stat: weighted(|d| d.mean_accept_stat),
            // Chains stopped before their first iteration never adapted a step size.
            step_size: weighted(|d| d.step_size),
        }
    }
}

/// Non-fatal sampler health warnings, always attached to fit results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SamplingDiagnosticWarning {
    Divergences { count: usize, rate: f64 },
    AcceptanceOffTarget { observed: f64, target: f64 },
    MaxDepthSaturated { hits: usize, max_depth: usize },
}

impl std::fmt::Display for SamplingDiagnosticWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Divergences { count, rate } => write!(
                f,
                "{count} divergent transitions ({:.1}% of draws); consider raising target_accept",
                rate * 100.0
            ),
            Self::AcceptanceOffTarget { observed, target } => write!(
                f,
                "mean acceptance {observed:.3} is far from target {target:.3}"
            ),
            Self::MaxDepthSaturated { hits, max_depth } => write!(
                f,
                "{hits} transitions hit max_depth={max_depth}; consider raising max_depth"
            ),
        }
    }
}

/// Ordered posterior draws of all parameters, in constrained space.
///
/// Rows are grouped by chain: the first `chain_lengths[0]` rows come from the first
/// surviving chain, and so on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorDraws {
    pub model: ModelSpec,
    pub classes: ClassTable,
    pub param_names: Vec<String>,
    pub chain_lengths: Vec<usize>,
    pub draws: Vec<Vec<f64>>,
}

impl PosteriorDraws {
    pub fn len(&self) -> usize {
        self.draws.len()
    }

    pub fn is_empty(&self) -> bool {
        self.draws.is_empty()
    }

    pub fn n_params(&self) -> usize {
        self.param_names.len()
    }

    pub fn param_index(&self, name: &str) -> Option<usize> {
        self.param_names.iter().position(|n| n == name)
    }

    /// All draws of one parameter, in row order.
    pub fn column(&self, j: usize) -> Vec<f64> {
        self.draws.iter().map(|row| row[j]).collect()
    }

    /// Draws of one parameter split by chain.
    pub fn column_by_chain(&self, j: usize) -> Vec<Vec<f64>> {
        let mut out = Vec::with_capacity(self.chain_lengths.len());
        let mut start = 0;
        for &len in &self.chain_lengths {
            out.push(self.draws[start..start + len].iter().map(|row| row[j]).collect());
            start += len;
        }
        out
    }
}
