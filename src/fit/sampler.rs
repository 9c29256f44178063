//! Multi-chain orchestration.
//!
//! Chains are independent units of work on a dedicated rayon pool: each one
//! owns its RNG (seeded from `(seed, chain)`), its adaptation state and its
//! draws. Results are merged in chain order once every chain has returned.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{
    DataSet, FailurePolicy, PosteriorDraws, SamplerConfig, SamplingDiagnosticWarning, SamplingDiagnostics,
};
use crate::error::EngineError;
use crate::fit::nuts::{ChainOptions, ChainOutput, Progress, run_chain};
use crate::math::mix_words;
use crate::models::{LogDensity, ModelSpec};

/// Mean acceptance further than this from the target raises a warning.
const ACCEPT_TOLERANCE: f64 = 0.15;
/// Share of transitions allowed to saturate `max_depth` before warning.
const MAX_DEPTH_HIT_SHARE: f64 = 0.05;

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every chain to stop after its current iteration.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-chain outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainReport {
    pub chain: usize,
    pub draws: usize,
    pub partial: bool,
    pub diagnostics: SamplingDiagnostics,
}

/// A chain that failed under the best-effort policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainFailure {
    pub chain: usize,
    pub message: String,
}

/// Everything a fit produces.
#[derive(Debug, Clone)]
pub struct FitOutput {
    pub draws: PosteriorDraws,
    pub chains: Vec<ChainReport>,
    /// Merged over the surviving chains.
    pub diagnostics: SamplingDiagnostics,
    pub warnings: Vec<SamplingDiagnosticWarning>,
    pub failed_chains: Vec<ChainFailure>,
    /// Set when cancellation cut at least one chain short.
    pub partial: bool,
    /// Seed actually used (drawn from the OS when the config left it unset).
    pub seed: u64,
}

struct ChainRun {
    outputs: Vec<ChainOutput>,
    failures: Vec<ChainFailure>,
    seed: u64,
}

/// NUTS sampler over a bound model.
#[derive(Debug, Clone)]
pub struct Sampler {
    config: SamplerConfig,
    cancel: CancelToken,
}

impl Sampler {
    pub fn new(config: SamplerConfig) -> Result<Self, EngineError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: CancelToken::new(),
        })
    }

    /// Use an externally owned cancellation token.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Bind `data` to `spec` and draw from the posterior.
    pub fn fit(&self, spec: ModelSpec, data: &DataSet) -> Result<FitOutput, EngineError> {
        self.fit_inner(spec, data, None)
    }

    /// Like [`Sampler::fit`], reporting every completed iteration to `progress`.
    ///
    /// The callback runs on the worker threads.
    pub fn fit_with_progress(
        &self,
        spec: ModelSpec,
        data: &DataSet,
        progress: &(dyn Fn(&Progress) + Sync),
    ) -> Result<FitOutput, EngineError> {
        self.fit_inner(spec, data, Some(progress))
    }

    fn fit_inner(
        &self,
        spec: ModelSpec,
        data: &DataSet,
        progress: Option<&(dyn Fn(&Progress) + Sync)>,
    ) -> Result<FitOutput, EngineError> {
        let target = spec.bind(data)?;
        info!(
            model = spec.kind().display_name(),
            observations = target.n_obs(),
            chains = self.config.chains,
            warmup = self.config.warmup_iterations,
            sampling = self.config.sampling_iterations,
            "starting fit"
        );

        let init = |_chain: usize, rng: &mut StdRng| spec.initial_point(rng);
        let run = self.run_chains(&target, &init, progress)?;

        let mut rows = Vec::new();
        let mut chain_lengths = Vec::new();
        let mut reports = Vec::with_capacity(run.outputs.len());
        for out in &run.outputs {
            if !out.positions.is_empty() {
                chain_lengths.push(out.positions.len());
                rows.extend(out.positions.iter().map(|theta| spec.constrain(theta)));
            }
            reports.push(ChainReport {
                chain: out.chain,
                draws: out.positions.len(),
                partial: out.partial,
                diagnostics: out.diagnostics.clone(),
            });
        }

        let per_chain: Vec<SamplingDiagnostics> = reports.iter().map(|r| r.diagnostics.clone()).collect();
        let diagnostics = SamplingDiagnostics::merge(&per_chain);
        let warnings = diagnostic_warnings(&diagnostics, &self.config);
        for w in &warnings {
            warn!(model = spec.kind().display_name(), "{w}");
        }

        let partial = reports.iter().any(|r| r.partial);
        info!(
            draws = rows.len(),
            divergences = diagnostics.divergences,
            failed_chains = run.failures.len(),
            partial,
            "fit finished"
        );

        Ok(FitOutput {
            draws: PosteriorDraws {
                model: spec,
                classes: data.classes.clone(),
                param_names: spec.param_names(),
                chain_lengths,
                draws: rows,
            },
            chains: reports,
            diagnostics,
            warnings,
            failed_chains: run.failures,
            partial,
            seed: run.seed,
        })
    }

    /// Run every chain against `target` and apply the failure policy.
    fn run_chains<D: LogDensity>(
        &self,
        target: &D,
        init: &(dyn Fn(usize, &mut StdRng) -> Vec<f64> + Sync),
        progress: Option<&(dyn Fn(&Progress) + Sync)>,
    ) -> Result<ChainRun, EngineError> {
        let cfg = &self.config;
        let seed = cfg.seed.unwrap_or_else(rand::random::<u64>);
        let host = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        let workers = cfg.cores.min(cfg.chains).min(host).max(1);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| EngineError::InvalidConfig(format!("cannot start worker pool: {e}")))?;

        let opts = ChainOptions {
            warmup: cfg.warmup_iterations,
            sampling: cfg.sampling_iterations,
            target_accept: cfg.target_accept,
            max_depth: cfg.max_depth,
        };
        let fail_fast = cfg.failure_policy == FailurePolicy::FailFast;
        let abort = AtomicBool::new(false);

        let results: Vec<Result<ChainOutput, EngineError>> = pool.install(|| {
            (0..cfg.chains)
                .into_par_iter()
                .map(|chain| {
                    let mut rng = StdRng::seed_from_u64(chain_seed(seed, chain));
                    let chain_init = |rng: &mut StdRng| init(chain, rng);
                    let stop = || self.cancel.is_cancelled() || abort.load(Ordering::SeqCst);
                    let out = run_chain(target, &chain_init, chain, &mut rng, &opts, &stop, progress);
                    if out.is_err() && fail_fast {
                        abort.store(true, Ordering::SeqCst);
                    }
                    out
                })
                .collect()
        });

        let mut outputs = Vec::with_capacity(results.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(out) => outputs.push(out),
                Err(err) => errors.push(err),
            }
        }

        if let Some(first) = errors.first() {
            if fail_fast || outputs.is_empty() {
                return Err(first.clone());
            }
        }

        let failures = errors
            .iter()
            .map(|err| {
                warn!("{err}; continuing with the remaining chains");
                ChainFailure {
                    chain: match err {
                        EngineError::Sampling { chain, .. } => *chain,
                        _ => usize::MAX,
                    },
                    message: err.to_string(),
                }
            })
            .collect();

        Ok(ChainRun {
            outputs,
            failures,
            seed,
        })
    }
}

/// Per-chain RNG seed.
pub fn chain_seed(seed: u64, chain: usize) -> u64 {
    mix_words(&[seed, chain as u64])
}

/// Non-fatal health warnings for merged diagnostics.
pub fn diagnostic_warnings(diag: &SamplingDiagnostics, config: &SamplerConfig) -> Vec<SamplingDiagnosticWarning> {
    let mut out = Vec::new();
    if diag.iterations == 0 {
        return out;
    }
    if diag.divergences > 0 {
        out.push(SamplingDiagnosticWarning::Divergences {
            count: diag.divergences,
            rate: diag.divergence_rate(),
        });
    }
    if (diag.mean_accept_stat - config.target_accept).abs() > ACCEPT_TOLERANCE {
        out.push(SamplingDiagnosticWarning::AcceptanceOffTarget {
            observed: diag.mean_accept_stat,
            target: config.target_accept,
        });
    }
    if diag.max_depth_hits as f64 > MAX_DEPTH_HIT_SHARE * diag.iterations as f64 {
        out.push(SamplingDiagnosticWarning::MaxDepthSaturated {
            hits: diag.max_depth_hits,
            max_depth: config.max_depth,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ClassTable, Observation};
    use crate::fit::nuts::Phase;
    use crate::math::mean;
    use rand_distr::{Distribution, Normal};

    fn pooled_data(n: usize, mu: f64, sigma: f64, seed: u64) -> DataSet {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(mu, sigma).unwrap();
        let observations = (0..n)
            .map(|i| Observation {
                route: format!("R{i}"),
                class: 1 + i % 4,
                hours_change_fraction: (i % 11) as f64 / 10.0 - 0.5,
                response_log_rate: noise.sample(&mut rng),
            })
            .collect();
        DataSet::new(ClassTable::route_types_v1(), observations)
    }

    fn config(chains: usize, seed: u64) -> SamplerConfig {
        SamplerConfig {
            chains,
            cores: chains,
            seed: Some(seed),
            warmup_iterations: 300,
            sampling_iterations: 300,
            target_accept: 0.8,
            ..SamplerConfig::default()
        }
    }

    #[test]
    fn pooled_posterior_recovers_generating_values() {
        let data = pooled_data(1000, 0.0, 0.2, 17);
        let sampler = Sampler::new(config(2, 4)).unwrap();
        let fit = sampler.fit(ModelSpec::Pooled, &data).unwrap();

        assert_eq!(fit.draws.len(), 600);
        assert_eq!(fit.draws.chain_lengths, vec![300, 300]);
        assert!(!fit.partial);
        assert!(fit.failed_chains.is_empty());
        let mu = mean(&fit.draws.column(0));
        let sigma = mean(&fit.draws.column(1));
        assert!(mu.abs() < 0.05, "mu={mu}");
        assert!((sigma - 0.2).abs() < 0.02, "sigma={sigma}");
    }

    #[test]
    fn hierarchical_scales_positive_in_every_draw() {
        let data = pooled_data(80, 0.1, 0.3, 2);
        let spec = ModelSpec::for_kind(crate::domain::ModelKind::Hierarchical, &data.classes);
        let fit = Sampler::new(config(2, 11)).unwrap().fit(spec, &data).unwrap();
        for name in ["sigma", "sigma_class", "sigma_hours"] {
            let j = fit.draws.param_index(name).unwrap();
            assert!(fit.draws.column(j).iter().all(|&v| v > 0.0), "{name}");
        }
    }

    #[test]
    fn same_seed_gives_identical_draws() {
        let data = pooled_data(50, 0.3, 1.0, 8);
        let a = Sampler::new(config(2, 99)).unwrap().fit(ModelSpec::Pooled, &data).unwrap();
        let b = Sampler::new(config(2, 99)).unwrap().fit(ModelSpec::Pooled, &data).unwrap();
        assert_eq!(a.draws, b.draws);
        assert_eq!(a.seed, 99);
    }

    #[test]
    fn cancel_after_warmup_returns_partial_draws() {
        let data = pooled_data(50, 0.0, 1.0, 3);
        let sampler = Sampler::new(config(1, 5)).unwrap();
        let token = sampler.cancel_token();
        let progress = move |p: &Progress| {
            if p.phase == Phase::Sampling && p.iteration == 9 {
                token.cancel();
            }
        };
        let fit = sampler.fit_with_progress(ModelSpec::Pooled, &data, &progress).unwrap();
        assert!(fit.partial);
        assert_eq!(fit.draws.len(), 10);
        assert!(fit.chains[0].partial);
    }

    /// Standard normal that cannot be initialised on chain 1.
    struct Normal1;

    impl LogDensity for Normal1 {
        fn dim(&self) -> usize {
            1
        }

        fn log_density_grad(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
            grad[0] = -theta[0];
            -0.5 * theta[0] * theta[0]
        }
    }

    fn init_failing_on_chain_one(chain: usize, _rng: &mut StdRng) -> Vec<f64> {
        if chain == 1 { vec![0.0, 0.0] } else { vec![0.0] }
    }

    #[test]
    fn best_effort_keeps_surviving_chains() {
        let mut cfg = config(3, 1);
        cfg.warmup_iterations = 20;
        cfg.sampling_iterations = 20;
        let sampler = Sampler::new(cfg).unwrap();
        let run = sampler.run_chains(&Normal1, &init_failing_on_chain_one, None).unwrap();
        assert_eq!(run.outputs.len(), 2);
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].chain, 1);
    }

    #[test]
    fn fail_fast_returns_chain_error() {
        let mut cfg = config(3, 1);
        cfg.warmup_iterations = 20;
        cfg.sampling_iterations = 20;
        cfg.failure_policy = FailurePolicy::FailFast;
        let sampler = Sampler::new(cfg).unwrap();
        let err = sampler
            .run_chains(&Normal1, &init_failing_on_chain_one, None)
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Sampling { chain: 1, .. }));
    }

    #[test]
    fn binding_errors_surface_before_sampling() {
        let data = DataSet::new(ClassTable::route_types_v1(), Vec::new());
        let err = Sampler::new(config(1, 1)).unwrap().fit(ModelSpec::Pooled, &data).unwrap_err();
        assert!(matches!(err, EngineError::DataBinding { .. }));
    }

    #[test]
    fn warnings_follow_thresholds() {
        let cfg = SamplerConfig::default();
        let diag = SamplingDiagnostics {
            iterations: 100,
            divergences: 3,
            max_depth_hits: 6,
            mean_tree_depth: 5.0,
            mean_accept_stat: 0.6,
            step_size: 0.1,
        };
        let w = diagnostic_warnings(&diag, &cfg);
        assert_eq!(w.len(), 3);

        let healthy = SamplingDiagnostics {
            divergences: 0,
            max_depth_hits: 5,
            mean_accept_stat: 0.88,
            ..diag
        };
        assert!(diagnostic_warnings(&healthy, &cfg).is_empty());
    }

    #[test]
    fn chain_seeds_differ_per_chain() {
        assert_ne!(chain_seed(1, 0), chain_seed(1, 1));
        assert_eq!(chain_seed(1, 0), chain_seed(1, 0));
        assert_ne!(chain_seed(0, 1), chain_seed(1, 0));
    }
}
