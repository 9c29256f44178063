//! Single-chain No-U-Turn sampler.
//!
//! Slice-variable NUTS with a diagonal Euclidean metric:
//!
//! - kinetic energy `K(r) = ½ Σ m⁻¹ᵢ rᵢ²`, momentum `rᵢ ~ N(0, 1 / m⁻¹ᵢ)`
//! - trajectories double in a random direction until a U-turn, a divergence
//!   (energy error above `DIVERGENCE_THRESHOLD`), or `max_depth` doublings
//! - the next state is drawn uniformly (progressively) from the valid slice points
//!
//! The chain works in unconstrained space; positions are constrained only when
//! they are recorded as draws.

use nalgebra::DVector;
use rand::Rng;
use rand::distributions::Standard;
use rand::rngs::StdRng;
use rand_distr::{Exp1, StandardNormal};
use tracing::debug;

use crate::domain::SamplingDiagnostics;
use crate::error::EngineError;
use crate::fit::adapt::{DualAveraging, WelfordVariance, WindowSchedule};
use crate::models::LogDensity;

/// Energy error beyond which a trajectory is declared divergent.
pub const DIVERGENCE_THRESHOLD: f64 = 1000.0;

/// Initial points tried before the chain gives up.
pub const MAX_INIT_ATTEMPTS: usize = 100;

const STEP_SEARCH_LIMIT: usize = 100;

/// Per-chain sampling schedule.
#[derive(Debug, Clone, Copy)]
pub struct ChainOptions {
    pub warmup: usize,
    pub sampling: usize,
    pub target_accept: f64,
    pub max_depth: usize,
}

/// Phase of a chain iteration, reported to progress observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Warmup,
    Sampling,
}

/// One completed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub chain: usize,
    pub phase: Phase,
    /// 0-based iteration within the phase.
    pub iteration: usize,
}

/// What one chain hands back.
#[derive(Debug, Clone)]
pub struct ChainOutput {
    pub chain: usize,
    /// Unconstrained positions, one per retained iteration.
    pub positions: Vec<Vec<f64>>,
    pub diagnostics: SamplingDiagnostics,
    /// True when the chain stopped before finishing its sampling iterations.
    pub partial: bool,
}

#[derive(Debug, Clone)]
struct Point {
    theta: DVector<f64>,
    grad: DVector<f64>,
    logp: f64,
}

#[derive(Debug, Clone)]
struct Subtree {
    minus: Point,
    r_minus: DVector<f64>,
    plus: Point,
    r_plus: DVector<f64>,
    proposal: Point,
    n_valid: usize,
    keep_going: bool,
    sum_alpha: f64,
    n_alpha: usize,
    divergent: bool,
}

#[derive(Debug, Clone, Copy)]
struct Transition {
    accept_stat: f64,
    depth: usize,
    hit_max_depth: bool,
    divergent: bool,
}

struct Integrator<'a, D: LogDensity> {
    target: &'a D,
    inv_metric: DVector<f64>,
    step_size: f64,
}

impl<D: LogDensity> Integrator<'_, D> {
    fn evaluate(&self, theta: DVector<f64>) -> Point {
        let mut grad = DVector::zeros(theta.len());
        let logp = self.target.log_density_grad(theta.as_slice(), grad.as_mut_slice());
        let logp = if logp.is_finite() { logp } else { f64::NEG_INFINITY };
        Point { theta, grad, logp }
    }

    fn kinetic(&self, r: &DVector<f64>) -> f64 {
        0.5 * r.iter().zip(self.inv_metric.iter()).map(|(p, m)| m * p * p).sum::<f64>()
    }

    fn sample_momentum(&self, rng: &mut StdRng) -> DVector<f64> {
        DVector::from_iterator(
            self.inv_metric.len(),
            self.inv_metric.iter().map(|m| {
                let z: f64 = rng.sample(StandardNormal);
                z / m.sqrt()
            }),
        )
    }

    fn leapfrog(&self, point: &Point, r: &DVector<f64>, eps: f64) -> (Point, DVector<f64>) {
        let r_half = r + &point.grad * (0.5 * eps);
        let theta = &point.theta + self.inv_metric.component_mul(&r_half) * eps;
        let next = self.evaluate(theta);
        let r_new = r_half + &next.grad * (0.5 * eps);
        (next, r_new)
    }

    fn no_u_turn(&self, minus: &Point, plus: &Point, r_minus: &DVector<f64>, r_plus: &DVector<f64>) -> bool {
        let span = &plus.theta - &minus.theta;
        let v_minus = self.inv_metric.component_mul(r_minus);
        let v_plus = self.inv_metric.component_mul(r_plus);
        span.dot(&v_minus) >= 0.0 && span.dot(&v_plus) >= 0.0
    }

    #[allow(clippy::too_many_arguments)]
    fn build_tree(
        &self,
        point: &Point,
        r: &DVector<f64>,
        log_u: f64,
        direction: f64,
        depth: usize,
        joint0: f64,
        rng: &mut StdRng,
    ) -> Subtree {
        if depth == 0 {
            let (next, r_next) = self.leapfrog(point, r, direction * self.step_size);
            let joint = next.logp - self.kinetic(&r_next);
            let divergent = !(log_u < joint + DIVERGENCE_THRESHOLD);
            let alpha = if joint.is_finite() {
                (joint - joint0).exp().min(1.0)
            } else {
                0.0
            };
            return Subtree {
                minus: next.clone(),
                r_minus: r_next.clone(),
                plus: next.clone(),
                r_plus: r_next,
                proposal: next,
                n_valid: usize::from(log_u <= joint),
                keep_going: !divergent,
                sum_alpha: alpha,
                n_alpha: 1,
                divergent,
            };
        }

        let mut tree = self.build_tree(point, r, log_u, direction, depth - 1, joint0, rng);
        if !tree.keep_going {
            return tree;
        }

        let other = if direction < 0.0 {
            self.build_tree(&tree.minus, &tree.r_minus, log_u, direction, depth - 1, joint0, rng)
        } else {
            self.build_tree(&tree.plus, &tree.r_plus, log_u, direction, depth - 1, joint0, rng)
        };

        let total = tree.n_valid + other.n_valid;
        if total > 0 {
            let u: f64 = rng.sample(Standard);
            if u < other.n_valid as f64 / total as f64 {
                tree.proposal = other.proposal.clone();
            }
        }
        if direction < 0.0 {
            tree.minus = other.minus;
            tree.r_minus = other.r_minus;
        } else {
            tree.plus = other.plus;
            tree.r_plus = other.r_plus;
        }
        tree.n_valid = total;
        tree.sum_alpha += other.sum_alpha;
        tree.n_alpha += other.n_alpha;
        tree.divergent |= other.divergent;
        tree.keep_going =
            other.keep_going && self.no_u_turn(&tree.minus, &tree.plus, &tree.r_minus, &tree.r_plus);
        tree
    }

    /// One NUTS transition from `current`; returns the next state.
    fn transition(&self, current: &Point, max_depth: usize, rng: &mut StdRng) -> (Point, Transition) {
        let r0 = self.sample_momentum(rng);
        let joint0 = current.logp - self.kinetic(&r0);
        let slice: f64 = rng.sample(Exp1);
        let log_u = joint0 - slice;

        let mut minus = current.clone();
        let mut plus = current.clone();
        let mut r_minus = r0.clone();
        let mut r_plus = r0;
        let mut proposal = current.clone();
        let mut n_valid = 1usize;
        let mut keep_going = true;
        let mut depth = 0usize;
        let mut sum_alpha = 0.0;
        let mut n_alpha = 0usize;
        let mut divergent = false;

        while keep_going && depth < max_depth {
            let direction = if rng.sample::<f64, _>(Standard) < 0.5 { -1.0 } else { 1.0 };
            let tree = if direction < 0.0 {
                self.build_tree(&minus, &r_minus, log_u, direction, depth, joint0, rng)
            } else {
                self.build_tree(&plus, &r_plus, log_u, direction, depth, joint0, rng)
            };
            if direction < 0.0 {
                minus = tree.minus.clone();
                r_minus = tree.r_minus.clone();
            } else {
                plus = tree.plus.clone();
                r_plus = tree.r_plus.clone();
            }

            if tree.keep_going && tree.n_valid > 0 {
                let u: f64 = rng.sample(Standard);
                if u < tree.n_valid as f64 / n_valid as f64 {
                    proposal = tree.proposal.clone();
                }
            }

            n_valid += tree.n_valid;
            sum_alpha += tree.sum_alpha;
            n_alpha += tree.n_alpha;
            divergent |= tree.divergent;
            keep_going = tree.keep_going && self.no_u_turn(&minus, &plus, &r_minus, &r_plus);
            depth += 1;
        }

        let accept_stat = if n_alpha > 0 { sum_alpha / n_alpha as f64 } else { 0.0 };
        let info = Transition {
            accept_stat,
            depth,
            hit_max_depth: keep_going && depth >= max_depth,
            divergent,
        };
        (proposal, info)
    }

    /// Double or halve the step size until one leapfrog step crosses 80% acceptance.
    fn find_reasonable_step_size(&mut self, point: &Point, rng: &mut StdRng) {
        let threshold = 0.8_f64.ln();
        let energy_change = |this: &Self, rng: &mut StdRng| {
            let r = this.sample_momentum(rng);
            let h0 = point.logp - this.kinetic(&r);
            let (next, r_next) = this.leapfrog(point, &r, this.step_size);
            let h = next.logp - this.kinetic(&r_next);
            if h.is_finite() { h - h0 } else { f64::NEG_INFINITY }
        };

        let mut delta = energy_change(self, rng);
        let direction = if delta > threshold { 1 } else { -1 };
        for _ in 0..STEP_SEARCH_LIMIT {
            if (direction == 1 && !(delta > threshold)) || (direction == -1 && !(delta < threshold)) {
                break;
            }
            self.step_size = if direction == 1 { self.step_size * 2.0 } else { self.step_size * 0.5 };
            if !(1e-10..=1e7).contains(&self.step_size) {
                break;
            }
            delta = energy_change(self, rng);
        }
        self.step_size = self.step_size.clamp(1e-10, 1e7);
    }
}

/// Run one chain: initialisation, warm-up (discarded), then sampling.
///
/// `should_stop` is polled between iterations; when it returns true the chain
/// returns what it has with `partial = true`.
pub fn run_chain<D: LogDensity>(
    target: &D,
    init: &dyn Fn(&mut StdRng) -> Vec<f64>,
    chain: usize,
    rng: &mut StdRng,
    opts: &ChainOptions,
    should_stop: &dyn Fn() -> bool,
    progress: Option<&(dyn Fn(&Progress) + Sync)>,
) -> Result<ChainOutput, EngineError> {
    let dim = target.dim();
    let mut integrator = Integrator {
        target,
        inv_metric: DVector::from_element(dim, 1.0),
        step_size: 1.0,
    };

    let mut current = initial_point(&integrator, init, chain, rng)?;
    integrator.find_reasonable_step_size(&current, rng);

    let mut step_adapt = DualAveraging::new(opts.target_accept, integrator.step_size);
    let mut schedule = WindowSchedule::new(opts.warmup);
    let mut estimator = WelfordVariance::new(dim);

    let mut positions = Vec::with_capacity(opts.sampling);
    let mut divergences = 0usize;
    let mut max_depth_hits = 0usize;
    let mut depth_sum = 0usize;
    let mut accept_sum = 0.0;
    let mut partial = false;

    for iter in 0..(opts.warmup + opts.sampling) {
        if should_stop() {
            partial = true;
            break;
        }

        let (next, info) = integrator.transition(&current, opts.max_depth, rng);
        current = next;

        let phase = if iter < opts.warmup {
            integrator.step_size = step_adapt.learn(info.accept_stat);
            if let Some(var) = schedule.observe(&mut estimator, &current.theta) {
                debug!(chain, iter, "metric window closed; re-estimating step size");
                integrator.inv_metric = var;
                integrator.find_reasonable_step_size(&current, rng);
                step_adapt.restart(integrator.step_size);
            }
            if iter + 1 == opts.warmup {
                integrator.step_size = step_adapt.final_step_size();
                debug!(chain, step_size = integrator.step_size, "warm-up finished");
            }
            Phase::Warmup
        } else {
            positions.push(current.theta.iter().copied().collect());
            divergences += usize::from(info.divergent);
            max_depth_hits += usize::from(info.hit_max_depth);
            depth_sum += info.depth;
            accept_sum += info.accept_stat;
            Phase::Sampling
        };

        if let Some(cb) = progress {
            let iteration = if phase == Phase::Warmup { iter } else { iter - opts.warmup };
            cb(&Progress { chain, phase, iteration });
        }
    }

    let kept = positions.len();
    let denom = kept.max(1) as f64;
    let diagnostics = SamplingDiagnostics {
        iterations: kept,
        divergences,
        max_depth_hits,
        mean_tree_depth: depth_sum as f64 / denom,
        mean_accept_stat: accept_sum / denom,
        step_size: integrator.step_size,
    };

    Ok(ChainOutput {
        chain,
        positions,
        diagnostics,
        partial: partial || kept < opts.sampling,
    })
}

fn initial_point<D: LogDensity>(
    integrator: &Integrator<'_, D>,
    init: &dyn Fn(&mut StdRng) -> Vec<f64>,
    chain: usize,
    rng: &mut StdRng,
) -> Result<Point, EngineError> {
    let dim = integrator.target.dim();
    for _ in 0..MAX_INIT_ATTEMPTS {
        let theta = init(rng);
        if theta.len() != dim {
            return Err(EngineError::Sampling {
                chain,
                reason: format!("initial point has {} coordinates, target has {dim}", theta.len()),
            });
        }
        let point = integrator.evaluate(DVector::from_vec(theta));
        if point.logp.is_finite() && point.grad.iter().all(|g| g.is_finite()) {
            return Ok(point);
        }
    }
    Err(EngineError::Sampling {
        chain,
        reason: format!(
            "log density or gradient non-finite at {MAX_INIT_ATTEMPTS} initial points"
        ),
    })
}
