//! Model specification, data binding and joint log-density.
//!
//! Two primitive operations are needed downstream:
//! - the joint log-density (and gradient) in unconstrained space, for the sampler
//! - the linear predictor `muhat` for one parameter vector and one covariate pair,
//!   for prediction
//!
//! Parameter layouts (constrained order, also used for reporting):
//!
//! ```text
//! Pooled:        [mu, sigma]
//! Hierarchical:  [A, B_H, sigma, sigma_class, sigma_hours, a_C[1..K], b_H[1..K]]
//! ```
//!
//! In unconstrained space every `sigma*` slot holds `ln(sigma*)`.

use rand::Rng;
use rand_distr::{StandardNormal, Uniform};
use serde::{Deserialize, Serialize};

use crate::domain::{ClassTable, DataSet, ModelKind};
use crate::error::EngineError;
use crate::math::{LN_SQRT_2PI, half_cauchy_log_scale, normal_lpdf, normal_term};

const POOLED_MU: usize = 0;
const POOLED_SIGMA: usize = 1;

const H_A: usize = 0;
const H_B: usize = 1;
const H_SIGMA: usize = 2;
const H_SIGMA_CLASS: usize = 3;
const H_SIGMA_HOURS: usize = 4;
const H_GROUPS: usize = 5;

/// Prior standard deviation of `mu` in the pooled model.
const PRIOR_SD_MU: f64 = 1.0;
/// Prior standard deviation of `A` and `B_H`.
const PRIOR_SD_PARENT: f64 = 2.0;
/// Half-Cauchy scale shared by every `sigma*`.
const PRIOR_SCALE_SIGMA: f64 = 1.0;

/// A target density the sampler can explore.
///
/// Implementations must be pure: the sampler calls them from several chains at
/// once through a shared reference.
pub trait LogDensity: Sync {
    fn dim(&self) -> usize;

    /// Log-density at `theta` (unconstrained); writes the gradient into `grad`.
    fn log_density_grad(&self, theta: &[f64], grad: &mut [f64]) -> f64;
}

/// Declarative regression model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelSpec {
    Pooled,
    Hierarchical { classes: usize },
}

impl ModelSpec {
    pub fn for_kind(kind: ModelKind, classes: &ClassTable) -> Self {
        match kind {
            ModelKind::Pooled => ModelSpec::Pooled,
            ModelKind::Hierarchical => ModelSpec::Hierarchical {
                classes: classes.len(),
            },
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ModelSpec::Pooled => ModelKind::Pooled,
            ModelSpec::Hierarchical { .. } => ModelKind::Hierarchical,
        }
    }

    /// Number of parameters.
    pub fn dim(&self) -> usize {
        match *self {
            ModelSpec::Pooled => 2,
            ModelSpec::Hierarchical { classes } => H_GROUPS + 2 * classes,
        }
    }

    pub fn param_names(&self) -> Vec<String> {
        match *self {
            ModelSpec::Pooled => vec!["mu".to_string(), "sigma".to_string()],
            ModelSpec::Hierarchical { classes } => {
                let mut names: Vec<String> = ["A", "B_H", "sigma", "sigma_class", "sigma_hours"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect();
                names.extend((1..=classes).map(|c| format!("a_C[{c}]")));
                names.extend((1..=classes).map(|c| format!("b_H[{c}]")));
                names
            }
        }
    }

    /// Whether slot `j` is a positivity-constrained scale parameter.
    pub fn is_scale(&self, j: usize) -> bool {
        match self {
            ModelSpec::Pooled => j == POOLED_SIGMA,
            ModelSpec::Hierarchical { .. } => (H_SIGMA..H_GROUPS).contains(&j),
        }
    }

    /// Map an unconstrained vector to model parameters (`exp` on scale slots).
    pub fn constrain(&self, theta: &[f64]) -> Vec<f64> {
        theta
            .iter()
            .enumerate()
            .map(|(j, &v)| if self.is_scale(j) { v.exp() } else { v })
            .collect()
    }

    /// Inverse of [`ModelSpec::constrain`]. Fails on a non-positive scale.
    pub fn unconstrain(&self, params: &[f64]) -> Result<Vec<f64>, EngineError> {
        params
            .iter()
            .enumerate()
            .map(|(j, &v)| {
                if !self.is_scale(j) {
                    Ok(v)
                } else if v > 0.0 {
                    Ok(v.ln())
                } else {
                    Err(EngineError::InvalidConfig(format!(
                        "scale parameter {j} must be positive, got {v}"
                    )))
                }
            })
            .collect()
    }

    /// Expected response for one constrained parameter vector.
    ///
    /// # Panics
    /// Panics if `params` is shorter than `self.dim()` or `class` is outside
    /// `1..=K` for the hierarchical model. Callers validate grids first.
    pub fn linear_predictor(&self, params: &[f64], class: usize, hours: f64) -> f64 {
        match *self {
            ModelSpec::Pooled => params[POOLED_MU],
            ModelSpec::Hierarchical { classes } => {
                let c = class - 1;
                params[H_GROUPS + c] + params[H_GROUPS + classes + c] * hours
            }
        }
    }

    /// Draw a starting point near the priors, in unconstrained space.
    ///
    /// Locations start at half a prior standard deviation of jitter, log-scales
    /// uniformly in `(-1, 1)`, and group effects around their parents.
    pub fn initial_point<R: Rng>(&self, rng: &mut R) -> Vec<f64> {
        let jitter = Uniform::new(-1.0, 1.0);
        match *self {
            ModelSpec::Pooled => {
                let z: f64 = rng.sample(StandardNormal);
                vec![0.5 * PRIOR_SD_MU * z, rng.sample(&jitter)]
            }
            ModelSpec::Hierarchical { classes } => {
                let mut theta = vec![0.0; self.dim()];
                for j in [H_A, H_B] {
                    let z: f64 = rng.sample(StandardNormal);
                    theta[j] = 0.5 * PRIOR_SD_PARENT * z;
                }
                for slot in &mut theta[H_SIGMA..H_GROUPS] {
                    *slot = rng.sample(&jitter);
                }
                let sd_class = theta[H_SIGMA_CLASS].exp();
                let sd_hours = theta[H_SIGMA_HOURS].exp();
                for c in 0..classes {
                    let za: f64 = rng.sample(StandardNormal);
                    let zb: f64 = rng.sample(StandardNormal);
                    theta[H_GROUPS + c] = theta[H_A] + 0.5 * sd_class * za;
                    theta[H_GROUPS + classes + c] = theta[H_B] + 0.5 * sd_hours * zb;
                }
                theta
            }
        }
    }

    /// Validate `data` against this model and produce an evaluable target.
    pub fn bind(&self, data: &DataSet) -> Result<BoundModel, EngineError> {
        if data.is_empty() {
            return Err(EngineError::binding("data set has no observations"));
        }
        if let ModelSpec::Hierarchical { classes } = *self {
            if classes != data.classes.len() {
                return Err(EngineError::binding(format!(
                    "model expects {classes} classes but the class table (v{}) has {}",
                    data.classes.version,
                    data.classes.len()
                )));
            }
        }

        let n = data.len();
        let mut class_idx = Vec::with_capacity(n);
        let mut hours = Vec::with_capacity(n);
        let mut response = Vec::with_capacity(n);
        for obs in &data.observations {
            if !data.classes.contains(obs.class) {
                return Err(EngineError::binding_at(
                    None,
                    Some(&obs.route),
                    format!("class index {} outside 1..={}", obs.class, data.classes.len()),
                ));
            }
            if !obs.hours_change_fraction.is_finite() {
                return Err(EngineError::binding_at(
                    None,
                    Some(&obs.route),
                    "non-finite hoursChangeFraction",
                ));
            }
            if !obs.response_log_rate.is_finite() {
                return Err(EngineError::binding_at(
                    None,
                    Some(&obs.route),
                    "non-finite responseLogRate",
                ));
            }
            class_idx.push(obs.class - 1);
            hours.push(obs.hours_change_fraction);
            response.push(obs.response_log_rate);
        }

        Ok(BoundModel {
            spec: *self,
            class_idx,
            hours,
            response,
        })
    }
}

/// A `ModelSpec` bound to validated observations (structure-of-arrays).
#[derive(Debug, Clone)]
pub struct BoundModel {
    spec: ModelSpec,
    class_idx: Vec<usize>,
    hours: Vec<f64>,
    response: Vec<f64>,
}

impl BoundModel {
    pub fn spec(&self) -> ModelSpec {
        self.spec
    }

    pub fn n_obs(&self) -> usize {
        self.response.len()
    }

    fn pooled(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
        let mu = theta[POOLED_MU];
        let u = theta[POOLED_SIGMA];

        let mut lp = normal_lpdf(mu, 0.0, PRIOR_SD_MU);
        grad[POOLED_MU] = -mu / (PRIOR_SD_MU * PRIOR_SD_MU);
        let (lp_sigma, g_sigma) = half_cauchy_log_scale(u, PRIOR_SCALE_SIGMA);
        lp += lp_sigma;
        grad[POOLED_SIGMA] = g_sigma;

        let inv_var = (-2.0 * u).exp();
        let mut ss = 0.0;
        let mut sr = 0.0;
        for &y in &self.response {
            let r = y - mu;
            sr += r;
            ss += r * r;
        }
        let n = self.response.len() as f64;
        lp += -n * (LN_SQRT_2PI + u) - 0.5 * ss * inv_var;
        grad[POOLED_MU] += sr * inv_var;
        grad[POOLED_SIGMA] += ss * inv_var - n;
        lp
    }

    fn hierarchical(&self, k: usize, theta: &[f64], grad: &mut [f64]) -> f64 {
        grad.fill(0.0);
        let a = theta[H_A];
        let b = theta[H_B];
        let parent_var = PRIOR_SD_PARENT * PRIOR_SD_PARENT;

        let mut lp = normal_lpdf(a, 0.0, PRIOR_SD_PARENT) + normal_lpdf(b, 0.0, PRIOR_SD_PARENT);
        grad[H_A] = -a / parent_var;
        grad[H_B] = -b / parent_var;

        for j in H_SIGMA..H_GROUPS {
            let (l, g) = half_cauchy_log_scale(theta[j], PRIOR_SCALE_SIGMA);
            lp += l;
            grad[j] += g;
        }

        let a_idx = H_GROUPS;
        let b_idx = H_GROUPS + k;
        for c in 0..k {
            let t = normal_term(theta[a_idx + c], a, theta[H_SIGMA_CLASS]);
            lp += t.lp;
            grad[a_idx + c] += t.d_x;
            grad[H_A] += t.d_mean;
            grad[H_SIGMA_CLASS] += t.d_log_sd;

            let t = normal_term(theta[b_idx + c], b, theta[H_SIGMA_HOURS]);
            lp += t.lp;
            grad[b_idx + c] += t.d_x;
            grad[H_B] += t.d_mean;
            grad[H_SIGMA_HOURS] += t.d_log_sd;
        }

        let u = theta[H_SIGMA];
        let inv_var = (-2.0 * u).exp();
        let mut ss = 0.0;
        for i in 0..self.response.len() {
            let c = self.class_idx[i];
            let h = self.hours[i];
            let r = self.response[i] - (theta[a_idx + c] + theta[b_idx + c] * h);
            ss += r * r;
            let g = r * inv_var;
            grad[a_idx + c] += g;
            grad[b_idx + c] += g * h;
        }
        let n = self.response.len() as f64;
        lp += -n * (LN_SQRT_2PI + u) - 0.5 * ss * inv_var;
        grad[H_SIGMA] += ss * inv_var - n;
        lp
    }
}

impl LogDensity for BoundModel {
    fn dim(&self) -> usize {
        self.spec.dim()
    }

    fn log_density_grad(&self, theta: &[f64], grad: &mut [f64]) -> f64 {
        match self.spec {
            ModelSpec::Pooled => self.pooled(theta, grad),
            ModelSpec::Hierarchical { classes } => self.hierarchical(classes, theta, grad),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Observation;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn tiny_data() -> DataSet {
        let obs = vec![
            (1, -0.2, 0.05),
            (1, 0.1, -0.02),
            (2, 0.4, -0.15),
            (3, -0.3, 0.2),
            (4, 0.0, 0.01),
            (4, 0.25, -0.1),
        ];
        DataSet::new(
            ClassTable::route_types_v1(),
            obs.into_iter()
                .enumerate()
                .map(|(i, (class, h, y))| Observation {
                    route: format!("R{i}"),
                    class,
                    hours_change_fraction: h,
                    response_log_rate: y,
                })
                .collect(),
        )
    }

    fn check_gradient(model: &BoundModel, theta: &[f64]) {
        let mut grad = vec![0.0; model.dim()];
        model.log_density_grad(theta, &mut grad);
        let mut scratch = vec![0.0; model.dim()];
        for j in 0..theta.len() {
            let h = 1e-6;
            let mut up = theta.to_vec();
            let mut dn = theta.to_vec();
            up[j] += h;
            dn[j] -= h;
            let fd = (model.log_density_grad(&up, &mut scratch) - model.log_density_grad(&dn, &mut scratch))
                / (2.0 * h);
            assert!(
                (fd - grad[j]).abs() < 1e-4 * (1.0 + fd.abs()),
                "param {j}: analytic {} vs numeric {fd}",
                grad[j]
            );
        }
    }

    #[test]
    fn param_layout_hierarchical() {
        let spec = ModelSpec::for_kind(ModelKind::Hierarchical, &ClassTable::route_types_v1());
        let names = spec.param_names();
        assert_eq!(names.len(), spec.dim());
        assert_eq!(names[0], "A");
        assert_eq!(names[5], "a_C[1]");
        assert_eq!(names[12], "b_H[4]");
        assert!(spec.is_scale(2) && spec.is_scale(3) && spec.is_scale(4));
        assert!(!spec.is_scale(5));
    }

    #[test]
    fn pooled_gradient_matches_finite_differences() {
        let model = ModelSpec::Pooled.bind(&tiny_data()).unwrap();
        check_gradient(&model, &[0.1, -0.7]);
        check_gradient(&model, &[-0.4, 0.3]);
    }

    #[test]
    fn hierarchical_gradient_matches_finite_differences() {
        let spec = ModelSpec::Hierarchical { classes: 4 };
        let model = spec.bind(&tiny_data()).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..3 {
            let theta = spec.initial_point(&mut rng);
            check_gradient(&model, &theta);
        }
    }

    #[test]
    fn linear_predictor_uses_class_intercept_and_slope() {
        let spec = ModelSpec::Hierarchical { classes: 2 };
        // [A, B_H, sigma, sigma_class, sigma_hours, a1, a2, b1, b2]
        let params = [0.0, 0.0, 1.0, 1.0, 1.0, 0.5, -0.5, 2.0, -3.0];
        assert!((spec.linear_predictor(&params, 1, 0.5) - 1.5).abs() < 1e-12);
        assert!((spec.linear_predictor(&params, 2, 0.5) + 2.0).abs() < 1e-12);
        assert_eq!(ModelSpec::Pooled.linear_predictor(&[0.3, 1.0], 4, 9.0), 0.3);
    }

    #[test]
    fn bind_rejects_out_of_range_class() {
        let mut data = tiny_data();
        data.observations[2].class = 5;
        let err = ModelSpec::Hierarchical { classes: 4 }.bind(&data).unwrap_err();
        assert!(matches!(err, EngineError::DataBinding { .. }));
        assert!(err.to_string().contains("R2"));

        data.observations[2].class = 0;
        assert!(ModelSpec::Pooled.bind(&data).is_err());
    }

    #[test]
    fn bind_rejects_non_finite_and_empty() {
        let mut data = tiny_data();
        data.observations[0].response_log_rate = f64::INFINITY;
        assert!(ModelSpec::Pooled.bind(&data).is_err());

        let empty = DataSet::new(ClassTable::route_types_v1(), Vec::new());
        assert!(ModelSpec::Pooled.bind(&empty).is_err());
    }

    #[test]
    fn constrain_round_trips_scales() {
        let spec = ModelSpec::Hierarchical { classes: 1 };
        let theta = [0.1, 0.2, -1.0, 0.0, 2.0, 0.3, -0.4];
        let params = spec.constrain(&theta);
        assert!(params[2] > 0.0 && params[3] > 0.0 && params[4] > 0.0);
        let back = spec.unconstrain(&params).unwrap();
        for (a, b) in back.iter().zip(theta.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
        assert!(spec.unconstrain(&[0.0, 0.0, -1.0, 1.0, 1.0, 0.0, 0.0]).is_err());
    }
}
