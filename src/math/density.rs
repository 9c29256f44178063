//! Log-densities used by the two regression models, with analytic gradients.
//!
//! Scale parameters are handled on the log scale: callers pass `u = ln σ`, and the
//! half-Cauchy helper already includes the log-Jacobian `+u` of the `σ = exp(u)` map.

use std::f64::consts::PI;

/// `ln(sqrt(2π))`.
pub const LN_SQRT_2PI: f64 = 0.918_938_533_204_672_8;

/// Value and partial derivatives of a normal log-density `ln N(x | mean, exp(log_sd))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NormalTerm {
    pub lp: f64,
    pub d_x: f64,
    pub d_mean: f64,
    pub d_log_sd: f64,
}

/// Normal log-density for a fixed (non-parameter) scale.
pub fn normal_lpdf(x: f64, mean: f64, sd: f64) -> f64 {
    let z = (x - mean) / sd;
    -LN_SQRT_2PI - sd.ln() - 0.5 * z * z
}

/// Normal log-density parameterized by `log_sd`, with all three partials.
pub fn normal_term(x: f64, mean: f64, log_sd: f64) -> NormalTerm {
    let inv_sd = (-log_sd).exp();
    let z = (x - mean) * inv_sd;
    let d_mean = z * inv_sd;
    NormalTerm {
        lp: -LN_SQRT_2PI - log_sd - 0.5 * z * z,
        d_x: -d_mean,
        d_mean,
        d_log_sd: z * z - 1.0,
    }
}

/// Half-Cauchy(0, scale) log-density of `σ = exp(u)` including the log-Jacobian.
///
/// Returns `(lp, d lp / d u)`.
pub fn half_cauchy_log_scale(u: f64, scale: f64) -> (f64, f64) {
    let r = u.exp() / scale;
    let r2 = r * r;
    let lp = (2.0 / (PI * scale)).ln() - r2.ln_1p() + u;
    let grad = 1.0 - 2.0 * r2 / (1.0 + r2);
    (lp, grad)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric_diff(f: impl Fn(f64) -> f64, x: f64) -> f64 {
        let h = 1e-6;
        (f(x + h) - f(x - h)) / (2.0 * h)
    }

    #[test]
    fn normal_term_matches_fixed_scale_density() {
        let t = normal_term(0.3, -0.1, 0.5_f64.ln());
        assert!((t.lp - normal_lpdf(0.3, -0.1, 0.5)).abs() < 1e-12);
    }

    #[test]
    fn normal_term_gradients_match_finite_differences() {
        let (x, m, u) = (0.7, 0.2, -0.4);
        let t = normal_term(x, m, u);
        assert!((t.d_x - numeric_diff(|v| normal_term(v, m, u).lp, x)).abs() < 1e-6);
        assert!((t.d_mean - numeric_diff(|v| normal_term(x, v, u).lp, m)).abs() < 1e-6);
        assert!((t.d_log_sd - numeric_diff(|v| normal_term(x, m, v).lp, u)).abs() < 1e-6);
    }

    #[test]
    fn half_cauchy_gradient_matches_finite_differences() {
        for &u in &[-3.0, -0.5, 0.0, 1.2, 4.0] {
            let (_, g) = half_cauchy_log_scale(u, 1.0);
            let fd = numeric_diff(|v| half_cauchy_log_scale(v, 1.0).0, u);
            assert!((g - fd).abs() < 1e-6, "u={u}: {g} vs {fd}");
        }
    }

    #[test]
    fn half_cauchy_integrates_to_one_on_log_scale() {
        // Trapezoid over u; the Jacobian term makes this a density in u.
        let (lo, hi, n) = (-20.0, 20.0, 40_000);
        let h = (hi - lo) / n as f64;
        let mut total = 0.0;
        for i in 0..=n {
            let u = lo + i as f64 * h;
            let w = if i == 0 || i == n { 0.5 } else { 1.0 };
            total += w * half_cauchy_log_scale(u, 1.0).0.exp();
        }
        assert!((total * h - 1.0).abs() < 1e-3, "integral = {}", total * h);
    }
}
