//! Statistics over posterior draws.
//!
//! Credible intervals here are "narrowest window" intervals over the empirical
//! draws: among all windows of consecutive sorted draws holding the requested
//! mass, pick the narrowest one that also contains the mean. Requiring the mean
//! keeps `lower <= mean <= upper` exact even for skewed draw sets, and width is
//! still non-decreasing in the mass.

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Sample standard deviation (`n - 1` denominator). Zero for fewer than two values.
pub fn std_dev(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let m = mean(values);
    let ss: f64 = values.iter().map(|v| (v - m) * (v - m)).sum();
    (ss / (n as f64 - 1.0)).sqrt()
}

pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let sorted = sorted_copy(values);
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

/// Narrowest window of the draws containing `mass` of them and their mean.
///
/// Returns `None` for an empty or non-finite draw set.
pub fn credible_interval(values: &[f64], mass: f64) -> Option<(f64, f64)> {
    if values.is_empty() || values.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let sorted = sorted_copy(values);
    let n = sorted.len();
    let m = mean(values);
    if n == 1 {
        return Some((sorted[0], sorted[0]));
    }

    let k = ((mass.clamp(0.0, 1.0) * n as f64).ceil() as usize).clamp(2, n);
    let centre = m.clamp(sorted[0], sorted[n - 1]);

    let mut best: Option<(f64, f64)> = None;
    for i in 0..=(n - k) {
        let lo = sorted[i];
        let hi = sorted[i + k - 1];
        if lo > centre || hi < centre {
            continue;
        }
        match best {
            Some((blo, bhi)) if hi - lo >= bhi - blo => {}
            _ => best = Some((lo, hi)),
        }
    }

    // Windows of >= 2 consecutive draws cover [min, max], so one always contains
    // `centre`; widen by rounding slack so the mean itself is inside.
    best.map(|(lo, hi)| (lo.min(m), hi.max(m)))
}

/// Split-R̂ over chains (each chain is cut in half).
///
/// Needs at least two chains with four or more draws each. Chains are truncated
/// to the shortest length.
pub fn split_rhat(chains: &[Vec<f64>]) -> Option<f64> {
    if chains.len() < 2 {
        return None;
    }
    let len = chains.iter().map(Vec::len).min()?;
    if len < 4 {
        return None;
    }
    let half = len / 2;
    let mut pieces: Vec<&[f64]> = Vec::with_capacity(chains.len() * 2);
    for c in chains {
        pieces.push(&c[..half]);
        pieces.push(&c[len - half..len]);
    }

    let m = pieces.len() as f64;
    let n = half as f64;
    let means: Vec<f64> = pieces.iter().map(|p| mean(p)).collect();
    let grand = mean(&means);
    let b = n / (m - 1.0) * means.iter().map(|x| (x - grand) * (x - grand)).sum::<f64>();
    let w = pieces.iter().map(|p| std_dev(p).powi(2)).sum::<f64>() / m;
    if !(w > 0.0) {
        return None;
    }
    let var_plus = (n - 1.0) / n * w + b / n;
    Some((var_plus / w).sqrt())
}

/// Effective sample size using Geyer's initial monotone sequence over the
/// chain-averaged autocorrelation.
pub fn effective_sample_size(chains: &[Vec<f64>]) -> f64 {
    let chains: Vec<&Vec<f64>> = chains.iter().filter(|c| !c.is_empty()).collect();
    if chains.is_empty() {
        return 0.0;
    }
    let n = chains.iter().map(|c| c.len()).min().unwrap_or(0);
    let m = chains.len();
    let total = (n * m) as f64;
    if n < 4 {
        return total;
    }

    let means: Vec<f64> = chains.iter().map(|c| mean(&c[..n])).collect();
    let autocov = |lag: usize| -> f64 {
        let mut acc = 0.0;
        for (c, &mu) in chains.iter().zip(&means) {
            let c = &c[..n];
            let mut s = 0.0;
            for t in 0..(n - lag) {
                s += (c[t] - mu) * (c[t + lag] - mu);
            }
            acc += s / n as f64;
        }
        acc / m as f64
    };

    let nf = n as f64;
    let acov0 = autocov(0);
    let w = acov0 * nf / (nf - 1.0);
    let between = if m > 1 {
        let g = mean(&means);
        means.iter().map(|x| (x - g) * (x - g)).sum::<f64>() / (m as f64 - 1.0)
    } else {
        0.0
    };
    let var_plus = w * (nf - 1.0) / nf + between;
    if !(var_plus > 0.0) {
        return total;
    }

    let rho = |lag: usize| 1.0 - (w - autocov(lag)) / var_plus;

    let mut sum_pairs = 0.0;
    let mut prev_pair = f64::INFINITY;
    let mut t = 0;
    while t + 1 < n {
        let pair = rho(t) + rho(t + 1);
        if pair <= 0.0 {
            break;
        }
        let pair = pair.min(prev_pair);
        sum_pairs += pair;
        prev_pair = pair;
        t += 2;
    }

    let tau = (-1.0 + 2.0 * sum_pairs).max(1.0 / total.log10());
    total / tau
}

fn sorted_copy(values: &[f64]) -> Vec<f64> {
    let mut out = values.to_vec();
    out.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use rand_distr::{Distribution, Normal};

    fn normal_draws(n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let normal = Normal::new(0.0, 1.0).unwrap();
        (0..n).map(|_| normal.sample(&mut rng)).collect()
    }

    #[test]
    fn median_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn interval_picks_narrowest_window() {
        // Mass 0.5 of 6 draws = 3 draws.
        let draws = [0.0, 0.1, 0.2, 5.0, 9.0, 10.0];
        let (lo, hi) = credible_interval(&draws, 0.5).unwrap();
        assert!(lo <= mean(&draws) && mean(&draws) <= hi);
        // The cluster [0.0, 0.2] does not contain the mean (~4.05), so the
        // narrowest window through the mean is chosen instead.
        assert_eq!((lo, hi), (0.1, 5.0));
    }

    #[test]
    fn interval_on_normal_draws_is_close_to_theory() {
        let draws = normal_draws(20_000, 7);
        let (lo, hi) = credible_interval(&draws, 0.89).unwrap();
        // Central 89% of N(0,1) is about ±1.598.
        assert!((lo + 1.598).abs() < 0.06, "lo={lo}");
        assert!((hi - 1.598).abs() < 0.06, "hi={hi}");
    }

    #[test]
    fn fifty_percent_interval_nested_in_ninety_three() {
        let draws = normal_draws(4_000, 11);
        let (lo50, hi50) = credible_interval(&draws, 0.50).unwrap();
        let (lo93, hi93) = credible_interval(&draws, 0.93).unwrap();
        assert!(lo93 <= lo50 && hi50 <= hi93);
    }

    #[test]
    fn interval_of_constant_draws_is_degenerate() {
        let draws = vec![0.1; 50];
        let (lo, hi) = credible_interval(&draws, 0.89).unwrap();
        let m = mean(&draws);
        assert!(lo <= m && m <= hi);
        assert!((hi - lo).abs() < 1e-12);
    }

    #[test]
    fn interval_rejects_empty_and_non_finite() {
        assert!(credible_interval(&[], 0.9).is_none());
        assert!(credible_interval(&[1.0, f64::NAN], 0.9).is_none());
    }

    #[test]
    fn split_rhat_near_one_for_iid_chains() {
        let chains = vec![normal_draws(1_000, 1), normal_draws(1_000, 2), normal_draws(1_000, 3)];
        let r = split_rhat(&chains).unwrap();
        assert!((r - 1.0).abs() < 0.02, "rhat={r}");
    }

    #[test]
    fn split_rhat_flags_disagreeing_chains() {
        let a = normal_draws(500, 1);
        let b: Vec<f64> = normal_draws(500, 2).into_iter().map(|v| v + 5.0).collect();
        let r = split_rhat(&[a, b]).unwrap();
        assert!(r > 1.5, "rhat={r}");
    }

    #[test]
    fn split_rhat_needs_two_chains() {
        assert!(split_rhat(&[normal_draws(100, 1)]).is_none());
    }

    #[test]
    fn ess_of_iid_draws_is_near_n_and_ar1_is_smaller() {
        let iid = normal_draws(2_000, 5);
        let ess_iid = effective_sample_size(&[iid.clone()]);
        assert!(ess_iid > 1_200.0, "ess={ess_iid}");

        let mut ar = Vec::with_capacity(iid.len());
        let mut x = 0.0;
        for e in &iid {
            x = 0.9 * x + e;
            ar.push(x);
        }
        let ess_ar = effective_sample_size(&[ar]);
        assert!(ess_ar < 400.0, "ess={ess_ar}");
    }

    proptest! {
        #[test]
        fn interval_brackets_mean_and_widens_with_mass(
            draws in prop::collection::vec(-1e3f64..1e3, 2..200),
            m1 in 0.05f64..0.95,
            dm in 0.0f64..0.04,
        ) {
            let m2 = m1 + dm;
            let (lo1, hi1) = credible_interval(&draws, m1).unwrap();
            let (lo2, hi2) = credible_interval(&draws, m2).unwrap();
            let mu = mean(&draws);
            prop_assert!(lo1 <= mu && mu <= hi1);
            prop_assert!(lo2 <= mu && mu <= hi2);
            prop_assert!(hi2 - lo2 >= hi1 - lo1 - 1e-9);
        }
    }
}
