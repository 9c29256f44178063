//! Warm-up adaptation: dual-averaging step size and windowed diagonal metric.
//!
//! The window schedule follows the usual three-phase layout:
//!
//! ```text
//! | init buffer (fast) | slow windows 25, 50, 100, ... | term buffer (fast) |
//! ```
//!
//! Only the step size adapts in the fast phases. At the end of every slow window
//! the metric is re-estimated from the draws in that window, and the step size
//! search restarts.

use nalgebra::DVector;

const DEFAULT_INIT_BUFFER: usize = 75;
const DEFAULT_TERM_BUFFER: usize = 50;
const DEFAULT_BASE_WINDOW: usize = 25;

/// Warm-up shorter than this adapts the step size only.
const MIN_METRIC_WARMUP: usize = 20;

/// Nesterov dual averaging of `log(step size)` toward a target acceptance rate.
#[derive(Debug, Clone)]
pub struct DualAveraging {
    target: f64,
    mu: f64,
    s_bar: f64,
    x_bar: f64,
    counter: f64,
    gamma: f64,
    kappa: f64,
    t0: f64,
}

impl DualAveraging {
    pub fn new(target: f64, step_size: f64) -> Self {
        let mut out = Self {
            target,
            mu: 0.0,
            s_bar: 0.0,
            x_bar: 0.0,
            counter: 0.0,
            gamma: 0.05,
            kappa: 0.75,
            t0: 10.0,
        };
        out.restart(step_size);
        out
    }

    /// Forget history and bias future proposals toward `10 * step_size`.
    pub fn restart(&mut self, step_size: f64) {
        self.mu = (10.0 * step_size).ln();
        self.s_bar = 0.0;
        self.x_bar = 0.0;
        self.counter = 0.0;
    }

    /// Feed one transition's acceptance statistic; returns the next step size.
    pub fn learn(&mut self, accept_stat: f64) -> f64 {
        let accept = if accept_stat.is_finite() { accept_stat.min(1.0) } else { 0.0 };
        self.counter += 1.0;
        let eta = 1.0 / (self.counter + self.t0);
        self.s_bar = (1.0 - eta) * self.s_bar + eta * (self.target - accept);
        let x = self.mu - self.s_bar * self.counter.sqrt() / self.gamma;
        let x_eta = self.counter.powf(-self.kappa);
        self.x_bar = (1.0 - x_eta) * self.x_bar + x_eta * x;
        x.exp()
    }

    /// Averaged step size used after warm-up.
    pub fn final_step_size(&self) -> f64 {
        self.x_bar.exp()
    }
}

/// Streaming per-coordinate variance.
#[derive(Debug, Clone)]
pub struct WelfordVariance {
    n: usize,
    mean: DVector<f64>,
    m2: DVector<f64>,
}

impl WelfordVariance {
    pub fn new(dim: usize) -> Self {
        Self {
            n: 0,
            mean: DVector::zeros(dim),
            m2: DVector::zeros(dim),
        }
    }

    pub fn add(&mut self, x: &DVector<f64>) {
        self.n += 1;
        let delta = x - &self.mean;
        self.mean += &delta / self.n as f64;
        let delta2 = x - &self.mean;
        self.m2 += delta.component_mul(&delta2);
    }

    pub fn count(&self) -> usize {
        self.n
    }

    /// Sample variance shrunk toward `1e-3` (weight 5 pseudo-draws).
    pub fn regularized_variance(&self) -> DVector<f64> {
        let n = self.n as f64;
        if self.n < 2 {
            return DVector::from_element(self.mean.len(), 1.0);
        }
        let var = &self.m2 / (n - 1.0);
        var.map(|v| (n / (n + 5.0)) * v + 1e-3 * (5.0 / (n + 5.0)))
    }

    pub fn reset(&mut self) {
        self.n = 0;
        self.mean.fill(0.0);
        self.m2.fill(0.0);
    }
}

/// Which warm-up iterations feed the metric estimate and when it is refreshed.
#[derive(Debug, Clone)]
pub struct WindowSchedule {
    warmup: usize,
    init_buffer: usize,
    term_buffer: usize,
    window_size: usize,
    next_window_end: usize,
    counter: usize,
    enabled: bool,
}

impl WindowSchedule {
    pub fn new(warmup: usize) -> Self {
        let (mut init_buffer, mut term_buffer, mut base_window) =
            (DEFAULT_INIT_BUFFER, DEFAULT_TERM_BUFFER, DEFAULT_BASE_WINDOW);
        let enabled = warmup >= MIN_METRIC_WARMUP;
        if enabled && init_buffer + term_buffer + base_window > warmup {
            init_buffer = (0.15 * warmup as f64) as usize;
            term_buffer = (0.1 * warmup as f64) as usize;
            base_window = warmup - (init_buffer + term_buffer);
        }
        Self {
            warmup,
            init_buffer,
            term_buffer,
            window_size: base_window,
            next_window_end: init_buffer + base_window - 1,
            counter: 0,
            enabled,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    fn in_window(&self) -> bool {
        self.counter >= self.init_buffer
            && self.counter < self.warmup - self.term_buffer
            && self.counter != self.warmup
    }

    fn end_of_window(&self) -> bool {
        self.counter == self.next_window_end && self.counter != self.warmup
    }

    fn compute_next_window(&mut self) {
        let last_end = self.warmup - self.term_buffer - 1;
        if self.next_window_end == last_end {
            return;
        }
        self.window_size *= 2;
        self.next_window_end = self.counter + self.window_size;
        if self.next_window_end != last_end {
            let boundary = self.next_window_end + 2 * self.window_size;
            if boundary >= self.warmup - self.term_buffer {
                self.next_window_end = last_end;
            }
        }
    }

    /// Record one warm-up position. Returns a new inverse metric at the end of a slow window.
    pub fn observe(&mut self, estimator: &mut WelfordVariance, theta: &DVector<f64>) -> Option<DVector<f64>> {
        if !self.enabled {
            return None;
        }
        if self.in_window() {
            estimator.add(theta);
        }
        let out = if self.end_of_window() {
            self.compute_next_window();
            let var = estimator.regularized_variance();
            estimator.reset();
            Some(var)
        } else {
            None
        };
        self.counter += 1;
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dual_averaging_shrinks_step_when_acceptance_low() {
        let mut da = DualAveraging::new(0.8, 1.0);
        let mut eps = 1.0;
        for _ in 0..50 {
            eps = da.learn(0.2);
        }
        assert!(eps < 1.0, "eps={eps}");
        assert!(da.final_step_size() < 1.0);
    }

    #[test]
    fn dual_averaging_grows_step_when_acceptance_high() {
        let mut da = DualAveraging::new(0.8, 0.01);
        let mut eps = 0.01;
        for _ in 0..50 {
            eps = da.learn(1.0);
        }
        assert!(eps > 0.01, "eps={eps}");
    }

    #[test]
    fn welford_matches_two_pass_variance() {
        let xs = [1.0, 2.0, 4.0, 7.0];
        let mut w = WelfordVariance::new(1);
        for &x in &xs {
            w.add(&DVector::from_element(1, x));
        }
        let n = xs.len() as f64;
        let m = xs.iter().sum::<f64>() / n;
        let var = xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / (n - 1.0);
        let expected = (n / (n + 5.0)) * var + 1e-3 * (5.0 / (n + 5.0));
        assert!((w.regularized_variance()[0] - expected).abs() < 1e-12);
        assert_eq!(w.count(), 4);
    }

    #[test]
    fn default_schedule_windows_end_before_term_buffer() {
        let warmup = 1000;
        let mut schedule = WindowSchedule::new(warmup);
        let mut est = WelfordVariance::new(1);
        let x = DVector::from_element(1, 0.0);
        let mut ends = Vec::new();
        for i in 0..warmup {
            if schedule.observe(&mut est, &x).is_some() {
                ends.push(i);
            }
        }
        // 75 + 25 - 1, then doubling windows, the last stretched to the term buffer.
        assert_eq!(ends, vec![99, 149, 249, 449, 949]);
    }

    #[test]
    fn short_warmup_scales_buffers() {
        let warmup = 100;
        let mut schedule = WindowSchedule::new(warmup);
        assert!(schedule.enabled());
        let mut est = WelfordVariance::new(1);
        let x = DVector::from_element(1, 0.0);
        let updates = (0..warmup).filter(|_| schedule.observe(&mut est, &x).is_some()).count();
        assert_eq!(updates, 1);
    }

    #[test]
    fn tiny_warmup_disables_metric() {
        let mut schedule = WindowSchedule::new(10);
        let mut est = WelfordVariance::new(1);
        let x = DVector::from_element(1, 0.0);
        assert!(!schedule.enabled());
        assert!((0..10).all(|_| schedule.observe(&mut est, &x).is_none()));
    }
}
