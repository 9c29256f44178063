//! Posterior-predictive summaries over predictor grids.
//!
//! For every draw and grid point the linear predictor `muhat` is evaluated
//! (residual noise is not added), giving a dense `draws x grid` matrix. Each
//! column is reduced to a mean and a credible interval. Output order matches
//! grid order exactly; duplicates are kept.

use nalgebra::DMatrix;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::domain::{ClassTable, PosteriorDraws, PredictionSummary, PredictorGridPoint, validate_interval_mass};
use crate::error::EngineError;
use crate::math::{credible_interval, mean};

/// Evaluates the fitted model over caller-supplied grids.
#[derive(Debug, Clone, Copy)]
pub struct PredictiveEngine<'a> {
    draws: &'a PosteriorDraws,
}

/// Summary of `muhat(to) - muhat(from)` across draws.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContrastSummary {
    pub from: PredictorGridPoint,
    pub to: PredictorGridPoint,
    pub mean: f64,
    pub lower: f64,
    pub upper: f64,
    pub mass: f64,
}

impl ContrastSummary {
    /// True when the interval lies strictly on one side of zero.
    pub fn excludes_zero(&self) -> bool {
        self.upper < 0.0 || self.lower > 0.0
    }
}

impl<'a> PredictiveEngine<'a> {
    pub fn new(draws: &'a PosteriorDraws) -> Result<Self, EngineError> {
        if draws.is_empty() {
            return Err(EngineError::NoData("posterior has no draws to predict from".into()));
        }
        if draws.draws.iter().any(|row| row.len() != draws.model.dim()) {
            return Err(EngineError::Format(format!(
                "draw rows must have {} values for the {} model",
                draws.model.dim(),
                draws.model.kind().display_name()
            )));
        }
        Ok(Self { draws })
    }

    /// Reject grid points the fitted model cannot evaluate.
    pub fn validate_grid(&self, grid: &[PredictorGridPoint]) -> Result<(), EngineError> {
        let k = self.draws.classes.len();
        for (index, point) in grid.iter().enumerate() {
            if !self.draws.classes.contains(point.class) {
                return Err(EngineError::PredictionGrid {
                    index,
                    reason: format!("class {} outside 1..={k}", point.class),
                });
            }
            if !point.hours_change_fraction.is_finite() {
                return Err(EngineError::PredictionGrid {
                    index,
                    reason: "non-finite hoursChangeFraction".into(),
                });
            }
        }
        Ok(())
    }

    /// Dense matrix of `muhat`, one row per draw and one column per grid point.
    pub fn linear_predictor_matrix(&self, grid: &[PredictorGridPoint]) -> Result<DMatrix<f64>, EngineError> {
        self.validate_grid(grid)?;
        let spec = self.draws.model;
        let rows = &self.draws.draws;
        Ok(DMatrix::from_fn(rows.len(), grid.len(), |i, j| {
            spec.linear_predictor(&rows[i], grid[j].class, grid[j].hours_change_fraction)
        }))
    }

    /// Mean and credible interval of `muhat` at every grid point, in grid order.
    pub fn predict(&self, grid: &[PredictorGridPoint], mass: f64) -> Result<Vec<PredictionSummary>, EngineError> {
        validate_interval_mass(mass)?;
        let matrix = self.linear_predictor_matrix(grid)?;

        (0..grid.len())
            .into_par_iter()
            .map(|j| {
                let column: Vec<f64> = matrix.column(j).iter().copied().collect();
                let (lower, upper) = credible_interval(&column, mass).ok_or_else(|| EngineError::PredictionGrid {
                    index: j,
                    reason: "linear predictor is non-finite for some draws".into(),
                })?;
                Ok(PredictionSummary {
                    class: grid[j].class,
                    hours_change_fraction: grid[j].hours_change_fraction,
                    mean: mean(&column),
                    lower,
                    upper,
                    mass,
                })
            })
            .collect()
    }

    /// Posterior of the change in `muhat` when moving from `from` to `to`.
    pub fn contrast(
        &self,
        from: PredictorGridPoint,
        to: PredictorGridPoint,
        mass: f64,
    ) -> Result<ContrastSummary, EngineError> {
        validate_interval_mass(mass)?;
        let matrix = self.linear_predictor_matrix(&[from, to])?;
        let diff: Vec<f64> = matrix.column(1).iter().zip(matrix.column(0).iter()).map(|(b, a)| b - a).collect();
        let (lower, upper) = credible_interval(&diff, mass).ok_or_else(|| EngineError::PredictionGrid {
            index: 0,
            reason: "contrast is non-finite for some draws".into(),
        })?;
        Ok(ContrastSummary {
            from,
            to,
            mean: mean(&diff),
            lower,
            upper,
            mass,
        })
    }
}

/// Grid builders.
pub struct PredictorGrid;

impl PredictorGrid {
    /// `steps` evenly spaced hours in `[from, to]` for each class, class-major.
    pub fn sweep(classes: &[usize], from: f64, to: f64, steps: usize) -> Vec<PredictorGridPoint> {
        let mut out = Vec::with_capacity(classes.len() * steps);
        for &class in classes {
            for i in 0..steps {
                let h = if steps == 1 {
                    from
                } else {
                    from + (to - from) * i as f64 / (steps - 1) as f64
                };
                out.push(PredictorGridPoint::new(class, h));
            }
        }
        out
    }

    /// Sweep over every class of `table`.
    pub fn sweep_all(table: &ClassTable, from: f64, to: f64, steps: usize) -> Vec<PredictorGridPoint> {
        let classes: Vec<usize> = (1..=table.len()).collect();
        Self::sweep(&classes, from, to, steps)
    }
}
