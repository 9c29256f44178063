//! Per-parameter posterior summaries.

use rayon::prelude::*;

use crate::domain::{ParamSummary, PosteriorDraws, validate_interval_mass};
use crate::error::EngineError;
use crate::math::{credible_interval, effective_sample_size, mean, median, split_rhat, std_dev};

/// Summarise every parameter column of `draws`.
///
/// Rows follow `draws.param_names` order. `rhat` is only filled in when at
/// least two chains contributed draws.
pub fn summarize(draws: &PosteriorDraws, mass: f64) -> Result<Vec<ParamSummary>, EngineError> {
    validate_interval_mass(mass)?;
    if draws.is_empty() {
        return Err(EngineError::NoData("posterior has no draws to summarise".into()));
    }

    (0..draws.n_params())
        .into_par_iter()
        .map(|j| {
            let name = &draws.param_names[j];
            let values = draws.column(j);
            let (lower, upper) = credible_interval(&values, mass)
                .ok_or_else(|| EngineError::Format(format!("non-finite draws for parameter {name}")))?;
            let by_chain = draws.column_by_chain(j);
            Ok(ParamSummary {
                name: name.clone(),
                mean: mean(&values),
                sd: std_dev(&values),
                median: median(&values),
                lower,
                upper,
                mass,
                rhat: split_rhat(&by_chain),
                ess: effective_sample_size(&by_chain),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClassTable;
    use crate::models::ModelSpec;

    fn draws(rows: Vec<Vec<f64>>, chain_lengths: Vec<usize>) -> PosteriorDraws {
        PosteriorDraws {
            model: ModelSpec::Pooled,
            classes: ClassTable::route_types_v1(),
            param_names: vec!["mu".into(), "sigma".into()],
            chain_lengths,
            draws: rows,
        }
    }

    #[test]
    fn summary_rows_follow_parameter_order() {
        let rows: Vec<Vec<f64>> = (0..40).map(|i| vec![i as f64 / 10.0, 1.0 + (i % 5) as f64]).collect();
        let out = summarize(&draws(rows, vec![20, 20]), 0.89).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].name, "mu");
        assert_eq!(out[1].name, "sigma");
        for row in &out {
            assert!(row.lower <= row.mean && row.mean <= row.upper);
            assert_eq!(row.mass, 0.89);
        }
        assert!((out[0].mean - 1.95).abs() < 1e-12);
        // The two halves of `mu` do not overlap, so the chains disagree.
        assert!(out[0].rhat.unwrap() > 1.1);
    }

    #[test]
    fn single_chain_has_no_rhat() {
        let rows: Vec<Vec<f64>> = (0..10).map(|i| vec![i as f64, 1.0]).collect();
        let out = summarize(&draws(rows, vec![10]), 0.5).unwrap();
        assert!(out[0].rhat.is_none());
    }

    #[test]
    fn rejects_bad_mass_and_empty_draws() {
        assert!(summarize(&draws(vec![vec![0.0, 1.0]], vec![1]), 1.0).is_err());
        assert!(summarize(&draws(Vec::new(), Vec::new()), 0.89).is_err());
    }
}
