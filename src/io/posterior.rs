//! Read/write posterior JSON files.
//!
//! The posterior file is the portable result of `rb fit`:
//! - the draws themselves (model, class table, parameter names, chain layout)
//! - the sampler configuration and seed that produced them
//! - diagnostics, warnings and the parameter summary at fit time
//!
//! `rb predict` reads it back so predictions never need a refit.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ParamSummary, PosteriorDraws, SamplerConfig, SamplingDiagnosticWarning, SamplingDiagnostics};
use crate::error::EngineError;
use crate::fit::FitOutput;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PosteriorFile {
    pub tool: String,
    pub created_at: DateTime<Utc>,
    pub seed: u64,
    pub sampler: SamplerConfig,
    pub partial: bool,
    pub diagnostics: SamplingDiagnostics,
    pub warnings: Vec<SamplingDiagnosticWarning>,
    pub summary: Vec<ParamSummary>,
    pub posterior: PosteriorDraws,
}

impl PosteriorFile {
    pub fn from_fit(fit: &FitOutput, sampler: &SamplerConfig, summary: Vec<ParamSummary>) -> Self {
        Self {
            tool: "rb".to_string(),
            created_at: Utc::now(),
            seed: fit.seed,
            sampler: sampler.clone(),
            partial: fit.partial,
            diagnostics: fit.diagnostics.clone(),
            warnings: fit.warnings.clone(),
            summary,
            posterior: fit.draws.clone(),
        }
    }
}

pub fn write_posterior_json(path: &Path, file: &PosteriorFile) -> Result<(), EngineError> {
    let out = File::create(path)
        .map_err(|e| EngineError::Io(format!("failed to create posterior JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(BufWriter::new(out), file)
        .map_err(|e| EngineError::Io(format!("failed to write posterior JSON: {e}")))
}

pub fn read_posterior_json(path: &Path) -> Result<PosteriorFile, EngineError> {
    let input = File::open(path)
        .map_err(|e| EngineError::Io(format!("failed to open posterior JSON '{}': {e}", path.display())))?;
    let file: PosteriorFile = serde_json::from_reader(BufReader::new(input))
        .map_err(|e| EngineError::Format(format!("invalid posterior JSON: {e}")))?;
    validate(&file.posterior)?;
    Ok(file)
}

/// Structural checks on draws loaded from disk.
fn validate(draws: &PosteriorDraws) -> Result<(), EngineError> {
    let dim = draws.model.dim();
    if draws.param_names.len() != dim {
        return Err(EngineError::Format(format!(
            "posterior lists {} parameter names, the {} model has {dim}",
            draws.param_names.len(),
            draws.model.kind().display_name()
        )));
    }
    if let crate::models::ModelSpec::Hierarchical { classes } = draws.model {
        if classes != draws.classes.len() {
            return Err(EngineError::Format(format!(
                "model has {classes} classes but the class table has {}",
                draws.classes.len()
            )));
        }
    }
    if draws.chain_lengths.iter().sum::<usize>() != draws.len() {
        return Err(EngineError::Format("chain lengths do not add up to the number of draws".into()));
    }
    if let Some(i) = draws.draws.iter().position(|row| row.len() != dim) {
        return Err(EngineError::Format(format!("draw {i} has the wrong number of values")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ClassTable;
    use crate::models::ModelSpec;

    fn sample_file() -> PosteriorFile {
        PosteriorFile {
            tool: "rb".into(),
            created_at: Utc::now(),
            seed: 7,
            sampler: SamplerConfig::default(),
            partial: false,
            diagnostics: SamplingDiagnostics::default(),
            warnings: vec![SamplingDiagnosticWarning::Divergences { count: 1, rate: 0.001 }],
            summary: Vec::new(),
            posterior: PosteriorDraws {
                model: ModelSpec::Pooled,
                classes: ClassTable::route_types_v1(),
                param_names: ModelSpec::Pooled.param_names(),
                chain_lengths: vec![2],
                draws: vec![vec![0.1, 1.0], vec![0.2, 0.9]],
            },
        }
    }

    #[test]
    fn json_round_trip_via_file() {
        let dir = std::env::temp_dir().join(format!("rb-posterior-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("posterior.json");
        let file = sample_file();
        write_posterior_json(&path, &file).unwrap();
        let back = read_posterior_json(&path).unwrap();
        assert_eq!(back, file);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn inconsistent_layout_is_rejected() {
        let mut file = sample_file();
        file.posterior.chain_lengths = vec![3];
        assert!(validate(&file.posterior).is_err());

        let mut file = sample_file();
        file.posterior.draws[1].push(0.0);
        assert!(validate(&file.posterior).is_err());
    }

    #[test]
    fn model_tag_is_serialized_lowercase() {
        let json = serde_json::to_string(&ModelSpec::Hierarchical { classes: 4 }).unwrap();
        assert_eq!(json, r#"{"kind":"hierarchical","classes":4}"#);
    }
}
