//! Command workflows, kept free of printing so they can be tested directly.
//!
//! - fit:      load or synthesize -> bind + sample -> summarize -> exports
//! - predict:  posterior JSON -> grid -> predictive summaries (+ contrast)
//! - simulate: synthetic sample -> observation CSV
//! - derive:   raw route counts -> derived table CSV

use tracing::info;

use crate::cli::{DeriveArgs, FitArgs, PredictArgs, SimulateArgs};
use crate::data::{DerivedRoute, SyntheticConfig, derive_all, generate_sample};
use crate::domain::{ClassTable, DataSet, ParamSummary, PredictionSummary, validate_interval_mass};
use crate::error::AppError;
use crate::fit::{FitOutput, Sampler};
use crate::io::{PosteriorFile, load_dataset, load_grid, load_raw_routes, read_posterior_json};
use crate::models::ModelSpec;
use crate::posterior::{ContrastSummary, PredictiveEngine, PredictorGrid, summarize};

/// Points per class in the plotted sweep.
const PLOT_STEPS: usize = 41;

/// All computed outputs of a single `rb fit` run.
#[derive(Debug, Clone)]
pub struct FitRun {
    pub data: DataSet,
    pub fit: FitOutput,
    pub summary: Vec<ParamSummary>,
    /// Per-class sweep over the observed hours range, at `plot_mass`. Only computed with `--plot`.
    pub ribbon: Option<Vec<PredictionSummary>>,
}

pub fn run_fit(args: &FitArgs) -> Result<FitRun, AppError> {
    validate_interval_mass(args.interval_mass)?;
    if args.plot {
        validate_interval_mass(args.plot_mass)?;
    }
    let config = args.sampler.to_config();
    let sampler = Sampler::new(config.clone())?;

    let data = match &args.data {
        Some(path) => load_dataset(path, &ClassTable::route_types_v1())?,
        None => generate_sample(&SyntheticConfig::default())?,
    };
    info!(routes = data.len(), counts = ?data.class_counts(), "observations loaded");

    let spec = ModelSpec::for_kind(args.model, &data.classes);
    let fit = sampler.fit(spec, &data)?;
    let summary = summarize(&fit.draws, args.interval_mass)?;

    if let Some(path) = &args.export_draws {
        crate::io::write_draws_csv(path, &fit.draws)?;
        info!(path = %path.display(), "draws written");
    }
    if let Some(path) = &args.export_posterior {
        let file = PosteriorFile::from_fit(&fit, &config, summary.clone());
        crate::io::write_posterior_json(path, &file)?;
        info!(path = %path.display(), "posterior written");
    }

    let ribbon = if args.plot {
        let (lo, hi) = hours_span(&data);
        let classes: Vec<usize> = match spec {
            // Every class shares one line.
            ModelSpec::Pooled => vec![1],
            ModelSpec::Hierarchical { classes } => (1..=classes).collect(),
        };
        let grid = PredictorGrid::sweep(&classes, lo, hi, PLOT_STEPS);
        Some(PredictiveEngine::new(&fit.draws)?.predict(&grid, args.plot_mass)?)
    } else {
        None
    };

    Ok(FitRun {
        data,
        fit,
        summary,
        ribbon,
    })
}

fn hours_span(data: &DataSet) -> (f64, f64) {
    let (lo, hi) = data
        .observations
        .iter()
        .map(|o| o.hours_change_fraction)
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), h| (lo.min(h), hi.max(h)));
    if lo < hi { (lo, hi) } else { (lo - 0.5, lo + 0.5) }
}

/// All computed outputs of a single `rb predict` run.
#[derive(Debug, Clone)]
pub struct PredictRun {
    pub posterior: PosteriorFile,
    pub predictions: Vec<PredictionSummary>,
    pub contrast: Option<ContrastSummary>,
}

pub fn run_predict(args: &PredictArgs) -> Result<PredictRun, AppError> {
    validate_interval_mass(args.interval_mass)?;
    let posterior = read_posterior_json(&args.posterior)?;
    if posterior.partial {
        tracing::warn!("posterior comes from a cancelled fit; predictions use partial draws");
    }
    let classes = &posterior.posterior.classes;

    let grid = match &args.grid {
        Some(path) => load_grid(path, classes)?,
        None => {
            if args.steps == 0 || !(args.hours_min <= args.hours_max) {
                return Err(AppError::new(
                    2,
                    format!(
                        "invalid sweep: steps={} over [{}, {}]",
                        args.steps, args.hours_min, args.hours_max
                    ),
                ));
            }
            PredictorGrid::sweep_all(classes, args.hours_min, args.hours_max, args.steps)
        }
    };

    let engine = PredictiveEngine::new(&posterior.posterior)?;
    let predictions = engine.predict(&grid, args.interval_mass)?;
    let contrast = match args.contrast.as_deref() {
        Some([from, to]) => Some(engine.contrast(*from, *to, args.interval_mass)?),
        Some(_) => return Err(AppError::new(2, "--contrast takes exactly two points")),
        None => None,
    };

    if let Some(path) = &args.export {
        crate::io::write_predictions_csv(path, &predictions, classes)?;
        info!(path = %path.display(), rows = predictions.len(), "predictions written");
    }

    Ok(PredictRun {
        posterior,
        predictions,
        contrast,
    })
}

pub fn run_simulate(args: &SimulateArgs) -> Result<DataSet, AppError> {
    let data = generate_sample(&args.to_config())?;
    crate::io::write_dataset_csv(&args.out, &data)?;
    info!(path = %args.out.display(), routes = data.len(), "synthetic sample written");
    Ok(data)
}

pub fn run_derive(args: &DeriveArgs) -> Result<Vec<DerivedRoute>, AppError> {
    let raws = load_raw_routes(&args.input)?;
    let derived = derive_all(&raws, &ClassTable::route_types_v1(), args.service_change_threshold)?;
    crate::io::write_derived_csv(&args.out, &derived)?;
    info!(path = %args.out.display(), routes = derived.len(), "derived table written");
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use std::path::PathBuf;

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rb-pipeline-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn synthetic_hierarchical_fit_recovers_negative_slope() {
        let dir = scratch_dir("e2e");
        let sim = dir.join("sim.csv");
        let posterior = dir.join("posterior.json");
        let sim_path = sim.to_str().unwrap();
        let posterior_path = posterior.to_str().unwrap();

        run_simulate(&SimulateArgs::parse_from(["simulate", "--out", sim_path])).unwrap();

        let fit_args = FitArgs::parse_from([
            "fit",
            "--data",
            sim_path,
            "--chains",
            "2",
            "--cores",
            "2",
            "--seed",
            "11",
            "--warmup",
            "400",
            "--samples",
            "400",
            "--export-posterior",
            posterior_path,
            "--plot",
        ]);
        let run = run_fit(&fit_args).unwrap();
        assert_eq!(run.data.len(), 200);
        assert_eq!(run.fit.draws.len(), 800);
        assert_eq!(run.ribbon.as_ref().unwrap().len(), 4 * PLOT_STEPS);

        let predict_args = PredictArgs::parse_from([
            "predict",
            "--posterior",
            posterior_path,
            "--interval-mass",
            "0.93",
            "--contrast",
            "1:0",
            "1:0.5",
        ]);
        let out = run_predict(&predict_args).unwrap();
        let contrast = out.contrast.unwrap();
        assert!(contrast.excludes_zero(), "{contrast:?}");
        assert!(contrast.mean < 0.0);
        assert!((contrast.mean - (-0.15)).abs() < 0.08, "{contrast:?}");

        let at = |h: f64| {
            out.predictions
                .iter()
                .find(|p| p.class == 1 && (p.hours_change_fraction - h).abs() < 1e-9)
                .unwrap()
                .mean
        };
        assert!(at(0.5) < at(0.0));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn derive_writes_fit_ready_table() {
        let dir = scratch_dir("derive");
        let input = dir.join("raw.csv");
        let out = dir.join("derived.csv");
        std::fs::write(
            &input,
            "route,class,rides_2015,rides_2019,hours_2015,hours_2019\n\
             1,CoreLoc,1000,900,100,60\n\
             2,Support,200,240,10,10\n",
        )
        .unwrap();

        let args = DeriveArgs::parse_from(["derive", "--input", input.to_str().unwrap(), "--out", out.to_str().unwrap()]);
        let derived = run_derive(&args).unwrap();
        assert_eq!(derived.len(), 2);

        let data = load_dataset(&out, &ClassTable::route_types_v1()).unwrap();
        assert_eq!(data.observations[1].class, 4);
        assert!((data.observations[0].hours_change_fraction + 0.4).abs() < 1e-9);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn negative_noise_is_rejected_before_writing() {
        let dir = scratch_dir("noise");
        let out = dir.join("sim.csv");
        let args = SimulateArgs::parse_from(["simulate", "--out", out.to_str().unwrap(), "--noise", "-1"]);
        assert_eq!(args.noise, -1.0);
        assert_eq!(run_simulate(&args).unwrap_err().exit_code(), 2);
        assert!(!out.exists());
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn bad_interval_mass_is_an_input_error() {
        let args = FitArgs::parse_from(["fit", "--synthetic", "--interval-mass", "1.5"]);
        let err = run_fit(&args).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn empty_data_maps_to_no_data_exit_code() {
        let dir = scratch_dir("empty");
        let path = dir.join("empty.csv");
        std::fs::write(&path, "route,class,hoursChangeFraction,responseLogRate\n").unwrap();
        let args = FitArgs::parse_from(["fit", "--data", path.to_str().unwrap()]);
        assert_eq!(run_fit(&args).unwrap_err().exit_code(), 3);
        std::fs::remove_dir_all(&dir).ok();
    }
}
