//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and installs logging
//! - parses CLI arguments
//! - runs the requested workflow (see `pipeline`)
//! - prints reports/plots

use clap::Parser;

use crate::cli::{Cli, Command, DeriveArgs, FitArgs, PredictArgs, SimulateArgs};
use crate::error::AppError;

pub mod pipeline;

/// Entry point for the `rb` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    crate::logging::init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Predict(args) => handle_predict(args),
        Command::Simulate(args) => handle_simulate(args),
        Command::Derive(args) => handle_derive(args),
    }
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let run = pipeline::run_fit(&args)?;
    let config = args.sampler.to_config();

    println!("{}", crate::report::format_fit_summary(&run.fit, &run.summary, &config));

    if let Some(ribbon) = &run.ribbon {
        let plot = crate::plot::render_ribbon_plot(
            ribbon,
            &run.data.observations,
            &run.data.classes,
            args.width,
            args.height,
        );
        println!("{plot}");
    }
    Ok(())
}

fn handle_predict(args: PredictArgs) -> Result<(), AppError> {
    let run = pipeline::run_predict(&args)?;
    let classes = &run.posterior.posterior.classes;

    if run.posterior.partial {
        println!("NOTE: posterior comes from a cancelled fit; draws are partial.");
    }
    println!("{}", crate::report::format_predictions(&run.predictions, classes));
    if let Some(contrast) = &run.contrast {
        print!("{}", crate::report::format_contrast(contrast, classes));
    }
    if args.plot {
        let plot = crate::plot::render_ribbon_plot(&run.predictions, &[], classes, args.width, args.height);
        println!("{plot}");
    }
    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let data = pipeline::run_simulate(&args)?;
    println!("Wrote {} routes to {}", data.len(), args.out.display());
    Ok(())
}

fn handle_derive(args: DeriveArgs) -> Result<(), AppError> {
    let derived = pipeline::run_derive(&args)?;
    let changed = derived
        .iter()
        .filter(|d| d.service_change != crate::data::ServiceChange::None)
        .count();
    println!(
        "Wrote {} routes to {} ({changed} with a service change)",
        derived.len(),
        args.out.display()
    );
    Ok(())
}
