//! CSV exports: posterior draws, prediction summaries and derived route tables.
//!
//! Exports are meant to be easy to consume in spreadsheets or downstream scripts.

use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::data::DerivedRoute;
use crate::domain::{ClassTable, DataSet, PosteriorDraws, PredictionSummary};
use crate::error::EngineError;

/// Write draws as `chain,draw,<param...>`; `chain` counts surviving chains from 0.
pub fn write_draws_csv(path: &Path, draws: &PosteriorDraws) -> Result<(), EngineError> {
    write_draws(create(path)?, draws)
}

pub fn write_draws<W: Write>(out: W, draws: &PosteriorDraws) -> Result<(), EngineError> {
    let mut wtr = csv::Writer::from_writer(out);
    let mut header = vec!["chain".to_string(), "draw".to_string()];
    header.extend(draws.param_names.iter().cloned());
    wtr.write_record(&header).map_err(write_err)?;

    let mut rows = draws.draws.iter();
    for (chain, &len) in draws.chain_lengths.iter().enumerate() {
        for (draw, row) in rows.by_ref().take(len).enumerate() {
            let mut record = vec![chain.to_string(), draw.to_string()];
            record.extend(row.iter().map(|v| format!("{v:.10}")));
            wtr.write_record(&record).map_err(write_err)?;
        }
    }
    wtr.flush().map_err(|e| EngineError::Io(e.to_string()))
}

/// Write prediction summaries in grid order.
pub fn write_predictions_csv(
    path: &Path,
    predictions: &[PredictionSummary],
    classes: &ClassTable,
) -> Result<(), EngineError> {
    write_predictions(create(path)?, predictions, classes)
}

pub fn write_predictions<W: Write>(
    out: W,
    predictions: &[PredictionSummary],
    classes: &ClassTable,
) -> Result<(), EngineError> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(["class", "class_label", "hours_change_fraction", "mean", "lower", "upper", "mass"])
        .map_err(write_err)?;
    for p in predictions {
        wtr.write_record([
            p.class.to_string(),
            classes.label(p.class).unwrap_or("").to_string(),
            format!("{:.6}", p.hours_change_fraction),
            format!("{:.10}", p.mean),
            format!("{:.10}", p.lower),
            format!("{:.10}", p.upper),
            format!("{}", p.mass),
        ])
        .map_err(write_err)?;
    }
    wtr.flush().map_err(|e| EngineError::Io(e.to_string()))
}

/// Write derived routes; the output is readable by the observation loader.
pub fn write_derived_csv(path: &Path, derived: &[DerivedRoute]) -> Result<(), EngineError> {
    write_derived(create(path)?, derived)
}

pub fn write_derived<W: Write>(out: W, derived: &[DerivedRoute]) -> Result<(), EngineError> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record([
        "route",
        "class",
        "rides_2015",
        "rides_2019",
        "hours_2015",
        "hours_2019",
        "rides_diff",
        "hours_diff",
        "rides_pct",
        "hoursChangeFraction",
        "responseLogRate",
        "service_change",
    ])
    .map_err(write_err)?;
    for d in derived {
        wtr.write_record([
            d.route.clone(),
            d.class_label.clone(),
            d.rides_2015.to_string(),
            d.rides_2019.to_string(),
            d.hours_2015.to_string(),
            d.hours_2019.to_string(),
            d.rides_diff.to_string(),
            d.hours_diff.to_string(),
            format!("{:.10}", d.rides_pct),
            format!("{:.10}", d.hours_change_fraction),
            format!("{:.10}", d.rides_rate),
            d.service_change.as_str().to_string(),
        ])
        .map_err(write_err)?;
    }
    wtr.flush().map_err(|e| EngineError::Io(e.to_string()))
}

/// Write the observation table (`route,class,hoursChangeFraction,responseLogRate`), classes as labels.
pub fn write_dataset_csv(path: &Path, data: &DataSet) -> Result<(), EngineError> {
    write_dataset(create(path)?, data)
}

pub fn write_dataset<W: Write>(out: W, data: &DataSet) -> Result<(), EngineError> {
    let mut wtr = csv::Writer::from_writer(out);
    wtr.write_record(["route", "class", "hoursChangeFraction", "responseLogRate"])
        .map_err(write_err)?;
    for o in &data.observations {
        let class = data
            .classes
            .label(o.class)
            .map(str::to_string)
            .unwrap_or_else(|| o.class.to_string());
        wtr.write_record([
            o.route.clone(),
            class,
            format!("{:.10}", o.hours_change_fraction),
            format!("{:.10}", o.response_log_rate),
        ])
        .map_err(write_err)?;
    }
    wtr.flush().map_err(|e| EngineError::Io(e.to_string()))
}

fn create(path: &Path) -> Result<File, EngineError> {
    File::create(path).map_err(|e| EngineError::Io(format!("failed to create '{}': {e}", path.display())))
}

fn write_err(e: csv::Error) -> EngineError {
    EngineError::Io(format!("failed to write CSV: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RawRouteRecord, derive_all};
    use crate::io::ingest::read_dataset;
    use crate::models::ModelSpec;

    #[test]
    fn draws_csv_numbers_chains_and_draws() {
        let draws = PosteriorDraws {
            model: ModelSpec::Pooled,
            classes: ClassTable::route_types_v1(),
            param_names: ModelSpec::Pooled.param_names(),
            chain_lengths: vec![2, 1],
            draws: vec![vec![0.1, 1.0], vec![0.2, 1.1], vec![0.3, 1.2]],
        };
        let mut buf = Vec::new();
        write_draws(&mut buf, &draws).unwrap();
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "chain,draw,mu,sigma");
        assert!(lines[2].starts_with("0,1,0.2"));
        assert!(lines[3].starts_with("1,0,0.3"));
        assert_eq!(lines.len(), 4);
    }

    #[test]
    fn predictions_csv_has_labels() {
        let p = PredictionSummary {
            class: 2,
            hours_change_fraction: 0.5,
            mean: -0.1,
            lower: -0.2,
            upper: 0.0,
            mass: 0.93,
        };
        let mut buf = Vec::new();
        write_predictions(&mut buf, &[p], &ClassTable::route_types_v1()).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.lines().nth(1).unwrap().starts_with("2,CommExp,0.500000,"));
    }

    #[test]
    fn dataset_csv_is_readable_by_loader() {
        let classes = ClassTable::route_types_v1();
        let data = DataSet::new(
            classes.clone(),
            vec![crate::domain::Observation {
                route: "9".into(),
                class: 3,
                hours_change_fraction: -0.25,
                response_log_rate: 0.125,
            }],
        );
        let mut buf = Vec::new();
        write_dataset(&mut buf, &data).unwrap();
        assert_eq!(read_dataset(buf.as_slice(), &classes).unwrap(), data);
    }

    #[test]
    fn derived_csv_round_trips_through_loader() {
        let classes = ClassTable::route_types_v1();
        let raws = vec![RawRouteRecord {
            line: None,
            route: "42".into(),
            class: "Support".into(),
            rides_2015: 500.0,
            rides_2019: 600.0,
            hours_2015: 10.0,
            hours_2019: 15.0,
        }];
        let derived = derive_all(&raws, &classes, 0.3).unwrap();
        let mut buf = Vec::new();
        write_derived(&mut buf, &derived).unwrap();
        let data = read_dataset(buf.as_slice(), &classes).unwrap();
        assert_eq!(data.observations[0].class, 4);
        assert!((data.observations[0].hours_change_fraction - 0.5).abs() < 1e-9);
        assert!((data.observations[0].response_log_rate - 1.2f64.ln()).abs() < 1e-9);
    }
}
