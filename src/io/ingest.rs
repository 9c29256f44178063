//! CSV ingest.
//!
//! Three inputs are read here:
//!
//! - the engine's observation table (`route, class, hoursChangeFraction, responseLogRate`)
//! - raw per-route counts for the derivation step
//! - prediction grids (`class, hoursChangeFraction`)
//!
//! Header names are matched case-insensitively with `_`/`-` ignored, so
//! `hoursChangeFraction`, `hours_change_fraction` and `HOURS-CHANGE-FRACTION`
//! are the same column. Unlike a lenient loader, every bad row is a hard error
//! carrying its line number: the model must never silently drop a route.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use tracing::debug;

use crate::data::RawRouteRecord;
use crate::domain::{ClassTable, DataSet, Observation, PredictorGridPoint};
use crate::error::EngineError;

type HeaderMap = HashMap<String, usize>;

/// Load the observation table from a CSV file.
pub fn load_dataset(path: &Path, classes: &ClassTable) -> Result<DataSet, EngineError> {
    let data = read_dataset(open(path)?, classes)?;
    debug!(path = %path.display(), rows = data.len(), "loaded data set");
    Ok(data)
}

/// Parse the observation table from any reader.
pub fn read_dataset<R: Read>(reader: R, classes: &ClassTable) -> Result<DataSet, EngineError> {
    let mut reader = csv_reader(reader);
    let header_map = read_header_map(&mut reader)?;
    for col in ["route", "class", "hours_change_fraction", "response_log_rate"] {
        require_column(&header_map, col)?;
    }

    let mut observations = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for (idx, result) in reader.records().enumerate() {
        // records() starts after the header line; lines are 1-based.
        let line = idx + 2;
        let record = result.map_err(|e| EngineError::binding_at(Some(line), None, format!("CSV parse error: {e}")))?;

        let route = get_required(&record, &header_map, "route")
            .map_err(|e| EngineError::binding_at(Some(line), None, e))?
            .to_string();
        let fail = |reason: String| EngineError::binding_at(Some(line), Some(&route), reason);

        let class_raw = get_required(&record, &header_map, "class").map_err(fail)?;
        let class = classes
            .resolve(class_raw)
            .ok_or_else(|| fail(format!("unknown route class '{class_raw}'")))?;
        let hours = parse_f64(&record, &header_map, "hours_change_fraction").map_err(fail)?;
        let response = parse_f64(&record, &header_map, "response_log_rate").map_err(fail)?;

        if !seen.insert(route.clone()) {
            return Err(fail("duplicate route id".into()));
        }
        observations.push(Observation {
            route,
            class,
            hours_change_fraction: hours,
            response_log_rate: response,
        });
    }

    if observations.is_empty() {
        return Err(EngineError::NoData("CSV contains no observation rows".into()));
    }
    Ok(DataSet::new(classes.clone(), observations))
}

/// Load raw per-route counts (`route, class, rides_2015, rides_2019, hours_2015, hours_2019`).
pub fn load_raw_routes(path: &Path) -> Result<Vec<RawRouteRecord>, EngineError> {
    read_raw_routes(open(path)?)
}

pub fn read_raw_routes<R: Read>(reader: R) -> Result<Vec<RawRouteRecord>, EngineError> {
    const NUMERIC: [&str; 4] = ["rides_2015", "rides_2019", "hours_2015", "hours_2019"];

    let mut reader = csv_reader(reader);
    let header_map = read_header_map(&mut reader)?;
    for col in ["route", "class"].into_iter().chain(NUMERIC) {
        require_column(&header_map, col)?;
    }

    let mut out = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result.map_err(|e| EngineError::binding_at(Some(line), None, format!("CSV parse error: {e}")))?;
        let route = get_required(&record, &header_map, "route")
            .map_err(|e| EngineError::binding_at(Some(line), None, e))?
            .to_string();
        let fail = |reason: String| EngineError::binding_at(Some(line), Some(&route), reason);

        let class = get_required(&record, &header_map, "class").map_err(fail)?.to_string();
        let mut values = [0.0; 4];
        for (slot, name) in values.iter_mut().zip(NUMERIC) {
            *slot = parse_f64(&record, &header_map, name).map_err(fail)?;
        }
        out.push(RawRouteRecord {
            line: Some(line),
            route,
            class,
            rides_2015: values[0],
            rides_2019: values[1],
            hours_2015: values[2],
            hours_2019: values[3],
        });
    }
    if out.is_empty() {
        return Err(EngineError::NoData("CSV contains no route rows".into()));
    }
    Ok(out)
}

/// Load a prediction grid. Class cells may be labels or 1-based indices.
///
/// Indices are passed through unchecked so the predictive engine reports
/// out-of-range classes with their grid position.
pub fn load_grid(path: &Path, classes: &ClassTable) -> Result<Vec<PredictorGridPoint>, EngineError> {
    read_grid(open(path)?, classes)
}

pub fn read_grid<R: Read>(reader: R, classes: &ClassTable) -> Result<Vec<PredictorGridPoint>, EngineError> {
    let mut reader = csv_reader(reader);
    let header_map = read_header_map(&mut reader)?;
    for col in ["class", "hours_change_fraction"] {
        if !header_map.contains_key(&normalize_header_name(col)) {
            return Err(EngineError::Format(format!("grid is missing required column `{col}`")));
        }
    }

    let mut out = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let at = |e: String| EngineError::Format(format!("grid line {line}: {e}"));
        let record = result.map_err(|e| at(e.to_string()))?;
        let class_raw = get_required(&record, &header_map, "class").map_err(at)?;
        let class = match classes.resolve(class_raw) {
            Some(c) => c,
            None => class_raw
                .parse::<usize>()
                .map_err(|_| at(format!("unknown route class '{class_raw}'")))?,
        };
        // Non-finite hours are left for grid validation.
        let hours_raw = get_required(&record, &header_map, "hours_change_fraction").map_err(at)?;
        let hours = hours_raw
            .parse::<f64>()
            .map_err(|_| at(format!("invalid number '{hours_raw}'")))?;
        out.push(PredictorGridPoint::new(class, hours));
    }
    Ok(out)
}

fn open(path: &Path) -> Result<File, EngineError> {
    File::open(path).map_err(|e| EngineError::Io(format!("failed to open '{}': {e}", path.display())))
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

fn read_header_map<R: Read>(reader: &mut csv::Reader<R>) -> Result<HeaderMap, EngineError> {
    let headers = reader
        .headers()
        .map_err(|e| EngineError::Format(format!("failed to read CSV headers: {e}")))?;
    Ok(build_header_map(headers))
}

fn build_header_map(headers: &StringRecord) -> HeaderMap {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a UTF-8 BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn require_column(header_map: &HeaderMap, name: &str) -> Result<(), EngineError> {
    if header_map.contains_key(&normalize_header_name(name)) {
        Ok(())
    } else {
        Err(EngineError::binding(format!("missing required column `{name}`")))
    }
}

fn get_required<'a>(record: &'a StringRecord, header_map: &HeaderMap, name: &str) -> Result<&'a str, String> {
    let idx = header_map
        .get(&normalize_header_name(name))
        .ok_or_else(|| format!("missing required column `{name}`"))?;
    record
        .get(*idx)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing value for `{name}`"))
}

fn parse_f64(record: &StringRecord, header_map: &HeaderMap, name: &str) -> Result<f64, String> {
    let raw = get_required(record, header_map, name)?;
    let v = raw
        .parse::<f64>()
        .map_err(|_| format!("invalid number '{raw}' for `{name}`"))?;
    if v.is_finite() {
        Ok(v)
    } else {
        Err(format!("non-finite value for `{name}`"))
    }
}
