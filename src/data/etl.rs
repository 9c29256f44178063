//! Derived columns for the 2015 -> 2019 route comparison.
//!
//! From one raw row per route (rides and service hours in both years) we compute:
//!
//! - `rides_diff = rides_2019 - rides_2015`, `hours_diff` likewise
//! - `rides_pct = rides_diff / rides_2015`
//! - `rides_rate = ln(rides_2019 / rides_2015)` (the model response)
//! - `hours_change_fraction = hours_diff / hours_2015` (the predictor)
//! - a service-change label from `|hours_change_fraction|` against a threshold

use serde::{Deserialize, Serialize};

use crate::domain::{ClassTable, DataSet, Observation};
use crate::error::EngineError;

/// One raw input row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRouteRecord {
    /// 1-based line in the source file, when known.
    pub line: Option<usize>,
    pub route: String,
    pub class: String,
    pub rides_2015: f64,
    pub rides_2019: f64,
    pub hours_2015: f64,
    pub hours_2019: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceChange {
    Increase,
    Decrease,
    None,
}

impl ServiceChange {
    pub fn classify(hours_change_fraction: f64, threshold: f64) -> Self {
        if hours_change_fraction.abs() < threshold {
            ServiceChange::None
        } else if hours_change_fraction > 0.0 {
            ServiceChange::Increase
        } else {
            ServiceChange::Decrease
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceChange::Increase => "increase",
            ServiceChange::Decrease => "decrease",
            ServiceChange::None => "none",
        }
    }
}

/// A raw row with every derived column filled in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedRoute {
    pub route: String,
    pub class_label: String,
    pub class: usize,
    pub rides_2015: f64,
    pub rides_2019: f64,
    pub hours_2015: f64,
    pub hours_2019: f64,
    pub rides_diff: f64,
    pub hours_diff: f64,
    pub rides_pct: f64,
    pub rides_rate: f64,
    pub hours_change_fraction: f64,
    pub service_change: ServiceChange,
}

impl DerivedRoute {
    pub fn observation(&self) -> Observation {
        Observation {
            route: self.route.clone(),
            class: self.class,
            hours_change_fraction: self.hours_change_fraction,
            response_log_rate: self.rides_rate,
        }
    }
}

/// Derive one route. Baselines must be positive and every count finite and non-negative.
pub fn derive_route(raw: &RawRouteRecord, classes: &ClassTable, threshold: f64) -> Result<DerivedRoute, EngineError> {
    let fail = |reason: String| EngineError::binding_at(raw.line, Some(&raw.route), reason);

    let class = classes
        .resolve(&raw.class)
        .ok_or_else(|| fail(format!("unknown route class '{}'", raw.class)))?;

    for (name, v) in [
        ("rides_2015", raw.rides_2015),
        ("rides_2019", raw.rides_2019),
        ("hours_2015", raw.hours_2015),
        ("hours_2019", raw.hours_2019),
    ] {
        if !v.is_finite() || v < 0.0 {
            return Err(fail(format!("`{name}` must be finite and non-negative, got {v}")));
        }
    }
    if raw.rides_2015 <= 0.0 || raw.hours_2015 <= 0.0 {
        return Err(fail("2015 baseline rides and hours must be positive".into()));
    }
    if raw.rides_2019 <= 0.0 {
        return Err(fail("rides_2019 must be positive to take a log ratio".into()));
    }

    let rides_diff = raw.rides_2019 - raw.rides_2015;
    let hours_diff = raw.hours_2019 - raw.hours_2015;
    let hours_change_fraction = hours_diff / raw.hours_2015;

    Ok(DerivedRoute {
        route: raw.route.clone(),
        class_label: classes.label(class).unwrap_or(&raw.class).to_string(),
        class,
        rides_2015: raw.rides_2015,
        rides_2019: raw.rides_2019,
        hours_2015: raw.hours_2015,
        hours_2019: raw.hours_2019,
        rides_diff,
        hours_diff,
        rides_pct: rides_diff / raw.rides_2015,
        rides_rate: (raw.rides_2019 / raw.rides_2015).ln(),
        hours_change_fraction,
        service_change: ServiceChange::classify(hours_change_fraction, threshold),
    })
}

/// Derive every row; the first failing row aborts. Route ids must be unique.
pub fn derive_all(
    raws: &[RawRouteRecord],
    classes: &ClassTable,
    threshold: f64,
) -> Result<Vec<DerivedRoute>, EngineError> {
    if !(threshold.is_finite() && threshold >= 0.0) {
        return Err(EngineError::InvalidConfig(format!(
            "service_change_threshold must be finite and >= 0, got {threshold}"
        )));
    }
    let mut seen = std::collections::HashSet::with_capacity(raws.len());
    let mut out = Vec::with_capacity(raws.len());
    for raw in raws {
        if !seen.insert(raw.route.as_str()) {
            return Err(EngineError::binding_at(raw.line, Some(&raw.route), "duplicate route id"));
        }
        out.push(derive_route(raw, classes, threshold)?);
    }
    Ok(out)
}

/// The engine's input table for derived routes.
pub fn to_dataset(derived: &[DerivedRoute], classes: &ClassTable) -> DataSet {
    DataSet::new(classes.clone(), derived.iter().map(DerivedRoute::observation).collect())
}
