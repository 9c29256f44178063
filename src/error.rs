//! Error types.
//!
//! - `EngineError` is raised by the inference core (binding, sampling, prediction).
//! - `AppError` is what the `rb` binary reports: a message plus a process exit code.

use thiserror::Error;

/// Errors raised by the inference-and-prediction engine.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// An observation cannot be bound to the model (bad class index, non-finite value, missing column).
    #[error("data binding error{}: {reason}", fmt_location(.line, .route))]
    DataBinding {
        line: Option<usize>,
        route: Option<String>,
        reason: String,
    },

    /// A chain could not start or could not continue.
    #[error("sampling error in chain {chain}: {reason}")]
    Sampling { chain: usize, reason: String },

    /// A prediction grid point falls outside the fitted model's category set.
    #[error("prediction grid error at point {index}: {reason}")]
    PredictionGrid { index: usize, reason: String },

    /// Nothing left to work with: an empty table, or a posterior without draws.
    #[error("no usable data: {0}")]
    NoData(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("format error: {0}")]
    Format(String),
}

impl EngineError {
    pub fn binding(reason: impl Into<String>) -> Self {
        Self::DataBinding {
            line: None,
            route: None,
            reason: reason.into(),
        }
    }

    pub fn binding_at(line: Option<usize>, route: Option<&str>, reason: impl Into<String>) -> Self {
        Self::DataBinding {
            line,
            route: route.map(str::to_string),
            reason: reason.into(),
        }
    }

    /// Exit code used when this error terminates the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::DataBinding { .. } | Self::PredictionGrid { .. } | Self::InvalidConfig(_) => 2,
            Self::Io(_) | Self::Format(_) => 2,
            Self::NoData(_) => 3,
            Self::Sampling { .. } => 4,
        }
    }
}

fn fmt_location(line: &Option<usize>, route: &Option<String>) -> String {
    match (line, route.as_deref()) {
        (Some(l), Some(r)) => format!(" (line {l}, route '{r}')"),
        (Some(l), None) => format!(" (line {l})"),
        (None, Some(r)) => format!(" (route '{r}')"),
        (None, None) => String::new(),
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        Self::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_error_names_route_and_line() {
        let err = EngineError::binding_at(Some(7), Some("R12"), "class index 9 outside 1..4");
        let msg = err.to_string();
        assert!(msg.contains("line 7"), "{msg}");
        assert!(msg.contains("R12"), "{msg}");
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn sampling_error_maps_to_computation_exit_code() {
        let app: AppError = EngineError::Sampling {
            chain: 1,
            reason: "non-finite log density".to_string(),
        }
        .into();
        assert_eq!(app.exit_code(), 4);
        assert!(app.to_string().contains("chain 1"));
    }

    #[test]
    fn empty_input_has_its_own_exit_code() {
        assert_eq!(EngineError::NoData("empty CSV".into()).exit_code(), 3);
    }
}
