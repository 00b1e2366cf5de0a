use serde::Serialize;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PipelineError {
    #[error("insufficient data: need at least {required} entities, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("insufficient history: need at least {required} periods, got {actual}")]
    InsufficientHistory { required: usize, actual: usize },

    #[error("degenerate series: every period equals {value}")]
    ConstantSeries { value: f64 },

    #[error("model fit failed after {iterations} iterations: {reason}")]
    ModelFit { iterations: usize, reason: String },

    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Coarse failure category written to skip reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InsufficientData,
    InsufficientHistory,
    ModelFit,
    Configuration,
}

impl PipelineError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::InsufficientData { .. } => FailureKind::InsufficientData,
            Self::InsufficientHistory { .. } | Self::ConstantSeries { .. } => {
                FailureKind::InsufficientHistory
            }
            Self::ModelFit { .. } => FailureKind::ModelFit,
            Self::Configuration(_) => FailureKind::Configuration,
        }
    }
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InsufficientData => "insufficient_data",
            Self::InsufficientHistory => "insufficient_history",
            Self::ModelFit => "model_fit",
            Self::Configuration => "configuration",
        }
    }
}
