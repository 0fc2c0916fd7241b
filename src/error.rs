//! Error types for the maintenance trainer

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::selection::EvaluationReport;

/// Result type alias for trainer operations
pub type Result<T> = std::result::Result<T, TrainerError>;

/// Pipeline stage a fatal error was raised in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    Validation,
    Selection,
    Refit,
    Persistence,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Validation => "validation",
            PipelineStage::Selection => "selection",
            PipelineStage::Refit => "refit",
            PipelineStage::Persistence => "persistence",
        };
        f.write_str(name)
    }
}

/// Main error type for the trainer
#[derive(Error, Debug)]
pub enum TrainerError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Grid search failed for {family}: {reason}")]
    FamilySearch { family: String, reason: String },

    #[error("Grid search for {family} exceeded its time budget of {budget_secs:.1}s")]
    SearchTimeout { family: String, budget_secs: f64 },

    #[error(
        "No model reached the minimum score of {floor}: {}",
        describe_best(.best)
    )]
    NoViableModel {
        best: Option<(String, f64)>,
        floor: f64,
        report: EvaluationReport,
    },

    #[error("Failed to persist artifact to {}: {source}", .path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: PipelineStage,
        #[source]
        source: Box<TrainerError>,
    },
}

fn describe_best(best: &Option<(String, f64)>) -> String {
    match best {
        Some((family, score)) => format!("best was {} with {:.4}", family, score),
        None => "no family produced a score".to_string(),
    }
}

impl TrainerError {
    /// Wrap this error with the pipeline stage it occurred in
    pub fn in_stage(self, stage: PipelineStage) -> Self {
        match self {
            // Keep the innermost stage
            err @ TrainerError::Stage { .. } => err,
            err => TrainerError::Stage {
                stage,
                source: Box::new(err),
            },
        }
    }

    /// The innermost error, with stage wrappers removed
    pub fn root(&self) -> &TrainerError {
        match self {
            TrainerError::Stage { source, .. } => source.root(),
            err => err,
        }
    }

    /// Stage the error was raised in, if it has been wrapped
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            TrainerError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for TrainerError {
    fn from(err: serde_json::Error) -> Self {
        TrainerError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for TrainerError {
    fn from(err: bincode::Error) -> Self {
        TrainerError::SerializationError(err.to_string())
    }
}

impl From<polars::error::PolarsError> for TrainerError {
    fn from(err: polars::error::PolarsError) -> Self {
        TrainerError::DataError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for TrainerError {
    fn from(err: ndarray::ShapeError) -> Self {
        TrainerError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
