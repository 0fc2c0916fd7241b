//! Maintenance Trainer - model selection for machine failure prediction
//!
//! Given a numeric train/test split with a trailing 0/1 label column, this
//! crate:
//! - grid-searches several classifier families with stratified k-fold CV
//! - selects the best family (first declared wins ties) above a quality floor
//! - refits the winner and reports train/test accuracy, precision, recall, F1
//! - persists the winning estimator to `artifacts/model.pkl`
//! - records one run per family with an experiment tracker, best-effort
//!
//! # Modules
//!
//! ## Core
//! - [`selection`] - Candidate search, winner selection and refit
//! - [`evaluation`] - Weighted classification metrics
//! - [`artifact`] - Model artifact persistence
//! - [`pipeline`] - The end-to-end `ModelTrainer`
//!
//! ## Estimators
//! - [`training`] - Random forest, SVC, gradient boosting, logistic regression, KNN
//!
//! ## Infrastructure
//! - [`tracking`] - Experiment tracking (null, local file, MLflow)
//! - [`config`] - Pipeline configuration
//! - [`data`] - CSV loading and input validation
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Core
pub mod artifact;
pub mod evaluation;
pub mod pipeline;
pub mod selection;

// Estimators
pub mod training;

// Infrastructure
pub mod cli;
pub mod config;
pub mod data;
pub mod tracking;

pub use error::{Result, TrainerError};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{PipelineStage, Result, TrainerError};

    // Pipeline
    pub use crate::config::{TrackerBackend, TrackingConfig, TrainerConfig};
    pub use crate::pipeline::{ModelTrainer, TrainingOutcome};

    // Selection
    pub use crate::selection::{
        default_families, CandidateSearch, EvaluationReport, FamilyKind, ModelFamily,
        ModelSelector, ParamGrid, ParamValue, Selection, WinnerRefitter,
    };

    // Evaluation and persistence
    pub use crate::artifact::{load_artifact, save_artifact, ArtifactInfo, ModelArtifact};
    pub use crate::evaluation::{ClassificationReport, MetricReport};

    // Estimators
    pub use crate::training::{Classifier, Estimator};

    // Experiment tracking
    pub use crate::tracking::{
        ExperimentLogger, ExperimentTracker, LocalTracker, MlflowTracker, NullTracker,
    };
}
