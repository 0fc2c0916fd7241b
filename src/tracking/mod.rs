//! Experiment Tracking Module
//!
//! The pipeline talks to a tracker only through [`ExperimentTracker`]. Three
//! backends are provided: a null tracker, a local file store and an MLflow
//! REST client.

mod local;
mod logger;
mod mlflow;
mod tracker;

pub use local::{ArtifactRef, Experiment, LocalTracker, RegisteredModel, RegisteredVersion, Run};
pub use logger::{ExperimentLogger, LoggingSummary, RunContext};
pub use mlflow::MlflowTracker;
pub use tracker::{
    ExperimentTracker, ModelStage, ModelVersion, NullTracker, RunId, RunStatus, TrackerError,
    TrackerResult, MODEL_ARTIFACT_PATH,
};

use tracing::{info, warn};

use crate::config::{TrackerBackend, TrackingConfig};

/// Build the configured tracker, falling back to [`NullTracker`] when it
/// cannot be initialised
pub fn connect(config: &TrackingConfig) -> Box<dyn ExperimentTracker> {
    let result: TrackerResult<Box<dyn ExperimentTracker>> = match &config.backend {
        TrackerBackend::Disabled => return Box::new(NullTracker),
        TrackerBackend::Local { dir } => LocalTracker::open(dir, &config.experiment_name)
            .map(|t| Box::new(t) as Box<dyn ExperimentTracker>),
        TrackerBackend::Mlflow { uri } => {
            MlflowTracker::connect(uri, &config.experiment_name, config.request_timeout())
                .map(|t| Box::new(t) as Box<dyn ExperimentTracker>)
        }
    };

    match result {
        Ok(tracker) => {
            info!(
                tracker = tracker.name(),
                experiment = %config.experiment_name,
                "Experiment tracker ready"
            );
            tracker
        }
        Err(err) => {
            warn!(error = %err, "Experiment tracker unavailable, runs will not be recorded");
            Box::new(NullTracker)
        }
    }
}
