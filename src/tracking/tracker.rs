//! Tracker capability and the no-op implementation

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type for tracker calls
pub type TrackerResult<T> = std::result::Result<T, TrackerError>;

/// Run-relative artifact path the winning model is uploaded under and registered from
pub const MODEL_ARTIFACT_PATH: &str = "model";

/// Errors raised while talking to an experiment tracker
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Tracker unavailable: {0}")]
    Unavailable(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Tracker API error {code}: {message}")]
    Api { code: String, message: String },

    #[error("Unexpected tracker response: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Identifier issued by the tracker for a run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is currently running
    Running,
    /// Run completed successfully
    Finished,
    /// Run failed
    Failed,
    /// Run was killed/stopped
    Killed,
}

impl RunStatus {
    /// Name used by the MLflow API
    pub fn as_mlflow(&self) -> &'static str {
        match self {
            RunStatus::Running => "RUNNING",
            RunStatus::Finished => "FINISHED",
            RunStatus::Failed => "FAILED",
            RunStatus::Killed => "KILLED",
        }
    }
}

/// Registry stage of a model version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelStage {
    None,
    Staging,
    Production,
    Archived,
}

impl fmt::Display for ModelStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModelStage::None => "None",
            ModelStage::Staging => "Staging",
            ModelStage::Production => "Production",
            ModelStage::Archived => "Archived",
        };
        f.write_str(name)
    }
}

/// A registered model version after promotion
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelVersion {
    pub name: String,
    pub version: String,
    pub stage: ModelStage,
}

/// Capability an experiment tracker provides to the pipeline
///
/// Implementations are shared across the logging stage, so every call takes
/// `&self` and manages its own synchronisation.
pub trait ExperimentTracker: Send + Sync {
    /// Backend name for log output
    fn name(&self) -> &'static str;

    /// Open a new run and return its id
    fn begin_run(&self, run_name: &str) -> TrackerResult<RunId>;

    /// Record parameters and metrics for a run
    fn log(
        &self,
        run: &RunId,
        params: &BTreeMap<String, String>,
        metrics: &BTreeMap<String, f64>,
    ) -> TrackerResult<()>;

    /// Attach a file or directory to a run under the artifact path `name`
    ///
    /// A file lands at `name/<file name>`, a directory's contents under `name/`.
    fn log_artifact(&self, run: &RunId, name: &str, path: &Path) -> TrackerResult<()>;

    /// Close a run
    fn end_run(&self, run: &RunId, status: RunStatus) -> TrackerResult<()>;

    /// Register the model logged at artifact path `source` of `run` under
    /// `model_name` and move it to `stage`
    fn register_and_promote(
        &self,
        model_name: &str,
        run: &RunId,
        source: &str,
        stage: ModelStage,
    ) -> TrackerResult<ModelVersion>;
}

/// Tracker that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTracker;

impl ExperimentTracker for NullTracker {
    fn name(&self) -> &'static str {
        "null"
    }

    fn begin_run(&self, _run_name: &str) -> TrackerResult<RunId> {
        Ok(RunId::new(Uuid::new_v4().simple().to_string()))
    }

    fn log(
        &self,
        _run: &RunId,
        _params: &BTreeMap<String, String>,
        _metrics: &BTreeMap<String, f64>,
    ) -> TrackerResult<()> {
        Ok(())
    }

    fn log_artifact(&self, _run: &RunId, _name: &str, _path: &Path) -> TrackerResult<()> {
        Ok(())
    }

    fn end_run(&self, _run: &RunId, _status: RunStatus) -> TrackerResult<()> {
        Ok(())
    }

    fn register_and_promote(
        &self,
        model_name: &str,
        _run: &RunId,
        _source: &str,
        stage: ModelStage,
    ) -> TrackerResult<ModelVersion> {
        Ok(ModelVersion {
            name: model_name.to_string(),
            version: "0".to_string(),
            stage,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_tracker_issues_unique_ids() {
        let tracker = NullTracker;
        let a = tracker.begin_run("a").unwrap();
        let b = tracker.begin_run("b").unwrap();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(ModelStage::Production.to_string(), "Production");
        assert_eq!(RunStatus::Finished.as_mlflow(), "FINISHED");
    }
}
