//! Pipeline configuration

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};
use crate::selection::{default_families, ModelFamily, DEFAULT_MIN_SCORE};
use crate::tracking::ModelStage;

/// Environment variable consulted for the MLflow server address
pub const TRACKING_URI_ENV: &str = "MLFLOW_TRACKING_URI";

/// Where experiment runs are recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerBackend {
    /// No tracking; a null tracker stands in
    #[default]
    Disabled,
    /// File-backed store under `dir`
    Local { dir: PathBuf },
    /// MLflow tracking server
    Mlflow { uri: String },
}

/// A directory or file attached to every logged run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunArtifact {
    pub name: String,
    pub path: PathBuf,
}

/// Experiment tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub backend: TrackerBackend,
    pub experiment_name: String,
    /// Registry name the winning run is registered under
    pub registry_name: String,
    pub promotion_stage: ModelStage,
    pub run_artifacts: Vec<RunArtifact>,
    pub request_timeout_secs: u64,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            backend: TrackerBackend::Disabled,
            experiment_name: "predictive_maintenance".to_string(),
            registry_name: "best_maintenance_predictor".to_string(),
            promotion_stage: ModelStage::Production,
            run_artifacts: vec![RunArtifact {
                name: "model_artifacts".to_string(),
                path: PathBuf::from("artifacts"),
            }],
            request_timeout_secs: 10,
        }
    }
}

impl TrackingConfig {
    pub fn with_backend(mut self, backend: TrackerBackend) -> Self {
        self.backend = backend;
        self
    }

    pub fn with_experiment_name(mut self, name: impl Into<String>) -> Self {
        self.experiment_name = name.into();
        self
    }

    pub fn with_registry_name(mut self, name: impl Into<String>) -> Self {
        self.registry_name = name.into();
        self
    }

    pub fn with_run_artifacts(mut self, artifacts: Vec<RunArtifact>) -> Self {
        self.run_artifacts = artifacts;
        self
    }

    /// Use the MLflow server named by `MLFLOW_TRACKING_URI` when tracking is
    /// still disabled and the variable is set
    pub fn with_env_overrides(mut self) -> Self {
        if self.backend == TrackerBackend::Disabled {
            if let Ok(uri) = std::env::var(TRACKING_URI_ENV) {
                if !uri.trim().is_empty() {
                    self.backend = TrackerBackend::Mlflow { uri };
                }
            }
        }
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Configuration of one training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Where the winning model is written
    pub artifact_path: PathBuf,
    /// Folds used by every grid search
    pub cv_folds: usize,
    /// Minimum acceptable winning score
    pub min_score: f64,
    pub random_state: u64,
    /// Search families on the rayon pool
    pub parallel_families: bool,
    /// Wall-clock budget per family search
    pub search_time_budget_secs: Option<f64>,
    pub families: Vec<ModelFamily>,
    pub tracking: TrackingConfig,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            artifact_path: PathBuf::from("artifacts").join("model.pkl"),
            cv_folds: 3,
            min_score: DEFAULT_MIN_SCORE,
            random_state: 42,
            parallel_families: false,
            search_time_budget_secs: None,
            families: default_families(),
            tracking: TrackingConfig::default(),
        }
    }
}

impl TrainerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a JSON configuration; absent fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            TrainerError::ConfigError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&text).map_err(|e| {
            TrainerError::ConfigError(format!("invalid config {}: {}", path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn with_artifact_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.artifact_path = path.into();
        self
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    pub fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_parallel_families(mut self, parallel: bool) -> Self {
        self.parallel_families = parallel;
        self
    }

    pub fn with_search_time_budget(mut self, secs: f64) -> Self {
        self.search_time_budget_secs = Some(secs);
        self
    }

    pub fn with_families(mut self, families: Vec<ModelFamily>) -> Self {
        self.families = families;
        self
    }

    pub fn with_tracking(mut self, tracking: TrackingConfig) -> Self {
        self.tracking = tracking;
        self
    }

    /// Per-family search budget, None when unset or not representable
    pub fn search_time_budget(&self) -> Option<Duration> {
        self.search_time_budget_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    pub fn validate(&self) -> Result<()> {
        if self.cv_folds < 2 {
            return Err(TrainerError::ConfigError(format!(
                "cv_folds must be at least 2, got {}",
                self.cv_folds
            )));
        }
        if !self.min_score.is_finite() {
            return Err(TrainerError::ConfigError(format!(
                "min_score must be finite, got {}",
                self.min_score
            )));
        }
        if let Some(secs) = self.search_time_budget_secs {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(TrainerError::ConfigError(format!(
                    "search_time_budget_secs must be positive, got {}",
                    secs
                )));
            }
            if let Err(err) = Duration::try_from_secs_f64(secs) {
                return Err(TrainerError::ConfigError(format!(
                    "search_time_budget_secs {} is not a valid duration: {}",
                    secs, err
                )));
            }
        }
        if self.families.is_empty() {
            return Err(TrainerError::ConfigError("no model families configured".to_string()));
        }
        let mut seen = BTreeSet::new();
        for family in &self.families {
            if !seen.insert(family.name.as_str()) {
                return Err(TrainerError::ConfigError(format!(
                    "duplicate model family {}",
                    family.name
                )));
            }
        }
        if self.artifact_path.as_os_str().is_empty() {
            return Err(TrainerError::ConfigError("artifact_path is empty".to_string()));
        }
        Ok(())
    }
}
