//! Model training pipeline
//!
//! `validate -> search -> select -> refit -> persist -> log`. Every stage up
//! to persistence is fatal on error and wrapped with its stage name;
//! experiment logging never fails the run.

use std::collections::BTreeMap;
use std::time::Instant;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifact::{save_artifact, ArtifactInfo, ModelArtifact};
use crate::config::TrainerConfig;
use crate::data::{validate_split, Dataset};
use crate::error::{PipelineStage, Result, TrainerError};
use crate::evaluation::MetricReport;
use crate::selection::{
    CandidateSearch, EvaluationReport, ModelSelector, ParamSet, Selection, WinnerRefitter,
};
use crate::tracking::{self, ExperimentLogger, ExperimentTracker, LoggingSummary, RunContext};

/// Result of a successful training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingOutcome {
    pub winner: Selection,
    /// Test accuracy of the persisted estimator
    pub test_accuracy: f64,
    pub metrics: MetricReport,
    pub best_params: ParamSet,
    pub evaluation: EvaluationReport,
    pub artifact: ArtifactInfo,
    pub tracking: LoggingSummary,
    pub elapsed_secs: f64,
}

/// Orchestrates model selection for one train/test split
pub struct ModelTrainer {
    config: TrainerConfig,
    tracker: Box<dyn ExperimentTracker>,
}

impl ModelTrainer {
    /// Validate the configuration and connect the configured tracker
    pub fn new(config: TrainerConfig) -> Result<Self> {
        config.validate()?;
        let tracker = tracking::connect(&config.tracking);
        Ok(Self { config, tracker })
    }

    /// Use an already constructed tracker
    pub fn with_tracker(config: TrainerConfig, tracker: Box<dyn ExperimentTracker>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, tracker })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    pub fn tracker(&self) -> &dyn ExperimentTracker {
        self.tracker.as_ref()
    }

    /// Run the pipeline on matrices whose last column is the label
    pub fn initiate_model_training(
        &self,
        train: &Array2<f64>,
        test: &Array2<f64>,
    ) -> Result<TrainingOutcome> {
        let datasets = Dataset::from_matrix(train).and_then(|train| {
            let test = Dataset::from_matrix(test)?;
            Ok((train, test))
        });
        let (train, test) = datasets.map_err(|e| e.in_stage(PipelineStage::Validation))?;
        self.train(&train, &test)
    }

    /// Run the pipeline on already split datasets
    pub fn train(&self, train: &Dataset, test: &Dataset) -> Result<TrainingOutcome> {
        let started = Instant::now();
        validate_split(train, test).map_err(|e| e.in_stage(PipelineStage::Validation))?;
        info!(
            train_rows = train.n_samples(),
            test_rows = test.n_samples(),
            features = train.n_features(),
            families = self.config.families.len(),
            "Starting model selection"
        );

        let evaluation = CandidateSearch::new(&self.config.families)
            .with_cv_folds(self.config.cv_folds)
            .with_random_state(self.config.random_state)
            .with_parallel(self.config.parallel_families)
            .with_time_budget(self.config.search_time_budget())
            .evaluate(&train.features, &train.labels);

        let winner = ModelSelector::new(self.config.min_score)
            .select(&evaluation)
            .map_err(|e| e.in_stage(PipelineStage::Selection))?;

        let family = self
            .config
            .families
            .iter()
            .find(|f| f.name == winner.family)
            .ok_or_else(|| {
                TrainerError::ConfigError(format!("winning family {} is not configured", winner.family))
                    .in_stage(PipelineStage::Refit)
            })?;
        let refit = WinnerRefitter::new(self.config.cv_folds, self.config.random_state)
            .with_time_budget(self.config.search_time_budget())
            .refit(
                family,
                (&train.features, &train.labels),
                (&test.features, &test.labels),
            )
            .map_err(|e| e.in_stage(PipelineStage::Refit))?;

        let mut artifact_metrics = refit.metrics.as_map();
        artifact_metrics.insert("model_score".to_string(), winner.score);
        let params: BTreeMap<String, String> = refit
            .best_params
            .iter()
            .map(|(k, v)| (k.clone(), v.to_string()))
            .collect();
        let artifact = ModelArtifact::new(
            winner.family.clone(),
            params,
            artifact_metrics,
            train.n_features(),
            refit.estimator,
        );
        let artifact = save_artifact(&artifact, &self.config.artifact_path)
            .map_err(|e| e.in_stage(PipelineStage::Persistence))?;

        let context = RunContext {
            report: &evaluation,
            selection: &winner,
            winner_params: &refit.best_params,
            metrics: &refit.metrics,
            artifact: &artifact,
            train_size: train.n_samples(),
            test_size: test.n_samples(),
            features_count: train.n_features(),
            random_state: self.config.random_state,
        };
        let tracking = ExperimentLogger::new(self.tracker.as_ref(), &self.config.tracking).log_all(&context);

        let elapsed_secs = started.elapsed().as_secs_f64();
        info!(
            family = %winner.family,
            test_accuracy = refit.metrics.test_accuracy,
            artifact = %artifact.path.display(),
            elapsed_secs,
            "Model training complete"
        );

        Ok(TrainingOutcome {
            test_accuracy: refit.metrics.test_accuracy,
            winner,
            metrics: refit.metrics,
            best_params: refit.best_params,
            evaluation,
            artifact,
            tracking,
            elapsed_secs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::{FamilyKind, ModelFamily, ParamGrid};
    use crate::tracking::NullTracker;
    use ndarray::array;
    use tempfile::TempDir;

    fn matrices() -> (Array2<f64>, Array2<f64>) {
        let train = array![
            [0.0, 0.1, 0.0], [0.2, 0.0, 0.0], [0.1, 0.3, 0.0], [0.3, 0.2, 0.0],
            [0.2, 0.2, 0.0], [0.4, 0.1, 0.0],
            [2.0, 2.1, 1.0], [2.2, 2.0, 1.0], [2.1, 2.3, 1.0], [2.3, 2.2, 1.0],
            [2.2, 2.2, 1.0], [2.4, 2.1, 1.0],
        ];
        let test = array![[0.1, 0.1, 0.0], [2.1, 2.1, 1.0], [0.3, 0.0, 0.0], [2.0, 2.4, 1.0]];
        (train, test)
    }

    fn config(dir: &TempDir) -> TrainerConfig {
        TrainerConfig::default()
            .with_artifact_path(dir.path().join("artifacts").join("model.pkl"))
            .with_families(vec![
                ModelFamily::new(
                    "KNN",
                    FamilyKind::Knn,
                    ParamGrid::new().with("n_neighbors", vec![3_i64]),
                ),
                ModelFamily::new(
                    "Logistic Regression",
                    FamilyKind::LogisticRegression,
                    ParamGrid::new().with("C", vec![1.0]),
                ),
            ])
    }

    #[test]
    fn test_pipeline_persists_winner() {
        let dir = TempDir::new().unwrap();
        let (train, test) = matrices();
        let trainer = ModelTrainer::with_tracker(config(&dir), Box::new(NullTracker)).unwrap();

        let outcome = trainer.initiate_model_training(&train, &test).unwrap();
        assert_eq!(outcome.winner.family, "KNN");
        assert_eq!(outcome.test_accuracy, 1.0);
        assert!(outcome.artifact.path.exists());
        assert_eq!(outcome.evaluation.len(), 2);
        assert_eq!(outcome.tracking.runs_logged, 2);
    }

    #[test]
    fn test_validation_errors_carry_stage() {
        let dir = TempDir::new().unwrap();
        let (train, _) = matrices();
        let narrow = array![[0.1, 0.0], [2.0, 1.0]];
        let trainer = ModelTrainer::with_tracker(config(&dir), Box::new(NullTracker)).unwrap();

        let err = trainer.initiate_model_training(&train, &narrow).unwrap_err();
        assert_eq!(err.stage(), Some(PipelineStage::Validation));
        assert!(matches!(err.root(), TrainerError::ShapeError { .. }));
        assert!(!dir.path().join("artifacts").exists());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let dir = TempDir::new().unwrap();
        assert!(ModelTrainer::new(config(&dir).with_cv_folds(1)).is_err());
    }
}
