//! Integration test: model selection pipeline end-to-end

use maintenance_trainer::artifact::load_artifact;
use maintenance_trainer::config::{TrackerBackend, TrackingConfig, TrainerConfig};
use maintenance_trainer::error::{PipelineStage, TrainerError};
use maintenance_trainer::pipeline::ModelTrainer;
use maintenance_trainer::selection::{FamilyKind, ModelFamily, ParamGrid};
use maintenance_trainer::training::accuracy;
use maintenance_trainer::tracking::NullTracker;
use ndarray::{s, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tempfile::TempDir;

/// 100 rows, 5 features, label = sign of a linear score kept away from zero
fn linear_dataset(seed: u64) -> (Array2<f64>, Array2<f64>) {
    let weights = [1.0, 0.3, -0.2, 0.0, 0.0];
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut rows: Vec<f64> = Vec::with_capacity(100 * 6);
    let mut n = 0;

    while n < 100 {
        let x: Vec<f64> = (0..5).map(|_| rng.gen_range(-2.0..2.0)).collect();
        let score: f64 = x.iter().zip(weights.iter()).map(|(a, w)| a * w).sum();
        if score.abs() < 0.4 {
            continue;
        }
        rows.extend_from_slice(&x);
        rows.push(if score > 0.0 { 1.0 } else { 0.0 });
        n += 1;
    }

    let matrix = Array2::from_shape_vec((100, 6), rows).unwrap();
    let train = matrix.slice(s![..70, ..]).to_owned();
    let test = matrix.slice(s![70.., ..]).to_owned();
    (train, test)
}

fn artifact_config(dir: &TempDir) -> TrainerConfig {
    TrainerConfig::default().with_artifact_path(dir.path().join("artifacts").join("model.pkl"))
}

fn light_families() -> Vec<ModelFamily> {
    vec![
        ModelFamily::new(
            "SVM",
            FamilyKind::Svm,
            ParamGrid::new()
                .with("C", vec![1.0, 10.0])
                .with("kernel", vec!["sigmoid"]),
        ),
        ModelFamily::new(
            "Logistic Regression",
            FamilyKind::LogisticRegression,
            ParamGrid::new()
                .with("C", vec![0.1, 1.0, 10.0])
                .with("solver", vec!["liblinear"]),
        ),
        ModelFamily::new(
            "KNN",
            FamilyKind::Knn,
            ParamGrid::new()
                .with("n_neighbors", vec![3_i64, 5])
                .with("weights", vec!["uniform", "distance"]),
        ),
    ]
}

#[test]
fn test_default_families_find_linear_boundary() {
    let dir = TempDir::new().unwrap();
    let (train, test) = linear_dataset(7);
    let trainer = ModelTrainer::with_tracker(artifact_config(&dir), Box::new(NullTracker)).unwrap();

    let outcome = trainer.initiate_model_training(&train, &test).unwrap();

    assert!(
        outcome.test_accuracy >= 0.9,
        "winner {} only reached {}",
        outcome.winner.family,
        outcome.test_accuracy
    );
    assert_eq!(outcome.evaluation.len(), 5);
    let names: Vec<_> = outcome.evaluation.iter().map(|e| e.family.as_str()).collect();
    assert_eq!(names, ["Random Forest", "SVM", "Gradient Boosting", "Logistic Regression", "KNN"]);

    // The winner holds the highest score and is the first family to reach it
    let best = outcome
        .evaluation
        .iter()
        .map(|e| e.score())
        .fold(f64::NEG_INFINITY, f64::max);
    assert_eq!(outcome.winner.score, best);
    let first = outcome.evaluation.iter().find(|e| e.score() == best).unwrap();
    assert_eq!(first.family, outcome.winner.family);

    // The persisted model is the one the metrics describe
    let artifact = load_artifact(&outcome.artifact.path).unwrap();
    assert_eq!(artifact.family, outcome.winner.family);
    assert_eq!(artifact.feature_count, 5);
    let x_test = test.slice(s![.., ..5]).to_owned();
    let y_test = test.column(5).to_owned();
    let predictions = artifact.predict(&x_test).unwrap();
    assert_eq!(accuracy(&y_test, &predictions), outcome.test_accuracy);
}

#[test]
fn test_invalid_grid_family_does_not_abort_run() {
    let dir = TempDir::new().unwrap();
    let (train, test) = linear_dataset(11);
    let config = artifact_config(&dir).with_families(light_families());
    let trainer = ModelTrainer::with_tracker(config, Box::new(NullTracker)).unwrap();

    let outcome = trainer.initiate_model_training(&train, &test).unwrap();

    let svm = outcome.evaluation.get("SVM").unwrap();
    assert!(svm.is_failed());
    assert_eq!(svm.score(), f64::NEG_INFINITY);
    assert_ne!(outcome.winner.family, "SVM");
    assert!(outcome.artifact.path.exists());
}

#[test]
fn test_floor_above_every_score_is_no_viable_model() {
    let dir = TempDir::new().unwrap();
    let (train, test) = linear_dataset(3);
    let config = artifact_config(&dir)
        .with_families(light_families())
        .with_min_score(1.5);
    let trainer = ModelTrainer::with_tracker(config, Box::new(NullTracker)).unwrap();

    let err = trainer.initiate_model_training(&train, &test).unwrap_err();

    assert_eq!(err.stage(), Some(PipelineStage::Selection));
    match err.root() {
        TrainerError::NoViableModel { best, floor, report } => {
            assert_eq!(*floor, 1.5);
            assert_eq!(report.len(), 3);
            let (family, score) = best.as_ref().unwrap();
            assert_ne!(family, "SVM");
            assert!(*score <= 1.0);
        }
        other => panic!("expected NoViableModel, got {:?}", other),
    }
    assert!(!dir.path().join("artifacts").join("model.pkl").exists());
}

#[test]
fn test_every_family_failing_is_no_viable_model() {
    let dir = TempDir::new().unwrap();
    let (train, test) = linear_dataset(3);
    let broken = vec![ModelFamily::new(
        "KNN",
        FamilyKind::Knn,
        ParamGrid::new().with("n_neighbours", vec![3_i64]),
    )];
    let config = artifact_config(&dir).with_families(broken);
    let trainer = ModelTrainer::with_tracker(config, Box::new(NullTracker)).unwrap();

    let err = trainer.initiate_model_training(&train, &test).unwrap_err();
    assert!(matches!(err.root(), TrainerError::NoViableModel { best: None, .. }));
}

#[test]
fn test_unwritable_artifact_path_is_fatal() {
    let dir = TempDir::new().unwrap();
    let (train, test) = linear_dataset(5);
    let blocker = dir.path().join("artifacts");
    std::fs::write(&blocker, b"not a directory").unwrap();

    let config = TrainerConfig::default()
        .with_families(light_families())
        .with_artifact_path(blocker.join("model.pkl"));
    let trainer = ModelTrainer::with_tracker(config, Box::new(NullTracker)).unwrap();

    let err = trainer.initiate_model_training(&train, &test).unwrap_err();
    assert_eq!(err.stage(), Some(PipelineStage::Persistence));
    match err.root() {
        TrainerError::Persistence { path, source } => {
            assert_eq!(path, &blocker.join("model.pkl"));
            assert!(!source.to_string().is_empty());
        }
        other => panic!("expected Persistence, got {:?}", other),
    }
}

#[test]
fn test_unrepresentable_time_budget_rejected_up_front() {
    let dir = TempDir::new().unwrap();
    let config = artifact_config(&dir)
        .with_families(light_families())
        .with_search_time_budget(1e20);

    let result = ModelTrainer::with_tracker(config, Box::new(NullTracker));
    assert!(matches!(result, Err(TrainerError::ConfigError(_))));
}

#[test]
fn test_generous_time_budget_does_not_interrupt() {
    let dir = TempDir::new().unwrap();
    let (train, test) = linear_dataset(23);
    let config = artifact_config(&dir)
        .with_families(light_families())
        .with_search_time_budget(3600.0);
    let trainer = ModelTrainer::with_tracker(config, Box::new(NullTracker)).unwrap();

    let outcome = trainer.initiate_model_training(&train, &test).unwrap();
    assert!(!outcome.evaluation.get("Logistic Regression").unwrap().is_failed());
    assert!(outcome.artifact.path.exists());
}

#[test]
fn test_unreachable_tracker_changes_nothing() {
    let (train, test) = linear_dataset(13);

    let quiet_dir = TempDir::new().unwrap();
    let quiet = ModelTrainer::with_tracker(
        artifact_config(&quiet_dir).with_families(light_families()),
        Box::new(NullTracker),
    )
    .unwrap()
    .initiate_model_training(&train, &test)
    .unwrap();

    let loud_dir = TempDir::new().unwrap();
    let mut tracking = TrackingConfig::default().with_backend(TrackerBackend::Mlflow {
        uri: "http://127.0.0.1:9".to_string(),
    });
    tracking.request_timeout_secs = 1;
    let loud = ModelTrainer::new(
        artifact_config(&loud_dir)
            .with_families(light_families())
            .with_tracking(tracking),
    )
    .unwrap()
    .initiate_model_training(&train, &test)
    .unwrap();

    assert_eq!(loud.winner, quiet.winner);
    assert_eq!(loud.test_accuracy, quiet.test_accuracy);
    assert_eq!(loud.best_params, quiet.best_params);
    assert_eq!(loud.tracking.tracker, "null");
    assert!(loud.artifact.path.exists());
}

#[test]
fn test_rerun_overwrites_with_equivalent_model() {
    let dir = TempDir::new().unwrap();
    let (train, test) = linear_dataset(17);
    let trainer = ModelTrainer::with_tracker(
        artifact_config(&dir).with_families(light_families()),
        Box::new(NullTracker),
    )
    .unwrap();

    let first = trainer.initiate_model_training(&train, &test).unwrap();
    let first_predictions = load_artifact(&first.artifact.path)
        .unwrap()
        .predict(&test.slice(s![.., ..5]).to_owned())
        .unwrap();

    let second = trainer.initiate_model_training(&train, &test).unwrap();
    let second_predictions = load_artifact(&second.artifact.path)
        .unwrap()
        .predict(&test.slice(s![.., ..5]).to_owned())
        .unwrap();

    assert_eq!(first.artifact.path, second.artifact.path);
    assert_eq!(first.winner, second.winner);
    assert_eq!(first.best_params, second.best_params);
    assert_eq!(first.evaluation.scores(), second.evaluation.scores());
    assert_eq!(first_predictions, second_predictions);

    let entries = std::fs::read_dir(dir.path().join("artifacts")).unwrap().count();
    assert_eq!(entries, 1);
}

#[test]
fn test_parallel_search_matches_sequential() {
    let (train, test) = linear_dataset(19);

    let run = |parallel: bool| {
        let dir = TempDir::new().unwrap();
        let config = artifact_config(&dir)
            .with_families(light_families())
            .with_parallel_families(parallel);
        ModelTrainer::with_tracker(config, Box::new(NullTracker))
            .unwrap()
            .initiate_model_training(&train, &test)
            .unwrap()
    };

    let sequential = run(false);
    let parallel = run(true);
    assert_eq!(parallel.evaluation.scores(), sequential.evaluation.scores());
    assert_eq!(parallel.winner, sequential.winner);
}
