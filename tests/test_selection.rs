//! Integration test: candidate search, selection and metrics

use maintenance_trainer::error::TrainerError;
use maintenance_trainer::evaluation::{evaluate, ClassificationReport};
use maintenance_trainer::selection::{
    default_families, CandidateSearch, EvaluationReport, FamilyEvaluation, FamilyKind,
    FamilyOutcome, GridSearch, ModelFamily, ModelSelector, ParamGrid, ParamSet, ParamValue,
};
use maintenance_trainer::training::{Classifier, CrossValidator};
use maintenance_trainer::Result;
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn blobs(n_per_class: usize, seed: u64) -> (Array2<f64>, Array1<f64>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut x = Array2::<f64>::zeros((2 * n_per_class, 3));
    let mut y = Array1::<f64>::zeros(2 * n_per_class);
    for i in 0..2 * n_per_class {
        let class = (i % 2) as f64;
        for j in 0..3 {
            x[[i, j]] = class * 3.0 + rng.gen_range(-1.0..1.0);
        }
        y[i] = class;
    }
    (x, y)
}

fn scored(family: &str, score: f64) -> FamilyEvaluation {
    FamilyEvaluation {
        family: family.to_string(),
        outcome: FamilyOutcome::Scored {
            score,
            best_params: ParamSet::new(),
        },
        elapsed_secs: 0.0,
    }
}

fn failed(family: &str) -> FamilyEvaluation {
    FamilyEvaluation {
        family: family.to_string(),
        outcome: FamilyOutcome::Failed {
            reason: "boom".to_string(),
        },
        elapsed_secs: 0.0,
    }
}

#[test]
fn test_selection_ties_go_to_first_declared() {
    let report = EvaluationReport::new(vec![
        scored("Random Forest", 0.93),
        failed("SVM"),
        scored("Gradient Boosting", 0.97),
        scored("Logistic Regression", 0.97),
        scored("KNN", 0.91),
    ]);
    let selector = ModelSelector::default();

    let first = selector.select(&report).unwrap();
    let second = selector.select(&report).unwrap();
    assert_eq!(first.family, "Gradient Boosting");
    assert_eq!(first.score, 0.97);
    assert_eq!(first.floor, 0.1);
    assert_eq!(first, second);
}

#[test]
fn test_selection_floor_is_configurable() {
    let report = EvaluationReport::new(vec![scored("KNN", 0.62), failed("SVM")]);

    assert!(ModelSelector::new(0.6).select(&report).is_ok());
    match ModelSelector::new(0.7).select(&report) {
        Err(TrainerError::NoViableModel { best, floor, report: carried }) => {
            assert_eq!(best, Some(("KNN".to_string(), 0.62)));
            assert_eq!(floor, 0.7);
            assert_eq!(carried, report);
        }
        other => panic!("expected NoViableModel, got {:?}", other),
    }
}

#[test]
fn test_score_exactly_at_floor_is_accepted() {
    let report = EvaluationReport::new(vec![scored("KNN", 0.1)]);
    assert_eq!(ModelSelector::default().select(&report).unwrap().family, "KNN");
}

#[test]
fn test_search_reports_every_family_in_order() {
    let (x, y) = blobs(15, 1);
    let mut families = default_families();
    families.insert(
        2,
        ModelFamily::new(
            "Broken Forest",
            FamilyKind::RandomForest,
            ParamGrid::new().with("n_estimators", vec![0_i64]),
        ),
    );

    let report = CandidateSearch::new(&families).evaluate(&x, &y);
    let names: Vec<_> = report.iter().map(|e| e.family.as_str()).collect();
    assert_eq!(
        names,
        ["Random Forest", "SVM", "Broken Forest", "Gradient Boosting", "Logistic Regression", "KNN"]
    );
    assert_eq!(report.score("Broken Forest"), Some(f64::NEG_INFINITY));
    for entry in report.iter().filter(|e| !e.is_failed()) {
        assert!(entry.score() > 0.9, "{} scored {}", entry.family, entry.score());
        assert!(entry.best_params().is_some());
    }
}

#[test]
fn test_grid_search_is_deterministic() {
    let (x, y) = blobs(12, 2);
    let family = ModelFamily::new(
        "Random Forest",
        FamilyKind::RandomForest,
        ParamGrid::new()
            .with("n_estimators", vec![5_i64, 10])
            .with_values("max_depth", vec![ParamValue::Int(2), ParamValue::None]),
    );

    let first = GridSearch::new(&family).fit(&x, &y).unwrap();
    let second = GridSearch::new(&family).fit(&x, &y).unwrap();

    assert_eq!(first.cv_results.len(), 4);
    assert_eq!(first.best_params, second.best_params);
    assert_eq!(first.best_score, second.best_score);
    assert_eq!(
        first.best_estimator.predict(&x).unwrap(),
        second.best_estimator.predict(&x).unwrap()
    );
}

#[test]
fn test_grid_search_prefers_first_candidate_on_ties() {
    let (x, y) = blobs(9, 3);
    let family = ModelFamily::new(
        "KNN",
        FamilyKind::Knn,
        ParamGrid::new().with("n_neighbors", vec![1_i64, 3]),
    );

    let result = GridSearch::new(&family).fit(&x, &y).unwrap();
    assert_eq!(result.best_score, 1.0);
    assert_eq!(result.best_params["n_neighbors"], ParamValue::Int(1));
}

#[test]
fn test_stratified_folds_keep_class_balance() {
    let (_, y) = blobs(9, 4);
    let splits = CrossValidator::default().split(&y).unwrap();

    assert_eq!(splits.len(), 3);
    for split in &splits {
        let positives = split.test_indices.iter().filter(|&&i| y[i] == 1.0).count();
        assert_eq!(split.test_indices.len(), 6);
        assert_eq!(positives, 3);
    }
}

struct Majority;

impl Classifier for Majority {
    fn fit(&mut self, _x: &Array2<f64>, _y: &Array1<f64>) -> Result<()> {
        Ok(())
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        Ok(Array1::zeros(x.nrows()))
    }
}

#[test]
fn test_constant_predictor_metrics() {
    let x = Array2::<f64>::zeros((100, 2));
    let y = Array1::from_iter((0..100).map(|i| if i < 80 { 0.0 } else { 1.0 }));

    let report: ClassificationReport = evaluate(&Majority, &x, &y).unwrap();
    assert!((report.accuracy - 0.8).abs() < 1e-12);
    assert!((report.recall - 0.8).abs() < 1e-12);
    assert!((report.precision - 0.64).abs() < 1e-12);
    assert!((report.f1 - 0.64 / 0.9).abs() < 1e-9);
    assert_eq!(report.confusion.get(1, 0), 20);
}
