//! Exhaustive grid search with stratified k-fold cross-validation

use std::time::{Duration, Instant};

use ndarray::{Array1, Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::family::{format_params, ModelFamily, ParamSet};
use crate::error::{Result, TrainerError};
use crate::training::{CVResults, Classifier, CrossValidator, Estimator};

/// Cross-validated score of one candidate assignment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateScore {
    pub params: ParamSet,
    pub cv: CVResults,
}

/// Outcome of a grid search over one family
#[derive(Debug, Clone)]
pub struct GridSearchResult {
    /// Assignment with the highest mean CV accuracy
    pub best_params: ParamSet,
    /// Mean CV accuracy of `best_params`
    pub best_score: f64,
    /// `best_params` refit on the full training matrix
    pub best_estimator: Estimator,
    /// Every candidate in enumeration order
    pub cv_results: Vec<CandidateScore>,
}

/// Grid search over a single model family
#[derive(Debug, Clone)]
pub struct GridSearch<'a> {
    family: &'a ModelFamily,
    cv_folds: usize,
    random_state: u64,
    time_budget: Option<Duration>,
}

impl<'a> GridSearch<'a> {
    pub fn new(family: &'a ModelFamily) -> Self {
        Self {
            family,
            cv_folds: 3,
            random_state: 42,
            time_budget: None,
        }
    }

    /// Set the number of CV folds
    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    /// Seed passed to every candidate estimator
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Abort the search once this much wall time has passed
    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    /// Score every candidate, then refit the best one on all of `x`
    pub fn fit(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<GridSearchResult> {
        let candidates = self.family.grid.candidates()?;
        if candidates.is_empty() {
            return Err(TrainerError::InvalidParameter {
                name: "grid".to_string(),
                value: "{}".to_string(),
                reason: "family has no candidate assignments".to_string(),
            });
        }

        if y.len() != x.nrows() {
            return Err(TrainerError::ShapeError {
                expected: format!("{} labels", x.nrows()),
                actual: format!("{} labels", y.len()),
            });
        }
        let splits = CrossValidator::new(self.cv_folds).split(y)?;

        let started = Instant::now();
        let mut cv_results = Vec::with_capacity(candidates.len());
        let mut best: Option<(usize, f64)> = None;

        for (idx, params) in candidates.iter().enumerate() {
            if let Some(budget) = self.time_budget {
                if started.elapsed() > budget {
                    return Err(TrainerError::SearchTimeout {
                        family: self.family.name.clone(),
                        budget_secs: budget.as_secs_f64(),
                    });
                }
            }

            let fold_scores = splits
                .par_iter()
                .map(|split| {
                    let x_train = x.select(Axis(0), &split.train_indices);
                    let y_train = y.select(Axis(0), &split.train_indices);
                    let x_test = x.select(Axis(0), &split.test_indices);
                    let y_test = y.select(Axis(0), &split.test_indices);

                    let mut estimator = self.family.kind.build(params, self.random_state)?;
                    estimator.fit(&x_train, &y_train)?;
                    estimator.score(&x_test, &y_test)
                })
                .collect::<Result<Vec<f64>>>()?;

            let cv = CVResults::from_scores(fold_scores);
            debug!(
                family = %self.family.name,
                params = %format_params(params),
                mean = cv.mean_score,
                std = cv.std_score,
                "Candidate scored"
            );

            // Strictly greater keeps the first candidate on ties
            if best.map_or(true, |(_, score)| cv.mean_score > score) {
                best = Some((idx, cv.mean_score));
            }
            cv_results.push(CandidateScore {
                params: params.clone(),
                cv,
            });
        }

        let (best_idx, best_score) = best.ok_or_else(|| {
            TrainerError::TrainingError(format!("no candidate scored for {}", self.family.name))
        })?;
        let best_params = candidates[best_idx].clone();

        let mut best_estimator = self.family.kind.build(&best_params, self.random_state)?;
        best_estimator.fit(x, y)?;

        Ok(GridSearchResult {
            best_params,
            best_score,
            best_estimator,
            cv_results,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selection::family::{FamilyKind, ParamGrid, ParamValue};
    use ndarray::array;

    fn toy() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.3],
            [0.3, 0.2],
            [0.4, 0.1],
            [0.2, 0.4],
            [3.0, 3.1],
            [3.2, 2.9],
            [2.9, 3.3],
            [3.1, 3.0],
            [3.4, 3.2],
            [3.3, 2.8],
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_grid_search_scores_every_candidate() {
        let (x, y) = toy();
        let family = ModelFamily::new(
            "KNN",
            FamilyKind::Knn,
            ParamGrid::new()
                .with("n_neighbors", vec![1_i64, 3])
                .with("weights", vec!["uniform", "distance"]),
        );

        let result = GridSearch::new(&family).fit(&x, &y).unwrap();
        assert_eq!(result.cv_results.len(), 4);
        assert_eq!(result.best_score, 1.0);
        // All candidates tie, the first one wins
        assert_eq!(result.best_params.get("n_neighbors"), Some(&ParamValue::Int(1)));
        assert_eq!(result.best_estimator.predict(&x).unwrap(), y);
    }

    #[test]
    fn test_invalid_grid_fails() {
        let (x, y) = toy();
        let family = ModelFamily::new(
            "SVM",
            FamilyKind::Svm,
            ParamGrid::new().with("kernel", vec!["not-a-kernel"]),
        );

        assert!(matches!(
            GridSearch::new(&family).fit(&x, &y),
            Err(TrainerError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_exhausted_time_budget() {
        let (x, y) = toy();
        let family = ModelFamily::new(
            "KNN",
            FamilyKind::Knn,
            ParamGrid::new().with("n_neighbors", vec![1_i64, 3, 5]),
        );

        let err = GridSearch::new(&family)
            .with_time_budget(Some(Duration::ZERO))
            .fit(&x, &y);
        // A zero budget may still admit the first candidate
        assert!(matches!(err, Err(TrainerError::SearchTimeout { .. })));
    }
}
