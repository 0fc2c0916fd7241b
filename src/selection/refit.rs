//! Refit of the winning family

use std::time::Duration;

use ndarray::{Array1, Array2};
use tracing::info;

use super::family::{format_params, ModelFamily, ParamSet};
use super::grid_search::{CandidateScore, GridSearch};
use crate::error::Result;
use crate::evaluation::{evaluate_split, MetricReport};
use crate::training::Estimator;

/// The final estimator with its chosen assignment and metrics
#[derive(Debug, Clone)]
pub struct RefitResult {
    pub estimator: Estimator,
    pub best_params: ParamSet,
    /// Mean CV accuracy of `best_params` in the refit search
    pub cv_score: f64,
    pub cv_results: Vec<CandidateScore>,
    pub metrics: MetricReport,
}

/// Re-runs the grid search for the winner only and evaluates the result
#[derive(Debug, Clone)]
pub struct WinnerRefitter {
    cv_folds: usize,
    random_state: u64,
    time_budget: Option<Duration>,
}

impl Default for WinnerRefitter {
    fn default() -> Self {
        Self {
            cv_folds: 3,
            random_state: 42,
            time_budget: None,
        }
    }
}

impl WinnerRefitter {
    pub fn new(cv_folds: usize, random_state: u64) -> Self {
        Self {
            cv_folds,
            random_state,
            time_budget: None,
        }
    }

    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    /// Search `family` again on the training matrix and report train/test metrics
    pub fn refit(
        &self,
        family: &ModelFamily,
        train: (&Array2<f64>, &Array1<f64>),
        test: (&Array2<f64>, &Array1<f64>),
    ) -> Result<RefitResult> {
        let search = GridSearch::new(family)
            .with_cv_folds(self.cv_folds)
            .with_random_state(self.random_state)
            .with_time_budget(self.time_budget)
            .fit(train.0, train.1)?;

        let metrics = evaluate_split(&search.best_estimator, train, test)?;
        info!(
            family = %family.name,
            params = %format_params(&search.best_params),
            train_accuracy = metrics.train_accuracy,
            test_accuracy = metrics.test_accuracy,
            f1 = metrics.f1_score,
            "Winner refit"
        );

        Ok(RefitResult {
            estimator: search.best_estimator,
            best_params: search.best_params,
            cv_score: search.best_score,
            cv_results: search.cv_results,
            metrics,
        })
    }
}
