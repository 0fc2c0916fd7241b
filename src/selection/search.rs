//! Candidate search across model families
//!
//! Every family is grid-searched independently. A family whose search fails
//! is recorded as [`FamilyOutcome::Failed`] and scores negative infinity; the
//! remaining families are still evaluated.

use std::time::{Duration, Instant};

use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::family::{format_params, ModelFamily, ParamSet};
use super::grid_search::GridSearch;

/// Result of searching one family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FamilyOutcome {
    Scored { score: f64, best_params: ParamSet },
    Failed { reason: String },
}

/// One entry of the evaluation report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FamilyEvaluation {
    pub family: String,
    pub outcome: FamilyOutcome,
    pub elapsed_secs: f64,
}

impl FamilyEvaluation {
    /// Held-out score, negative infinity for a failed search
    pub fn score(&self) -> f64 {
        match &self.outcome {
            FamilyOutcome::Scored { score, .. } => *score,
            FamilyOutcome::Failed { .. } => f64::NEG_INFINITY,
        }
    }

    pub fn best_params(&self) -> Option<&ParamSet> {
        match &self.outcome {
            FamilyOutcome::Scored { best_params, .. } => Some(best_params),
            FamilyOutcome::Failed { .. } => None,
        }
    }

    pub fn failure(&self) -> Option<&str> {
        match &self.outcome {
            FamilyOutcome::Failed { reason } => Some(reason),
            FamilyOutcome::Scored { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure().is_some()
    }
}

/// Per-family evaluations in family declaration order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    entries: Vec<FamilyEvaluation>,
}

impl EvaluationReport {
    pub fn new(entries: Vec<FamilyEvaluation>) -> Self {
        Self { entries }
    }

    pub fn iter(&self) -> impl Iterator<Item = &FamilyEvaluation> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, family: &str) -> Option<&FamilyEvaluation> {
        self.entries.iter().find(|e| e.family == family)
    }

    /// Score of a family, negative infinity if it failed
    pub fn score(&self, family: &str) -> Option<f64> {
        self.get(family).map(FamilyEvaluation::score)
    }

    /// `(family, score)` pairs in declaration order
    pub fn scores(&self) -> Vec<(&str, f64)> {
        self.entries.iter().map(|e| (e.family.as_str(), e.score())).collect()
    }

    pub fn failures(&self) -> impl Iterator<Item = &FamilyEvaluation> {
        self.entries.iter().filter(|e| e.is_failed())
    }
}

/// Runs a grid search for every configured family
#[derive(Debug, Clone)]
pub struct CandidateSearch<'a> {
    families: &'a [ModelFamily],
    cv_folds: usize,
    random_state: u64,
    parallel: bool,
    time_budget: Option<Duration>,
}

impl<'a> CandidateSearch<'a> {
    pub fn new(families: &'a [ModelFamily]) -> Self {
        Self {
            families,
            cv_folds: 3,
            random_state: 42,
            parallel: false,
            time_budget: None,
        }
    }

    pub fn with_cv_folds(mut self, folds: usize) -> Self {
        self.cv_folds = folds;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Search families on the rayon pool; the report keeps declaration order
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_time_budget(mut self, budget: Option<Duration>) -> Self {
        self.time_budget = budget;
        self
    }

    /// Evaluate every family on the training matrix
    pub fn evaluate(&self, x: &Array2<f64>, y: &Array1<f64>) -> EvaluationReport {
        let entries = if self.parallel {
            self.families
                .par_iter()
                .map(|family| self.evaluate_family(family, x, y))
                .collect()
        } else {
            self.families
                .iter()
                .map(|family| self.evaluate_family(family, x, y))
                .collect()
        };
        EvaluationReport::new(entries)
    }

    fn evaluate_family(&self, family: &ModelFamily, x: &Array2<f64>, y: &Array1<f64>) -> FamilyEvaluation {
        let started = Instant::now();
        let result = GridSearch::new(family)
            .with_cv_folds(self.cv_folds)
            .with_random_state(self.random_state)
            .with_time_budget(self.time_budget)
            .fit(x, y);
        let elapsed_secs = started.elapsed().as_secs_f64();

        let outcome = match result {
            Ok(search) => {
                info!(
                    family = %family.name,
                    score = search.best_score,
                    params = %format_params(&search.best_params),
                    "Family evaluated"
                );
                FamilyOutcome::Scored {
                    score: search.best_score,
                    best_params: search.best_params,
                }
            }
            Err(err) => {
                warn!(family = %family.name, error = %err, "Family search failed");
                FamilyOutcome::Failed {
                    reason: err.to_string(),
                }
            }
        };

        FamilyEvaluation {
            family: family.name.clone(),
            outcome,
            elapsed_secs,
        }
    }
}
