//! Winner selection over an evaluation report

use serde::{Deserialize, Serialize};
use tracing::info;

use super::search::EvaluationReport;
use crate::error::{Result, TrainerError};

/// Default minimum held-out accuracy a winner must reach
pub const DEFAULT_MIN_SCORE: f64 = 0.1;

/// The chosen family
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub family: String,
    pub score: f64,
    pub floor: f64,
}

/// Picks the highest-scoring family, first in declaration order on ties
#[derive(Debug, Clone, Copy)]
pub struct ModelSelector {
    min_score: f64,
}

impl Default for ModelSelector {
    fn default() -> Self {
        Self::new(DEFAULT_MIN_SCORE)
    }
}

impl ModelSelector {
    pub fn new(min_score: f64) -> Self {
        Self { min_score }
    }

    pub fn min_score(&self) -> f64 {
        self.min_score
    }

    /// Choose the winner, or fail with `NoViableModel` below the floor
    pub fn select(&self, report: &EvaluationReport) -> Result<Selection> {
        let mut best: Option<(&str, f64)> = None;
        for entry in report.iter() {
            let score = entry.score();
            if score.is_nan() {
                continue;
            }
            match best {
                Some((_, best_score)) if score <= best_score => {}
                _ => best = Some((entry.family.as_str(), score)),
            }
        }

        match best {
            Some((family, score)) if score >= self.min_score => {
                info!(family = %family, score, floor = self.min_score, "Selected winning family");
                Ok(Selection {
                    family: family.to_string(),
                    score,
                    floor: self.min_score,
                })
            }
            other => Err(TrainerError::NoViableModel {
                best: other
                    .filter(|(_, score)| score.is_finite())
                    .map(|(family, score)| (family.to_string(), score)),
                floor: self.min_score,
                report: report.clone(),
            }),
        }
    }
}
