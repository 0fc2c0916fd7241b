//! Serialisable wrapper over the concrete classifiers

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use super::gradient_boosting::GradientBoostingClassifier;
use super::knn::KNNClassifier;
use super::linear_models::LogisticRegression;
use super::models::Classifier;
use super::random_forest::RandomForest;
use super::svm::SVMClassifier;
use crate::error::Result;

/// A fitted or unfitted classifier from one of the supported families
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Estimator {
    RandomForest(RandomForest),
    Svm(SVMClassifier),
    GradientBoosting(GradientBoostingClassifier),
    LogisticRegression(LogisticRegression),
    Knn(KNNClassifier),
}

impl Estimator {
    /// Short name of the underlying algorithm
    pub fn kind_name(&self) -> &'static str {
        match self {
            Estimator::RandomForest(_) => "random_forest",
            Estimator::Svm(_) => "svm",
            Estimator::GradientBoosting(_) => "gradient_boosting",
            Estimator::LogisticRegression(_) => "logistic_regression",
            Estimator::Knn(_) => "knn",
        }
    }

    fn inner(&self) -> &dyn Classifier {
        match self {
            Estimator::RandomForest(m) => m,
            Estimator::Svm(m) => m,
            Estimator::GradientBoosting(m) => m,
            Estimator::LogisticRegression(m) => m,
            Estimator::Knn(m) => m,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Classifier {
        match self {
            Estimator::RandomForest(m) => m,
            Estimator::Svm(m) => m,
            Estimator::GradientBoosting(m) => m,
            Estimator::LogisticRegression(m) => m,
            Estimator::Knn(m) => m,
        }
    }
}

impl Classifier for Estimator {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.inner_mut().fit(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        self.inner().predict(x)
    }
}
