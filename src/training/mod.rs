//! Model training module
//!
//! Native implementations of the candidate classifier families:
//! - Decision trees (CART) and Random Forests
//! - Gradient boosting
//! - Logistic regression
//! - Support Vector Machines
//! - K-Nearest Neighbors
//!
//! plus the stratified cross-validation splitter used by the grid search.

mod estimator;
mod models;
pub mod cross_validation;
pub mod decision_tree;
pub mod gradient_boosting;
pub mod knn;
pub mod linear_models;
pub mod random_forest;
pub mod svm;

pub use cross_validation::{CVResults, CVSplit, CrossValidator};
pub use decision_tree::{Criterion, DecisionTree, TreeNode};
pub use estimator::Estimator;
pub use gradient_boosting::{GradientBoostingClassifier, GradientBoostingConfig};
pub use knn::{DistanceMetric, KNNClassifier, KNNConfig, WeightScheme};
pub use linear_models::{LogisticRegression, Solver};
pub use models::{accuracy, unique_classes, Classifier};
pub use random_forest::{MaxFeatures, RandomForest};
pub use svm::{Gamma, KernelType, SVMClassifier, SVMConfig};
