//! Classification metrics
//!
//! Accuracy plus support-weighted precision, recall and F1, computed over the
//! sorted union of true and predicted labels. Any zero denominator yields 0.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TrainerError};
use crate::training::Classifier;

/// Per-class precision/recall/F1
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub label: i64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

/// Confusion matrix, rows = true label, columns = predicted label
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<i64>,
    pub counts: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Count of samples with true label `actual` predicted as `predicted`
    pub fn get(&self, actual: i64, predicted: i64) -> usize {
        let row = self.labels.iter().position(|&l| l == actual);
        let col = self.labels.iter().position(|&l| l == predicted);
        match (row, col) {
            (Some(r), Some(c)) => self.counts[r][c],
            _ => 0,
        }
    }
}

/// Metrics over one labelled matrix
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationReport {
    pub accuracy: f64,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub per_class: Vec<ClassMetrics>,
    pub confusion: ConfusionMatrix,
    pub n_samples: usize,
}

impl ClassificationReport {
    /// Compute the report from true and predicted labels
    pub fn from_predictions(y_true: &Array1<f64>, y_pred: &Array1<f64>) -> Result<Self> {
        if y_true.len() != y_pred.len() {
            return Err(TrainerError::ShapeError {
                expected: format!("{} predictions", y_true.len()),
                actual: format!("{} predictions", y_pred.len()),
            });
        }

        let truth: Vec<i64> = y_true.iter().map(|v| v.round() as i64).collect();
        let preds: Vec<i64> = y_pred.iter().map(|v| v.round() as i64).collect();

        let mut labels: Vec<i64> = truth.iter().chain(preds.iter()).copied().collect();
        labels.sort_unstable();
        labels.dedup();
        let index: BTreeMap<i64, usize> = labels.iter().enumerate().map(|(i, &l)| (l, i)).collect();

        let k = labels.len();
        let mut counts = vec![vec![0usize; k]; k];
        for (t, p) in truth.iter().zip(preds.iter()) {
            counts[index[t]][index[p]] += 1;
        }

        let n = truth.len();
        let correct: usize = (0..k).map(|i| counts[i][i]).sum();
        let accuracy = ratio(correct as f64, n as f64);

        let per_class: Vec<ClassMetrics> = labels
            .iter()
            .enumerate()
            .map(|(i, &label)| {
                let tp = counts[i][i] as f64;
                let support: usize = counts[i].iter().sum();
                let predicted: usize = counts.iter().map(|row| row[i]).sum();
                let precision = ratio(tp, predicted as f64);
                let recall = ratio(tp, support as f64);
                let f1 = ratio(2.0 * precision * recall, precision + recall);
                ClassMetrics {
                    label,
                    precision,
                    recall,
                    f1,
                    support,
                }
            })
            .collect();

        let weighted = |metric: fn(&ClassMetrics) -> f64| -> f64 {
            let total: usize = per_class.iter().map(|c| c.support).sum();
            let sum: f64 = per_class.iter().map(|c| metric(c) * c.support as f64).sum();
            ratio(sum, total as f64)
        };

        Ok(Self {
            accuracy,
            precision: weighted(|c| c.precision),
            recall: weighted(|c| c.recall),
            f1: weighted(|c| c.f1),
            per_class,
            confusion: ConfusionMatrix { labels, counts },
            n_samples: n,
        })
    }
}

fn ratio(num: f64, den: f64) -> f64 {
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

/// Final metrics of the refit winner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricReport {
    pub train_accuracy: f64,
    pub test_accuracy: f64,
    /// Weighted precision on the test matrix
    pub precision: f64,
    /// Weighted recall on the test matrix
    pub recall: f64,
    /// Weighted F1 on the test matrix
    pub f1_score: f64,
    pub train: ClassificationReport,
    pub test: ClassificationReport,
}

impl MetricReport {
    pub fn new(train: ClassificationReport, test: ClassificationReport) -> Self {
        Self {
            train_accuracy: train.accuracy,
            test_accuracy: test.accuracy,
            precision: test.precision,
            recall: test.recall,
            f1_score: test.f1,
            train,
            test,
        }
    }

    /// Flat `name -> value` view used for tracker logging
    pub fn as_map(&self) -> BTreeMap<String, f64> {
        [
            ("train_accuracy", self.train_accuracy),
            ("test_accuracy", self.test_accuracy),
            ("precision", self.precision),
            ("recall", self.recall),
            ("f1_score", self.f1_score),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }
}

/// Evaluate a fitted classifier on one labelled matrix
pub fn evaluate<C: Classifier + ?Sized>(
    model: &C,
    x: &Array2<f64>,
    y: &Array1<f64>,
) -> Result<ClassificationReport> {
    let y_pred = model.predict(x)?;
    ClassificationReport::from_predictions(y, &y_pred)
}

/// Evaluate on both train and test matrices
pub fn evaluate_split<C: Classifier + ?Sized>(
    model: &C,
    train: (&Array2<f64>, &Array1<f64>),
    test: (&Array2<f64>, &Array1<f64>),
) -> Result<MetricReport> {
    let train_report = evaluate(model, train.0, train.1)?;
    let test_report = evaluate(model, test.0, test.1)?;
    Ok(MetricReport::new(train_report, test_report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    struct Constant(f64);

    impl Classifier for Constant {
        fn fit(&mut self, _x: &Array2<f64>, _y: &Array1<f64>) -> Result<()> {
            Ok(())
        }

        fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
            Ok(Array1::from_elem(x.nrows(), self.0))
        }
    }

    #[test]
    fn test_constant_majority_predictor() {
        let x = Array2::<f64>::zeros((100, 2));
        let y: Array1<f64> = (0..100).map(|i| if i < 80 { 0.0 } else { 1.0 }).collect();

        let report = evaluate(&Constant(0.0), &x, &y).unwrap();
        assert!((report.accuracy - 0.8).abs() < 1e-12);
        assert!((report.precision - 0.64).abs() < 1e-12);
        assert!((report.recall - 0.8).abs() < 1e-12);
        assert!((report.f1 - 0.8 * (2.0 * 0.8 / 1.8)).abs() < 1e-12);
        assert_eq!(report.confusion.get(1, 0), 20);
        assert_eq!(report.confusion.get(0, 0), 80);
    }

    #[test]
    fn test_perfect_predictions() {
        let y = array![0.0, 1.0, 1.0, 0.0];
        let report = ClassificationReport::from_predictions(&y, &y).unwrap();
        assert_eq!(report.accuracy, 1.0);
        assert_eq!(report.precision, 1.0);
        assert_eq!(report.recall, 1.0);
        assert_eq!(report.f1, 1.0);
    }

    #[test]
    fn test_predicted_only_label_counts_with_zero_support() {
        let y_true = array![0.0, 0.0, 0.0, 0.0];
        let y_pred = array![0.0, 0.0, 1.0, 1.0];
        let report = ClassificationReport::from_predictions(&y_true, &y_pred).unwrap();

        assert_eq!(report.per_class.len(), 2);
        assert_eq!(report.per_class[1].support, 0);
        assert_eq!(report.precision, 1.0);
        assert_eq!(report.recall, 0.5);
    }

    #[test]
    fn test_metric_report_uses_test_split() {
        let y_train = array![0.0, 1.0];
        let y_test = array![0.0, 0.0, 1.0, 1.0];
        let pred_test = array![0.0, 1.0, 1.0, 1.0];

        let train = ClassificationReport::from_predictions(&y_train, &y_train).unwrap();
        let test = ClassificationReport::from_predictions(&y_test, &pred_test).unwrap();
        let metrics = MetricReport::new(train, test);

        assert_eq!(metrics.train_accuracy, 1.0);
        assert_eq!(metrics.test_accuracy, 0.75);
        assert_eq!(metrics.as_map().len(), 5);
    }

    #[test]
    fn test_length_mismatch() {
        let err = ClassificationReport::from_predictions(&array![0.0, 1.0], &array![0.0]);
        assert!(matches!(err, Err(TrainerError::ShapeError { .. })));
    }
}
