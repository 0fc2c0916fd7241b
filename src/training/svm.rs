//! Support Vector Machine classifier
//!
//! Binary soft-margin SVC trained with simplified SMO (Sequential Minimal Optimization).

use crate::error::{Result, TrainerError};
use super::models::{check_features, check_shapes, unique_classes, Classifier};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Maximum number of samples for eager kernel matrix computation.
/// Beyond this, training will return an error to prevent OOM.
const MAX_KERNEL_MATRIX_SAMPLES: usize = 10_000;

/// RBF bandwidth
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Gamma {
    /// `1 / (n_features * Var(X))`, resolved at fit time
    Scale,
    /// Fixed value
    Value(f64),
}

/// Kernel function type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum KernelType {
    /// Linear kernel: K(x, y) = x · y
    Linear,
    /// Radial Basis Function (Gaussian): K(x, y) = exp(-γ * ||x - y||²)
    RBF { gamma: Gamma },
}

impl Default for KernelType {
    fn default() -> Self {
        KernelType::RBF { gamma: Gamma::Scale }
    }
}

impl KernelType {
    /// Parse a kernel name as it appears in a parameter grid
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "linear" => Ok(KernelType::Linear),
            "rbf" => Ok(KernelType::RBF { gamma: Gamma::Scale }),
            other => Err(TrainerError::InvalidParameter {
                name: "kernel".to_string(),
                value: other.to_string(),
                reason: "expected one of linear, rbf".to_string(),
            }),
        }
    }
}

/// SVM configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMConfig {
    /// Regularization parameter (C)
    pub c: f64,
    /// Kernel function
    pub kernel: KernelType,
    /// Tolerance for stopping criterion
    pub tol: f64,
    /// Maximum number of passes over the data
    pub max_iter: usize,
    /// Random seed
    pub random_state: Option<u64>,
}

impl Default for SVMConfig {
    fn default() -> Self {
        Self {
            c: 1.0,
            kernel: KernelType::default(),
            tol: 1e-3,
            max_iter: 1000,
            random_state: Some(42),
        }
    }
}

/// Support Vector Classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SVMClassifier {
    config: SVMConfig,
    /// Support vectors
    support_vectors: Option<Array2<f64>>,
    /// Alpha coefficients (Lagrange multipliers) of the support vectors
    alphas: Option<Array1<f64>>,
    /// Support vector labels in {-1, +1}
    support_labels: Option<Array1<f64>>,
    /// Bias term
    bias: f64,
    /// Gamma used at fit time
    fitted_gamma: f64,
    /// Unique class labels, `classes[1]` maps to +1
    classes: Vec<i64>,
}

impl SVMClassifier {
    /// Create a new SVM classifier
    pub fn new(config: SVMConfig) -> Self {
        Self {
            config,
            support_vectors: None,
            alphas: None,
            support_labels: None,
            bias: 0.0,
            fitted_gamma: 0.0,
            classes: Vec::new(),
        }
    }

    /// Access the configuration
    pub fn config(&self) -> &SVMConfig {
        &self.config
    }

    /// Number of support vectors
    pub fn n_support(&self) -> usize {
        self.alphas.as_ref().map(|a| a.len()).unwrap_or(0)
    }

    fn fit_binary(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_shapes(x, y)?;
        if !(self.config.c > 0.0) || !self.config.c.is_finite() {
            return Err(TrainerError::InvalidParameter {
                name: "C".to_string(),
                value: self.config.c.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        // Validate that all labels are integral values (no silent truncation)
        for (i, &v) in y.iter().enumerate() {
            if (v - v.round()).abs() > 1e-9 {
                return Err(TrainerError::InvalidInput(format!(
                    "SVM classifier requires integer class labels, but sample {} has label {}",
                    i, v
                )));
            }
        }

        let classes = unique_classes(y);
        if classes.len() != 2 {
            return Err(TrainerError::InvalidInput(format!(
                "SVM requires exactly 2 distinct classes, found {}",
                classes.len()
            )));
        }
        self.classes = classes;
        self.fitted_gamma = self.resolve_gamma(x);

        let positive = self.classes[1];
        let y_binary: Array1<f64> = y.mapv(|v| if v.round() as i64 == positive { 1.0 } else { -1.0 });

        let (alphas, bias, support_indices) = self.smo_train(x, &y_binary)?;

        let sv_count = support_indices.len();
        let mut support_vectors = Array2::zeros((sv_count, x.ncols()));
        let mut support_labels = Array1::zeros(sv_count);
        let mut support_alphas = Array1::zeros(sv_count);

        for (i, &idx) in support_indices.iter().enumerate() {
            support_vectors.row_mut(i).assign(&x.row(idx));
            support_labels[i] = y_binary[idx];
            support_alphas[i] = alphas[idx];
        }

        self.support_vectors = Some(support_vectors);
        self.support_labels = Some(support_labels);
        self.alphas = Some(support_alphas);
        self.bias = bias;
        Ok(())
    }

    fn resolve_gamma(&self, x: &Array2<f64>) -> f64 {
        match self.config.kernel {
            KernelType::Linear => 0.0,
            KernelType::RBF { gamma: Gamma::Value(g) } => g,
            KernelType::RBF { gamma: Gamma::Scale } => {
                let var = x.var(0.0);
                if var > 0.0 {
                    1.0 / (x.ncols() as f64 * var)
                } else {
                    1.0
                }
            }
        }
    }

    /// SMO training algorithm
    fn smo_train(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(Array1<f64>, f64, Vec<usize>)> {
        let n = x.nrows();

        if n > MAX_KERNEL_MATRIX_SAMPLES {
            return Err(TrainerError::InvalidInput(format!(
                "Dataset has {} samples, exceeding the maximum {} for SVM kernel matrix. \
                 Consider subsampling or using a different algorithm.",
                n, MAX_KERNEL_MATRIX_SAMPLES
            )));
        }

        let c = self.config.c;
        let tol = self.config.tol;
        let mut alphas = Array1::<f64>::zeros(n);
        let mut bias = 0.0;

        let kernel_matrix = self.compute_kernel_matrix(x);

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        let mut passes = 0;
        let max_passes = 5;
        let mut total_iter = 0;

        while n > 1 && passes < max_passes && total_iter < self.config.max_iter {
            let mut num_changed = 0;

            for i in 0..n {
                let e_i = decision_cached(&kernel_matrix, &alphas, y, bias, i) - y[i];

                // KKT violation
                if (y[i] * e_i < -tol && alphas[i] < c) || (y[i] * e_i > tol && alphas[i] > 0.0) {
                    let j = loop {
                        let j = rng.gen_range(0..n);
                        if j != i {
                            break j;
                        }
                    };

                    let e_j = decision_cached(&kernel_matrix, &alphas, y, bias, j) - y[j];

                    let alpha_i_old = alphas[i];
                    let alpha_j_old = alphas[j];

                    let (l, h) = if y[i] != y[j] {
                        ((alphas[j] - alphas[i]).max(0.0), (c + alphas[j] - alphas[i]).min(c))
                    } else {
                        ((alphas[i] + alphas[j] - c).max(0.0), (alphas[i] + alphas[j]).min(c))
                    };

                    if (l - h).abs() < 1e-10 {
                        continue;
                    }

                    let eta = 2.0 * kernel_matrix[[i, j]] - kernel_matrix[[i, i]] - kernel_matrix[[j, j]];
                    if eta >= 0.0 {
                        continue;
                    }

                    alphas[j] = (alphas[j] - y[j] * (e_i - e_j) / eta).clamp(l, h);

                    if (alphas[j] - alpha_j_old).abs() < 1e-5 {
                        continue;
                    }

                    alphas[i] += y[i] * y[j] * (alpha_j_old - alphas[j]);

                    let b1 = bias
                        - e_i
                        - y[i] * (alphas[i] - alpha_i_old) * kernel_matrix[[i, i]]
                        - y[j] * (alphas[j] - alpha_j_old) * kernel_matrix[[i, j]];

                    let b2 = bias
                        - e_j
                        - y[i] * (alphas[i] - alpha_i_old) * kernel_matrix[[i, j]]
                        - y[j] * (alphas[j] - alpha_j_old) * kernel_matrix[[j, j]];

                    bias = if alphas[i] > 0.0 && alphas[i] < c {
                        b1
                    } else if alphas[j] > 0.0 && alphas[j] < c {
                        b2
                    } else {
                        (b1 + b2) / 2.0
                    };

                    num_changed += 1;
                }
            }

            total_iter += 1;
            if num_changed == 0 {
                passes += 1;
            } else {
                passes = 0;
            }
        }

        let support_indices: Vec<usize> = alphas
            .iter()
            .enumerate()
            .filter(|(_, &a)| a > 1e-8)
            .map(|(i, _)| i)
            .collect();

        Ok((alphas, bias, support_indices))
    }

    /// Compute kernel matrix, rows in parallel
    fn compute_kernel_matrix(&self, x: &Array2<f64>) -> Array2<f64> {
        let n = x.nrows();

        let rows: Vec<Vec<f64>> = (0..n)
            .into_par_iter()
            .map(|i| (i..n).map(|j| self.kernel(x.row(i), x.row(j))).collect())
            .collect();

        let mut k = Array2::zeros((n, n));
        for (i, row_vals) in rows.into_iter().enumerate() {
            for (offset, val) in row_vals.into_iter().enumerate() {
                let j = i + offset;
                k[[i, j]] = val;
                k[[j, i]] = val;
            }
        }
        k
    }

    fn kernel(&self, x1: ArrayView1<f64>, x2: ArrayView1<f64>) -> f64 {
        match self.config.kernel {
            KernelType::Linear => x1.dot(&x2),
            KernelType::RBF { .. } => {
                let norm_sq: f64 = x1.iter().zip(x2.iter()).map(|(a, b)| (a - b) * (a - b)).sum();
                (-self.fitted_gamma * norm_sq).exp()
            }
        }
    }

    /// Signed distance to the separating surface, positive for `classes[1]`
    pub fn decision_function(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (sv, alphas, labels) = match (&self.support_vectors, &self.alphas, &self.support_labels) {
            (Some(sv), Some(a), Some(l)) => (sv, a, l),
            _ => return Err(TrainerError::ModelNotFitted),
        };
        check_features(sv.ncols(), x)?;

        let scores: Vec<f64> = (0..x.nrows())
            .into_par_iter()
            .map(|r| {
                let row = x.row(r);
                let mut sum = self.bias;
                for k in 0..alphas.len() {
                    sum += alphas[k] * labels[k] * self.kernel(sv.row(k), row);
                }
                sum
            })
            .collect();

        Ok(Array1::from_vec(scores))
    }
}

fn decision_cached(k: &Array2<f64>, alphas: &Array1<f64>, y: &Array1<f64>, bias: f64, idx: usize) -> f64 {
    let mut sum = bias;
    for (j, &a) in alphas.iter().enumerate() {
        if a > 0.0 {
            sum += a * y[j] * k[[j, idx]];
        }
    }
    sum
}

impl Classifier for SVMClassifier {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_binary(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let scores = self.decision_function(x)?;
        let (negative, positive) = (self.classes[0] as f64, self.classes[1] as f64);
        Ok(scores.mapv(|s| if s >= 0.0 { positive } else { negative }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn blobs() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.0, 0.0],
            [0.3, 0.1],
            [0.1, 0.4],
            [0.5, 0.5],
            [3.0, 3.0],
            [3.2, 2.7],
            [2.8, 3.4],
            [3.5, 3.1],
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_linear_kernel() {
        let (x, y) = blobs();
        let mut svm = SVMClassifier::new(SVMConfig {
            kernel: KernelType::Linear,
            ..Default::default()
        });
        svm.fit(&x, &y).unwrap();

        assert_eq!(svm.score(&x, &y).unwrap(), 1.0);
        assert!(svm.n_support() > 0);
    }

    #[test]
    fn test_rbf_kernel_scale_gamma() {
        let (x, y) = blobs();
        let mut svm = SVMClassifier::new(SVMConfig {
            c: 10.0,
            ..Default::default()
        });
        svm.fit(&x, &y).unwrap();

        assert_eq!(svm.score(&x, &y).unwrap(), 1.0);
    }

    #[test]
    fn test_kernel_from_name() {
        assert_eq!(KernelType::from_name("linear").unwrap(), KernelType::Linear);
        assert!(matches!(
            KernelType::from_name("poly"),
            Err(TrainerError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_single_class_rejected() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![1.0, 1.0, 1.0];
        let mut svm = SVMClassifier::new(SVMConfig::default());
        assert!(matches!(svm.fit(&x, &y), Err(TrainerError::InvalidInput(_))));
    }

    #[test]
    fn test_predict_before_fit() {
        let svm = SVMClassifier::new(SVMConfig::default());
        assert!(matches!(
            svm.predict(&array![[0.0, 0.0]]),
            Err(TrainerError::ModelNotFitted)
        ));
    }
}
