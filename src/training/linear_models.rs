//! Logistic regression for binary targets

use crate::error::{Result, TrainerError};
use super::models::{check_features, check_shapes, unique_classes, Classifier};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Solve symmetric positive-definite system Ax = b using Cholesky decomposition.
/// Retries once with a small ridge if the matrix is near-singular.
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    cholesky_solve_with(a, b, true)
}

fn cholesky_solve_with(a: &Array2<f64>, b: &Array1<f64>, retry: bool) -> Option<Array1<f64>> {
    let n = a.nrows();
    if n != a.ncols() || n != b.len() {
        return None;
    }

    // A = L * L^T
    let mut l = Array2::zeros((n, n));

    for i in 0..n {
        for j in 0..=i {
            let mut sum = 0.0;
            for k in 0..j {
                sum += l[[i, k]] * l[[j, k]];
            }

            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= 0.0 {
                    if !retry {
                        return None;
                    }
                    let mut a_reg = a.clone();
                    let ridge = 1e-8 * a.diag().iter().map(|v| v.abs()).sum::<f64>() / n as f64;
                    for k in 0..n {
                        a_reg[[k, k]] += ridge.max(1e-12);
                    }
                    return cholesky_solve_with(&a_reg, b, false);
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L * y = b
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // L^T * x = y
    let mut x = Array1::zeros(n);
    for i in (0..n).rev() {
        let mut sum = 0.0;
        for j in (i + 1)..n {
            sum += l[[j, i]] * x[j];
        }
        x[i] = (y[i] - sum) / l[[i, i]];
    }

    Some(x)
}

/// Optimisation routine used by [`LogisticRegression`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Solver {
    /// Newton steps on the penalised log-likelihood (IRLS)
    Liblinear,
    /// Plain batch gradient descent
    GradientDescent,
}

impl Solver {
    /// Parse a solver name as it appears in a parameter grid
    pub fn from_name(name: &str) -> Result<Self> {
        match name {
            "liblinear" | "newton" => Ok(Solver::Liblinear),
            "gd" | "gradient_descent" => Ok(Solver::GradientDescent),
            other => Err(TrainerError::InvalidParameter {
                name: "solver".to_string(),
                value: other.to_string(),
                reason: "expected one of liblinear, gd".to_string(),
            }),
        }
    }
}

/// L2-regularised logistic regression
///
/// `c` is the inverse regularisation strength: the objective is the
/// summed log loss plus `||w||^2 / (2c)`. The intercept is not penalised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Fitted coefficients
    pub coefficients: Option<Array1<f64>>,
    /// Fitted intercept
    pub intercept: Option<f64>,
    /// Inverse regularisation strength
    pub c: f64,
    /// Solver
    pub solver: Solver,
    /// Maximum iterations
    pub max_iter: usize,
    /// Convergence tolerance on the gradient norm
    pub tol: f64,
    /// Step size for gradient descent
    pub learning_rate: f64,
    classes: Vec<i64>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    /// Create a new logistic regression model
    pub fn new() -> Self {
        Self {
            coefficients: None,
            intercept: None,
            c: 1.0,
            solver: Solver::Liblinear,
            max_iter: 100,
            tol: 1e-6,
            learning_rate: 0.1,
            classes: Vec::new(),
        }
    }

    /// Set inverse regularisation strength
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
        self
    }

    /// Set the solver
    pub fn with_solver(mut self, solver: Solver) -> Self {
        self.solver = solver;
        self
    }

    /// Set maximum iterations
    pub fn with_max_iter(mut self, max_iter: usize) -> Self {
        self.max_iter = max_iter;
        self
    }

    /// Set learning rate
    pub fn with_learning_rate(mut self, lr: f64) -> Self {
        self.learning_rate = lr;
        self
    }

    fn sigmoid(z: &Array1<f64>) -> Array1<f64> {
        z.mapv(|v| 1.0 / (1.0 + (-v).exp()))
    }

    fn fit_model(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        check_shapes(x, y)?;
        if !(self.c > 0.0) || !self.c.is_finite() {
            return Err(TrainerError::InvalidParameter {
                name: "C".to_string(),
                value: self.c.to_string(),
                reason: "must be positive".to_string(),
            });
        }

        let classes = unique_classes(y);
        if classes.len() != 2 {
            return Err(TrainerError::InvalidInput(format!(
                "Logistic regression needs exactly 2 classes, found {}",
                classes.len()
            )));
        }
        let positive = classes[1] as f64;
        let targets: Array1<f64> = y.mapv(|v| if (v - positive).abs() < 0.5 { 1.0 } else { 0.0 });
        self.classes = classes;

        let (weights, bias) = match self.solver {
            Solver::Liblinear => self.fit_newton(x, &targets),
            Solver::GradientDescent => self.fit_gradient_descent(x, &targets),
        }?;

        self.coefficients = Some(weights);
        self.intercept = Some(bias);
        Ok(())
    }

    fn fit_newton(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(Array1<f64>, f64)> {
        let n_samples = x.nrows();
        let n_features = x.ncols();
        let penalty = 1.0 / self.c;

        // Intercept lives in the last column
        let mut x_aug = Array2::<f64>::ones((n_samples, n_features + 1));
        x_aug.slice_mut(ndarray::s![.., ..n_features]).assign(x);
        let mut theta = Array1::<f64>::zeros(n_features + 1);

        for _ in 0..self.max_iter {
            let p = Self::sigmoid(&x_aug.dot(&theta));
            let mut grad = x_aug.t().dot(&(&p - y));
            for j in 0..n_features {
                grad[j] += penalty * theta[j];
            }

            let grad_norm = grad.mapv(|v| v * v).sum().sqrt();
            if grad_norm < self.tol {
                break;
            }

            let w = p.mapv(|pi| (pi * (1.0 - pi)).max(1e-10));
            let weighted = &x_aug * &w.view().insert_axis(Axis(1));
            let mut hessian = x_aug.t().dot(&weighted);
            for j in 0..n_features {
                hessian[[j, j]] += penalty;
            }

            let step = cholesky_solve(&hessian, &grad).ok_or_else(|| {
                TrainerError::TrainingError("Newton step failed: singular Hessian".to_string())
            })?;
            theta -= &step;

            if step.mapv(f64::abs).fold(0.0_f64, |a, &b| a.max(b)) < self.tol {
                break;
            }
        }

        let bias = theta[n_features];
        let weights = theta.slice(ndarray::s![..n_features]).to_owned();
        Ok((weights, bias))
    }

    fn fit_gradient_descent(&self, x: &Array2<f64>, y: &Array1<f64>) -> Result<(Array1<f64>, f64)> {
        let n_samples = x.nrows() as f64;
        let mut weights = Array1::<f64>::zeros(x.ncols());
        let mut bias = 0.0;

        let lr = self.learning_rate;
        let alpha = 1.0 / (self.c * n_samples);

        for _ in 0..self.max_iter {
            let linear = x.dot(&weights) + bias;
            let predictions = Self::sigmoid(&linear);

            let errors = &predictions - y;
            let dw = (x.t().dot(&errors) / n_samples) + (alpha * &weights);
            let db = errors.mean().unwrap_or(0.0);

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                break;
            }

            weights = weights - lr * dw;
            bias -= lr * db;
        }

        Ok((weights, bias))
    }

    /// Predict probability of the positive class
    pub fn predict_proba(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(TrainerError::ModelNotFitted)?;
        check_features(coefficients.len(), x)?;
        let intercept = self.intercept.unwrap_or(0.0);

        let linear = x.dot(coefficients) + intercept;
        Ok(Self::sigmoid(&linear))
    }
}

impl Classifier for LogisticRegression {
    fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
        self.fit_model(x, y)
    }

    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let proba = self.predict_proba(x)?;
        let (negative, positive) = (self.classes[0] as f64, self.classes[1] as f64);
        Ok(proba.mapv(|p| if p >= 0.5 { positive } else { negative }))
    }
}
