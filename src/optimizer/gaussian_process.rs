//! Gaussian Process surrogate for Bayesian optimization
//!
//! GP regression on unit-cube encoded configurations, with the acquisition
//! functions used by [`GaussianProcessProposer`](super::GaussianProcessProposer).

use crate::error::{PrognosError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Kernel function types for Gaussian Process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum KernelType {
    /// Radial Basis Function (Squared Exponential)
    RBF { length_scale: f64 },
    /// Matern kernel with nu in {0.5, 1.5, 2.5}
    Matern { nu: f64, length_scale: f64 },
}

impl Default for KernelType {
    fn default() -> Self {
        KernelType::Matern { nu: 2.5, length_scale: 0.3 }
    }
}

/// Compute kernel matrix for given kernel type
fn compute_kernel(x1: &Array2<f64>, x2: &Array2<f64>, kernel: &KernelType) -> Array2<f64> {
    let mut k = Array2::zeros((x1.nrows(), x2.nrows()));
    for (i, xi) in x1.rows().into_iter().enumerate() {
        for (j, xj) in x2.rows().into_iter().enumerate() {
            k[[i, j]] = kernel_value(xi, xj, kernel);
        }
    }
    k
}

/// Compute kernel value between two points
fn kernel_value(x1: ArrayView1<f64>, x2: ArrayView1<f64>, kernel: &KernelType) -> f64 {
    let diff = &x1 - &x2;
    let dist_sq = diff.dot(&diff);
    match kernel {
        KernelType::RBF { length_scale } => (-0.5 * dist_sq / (length_scale * length_scale)).exp(),
        KernelType::Matern { nu, length_scale } => {
            let r = dist_sq.sqrt() / length_scale;
            if r < 1e-10 {
                return 1.0;
            }
            if (*nu - 0.5).abs() < 1e-6 {
                (-r).exp()
            } else if (*nu - 1.5).abs() < 1e-6 {
                let sqrt3 = 3.0_f64.sqrt();
                (1.0 + sqrt3 * r) * (-sqrt3 * r).exp()
            } else {
                let sqrt5 = 5.0_f64.sqrt();
                (1.0 + sqrt5 * r + 5.0 / 3.0 * r * r) * (-sqrt5 * r).exp()
            }
        }
    }
}

/// Acquisition function types. All assume maximization.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub enum AcquisitionFunction {
    /// Expected Improvement with exploration margin `xi`
    ExpectedImprovement { xi: f64 },
    /// Probability of Improvement with exploration margin `xi`
    ProbabilityOfImprovement { xi: f64 },
    /// Upper Confidence Bound
    UpperConfidenceBound { kappa: f64 },
}

impl Default for AcquisitionFunction {
    fn default() -> Self {
        AcquisitionFunction::ExpectedImprovement { xi: 0.01 }
    }
}

impl AcquisitionFunction {
    /// Acquisition value for a posterior `(mean, variance)` given the incumbent
    pub fn value(&self, mean: f64, var: f64, best: f64) -> f64 {
        let std = var.sqrt().max(1e-10);
        match *self {
            AcquisitionFunction::ExpectedImprovement { xi } => {
                let improvement = mean - best - xi;
                let z = improvement / std;
                improvement * normal_cdf(z) + std * normal_pdf(z)
            }
            AcquisitionFunction::ProbabilityOfImprovement { xi } => {
                normal_cdf((mean - best - xi) / std)
            }
            AcquisitionFunction::UpperConfidenceBound { kappa } => mean + kappa * std,
        }
    }
}

/// Gaussian Process model for regression
#[derive(Debug, Clone)]
pub struct GaussianProcess {
    kernel: KernelType,
    noise: f64,
    x_train: Option<Array2<f64>>,
    /// Cholesky factor of K + noise*I
    l_chol: Option<Array2<f64>>,
    /// L^-T L^-1 y
    alpha: Option<Array1<f64>>,
    y_mean: f64,
    y_std: f64,
}

impl GaussianProcess {
    /// Create new GP with given kernel
    pub fn new(kernel: KernelType) -> Self {
        Self {
            kernel,
            noise: 1e-6,
            x_train: None,
            l_chol: None,
            alpha: None,
            y_mean: 0.0,
            y_std: 1.0,
        }
    }

    /// Set noise level
    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise.max(1e-10);
        self
    }

    /// Fit the GP to training data
    pub fn fit(&mut self, x: Array2<f64>, y: &Array1<f64>) -> Result<()> {
        let n = y.len();
        if n == 0 || x.nrows() != n {
            return Err(PrognosError::ShapeError {
                expected: format!("{} training rows", n),
                actual: format!("{} training rows", x.nrows()),
            });
        }

        self.y_mean = y.mean().unwrap_or(0.0);
        self.y_std = y.std(0.0);
        if self.y_std < 1e-10 {
            self.y_std = 1.0;
        }
        let y_normalized = y.mapv(|yi| (yi - self.y_mean) / self.y_std);

        let mut k = compute_kernel(&x, &x, &self.kernel);
        for i in 0..n {
            k[[i, i]] += self.noise;
        }

        let l = Self::cholesky(&k);
        let alpha = Self::solve_triangular_system(&l, &y_normalized);

        self.x_train = Some(x);
        self.l_chol = Some(l);
        self.alpha = Some(alpha);
        Ok(())
    }

    /// Predict mean and variance at test points
    pub fn predict(&self, x_test: &Array2<f64>) -> Result<(Array1<f64>, Array1<f64>)> {
        let (x_train, l, alpha) = match (&self.x_train, &self.l_chol, &self.alpha) {
            (Some(x), Some(l), Some(a)) => (x, l, a),
            _ => return Err(PrognosError::ModelNotFitted),
        };

        let k_star = compute_kernel(x_test, x_train, &self.kernel);
        let mean = k_star.dot(alpha).mapv(|m| m * self.y_std + self.y_mean);

        let mut var = Array1::zeros(x_test.nrows());
        for (i, row) in x_test.rows().into_iter().enumerate() {
            let k_self = kernel_value(row, row, &self.kernel);
            let v = Self::solve_lower_triangular(l, &k_star.row(i).to_owned());
            var[i] = (k_self - v.dot(&v)).max(1e-10) * self.y_std * self.y_std;
        }

        Ok((mean, var))
    }

    fn cholesky(a: &Array2<f64>) -> Array2<f64> {
        let n = a.nrows();
        let mut l = Array2::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let mut sum = 0.0;
                for k in 0..j {
                    sum += l[[i, k]] * l[[j, k]];
                }
                if i == j {
                    l[[j, j]] = (a[[j, j]] - sum).max(1e-10).sqrt();
                } else {
                    l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]].max(1e-10);
                }
            }
        }
        l
    }

    /// Solve L @ x = b for lower triangular L
    fn solve_lower_triangular(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
        let n = b.len();
        let mut x = Array1::zeros(n);
        for i in 0..n {
            let mut sum = b[i];
            for j in 0..i {
                sum -= l[[i, j]] * x[j];
            }
            x[i] = sum / l[[i, i]].max(1e-10);
        }
        x
    }

    /// Solve L @ L^T @ x = b
    fn solve_triangular_system(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
        let n = b.len();
        let y = Self::solve_lower_triangular(l, b);
        let mut x = Array1::zeros(n);
        for i in (0..n).rev() {
            let mut sum = y[i];
            for j in (i + 1)..n {
                sum -= l[[j, i]] * x[j];
            }
            x[i] = sum / l[[i, i]].max(1e-10);
        }
        x
    }
}

/// Standard normal CDF approximation
pub(crate) fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2))
}

/// Standard normal PDF
pub(crate) fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Error function approximation (Abramowitz and Stegun)
fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_kernel_identity() {
        let x = array![0.2, 0.4];
        for kernel in [KernelType::RBF { length_scale: 1.0 }, KernelType::default()] {
            let k = kernel_value(x.view(), x.view(), &kernel);
            assert!((k - 1.0).abs() < 1e-9);
        }
    }

    #[test]
    fn test_gp_interpolates() {
        let mut gp = GaussianProcess::new(KernelType::RBF { length_scale: 0.5 });
        let x = Array2::from_shape_vec((5, 1), vec![0.0, 0.25, 0.5, 0.75, 1.0]).unwrap();
        let y = array![0.0, 0.0625, 0.25, 0.5625, 1.0];
        gp.fit(x.clone(), &y).unwrap();

        let (mean, var) = gp.predict(&x).unwrap();
        for i in 0..5 {
            assert!((mean[i] - y[i]).abs() < 1e-2);
        }
        assert!(var.iter().all(|&v| v > 0.0));
    }

    #[test]
    fn test_predict_unfitted() {
        let gp = GaussianProcess::new(KernelType::default());
        let x = Array2::zeros((1, 1));
        assert!(matches!(gp.predict(&x), Err(PrognosError::ModelNotFitted)));
    }

    #[test]
    fn test_expected_improvement_prefers_uncertainty() {
        let ei = AcquisitionFunction::default();
        let confident = ei.value(0.5, 1e-8, 0.5);
        let uncertain = ei.value(0.5, 0.04, 0.5);
        assert!(uncertain > confident);
    }

    #[test]
    fn test_normal_cdf() {
        assert!((normal_cdf(0.0) - 0.5).abs() < 0.01);
        assert!(normal_cdf(-3.0) < 0.01);
        assert!(normal_cdf(3.0) > 0.99);
    }
}
