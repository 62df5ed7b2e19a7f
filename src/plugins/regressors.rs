//! Regression plugins

use super::registry::{PluginFactory, PluginRegistry};
use super::{
    check_rows, check_width, float_param, int_param, str_param, Plugin, PluginCategory,
    PluginSubtype, Regressor,
};
use crate::data::Target;
use crate::error::{PrognosError, Result};
use crate::export::{encode, ArtifactKind};
use crate::optimizer::{Dimension, HyperparameterSpace, ParameterValue};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Register every regressor plugin
pub fn register_all(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        RidgeRegression::NAME,
        PluginCategory::Prediction,
        PluginSubtype::Regressor,
        PluginFactory::regressor(|c| Ok(RidgeRegression::new(float_param(c, "alpha")?))),
        RidgeRegression::space(),
    )?;
    registry.register(
        KnnRegression::NAME,
        PluginCategory::Prediction,
        PluginSubtype::Regressor,
        PluginFactory::regressor(|c| {
            let weighting = match str_param(c, "weights")? {
                "distance" => KnnWeighting::Distance,
                _ => KnnWeighting::Uniform,
            };
            Ok(KnnRegression::new(int_param(c, "n_neighbors")?.max(1) as usize).with_weighting(weighting))
        }),
        KnnRegression::space(),
    )?;
    Ok(())
}

/// Solve symmetric positive-definite system Ax = b using Cholesky decomposition.
/// Returns `None` when `a` is not positive definite.
pub(crate) fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
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
                if diag <= 0.0 || !diag.is_finite() {
                    return None;
                }
                l[[i, j]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // Forward substitution: L * y = b
    let mut y = Array1::zeros(n);
    for i in 0..n {
        let mut sum = 0.0;
        for j in 0..i {
            sum += l[[i, j]] * y[j];
        }
        y[i] = (b[i] - sum) / l[[i, i]];
    }

    // Backward substitution: L^T * x = y
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

/// Ridge Regression (L2-regularized linear regression)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RidgeRegression {
    /// L2 regularization strength
    pub alpha: f64,
    coefficients: Option<Array1<f64>>,
    intercept: f64,
}

impl Default for RidgeRegression {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl RidgeRegression {
    pub const NAME: &'static str = "ridge_regression";

    pub fn new(alpha: f64) -> Self {
        Self {
            alpha,
            coefficients: None,
            intercept: 0.0,
        }
    }

    pub fn space() -> HyperparameterSpace {
        HyperparameterSpace::new()
            .add(Dimension::log_float("alpha", 1e-3, 1e2).with_default(ParameterValue::Float(1.0)))
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }
}

impl Plugin for RidgeRegression {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&mut self, x: &Array2<f64>, target: Target<'_>) -> Result<()> {
        let y = target.y;
        check_rows(x, y)?;

        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PrognosError::TrainingError("no training rows".to_string()))?;
        let y_mean = y.mean().unwrap_or(0.0);
        let x_c = x - &x_mean.clone().insert_axis(Axis(0));
        let y_c = y - y_mean;

        let mut xtx = x_c.t().dot(&x_c);
        for i in 0..x.ncols() {
            xtx[[i, i]] += self.alpha;
        }
        let xty = x_c.t().dot(&y_c);

        let coefficients = cholesky_solve(&xtx, &xty)
            .ok_or_else(|| PrognosError::ComputationError("Singular matrix".to_string()))?;

        self.intercept = y_mean - coefficients.dot(&x_mean);
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(ArtifactKind::Plugin, self)
    }
}

impl Regressor for RidgeRegression {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let coefficients = self.coefficients.as_ref().ok_or(PrognosError::ModelNotFitted)?;
        check_width(coefficients.len(), x)?;
        Ok(x.dot(coefficients) + self.intercept)
    }
}

/// Neighbour weighting for KNN
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KnnWeighting {
    Uniform,
    /// Inverse-distance weights
    Distance,
}

/// K-nearest-neighbours regression (Euclidean distance)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnnRegression {
    pub n_neighbors: usize,
    pub weighting: KnnWeighting,
    x_train: Option<Array2<f64>>,
    y_train: Option<Array1<f64>>,
}

impl KnnRegression {
    pub const NAME: &'static str = "knn_regression";

    pub fn new(n_neighbors: usize) -> Self {
        Self {
            n_neighbors,
            weighting: KnnWeighting::Uniform,
            x_train: None,
            y_train: None,
        }
    }

    pub fn with_weighting(mut self, weighting: KnnWeighting) -> Self {
        self.weighting = weighting;
        self
    }

    pub fn space() -> HyperparameterSpace {
        HyperparameterSpace::new()
            .add(Dimension::integer("n_neighbors", 1, 30).with_default(ParameterValue::Int(5)))
            .categorical("weights", vec!["uniform", "distance"])
    }
}

impl Plugin for KnnRegression {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&mut self, x: &Array2<f64>, target: Target<'_>) -> Result<()> {
        check_rows(x, target.y)?;
        self.x_train = Some(x.clone());
        self.y_train = Some(target.y.clone());
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(ArtifactKind::Plugin, self)
    }
}

impl Regressor for KnnRegression {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let (x_train, y_train) = match (&self.x_train, &self.y_train) {
            (Some(xt), Some(yt)) => (xt, yt),
            _ => return Err(PrognosError::ModelNotFitted),
        };
        check_width(x_train.ncols(), x)?;
        let k = self.n_neighbors.min(x_train.nrows());

        let mut out = Array1::zeros(x.nrows());
        for (i, row) in x.rows().into_iter().enumerate() {
            let mut distances: Vec<(f64, usize)> = x_train
                .rows()
                .into_iter()
                .enumerate()
                .map(|(j, train)| {
                    let diff = &row - &train;
                    (diff.dot(&diff).sqrt(), j)
                })
                .collect();
            // ties broken by training order
            distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
            let neighbours = &distances[..k];

            out[i] = match self.weighting {
                KnnWeighting::Uniform => {
                    neighbours.iter().map(|(_, j)| y_train[*j]).sum::<f64>() / k as f64
                }
                KnnWeighting::Distance => {
                    if let Some((_, j)) = neighbours.iter().find(|(d, _)| *d == 0.0) {
                        y_train[*j]
                    } else {
                        let (num, den) = neighbours.iter().fold((0.0, 0.0), |(num, den), (d, j)| {
                            (num + y_train[*j] / d, den + 1.0 / d)
                        });
                        num / den
                    }
                }
            };
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_ridge_recovers_linear_relation() {
        let x = array![[1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![3.0, 5.0, 7.0, 9.0, 11.0];
        let mut model = RidgeRegression::new(1e-6);
        model.fit(&x, Target::new(&y, None)).unwrap();
        let pred = model.predict(&array![[6.0]]).unwrap();
        assert!((pred[0] - 13.0).abs() < 1e-3);
    }

    #[test]
    fn test_ridge_shrinks() {
        let x = array![[1.0], [2.0], [3.0]];
        let y = array![1.0, 2.0, 3.0];
        let mut weak = RidgeRegression::new(1e-6);
        let mut strong = RidgeRegression::new(100.0);
        weak.fit(&x, Target::new(&y, None)).unwrap();
        strong.fit(&x, Target::new(&y, None)).unwrap();
        assert!(strong.coefficients().unwrap()[0] < weak.coefficients().unwrap()[0]);
    }

    #[test]
    fn test_knn_uniform_and_distance() {
        let x = array![[0.0], [1.0], [10.0]];
        let y = array![0.0, 2.0, 100.0];
        let mut uniform = KnnRegression::new(2);
        uniform.fit(&x, Target::new(&y, None)).unwrap();
        assert_eq!(uniform.predict(&array![[0.4]]).unwrap()[0], 1.0);

        let mut distance = KnnRegression::new(2).with_weighting(KnnWeighting::Distance);
        distance.fit(&x, Target::new(&y, None)).unwrap();
        assert_eq!(distance.predict(&array![[1.0]]).unwrap()[0], 2.0);
    }

    #[test]
    fn test_cholesky_rejects_indefinite() {
        let a = array![[0.0, 1.0], [1.0, 0.0]];
        assert!(cholesky_solve(&a, &array![1.0, 1.0]).is_none());
    }
}
