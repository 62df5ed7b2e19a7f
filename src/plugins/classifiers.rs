//! Classification plugins

use super::registry::{PluginFactory, PluginRegistry};
use super::{
    check_rows, check_width, float_param, int_param, str_param, Classifier, Plugin, PluginCategory,
    PluginSubtype,
};
use crate::data::{distinct_sorted, Target};
use crate::error::{PrognosError, Result};
use crate::export::{encode, ArtifactKind};
use crate::optimizer::{Dimension, HyperparameterSpace, ParameterValue};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Register every classifier plugin
pub fn register_all(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        LogisticRegression::NAME,
        PluginCategory::Prediction,
        PluginSubtype::Classifier,
        PluginFactory::classifier(|c| {
            Ok(LogisticRegression::new()
                .with_c(float_param(c, "C")?)
                .with_max_iter(int_param(c, "max_iter")?.max(1) as usize)
                .with_learning_rate(float_param(c, "learning_rate")?)
                .with_class_weight(ClassWeight::parse(str_param(c, "class_weight")?)?))
        }),
        LogisticRegression::space(),
    )?;
    registry.register(
        GaussianNaiveBayes::NAME,
        PluginCategory::Prediction,
        PluginSubtype::Classifier,
        PluginFactory::classifier(|c| {
            Ok(GaussianNaiveBayes::new().with_var_smoothing(float_param(c, "var_smoothing")?))
        }),
        GaussianNaiveBayes::space(),
    )?;
    Ok(())
}

/// Class weighting scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassWeight {
    None,
    /// Weights inversely proportional to class frequency
    Balanced,
}

impl ClassWeight {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "none" => Ok(ClassWeight::None),
            "balanced" => Ok(ClassWeight::Balanced),
            other => Err(PrognosError::InvalidHyperparameter {
                name: "class_weight".to_string(),
                value: other.to_string(),
                reason: "expected none or balanced".to_string(),
            }),
        }
    }
}

/// L2-regularised logistic regression, one-vs-rest for more than two classes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogisticRegression {
    /// Inverse regularization strength
    pub c: f64,
    pub max_iter: usize,
    /// Convergence tolerance on the gradient norm
    pub tol: f64,
    pub learning_rate: f64,
    pub class_weight: ClassWeight,
    classes: Vec<f64>,
    /// One row of coefficients per binary problem
    coefficients: Option<Array2<f64>>,
    intercepts: Option<Array1<f64>>,
}

impl Default for LogisticRegression {
    fn default() -> Self {
        Self::new()
    }
}

impl LogisticRegression {
    pub const NAME: &'static str = "logistic_regression";

    /// Create a new logistic regression model
    pub fn new() -> Self {
        Self {
            c: 1.0,
            max_iter: 300,
            tol: 1e-6,
            learning_rate: 0.1,
            class_weight: ClassWeight::None,
            classes: Vec::new(),
            coefficients: None,
            intercepts: None,
        }
    }

    pub fn space() -> HyperparameterSpace {
        HyperparameterSpace::new()
            .add(Dimension::log_float("C", 1e-3, 1e2).with_default(ParameterValue::Float(1.0)))
            .add(
                Dimension::integer_step("max_iter", 100, 1000, 100)
                    .with_default(ParameterValue::Int(300)),
            )
            .add(
                Dimension::log_float("learning_rate", 1e-3, 1.0)
                    .with_default(ParameterValue::Float(0.1)),
            )
            .categorical("class_weight", vec!["none", "balanced"])
    }

    /// Set inverse regularization strength
    pub fn with_c(mut self, c: f64) -> Self {
        self.c = c;
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

    pub fn with_class_weight(mut self, class_weight: ClassWeight) -> Self {
        self.class_weight = class_weight;
        self
    }

    fn sigmoid(z: &Array1<f64>) -> Array1<f64> {
        z.mapv(|v| 1.0 / (1.0 + (-v).exp()))
    }

    /// Gradient descent on one binary problem
    fn fit_binary(&self, x: &Array2<f64>, y: &Array1<f64>, sample_weight: &Array1<f64>) -> (Array1<f64>, f64) {
        let n_samples = x.nrows() as f64;
        let mut weights = Array1::zeros(x.ncols());
        let mut bias = 0.0;
        let alpha = 1.0 / (self.c * n_samples);

        for _iter in 0..self.max_iter {
            let linear = x.dot(&weights) + bias;
            let predictions = Self::sigmoid(&linear);

            let errors = (&predictions - y) * sample_weight;
            let dw = (x.t().dot(&errors) / n_samples) + (alpha * &weights);
            let db = errors.sum() / n_samples;

            let grad_norm = (dw.mapv(|v| v * v).sum() + db * db).sqrt();
            if grad_norm < self.tol {
                break;
            }

            weights = weights - self.learning_rate * dw;
            bias -= self.learning_rate * db;
        }

        (weights, bias)
    }

    fn sample_weights(&self, y: &Array1<f64>) -> Array1<f64> {
        match self.class_weight {
            ClassWeight::None => Array1::ones(y.len()),
            ClassWeight::Balanced => {
                let n = y.len() as f64;
                let k = self.classes.len() as f64;
                y.mapv(|label| {
                    let count = y.iter().filter(|v| **v == label).count() as f64;
                    n / (k * count)
                })
            }
        }
    }
}

impl Plugin for LogisticRegression {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&mut self, x: &Array2<f64>, target: Target<'_>) -> Result<()> {
        let y = target.y;
        check_rows(x, y)?;
        self.classes = distinct_sorted(y);
        if self.classes.len() < 2 {
            return Err(PrognosError::TrainingError(
                "logistic regression needs at least two classes".to_string(),
            ));
        }

        let sample_weight = self.sample_weights(y);
        // binary: a single problem for the second class
        let positives: Vec<f64> = if self.classes.len() == 2 {
            vec![self.classes[1]]
        } else {
            self.classes.clone()
        };

        let mut coefficients = Array2::zeros((positives.len(), x.ncols()));
        let mut intercepts = Array1::zeros(positives.len());
        for (k, class) in positives.iter().enumerate() {
            let y_bin = y.mapv(|v| if v == *class { 1.0 } else { 0.0 });
            let (w, b) = self.fit_binary(x, &y_bin, &sample_weight);
            coefficients.row_mut(k).assign(&w);
            intercepts[k] = b;
        }

        if coefficients.iter().any(|v: &f64| !v.is_finite()) {
            return Err(PrognosError::TrainingError("gradient descent diverged".to_string()));
        }

        self.coefficients = Some(coefficients);
        self.intercepts = Some(intercepts);
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(ArtifactKind::Plugin, self)
    }
}

impl Classifier for LogisticRegression {
    fn classes(&self) -> &[f64] {
        &self.classes
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (coefficients, intercepts) = match (&self.coefficients, &self.intercepts) {
            (Some(c), Some(i)) => (c, i),
            _ => return Err(PrognosError::ModelNotFitted),
        };
        check_width(coefficients.ncols(), x)?;

        let scores = x.dot(&coefficients.t()) + intercepts;
        let scores = scores.mapv(|v| 1.0 / (1.0 + (-v).exp()));

        if self.classes.len() == 2 {
            let mut proba = Array2::zeros((x.nrows(), 2));
            for (i, p) in scores.column(0).iter().enumerate() {
                proba[[i, 0]] = 1.0 - p;
                proba[[i, 1]] = *p;
            }
            return Ok(proba);
        }

        let mut proba = scores;
        for mut row in proba.rows_mut() {
            let total = row.sum();
            if total > 0.0 {
                row /= total;
            } else {
                row.fill(1.0 / self.classes.len() as f64);
            }
        }
        Ok(proba)
    }
}

/// Gaussian Naive Bayes classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNaiveBayes {
    /// Portion of the largest feature variance added for stability
    pub var_smoothing: f64,
    classes: Vec<f64>,
    /// Per-class feature means, one row per class
    means: Option<Array2<f64>>,
    variances: Option<Array2<f64>>,
    log_priors: Option<Array1<f64>>,
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self::new()
    }
}

impl GaussianNaiveBayes {
    pub const NAME: &'static str = "gaussian_naive_bayes";

    pub fn new() -> Self {
        Self {
            var_smoothing: 1e-9,
            classes: Vec::new(),
            means: None,
            variances: None,
            log_priors: None,
        }
    }

    pub fn space() -> HyperparameterSpace {
        HyperparameterSpace::new().add(
            Dimension::log_float("var_smoothing", 1e-12, 1e-3)
                .with_default(ParameterValue::Float(1e-9)),
        )
    }

    /// Set variance smoothing parameter
    pub fn with_var_smoothing(mut self, smoothing: f64) -> Self {
        self.var_smoothing = smoothing;
        self
    }
}

impl Plugin for GaussianNaiveBayes {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&mut self, x: &Array2<f64>, target: Target<'_>) -> Result<()> {
        let y = target.y;
        check_rows(x, y)?;
        self.classes = distinct_sorted(y);
        if self.classes.is_empty() {
            return Err(PrognosError::TrainingError("no labelled rows".to_string()));
        }

        let epsilon = (self.var_smoothing * x.var_axis(Axis(0), 0.0).fold(0.0, |a: f64, b| a.max(*b)))
            .max(1e-12);
        let n_classes = self.classes.len();
        let mut means = Array2::zeros((n_classes, x.ncols()));
        let mut variances = Array2::zeros((n_classes, x.ncols()));
        let mut log_priors = Array1::zeros(n_classes);

        for (k, class) in self.classes.iter().enumerate() {
            let rows: Vec<usize> = (0..y.len()).filter(|&i| y[i] == *class).collect();
            let x_class = x.select(Axis(0), &rows);
            means.row_mut(k).assign(&x_class.mean_axis(Axis(0)).ok_or_else(|| {
                PrognosError::TrainingError(format!("class {} has no rows", class))
            })?);
            variances
                .row_mut(k)
                .assign(&x_class.var_axis(Axis(0), 0.0).mapv(|v| v + epsilon));
            log_priors[k] = (rows.len() as f64 / y.len() as f64).ln();
        }

        self.means = Some(means);
        self.variances = Some(variances);
        self.log_priors = Some(log_priors);
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(ArtifactKind::Plugin, self)
    }
}

impl Classifier for GaussianNaiveBayes {
    fn classes(&self) -> &[f64] {
        &self.classes
    }

    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let (means, variances, log_priors) = match (&self.means, &self.variances, &self.log_priors) {
            (Some(m), Some(v), Some(p)) => (m, v, p),
            _ => return Err(PrognosError::ModelNotFitted),
        };
        check_width(means.ncols(), x)?;

        let n_classes = self.classes.len();
        let mut proba = Array2::zeros((x.nrows(), n_classes));
        for (i, row) in x.rows().into_iter().enumerate() {
            let mut log_joint = vec![0.0; n_classes];
            for k in 0..n_classes {
                let mut ll = log_priors[k];
                for (j, &value) in row.iter().enumerate() {
                    let var = variances[[k, j]];
                    let diff = value - means[[k, j]];
                    ll -= 0.5 * ((2.0 * PI * var).ln() + diff * diff / var);
                }
                log_joint[k] = ll;
            }
            // log-sum-exp normalisation
            let max = log_joint.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let total: f64 = log_joint.iter().map(|l| (l - max).exp()).sum();
            for k in 0..n_classes {
                proba[[i, k]] = (log_joint[k] - max).exp() / total;
            }
        }
        Ok(proba)
    }
}
