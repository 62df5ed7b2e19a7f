//! Plugin contract and built-in plugins
//!
//! Every plugin implements [`Plugin`] plus exactly one capability trait:
//! [`Transformer`] for preprocessing, [`Classifier`], [`Regressor`] or
//! [`RiskEstimator`] for prediction. [`PluginInstance`] is the closed set of
//! those capabilities; the registry checks at registration time that a
//! plugin's capability matches its declared subtype.

pub mod classifiers;
pub mod preprocessing;
pub mod registry;
pub mod regressors;
pub mod risk_estimation;

pub use registry::{PluginDescriptor, PluginFactory, PluginRegistry};

use crate::data::{Target, TaskType};
use crate::error::{PrognosError, Result};
use crate::metrics::Predictions;
use crate::optimizer::Configuration;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginCategory {
    Preprocessing,
    Prediction,
}

impl PluginCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            PluginCategory::Preprocessing => "preprocessing",
            PluginCategory::Prediction => "prediction",
        }
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Subtype within a category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginSubtype {
    FeatureScaling,
    FeatureSelection,
    Classifier,
    Regressor,
    RiskEstimation,
}

impl PluginSubtype {
    pub fn category(&self) -> PluginCategory {
        match self {
            PluginSubtype::FeatureScaling | PluginSubtype::FeatureSelection => {
                PluginCategory::Preprocessing
            }
            _ => PluginCategory::Prediction,
        }
    }

    /// Prediction subtype serving a task
    pub fn for_task(task: TaskType) -> PluginSubtype {
        match task {
            TaskType::Classification => PluginSubtype::Classifier,
            TaskType::Regression => PluginSubtype::Regressor,
            TaskType::RiskEstimation => PluginSubtype::RiskEstimation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PluginSubtype::FeatureScaling => "feature_scaling",
            PluginSubtype::FeatureSelection => "feature_selection",
            PluginSubtype::Classifier => "classifier",
            PluginSubtype::Regressor => "regressor",
            PluginSubtype::RiskEstimation => "risk_estimation",
        }
    }

    /// Name of the capability a subtype requires
    pub fn capability(&self) -> &'static str {
        match self {
            PluginSubtype::FeatureScaling | PluginSubtype::FeatureSelection => "transform",
            PluginSubtype::Classifier => "predict_proba",
            PluginSubtype::Regressor => "predict",
            PluginSubtype::RiskEstimation => "predict_risk",
        }
    }
}

impl fmt::Display for PluginSubtype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base plugin contract
pub trait Plugin: Send + Sync {
    /// Registered name
    fn name(&self) -> &'static str;

    /// Fit on training data
    fn fit(&mut self, x: &Array2<f64>, target: Target<'_>) -> Result<()>;

    /// Serialize fitted state; restored by the registry's loader
    fn to_bytes(&self) -> Result<Vec<u8>>;
}

/// Preprocessing capability
pub trait Transformer: Plugin {
    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>>;
}

/// Classification capability
pub trait Classifier: Plugin {
    /// Sorted class labels seen during fit
    fn classes(&self) -> &[f64];

    /// One column per entry of [`Classifier::classes`]
    fn predict_proba(&self, x: &Array2<f64>) -> Result<Array2<f64>>;

    /// Most probable class
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        let classes = self.classes().to_vec();
        Predictions::Probabilities {
            classes,
            values: self.predict_proba(x)?,
        }
        .labels()
    }
}

/// Regression capability
pub trait Regressor: Plugin {
    fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>>;
}

/// Risk estimation capability
pub trait RiskEstimator: Plugin {
    /// Probability of the event by each horizon, one column per horizon
    fn predict_risk(&self, x: &Array2<f64>, horizons: &[f64]) -> Result<Array2<f64>>;
}

/// A plugin instance with its capability
pub enum PluginInstance {
    Transformer(Box<dyn Transformer>),
    Classifier(Box<dyn Classifier>),
    Regressor(Box<dyn Regressor>),
    RiskEstimator(Box<dyn RiskEstimator>),
}

impl PluginInstance {
    fn plugin(&self) -> &dyn Plugin {
        match self {
            PluginInstance::Transformer(p) => p.as_ref(),
            PluginInstance::Classifier(p) => p.as_ref(),
            PluginInstance::Regressor(p) => p.as_ref(),
            PluginInstance::RiskEstimator(p) => p.as_ref(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.plugin().name()
    }

    /// Capability this instance provides
    pub fn capability(&self) -> &'static str {
        match self {
            PluginInstance::Transformer(_) => "transform",
            PluginInstance::Classifier(_) => "predict_proba",
            PluginInstance::Regressor(_) => "predict",
            PluginInstance::RiskEstimator(_) => "predict_risk",
        }
    }

    /// Whether the capability fits a declared subtype
    pub fn provides(&self, subtype: PluginSubtype) -> bool {
        self.capability() == subtype.capability()
    }

    pub fn fit(&mut self, x: &Array2<f64>, target: Target<'_>) -> Result<()> {
        match self {
            PluginInstance::Transformer(p) => p.fit(x, target),
            PluginInstance::Classifier(p) => p.fit(x, target),
            PluginInstance::Regressor(p) => p.fit(x, target),
            PluginInstance::RiskEstimator(p) => p.fit(x, target),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        self.plugin().to_bytes()
    }

    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        match self {
            PluginInstance::Transformer(p) => p.transform(x),
            _ => Err(self.absent("transform")),
        }
    }

    /// Predictions in the shape matching the capability
    pub fn predict(&self, x: &Array2<f64>, horizons: &[f64]) -> Result<Predictions> {
        match self {
            PluginInstance::Classifier(p) => Ok(Predictions::Probabilities {
                classes: p.classes().to_vec(),
                values: p.predict_proba(x)?,
            }),
            PluginInstance::Regressor(p) => Ok(Predictions::Values(p.predict(x)?)),
            PluginInstance::RiskEstimator(p) => Ok(Predictions::Risks {
                horizons: horizons.to_vec(),
                values: p.predict_risk(x, horizons)?,
            }),
            PluginInstance::Transformer(_) => Err(self.absent("predict")),
        }
    }

    fn absent(&self, capability: &str) -> PrognosError {
        PrognosError::CapabilityAbsent {
            plugin: self.name().to_string(),
            capability: capability.to_string(),
        }
    }
}

impl fmt::Debug for PluginInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginInstance")
            .field("name", &self.name())
            .field("capability", &self.capability())
            .finish()
    }
}

fn missing(name: &str, expected: &str) -> PrognosError {
    PrognosError::InvalidHyperparameter {
        name: name.to_string(),
        value: "<missing>".to_string(),
        reason: format!("expected {}", expected),
    }
}

pub(crate) fn float_param(config: &Configuration, name: &str) -> Result<f64> {
    config
        .get(name)
        .and_then(|v| v.as_float())
        .ok_or_else(|| missing(name, "a number"))
}

pub(crate) fn int_param(config: &Configuration, name: &str) -> Result<i64> {
    config
        .get(name)
        .and_then(|v| v.as_int())
        .ok_or_else(|| missing(name, "an integer"))
}

pub(crate) fn str_param<'a>(config: &'a Configuration, name: &str) -> Result<&'a str> {
    config
        .get(name)
        .and_then(|v| v.as_str())
        .ok_or_else(|| missing(name, "a string"))
}

/// Check feature count against the fitted width
pub(crate) fn check_width(expected: usize, x: &Array2<f64>) -> Result<()> {
    if x.ncols() != expected {
        return Err(PrognosError::ShapeError {
            expected: format!("{} features", expected),
            actual: format!("{} features", x.ncols()),
        });
    }
    Ok(())
}

/// Check label count against the row count
pub(crate) fn check_rows(x: &Array2<f64>, y: &Array1<f64>) -> Result<()> {
    if x.nrows() != y.len() {
        return Err(PrognosError::ShapeError {
            expected: format!("y length = {}", x.nrows()),
            actual: format!("y length = {}", y.len()),
        });
    }
    if x.nrows() == 0 {
        return Err(PrognosError::TrainingError("no training rows".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtype_categories() {
        assert_eq!(PluginSubtype::FeatureScaling.category(), PluginCategory::Preprocessing);
        assert_eq!(PluginSubtype::RiskEstimation.category(), PluginCategory::Prediction);
        assert_eq!(
            PluginSubtype::for_task(TaskType::Regression),
            PluginSubtype::Regressor
        );
    }

    #[test]
    fn test_transformer_cannot_predict() {
        let instance = PluginInstance::Transformer(Box::new(preprocessing::StandardScaler::default()));
        let x = Array2::zeros((2, 2));
        assert!(matches!(
            instance.predict(&x, &[]),
            Err(PrognosError::CapabilityAbsent { .. })
        ));
        assert!(instance.provides(PluginSubtype::FeatureSelection));
        assert!(!instance.provides(PluginSubtype::Classifier));
    }
}
