//! Pipeline templates and fitted pipelines
//!
//! A template is an ordered list of preprocessing plugin names followed by
//! exactly one prediction plugin. Its search space concatenates the stage
//! spaces, each dimension prefixed with `<plugin>.`.

use crate::data::{Target, TaskType};
use crate::error::{PrognosError, Result};
use crate::metrics::Predictions;
use crate::optimizer::{Configuration, HyperparameterSpace};
use crate::plugins::{PluginCategory, PluginInstance, PluginRegistry, PluginSubtype};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Anything that produces predictions for a feature matrix
pub trait Predict {
    fn predict(&self, x: &Array2<f64>) -> Result<Predictions>;
}

/// Ordered preprocessing stages plus one predictor
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PipelineTemplate {
    preprocessors: Vec<String>,
    predictor: String,
}

impl PipelineTemplate {
    pub fn new(preprocessors: Vec<String>, predictor: impl Into<String>) -> Self {
        Self {
            preprocessors,
            predictor: predictor.into(),
        }
    }

    /// Stage names joined by `+`
    pub fn id(&self) -> String {
        self.stages().collect::<Vec<_>>().join("+")
    }

    pub fn preprocessors(&self) -> &[String] {
        &self.preprocessors
    }

    pub fn predictor(&self) -> &str {
        &self.predictor
    }

    /// Stage names in execution order
    pub fn stages(&self) -> impl Iterator<Item = &str> {
        self.preprocessors
            .iter()
            .map(|s| s.as_str())
            .chain(std::iter::once(self.predictor.as_str()))
    }

    /// Check stage categories against the registry and the task
    pub fn validate(&self, registry: &PluginRegistry, task: TaskType) -> Result<()> {
        for name in &self.preprocessors {
            let descriptor = registry.descriptor(name)?;
            if descriptor.category != PluginCategory::Preprocessing {
                return Err(PrognosError::ConfigError(format!(
                    "'{}' is not a preprocessing plugin",
                    name
                )));
            }
        }
        let descriptor = registry.descriptor(&self.predictor)?;
        let required = PluginSubtype::for_task(task);
        if descriptor.subtype != required {
            return Err(PrognosError::CapabilityAbsent {
                plugin: self.predictor.clone(),
                capability: required.capability().to_string(),
            });
        }
        Ok(())
    }

    /// Combined, stage-prefixed hyperparameter space
    pub fn search_space(&self, registry: &PluginRegistry) -> Result<HyperparameterSpace> {
        let mut space = HyperparameterSpace::new();
        for name in self.stages() {
            space = space.extend(registry.hyperparameter_space(name)?.prefixed(name));
        }
        Ok(space)
    }

    /// Split a combined configuration into per-stage configurations
    pub fn split_configuration(&self, config: &Configuration) -> Result<Vec<Configuration>> {
        let stages: Vec<&str> = self.stages().collect();
        let mut parts = vec![Configuration::new(); stages.len()];
        for (key, value) in config {
            let (stage, param) = key.split_once('.').ok_or_else(|| {
                PrognosError::InvalidHyperparameter {
                    name: key.clone(),
                    value: value.to_string(),
                    reason: "expected '<plugin>.<parameter>'".to_string(),
                }
            })?;
            let idx = stages.iter().position(|s| *s == stage).ok_or_else(|| {
                PrognosError::InvalidHyperparameter {
                    name: key.clone(),
                    value: value.to_string(),
                    reason: format!("no stage '{}' in {}", stage, self.id()),
                }
            })?;
            parts[idx].insert(param.to_string(), value.clone());
        }
        Ok(parts)
    }

    /// Build an unfitted pipeline
    pub fn instantiate(
        &self,
        registry: &PluginRegistry,
        config: &Configuration,
        horizons: &[f64],
    ) -> Result<Pipeline> {
        let parts = self.split_configuration(config)?;
        let mut instances = self
            .stages()
            .zip(parts.iter())
            .map(|(name, part)| registry.instantiate(name, part))
            .collect::<Result<Vec<_>>>()?;
        let predictor = instances
            .pop()
            .ok_or_else(|| PrognosError::ConfigError("template has no predictor".to_string()))?;

        Ok(Pipeline {
            template: self.clone(),
            configuration: config.clone(),
            horizons: horizons.to_vec(),
            preprocessors: instances,
            predictor,
            fitted: false,
        })
    }

    /// Every template from the candidate lists.
    ///
    /// Each scaler choice (or none) is combined with each selector choice (or
    /// none) and every predictor; scaling runs before selection.
    pub fn enumerate(
        registry: &PluginRegistry,
        preprocessing: &[String],
        predictors: &[String],
    ) -> Result<Vec<PipelineTemplate>> {
        let mut scalers: Vec<Option<&String>> = vec![None];
        let mut selectors: Vec<Option<&String>> = vec![None];
        for name in preprocessing {
            match registry.descriptor(name)?.subtype {
                PluginSubtype::FeatureScaling => scalers.push(Some(name)),
                PluginSubtype::FeatureSelection => selectors.push(Some(name)),
                other => {
                    return Err(PrognosError::ConfigError(format!(
                        "'{}' is a {} plugin, not preprocessing",
                        name, other
                    )))
                }
            }
        }

        let mut templates = Vec::new();
        for predictor in predictors {
            for scaler in &scalers {
                for selector in &selectors {
                    let stages: Vec<String> = scaler
                        .iter()
                        .chain(selector.iter())
                        .map(|s| s.to_string())
                        .collect();
                    templates.push(PipelineTemplate::new(stages, predictor.clone()));
                }
            }
        }
        Ok(templates)
    }
}

impl fmt::Display for PipelineTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id())
    }
}

/// Serialized form of a fitted pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedPipeline {
    pub template: PipelineTemplate,
    pub configuration: Configuration,
    pub horizons: Vec<f64>,
    /// Plugin bytes in stage order
    pub stages: Vec<Vec<u8>>,
}

/// Instantiated pipeline
#[derive(Debug)]
pub struct Pipeline {
    template: PipelineTemplate,
    configuration: Configuration,
    horizons: Vec<f64>,
    preprocessors: Vec<PluginInstance>,
    predictor: PluginInstance,
    fitted: bool,
}

impl Pipeline {
    pub fn template(&self) -> &PipelineTemplate {
        &self.template
    }

    pub fn configuration(&self) -> &Configuration {
        &self.configuration
    }

    pub fn horizons(&self) -> &[f64] {
        &self.horizons
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }

    /// Fit each preprocessing stage on the output of the previous one, then
    /// the predictor
    pub fn fit(&mut self, x: &Array2<f64>, target: Target<'_>) -> Result<()> {
        self.fitted = false;
        let mut current = x.clone();
        for stage in &mut self.preprocessors {
            stage.fit(&current, target)?;
            current = stage.transform(&current)?;
        }
        self.predictor.fit(&current, target)?;
        self.fitted = true;
        Ok(())
    }

    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let mut current = x.clone();
        for stage in &self.preprocessors {
            current = stage.transform(&current)?;
        }
        Ok(current)
    }

    pub fn save(&self) -> Result<SavedPipeline> {
        if !self.fitted {
            return Err(PrognosError::ModelNotFitted);
        }
        let stages = self
            .preprocessors
            .iter()
            .chain(std::iter::once(&self.predictor))
            .map(|p| p.to_bytes())
            .collect::<Result<Vec<_>>>()?;
        Ok(SavedPipeline {
            template: self.template.clone(),
            configuration: self.configuration.clone(),
            horizons: self.horizons.clone(),
            stages,
        })
    }

    pub fn restore(saved: &SavedPipeline, registry: &PluginRegistry) -> Result<Self> {
        let names: Vec<&str> = saved.template.stages().collect();
        if names.len() != saved.stages.len() {
            return Err(PrognosError::SerializationError(format!(
                "pipeline {} has {} stages, found {} saved",
                saved.template,
                names.len(),
                saved.stages.len()
            )));
        }
        let mut instances = names
            .iter()
            .zip(saved.stages.iter())
            .map(|(name, bytes)| registry.load(name, bytes))
            .collect::<Result<Vec<_>>>()?;
        let predictor = instances
            .pop()
            .ok_or_else(|| PrognosError::SerializationError("empty pipeline".to_string()))?;

        Ok(Self {
            template: saved.template.clone(),
            configuration: saved.configuration.clone(),
            horizons: saved.horizons.clone(),
            preprocessors: instances,
            predictor,
            fitted: true,
        })
    }
}

impl Predict for Pipeline {
    fn predict(&self, x: &Array2<f64>) -> Result<Predictions> {
        if !self.fitted {
            return Err(PrognosError::ModelNotFitted);
        }
        let transformed = self.transform(x)?;
        self.predictor.predict(&transformed, &self.horizons)
    }
}
