//! Hyperparameter space descriptors
//!
//! Each plugin declares an ordered list of tunable dimensions. A pipeline
//! template concatenates the spaces of its stages, prefixing every dimension
//! with the stage's plugin name.

use crate::error::{PrognosError, Result};
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of a tunable dimension
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DimensionKind {
    /// One of a fixed set of values
    Categorical { choices: Vec<ParameterValue> },
    /// Integer grid `low, low + step, ..., high`
    Integer { low: i64, high: i64, step: i64 },
    /// Continuous interval
    Float { low: f64, high: f64, log_scale: bool },
}

/// A single tunable hyperparameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dimension {
    pub name: String,
    pub kind: DimensionKind,
    pub default: ParameterValue,
}

impl Dimension {
    /// Categorical dimension, defaulting to the first choice
    pub fn categorical(name: impl Into<String>, choices: Vec<ParameterValue>) -> Self {
        let default = choices.first().cloned().unwrap_or(ParameterValue::Int(0));
        Self {
            name: name.into(),
            kind: DimensionKind::Categorical { choices },
            default,
        }
    }

    /// Integer dimension with unit step, defaulting to `low`
    pub fn integer(name: impl Into<String>, low: i64, high: i64) -> Self {
        Self::integer_step(name, low, high, 1)
    }

    /// Integer dimension on a stepped grid, defaulting to `low`
    pub fn integer_step(name: impl Into<String>, low: i64, high: i64, step: i64) -> Self {
        Self {
            name: name.into(),
            kind: DimensionKind::Integer { low, high, step },
            default: ParameterValue::Int(low),
        }
    }

    /// Float dimension, defaulting to the midpoint
    pub fn float(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            kind: DimensionKind::Float {
                low,
                high,
                log_scale: false,
            },
            default: ParameterValue::Float((low + high) / 2.0),
        }
    }

    /// Log-scale float dimension, defaulting to the geometric midpoint
    pub fn log_float(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self {
            name: name.into(),
            kind: DimensionKind::Float {
                low,
                high,
                log_scale: true,
            },
            default: ParameterValue::Float((low * high).sqrt()),
        }
    }

    /// Override the default value
    pub fn with_default(mut self, default: ParameterValue) -> Self {
        self.default = default;
        self
    }

    /// Check the declaration itself: non-empty choices, ordered finite
    /// bounds, a positive step, a positive log-scale lower bound and a
    /// default inside the declared range.
    pub fn check(&self) -> Result<()> {
        let malformed = |reason: String| {
            PrognosError::ConfigError(format!("dimension '{}': {}", self.name, reason))
        };
        match &self.kind {
            DimensionKind::Categorical { choices } => {
                if choices.is_empty() {
                    return Err(malformed("no choices".to_string()));
                }
            }
            DimensionKind::Integer { low, high, step } => {
                if high < low {
                    return Err(malformed(format!("high {} below low {}", high, low)));
                }
                if *step <= 0 {
                    return Err(malformed(format!("step {} is not positive", step)));
                }
            }
            DimensionKind::Float { low, high, log_scale } => {
                if !low.is_finite() || !high.is_finite() {
                    return Err(malformed(format!("bounds [{}, {}] are not finite", low, high)));
                }
                if high < low {
                    return Err(malformed(format!("high {} below low {}", high, low)));
                }
                if *log_scale && *low <= 0.0 {
                    return Err(malformed(format!("log scale needs low > 0, got {}", low)));
                }
            }
        }
        self.validate(&self.default)
            .map_err(|e| malformed(format!("bad default: {}", e)))
    }

    /// Sample a random value. The dimension must pass [`Dimension::check`].
    pub fn sample(&self, rng: &mut impl Rng) -> ParameterValue {
        match &self.kind {
            DimensionKind::Categorical { choices } => {
                let idx = rng.gen_range(0..choices.len());
                choices[idx].clone()
            }
            DimensionKind::Integer { low, high, step } => {
                let n_steps = (high - low) / step;
                ParameterValue::Int(low + rng.gen_range(0..=n_steps) * step)
            }
            DimensionKind::Float { low, high, log_scale } => {
                let val = if *log_scale {
                    let log_low = low.ln();
                    let log_high = high.ln();
                    (rng.gen::<f64>() * (log_high - log_low) + log_low).exp()
                } else {
                    rng.gen::<f64>() * (high - low) + low
                };
                ParameterValue::Float(val.clamp(*low, *high))
            }
        }
    }

    /// Check that a value has the right type and lies within bounds
    pub fn validate(&self, value: &ParameterValue) -> Result<()> {
        let invalid = |reason: &str| PrognosError::InvalidHyperparameter {
            name: self.name.clone(),
            value: value.to_string(),
            reason: reason.to_string(),
        };

        match &self.kind {
            DimensionKind::Categorical { choices } => {
                if choices.contains(value) {
                    Ok(())
                } else {
                    Err(invalid("not among the declared choices"))
                }
            }
            DimensionKind::Integer { low, high, step } => {
                let v = match value {
                    ParameterValue::Int(v) => *v,
                    _ => return Err(invalid("expected an integer")),
                };
                if v < *low || v > *high {
                    Err(invalid(&format!("outside [{}, {}]", low, high)))
                } else if (v - low) % (*step).max(1) != 0 {
                    Err(invalid(&format!("not on the step-{} grid from {}", step, low)))
                } else {
                    Ok(())
                }
            }
            DimensionKind::Float { low, high, .. } => {
                let v = match value {
                    ParameterValue::Float(v) => *v,
                    ParameterValue::Int(v) => *v as f64,
                    _ => return Err(invalid("expected a number")),
                };
                if !v.is_finite() || v < *low || v > *high {
                    Err(invalid(&format!("outside [{}, {}]", low, high)))
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Map a value into `[0, 1]` for surrogate models
    pub fn encode(&self, value: &ParameterValue) -> f64 {
        match &self.kind {
            DimensionKind::Categorical { choices } => {
                if choices.len() <= 1 {
                    return 0.5;
                }
                let idx = choices.iter().position(|c| c == value).unwrap_or(0);
                idx as f64 / (choices.len() - 1) as f64
            }
            DimensionKind::Integer { low, high, .. } => {
                if high == low {
                    return 0.5;
                }
                let v = value.as_float().unwrap_or(*low as f64);
                ((v - *low as f64) / (*high - *low) as f64).clamp(0.0, 1.0)
            }
            DimensionKind::Float { low, high, log_scale } => {
                if high <= low {
                    return 0.5;
                }
                let v = value.as_float().unwrap_or(*low);
                let unit = if *log_scale {
                    (v.max(*low).ln() - low.ln()) / (high.ln() - low.ln())
                } else {
                    (v - low) / (high - low)
                };
                unit.clamp(0.0, 1.0)
            }
        }
    }

    /// Human-readable bounds description
    pub fn describe(&self) -> String {
        match &self.kind {
            DimensionKind::Categorical { choices } => {
                let items: Vec<String> = choices.iter().map(|c| c.to_string()).collect();
                format!("{}: categorical [{}]", self.name, items.join(", "))
            }
            DimensionKind::Integer { low, high, step } => {
                format!("{}: integer [{}, {}] step {}", self.name, low, high, step)
            }
            DimensionKind::Float { low, high, log_scale } => {
                let scale = if *log_scale { " (log)" } else { "" };
                format!("{}: float [{}, {}]{}", self.name, low, high, scale)
            }
        }
    }
}

/// Sampled parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParameterValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

impl ParameterValue {
    /// Get as float
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    /// Get as int
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Get as string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ParameterValue::Str(v) => Some(v),
            _ => None,
        }
    }

    /// Get as bool
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ParameterValue::Bool(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Str(v) => write!(f, "{}", v),
            ParameterValue::Bool(v) => write!(f, "{}", v),
        }
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::Str(v.to_string())
    }
}

impl From<bool> for ParameterValue {
    fn from(v: bool) -> Self {
        ParameterValue::Bool(v)
    }
}

/// One point in a hyperparameter space, ordered by name
pub type Configuration = BTreeMap<String, ParameterValue>;

/// Ordered list of tunable dimensions
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HyperparameterSpace {
    dimensions: Vec<Dimension>,
}

impl HyperparameterSpace {
    /// Create a new empty space
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a dimension
    pub fn add(mut self, dim: Dimension) -> Self {
        self.dimensions.push(dim);
        self
    }

    /// Add a dimension after checking its declaration
    pub fn try_add(self, dim: Dimension) -> Result<Self> {
        dim.check()?;
        if self.dimension(&dim.name).is_some() {
            return Err(PrognosError::ConfigError(format!(
                "dimension '{}' declared twice",
                dim.name
            )));
        }
        Ok(self.add(dim))
    }

    /// Add a float dimension
    pub fn float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(Dimension::float(name, low, high))
    }

    /// Add a log-scale float dimension
    pub fn log_float(self, name: impl Into<String>, low: f64, high: f64) -> Self {
        self.add(Dimension::log_float(name, low, high))
    }

    /// Add an integer dimension
    pub fn integer(self, name: impl Into<String>, low: i64, high: i64) -> Self {
        self.add(Dimension::integer(name, low, high))
    }

    /// Add a string categorical dimension
    pub fn categorical(self, name: impl Into<String>, choices: Vec<&str>) -> Self {
        self.add(Dimension::categorical(
            name,
            choices.into_iter().map(ParameterValue::from).collect(),
        ))
    }

    pub fn dimensions(&self) -> &[Dimension] {
        &self.dimensions
    }

    pub fn len(&self) -> usize {
        self.dimensions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dimensions.is_empty()
    }

    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.iter().find(|d| d.name == name)
    }

    /// Check every dimension and reject duplicate names
    pub fn check(&self) -> Result<()> {
        for (i, dim) in self.dimensions.iter().enumerate() {
            dim.check()?;
            if self.dimensions[..i].iter().any(|d| d.name == dim.name) {
                return Err(PrognosError::ConfigError(format!(
                    "dimension '{}' declared twice",
                    dim.name
                )));
            }
        }
        Ok(())
    }

    /// Sample a random configuration
    pub fn sample(&self, rng: &mut impl Rng) -> Configuration {
        self.dimensions
            .iter()
            .map(|d| (d.name.clone(), d.sample(rng)))
            .collect()
    }

    /// Default configuration
    pub fn defaults(&self) -> Configuration {
        self.dimensions
            .iter()
            .map(|d| (d.name.clone(), d.default.clone()))
            .collect()
    }

    /// Validate every supplied value; unknown names are rejected
    pub fn validate(&self, config: &Configuration) -> Result<()> {
        for (name, value) in config {
            let dim = self.dimension(name).ok_or_else(|| PrognosError::InvalidHyperparameter {
                name: name.clone(),
                value: value.to_string(),
                reason: "not a declared dimension".to_string(),
            })?;
            dim.validate(value)?;
        }
        Ok(())
    }

    /// Fill unspecified values with defaults, then validate
    pub fn complete(&self, partial: &Configuration) -> Result<Configuration> {
        self.validate(partial)?;
        let mut config = self.defaults();
        for (name, value) in partial {
            config.insert(name.clone(), value.clone());
        }
        Ok(config)
    }

    /// Encode into the unit hypercube, in dimension order
    pub fn encode(&self, config: &Configuration) -> Vec<f64> {
        self.dimensions
            .iter()
            .map(|d| d.encode(config.get(&d.name).unwrap_or(&d.default)))
            .collect()
    }

    /// Prefix every dimension name with `prefix.`
    pub fn prefixed(&self, prefix: &str) -> Self {
        Self {
            dimensions: self
                .dimensions
                .iter()
                .map(|d| Dimension {
                    name: format!("{}.{}", prefix, d.name),
                    ..d.clone()
                })
                .collect(),
        }
    }

    /// Concatenate two spaces
    pub fn extend(mut self, other: HyperparameterSpace) -> Self {
        self.dimensions.extend(other.dimensions);
        self
    }

    /// One line per dimension
    pub fn describe(&self) -> Vec<String> {
        self.dimensions.iter().map(|d| d.describe()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand_xoshiro::Xoshiro256PlusPlus;

    fn space() -> HyperparameterSpace {
        HyperparameterSpace::new()
            .log_float("C", 1e-3, 1e2)
            .integer("max_iter", 100, 1000)
            .categorical("class_weight", vec!["none", "balanced"])
    }

    #[test]
    fn test_space_builder() {
        let space = space();
        assert_eq!(space.len(), 3);
        assert_eq!(space.defaults().len(), 3);
    }

    #[test]
    fn test_samples_are_valid() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(42);
        let space = space();
        for _ in 0..200 {
            let config = space.sample(&mut rng);
            space.validate(&config).unwrap();
        }
    }

    #[test]
    fn test_integer_step_grid() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(7);
        let dim = Dimension::integer_step("k", 1, 9, 2);
        for _ in 0..50 {
            let v = dim.sample(&mut rng).as_int().unwrap();
            assert_eq!((v - 1) % 2, 0);
        }
        assert!(dim.validate(&ParameterValue::Int(4)).is_err());
    }

    #[test]
    fn test_out_of_bounds_rejected() {
        let space = space();
        let mut config = Configuration::new();
        config.insert("C".to_string(), ParameterValue::Float(500.0));
        assert!(matches!(
            space.validate(&config),
            Err(PrognosError::InvalidHyperparameter { .. })
        ));

        let mut config = Configuration::new();
        config.insert("max_iter".to_string(), ParameterValue::Str("many".into()));
        assert!(space.validate(&config).is_err());
    }

    #[test]
    fn test_complete_fills_defaults() {
        let space = space();
        let mut partial = Configuration::new();
        partial.insert("max_iter".to_string(), ParameterValue::Int(300));
        let config = space.complete(&partial).unwrap();
        assert_eq!(config["max_iter"], ParameterValue::Int(300));
        assert_eq!(config["class_weight"], ParameterValue::from("none"));
    }

    #[test]
    fn test_encode_unit_cube() {
        let space = space();
        let encoded = space.encode(&space.defaults());
        assert!(encoded.iter().all(|v| (0.0..=1.0).contains(v)));
        // geometric midpoint of a log range sits at 0.5
        assert!((encoded[0] - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_malformed_dimensions_rejected() {
        assert!(space().check().is_ok());

        let malformed = [
            Dimension::integer("k", 5, 1),
            Dimension::integer_step("k", 1, 9, 0),
            Dimension::float("x", 1.0, f64::NAN),
            Dimension::float("x", 2.0, -2.0),
            Dimension::log_float("alpha", 0.0, 1.0),
            Dimension::categorical("kernel", vec![]),
            Dimension::float("x", 0.0, 1.0).with_default(ParameterValue::Float(3.0)),
        ];
        for dim in malformed {
            assert!(
                matches!(dim.check(), Err(PrognosError::ConfigError(_))),
                "accepted {:?}",
                dim
            );
        }

        let doubled = space().float("C", 0.0, 1.0);
        assert!(matches!(doubled.check(), Err(PrognosError::ConfigError(_))));
        assert!(space().try_add(Dimension::integer("max_iter", 1, 2)).is_err());
        assert!(space().try_add(Dimension::integer("k", 1, 2)).is_ok());
    }

    #[test]
    fn test_prefixed() {
        let space = space().prefixed("logistic_regression");
        assert!(space.dimension("logistic_regression.C").is_some());
    }
}
