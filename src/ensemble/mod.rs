//! Weighted ensembles of fitted pipelines
//!
//! The final model of a study is an [`EnsembleModel`]: fitted pipelines with
//! non-negative weights summing to one, combined by weighted averaging of
//! their probabilities, values or risks.

mod selection;

pub use selection::{Candidate, EnsembleConfig, EnsembleSelector};

use crate::data::TaskType;
use crate::error::{PrognosError, Result};
use crate::export::{decode, encode, write_atomic, ArtifactKind};
use crate::metrics::{Metric, Predictions};
use crate::pipeline::{Pipeline, Predict, SavedPipeline};
use crate::plugins::PluginRegistry;
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Weighted average of predictions of the same kind.
///
/// Probabilities are aligned on the sorted union of the members' classes.
pub fn blend(predictions: &[&Predictions], weights: &[f64]) -> Result<Predictions> {
    if predictions.is_empty() || predictions.len() != weights.len() {
        return Err(PrognosError::InvalidInput(format!(
            "cannot blend {} predictions with {} weights",
            predictions.len(),
            weights.len()
        )));
    }
    let n = predictions[0].n_samples();
    if predictions.iter().any(|p| p.n_samples() != n) {
        return Err(PrognosError::ShapeError {
            expected: format!("{} rows in every member", n),
            actual: "members disagree".to_string(),
        });
    }

    match predictions[0] {
        Predictions::Probabilities { .. } => {
            let mut classes: Vec<f64> = Vec::new();
            for p in predictions {
                match p {
                    Predictions::Probabilities { classes: c, .. } => classes.extend(c.iter().copied()),
                    _ => return Err(mixed_kinds()),
                }
            }
            classes.sort_by(|a, b| a.total_cmp(b));
            classes.dedup();

            let mut values = Array2::zeros((n, classes.len()));
            for (p, w) in predictions.iter().zip(weights) {
                values.scaled_add(*w, &p.aligned_probabilities(&classes)?);
            }
            Ok(Predictions::Probabilities { classes, values })
        }
        Predictions::Values(_) => {
            let mut values = Array1::zeros(n);
            for (p, w) in predictions.iter().zip(weights) {
                match p {
                    Predictions::Values(v) => values.scaled_add(*w, v),
                    _ => return Err(mixed_kinds()),
                }
            }
            Ok(Predictions::Values(values))
        }
        Predictions::Risks { horizons, values: first } => {
            let mut values = Array2::zeros(first.raw_dim());
            for (p, w) in predictions.iter().zip(weights) {
                match p {
                    Predictions::Risks { horizons: h, values: v } if h == horizons => {
                        values.scaled_add(*w, v)
                    }
                    _ => return Err(mixed_kinds()),
                }
            }
            Ok(Predictions::Risks {
                horizons: horizons.clone(),
                values,
            })
        }
    }
}

fn mixed_kinds() -> PrognosError {
    PrognosError::InvalidInput("ensemble members produce different prediction kinds".to_string())
}

/// Rescale to sum to one; the largest weight absorbs rounding drift
pub(crate) fn normalize_weights(weights: &mut [f64]) -> Result<()> {
    let total: f64 = weights.iter().sum();
    if weights.is_empty() || !total.is_finite() || total <= 0.0 || weights.iter().any(|w| *w < 0.0) {
        return Err(PrognosError::ComputationError(format!(
            "cannot normalise weights {:?}",
            weights
        )));
    }
    for w in weights.iter_mut() {
        *w /= total;
    }
    let largest = (0..weights.len())
        .max_by(|&a, &b| weights[a].total_cmp(&weights[b]).then(b.cmp(&a)))
        .unwrap_or(0);
    let rest: f64 = weights
        .iter()
        .enumerate()
        .filter(|(i, _)| *i != largest)
        .map(|(_, w)| w)
        .sum();
    weights[largest] = 1.0 - rest;
    Ok(())
}

/// Fitted pipeline with its ensemble weight
#[derive(Debug)]
pub struct EnsembleMember {
    pub pipeline: Pipeline,
    pub weight: f64,
}

#[derive(Serialize, Deserialize)]
struct SavedEnsemble {
    task: TaskType,
    metric: Metric,
    members: Vec<(SavedPipeline, f64)>,
}

/// Final study model
#[derive(Debug)]
pub struct EnsembleModel {
    members: Vec<EnsembleMember>,
    task: TaskType,
    metric: Metric,
}

impl EnsembleModel {
    /// Build from fitted pipelines; weights are renormalised to sum to one
    pub fn new(members: Vec<(Pipeline, f64)>, task: TaskType, metric: Metric) -> Result<Self> {
        if members.is_empty() {
            return Err(PrognosError::InvalidInput("an ensemble needs at least one member".to_string()));
        }
        if let Some((p, _)) = members.iter().find(|(p, _)| !p.is_fitted()) {
            return Err(PrognosError::InvalidInput(format!(
                "ensemble member {} is not fitted",
                p.template()
            )));
        }
        let mut weights: Vec<f64> = members.iter().map(|(_, w)| *w).collect();
        normalize_weights(&mut weights)?;
        let members = members
            .into_iter()
            .zip(weights)
            .map(|((pipeline, _), weight)| EnsembleMember { pipeline, weight })
            .collect();
        Ok(Self { members, task, metric })
    }

    pub fn members(&self) -> &[EnsembleMember] {
        &self.members
    }

    pub fn weights(&self) -> Vec<f64> {
        self.members.iter().map(|m| m.weight).collect()
    }

    pub fn task(&self) -> TaskType {
        self.task
    }

    /// Metric the weights were selected for
    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let saved = SavedEnsemble {
            task: self.task,
            metric: self.metric,
            members: self
                .members
                .iter()
                .map(|m| Ok((m.pipeline.save()?, m.weight)))
                .collect::<Result<Vec<_>>>()?,
        };
        encode(ArtifactKind::Ensemble, &saved)
    }

    /// Restore with plugin constructors from `registry`
    pub fn from_bytes(bytes: &[u8], registry: &PluginRegistry) -> Result<Self> {
        let saved: SavedEnsemble = decode(ArtifactKind::Ensemble, bytes)?;
        let members = saved
            .members
            .iter()
            .map(|(p, w)| Ok((Pipeline::restore(p, registry)?, *w)))
            .collect::<Result<Vec<_>>>()?;
        Self::new(members, saved.task, saved.metric)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        write_atomic(path.as_ref(), &self.to_bytes()?)
    }

    pub fn load<P: AsRef<Path>>(path: P, registry: &PluginRegistry) -> Result<Self> {
        let bytes = fs::read(path.as_ref()).map_err(|e| {
            PrognosError::PersistenceError(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::from_bytes(&bytes, registry)
    }
}

impl Predict for EnsembleModel {
    fn predict(&self, x: &Array2<f64>) -> Result<Predictions> {
        let predictions = self
            .members
            .iter()
            .map(|m| m.pipeline.predict(x))
            .collect::<Result<Vec<_>>>()?;
        let refs: Vec<&Predictions> = predictions.iter().collect();
        blend(&refs, &self.weights())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_normalize_sums_to_one_exactly() {
        let mut w = vec![1.0, 1.0, 1.0];
        normalize_weights(&mut w).unwrap();
        assert_eq!(w.iter().sum::<f64>(), 1.0);
        assert!(w.iter().all(|v| *v >= 0.0));

        let mut bad = vec![0.0, 0.0];
        assert!(normalize_weights(&mut bad).is_err());
    }

    #[test]
    fn test_blend_aligns_classes() {
        let a = Predictions::Probabilities {
            classes: vec![0.0, 1.0],
            values: array![[0.8, 0.2]],
        };
        let b = Predictions::Probabilities {
            classes: vec![1.0, 2.0],
            values: array![[0.4, 0.6]],
        };
        match blend(&[&a, &b], &[0.5, 0.5]).unwrap() {
            Predictions::Probabilities { classes, values } => {
                assert_eq!(classes, vec![0.0, 1.0, 2.0]);
                assert!((values[[0, 0]] - 0.4).abs() < 1e-12);
                assert!((values[[0, 1]] - 0.3).abs() < 1e-12);
                assert!((values[[0, 2]] - 0.3).abs() < 1e-12);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_blend_rejects_mixed_kinds() {
        let a = Predictions::Values(array![1.0]);
        let b = Predictions::Risks {
            horizons: vec![1.0],
            values: array![[0.5]],
        };
        assert!(blend(&[&a, &b], &[0.5, 0.5]).is_err());
    }

    #[test]
    fn test_blend_values() {
        let a = Predictions::Values(array![1.0, 2.0]);
        let b = Predictions::Values(array![3.0, 6.0]);
        assert_eq!(
            blend(&[&a, &b], &[0.75, 0.25]).unwrap(),
            Predictions::Values(array![1.5, 3.0])
        );
    }
}
