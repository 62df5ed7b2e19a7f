//! Greedy forward ensemble selection

use super::{blend, normalize_weights, EnsembleModel};
use crate::data::{Dataset, Target};
use crate::error::{PrognosError, Result};
use crate::evaluation::Evaluator;
use crate::metrics::{Metric, Predictions, SurvivalFunction};
use crate::optimizer::Configuration;
use crate::pipeline::PipelineTemplate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Ensemble selection limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Maximum number of additions (members counted with repetition)
    pub max_size: usize,
    /// Maximum times a single candidate may be added
    pub max_repeats: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            max_size: 10,
            max_repeats: 3,
        }
    }
}

impl EnsembleConfig {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_max_repeats(mut self, max_repeats: usize) -> Self {
        self.max_repeats = max_repeats;
        self
    }
}

/// A template that survived the score threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub template: PipelineTemplate,
    pub configuration: Configuration,
    /// Mean cross-validated primary metric of the best trial
    pub score: f64,
}

/// Builds an [`EnsembleModel`] from surviving candidates.
///
/// Weights come from greedy forward selection with replacement on
/// out-of-fold predictions; members are then refitted on the full dataset.
pub struct EnsembleSelector<'a> {
    evaluator: &'a Evaluator<'a>,
    metric: Metric,
    config: EnsembleConfig,
}

impl<'a> EnsembleSelector<'a> {
    pub fn new(evaluator: &'a Evaluator<'a>, metric: Metric, config: EnsembleConfig) -> Self {
        Self {
            evaluator,
            metric,
            config,
        }
    }

    pub fn select(&self, candidates: &[Candidate], dataset: &Dataset) -> Result<EnsembleModel> {
        if candidates.is_empty() {
            return Err(PrognosError::InvalidInput(
                "ensemble selection needs at least one candidate".to_string(),
            ));
        }

        // best first, ties by template id
        let mut ordered: Vec<&Candidate> = candidates.iter().collect();
        ordered.sort_by(|a, b| {
            self.metric
                .oriented(b.score)
                .total_cmp(&self.metric.oriented(a.score))
                .then_with(|| a.template.id().cmp(&b.template.id()))
        });

        let mut usable = Vec::new();
        let mut oof = Vec::new();
        for candidate in &ordered {
            match self
                .evaluator
                .cross_val_predict(&candidate.template, &candidate.configuration, dataset)
            {
                Ok(p) => {
                    usable.push(*candidate);
                    oof.push(p);
                }
                Err(e) => warn!(
                    template = %candidate.template,
                    error = %e,
                    "out-of-fold predictions failed, candidate left out of selection"
                ),
            }
        }

        let censoring = self.evaluator.censoring(dataset)?;
        let refs: Vec<&Predictions> = oof.iter().collect();
        let weights = self.greedy_weights(&refs, dataset.target(), censoring.as_ref())?;

        let chosen: Vec<(&Candidate, f64)> = if weights.iter().any(|w| *w > 0.0) {
            usable
                .iter()
                .zip(weights.iter())
                .filter(|(_, w)| **w > 0.0)
                .map(|(c, w)| (*c, *w))
                .collect()
        } else {
            warn!("no candidate could be scored out of fold, using the best candidate alone");
            vec![(ordered[0], 1.0)]
        };

        let mut members = Vec::with_capacity(chosen.len());
        for (candidate, weight) in chosen {
            let fitted = candidate
                .template
                .instantiate(self.evaluator.registry(), &candidate.configuration, self.evaluator.horizons())
                .and_then(|mut pipeline| {
                    pipeline.fit(dataset.x(), dataset.target())?;
                    Ok(pipeline)
                });
            match fitted {
                Ok(pipeline) => members.push((pipeline, weight)),
                Err(e) => warn!(
                    template = %candidate.template,
                    error = %e,
                    "full-data fit failed, dropping ensemble member"
                ),
            }
        }
        if members.is_empty() {
            return Err(PrognosError::TrainingError(
                "no ensemble member could be fitted on the full dataset".to_string(),
            ));
        }

        let model = EnsembleModel::new(members, self.evaluator.task(), self.metric)?;
        info!(
            members = model.members().len(),
            weights = ?model.weights(),
            "ensemble selected"
        );
        Ok(model)
    }

    /// Greedy forward selection with replacement.
    ///
    /// Starting from an empty ensemble, each round adds the candidate whose
    /// addition gives the best blended score; selection stops when no
    /// addition strictly improves it or `max_size` is reached. Ties go to
    /// the earlier candidate. Returns normalised weights, all zero when
    /// nothing could be scored.
    pub fn greedy_weights(
        &self,
        predictions: &[&Predictions],
        truth: Target<'_>,
        censoring: Option<&SurvivalFunction>,
    ) -> Result<Vec<f64>> {
        let mut counts = vec![0usize; predictions.len()];
        let mut current = f64::NEG_INFINITY;

        for round in 0..self.config.max_size {
            let mut best: Option<(usize, f64)> = None;
            for i in 0..predictions.len() {
                if counts[i] >= self.config.max_repeats {
                    continue;
                }
                counts[i] += 1;
                let score = self.blended_score(predictions, &counts, truth, censoring);
                counts[i] -= 1;

                if let Some(score) = score {
                    if best.map_or(true, |(_, s)| score > s) {
                        best = Some((i, score));
                    }
                }
            }

            match best {
                Some((i, score)) if score > current => {
                    counts[i] += 1;
                    current = score;
                    debug!(round, candidate = i, score = self.metric.oriented(score), "ensemble addition");
                }
                _ => break,
            }
        }

        let mut weights: Vec<f64> = counts.iter().map(|c| *c as f64).collect();
        if counts.iter().any(|c| *c > 0) {
            normalize_weights(&mut weights)?;
        }
        Ok(weights)
    }

    /// Oriented score of the blend given by `counts`, `None` if unscorable
    fn blended_score(
        &self,
        predictions: &[&Predictions],
        counts: &[usize],
        truth: Target<'_>,
        censoring: Option<&SurvivalFunction>,
    ) -> Option<f64> {
        let total: usize = counts.iter().sum();
        let (members, weights): (Vec<&Predictions>, Vec<f64>) = predictions
            .iter()
            .zip(counts)
            .filter(|(_, c)| **c > 0)
            .map(|(p, c)| (*p, *c as f64 / total as f64))
            .unzip();
        let blended = blend(&members, &weights).ok()?;
        self.metric
            .compute(&blended, truth, censoring)
            .ok()
            .map(|v| self.metric.oriented(v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::TaskType;
    use crate::plugins::PluginRegistry;
    use ndarray::{array, Array1};

    #[test]
    fn test_greedy_prefers_best_and_respects_limits() {
        let registry = PluginRegistry::new();
        let evaluator = Evaluator::new(&registry, TaskType::Regression);
        let selector = EnsembleSelector::new(
            &evaluator,
            Metric::Mae,
            EnsembleConfig::default().with_max_repeats(2).with_max_size(4),
        );

        let y: Array1<f64> = array![1.0, 2.0, 3.0, 4.0];
        let good = Predictions::Values(array![1.1, 2.1, 3.1, 4.1]);
        let bad = Predictions::Values(array![4.0, 1.0, 0.0, 9.0]);
        let weights = selector
            .greedy_weights(&[&bad, &good], Target::new(&y, None), None)
            .unwrap();
        assert_eq!(weights, vec![0.0, 1.0]);
    }

    #[test]
    fn test_greedy_mixes_complementary_members() {
        let registry = PluginRegistry::new();
        let evaluator = Evaluator::new(&registry, TaskType::Regression);
        let selector = EnsembleSelector::new(&evaluator, Metric::Mae, EnsembleConfig::default());

        let y: Array1<f64> = array![0.0, 0.0];
        let high = Predictions::Values(array![1.0, 1.0]);
        let low = Predictions::Values(array![-1.0, -1.0]);
        let weights = selector
            .greedy_weights(&[&high, &low], Target::new(&y, None), None)
            .unwrap();
        assert_eq!(weights, vec![0.5, 0.5]);
        assert_eq!(weights.iter().sum::<f64>(), 1.0);
    }

    #[test]
    fn test_unscorable_predictions_give_zero_weights() {
        let registry = PluginRegistry::new();
        let evaluator = Evaluator::new(&registry, TaskType::Classification);
        let selector = EnsembleSelector::new(&evaluator, Metric::Aucroc, EnsembleConfig::default());

        // a single class makes AUROC undefined
        let y: Array1<f64> = array![1.0, 1.0];
        let p = Predictions::Probabilities {
            classes: vec![0.0, 1.0],
            values: array![[0.2, 0.8], [0.4, 0.6]],
        };
        let weights = selector.greedy_weights(&[&p], Target::new(&y, None), None).unwrap();
        assert_eq!(weights, vec![0.0]);
    }
}
