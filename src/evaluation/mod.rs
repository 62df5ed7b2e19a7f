//! Cross-validated evaluation of pipeline configurations
//!
//! The [`Evaluator`] splits a dataset into folds (stratified for
//! classification), fits a fresh pipeline per training fold and scores the
//! held-out fold with the task's metric suite. Fitted fold models are
//! dropped after scoring; only scores leave this module.

pub mod cross_validation;

pub use cross_validation::{CVSplit, CVStrategy, CrossValidator};

use crate::data::{Dataset, TaskType};
use crate::error::{PrognosError, Result};
use crate::metrics::{score_all, Metric, MetricStats, MetricSummary, Predictions, SurvivalFunction};
use crate::optimizer::Configuration;
use crate::pipeline::{PipelineTemplate, Predict};
use crate::plugins::PluginRegistry;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use tracing::{debug, warn};

/// Result of one cross-validated evaluation
#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Metric name to (mean, std) across all folds, failed folds included
    pub summary: MetricSummary,
    /// Per-fold scores; failed folds carry each metric's sentinel
    pub fold_scores: Vec<BTreeMap<Metric, f64>>,
    pub failed_folds: usize,
    pub n_folds: usize,
}

impl Evaluation {
    pub fn failure_rate(&self) -> f64 {
        if self.n_folds == 0 {
            0.0
        } else {
            self.failed_folds as f64 / self.n_folds as f64
        }
    }
}

/// K-fold evaluator bound to a registry and a task
#[derive(Debug, Clone)]
pub struct Evaluator<'a> {
    registry: &'a PluginRegistry,
    task: TaskType,
    n_folds: usize,
    metrics: Vec<Metric>,
    horizons: Vec<f64>,
    random_state: u64,
    parallel_folds: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(registry: &'a PluginRegistry, task: TaskType) -> Self {
        Self {
            registry,
            task,
            n_folds: 3,
            metrics: Metric::suite(task),
            horizons: Vec::new(),
            random_state: 0,
            parallel_folds: false,
        }
    }

    pub fn with_n_folds(mut self, n_folds: usize) -> Self {
        self.n_folds = n_folds;
        self
    }

    pub fn with_metrics(mut self, metrics: Vec<Metric>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Time horizons at which risk estimators are scored
    pub fn with_horizons(mut self, horizons: Vec<f64>) -> Self {
        self.horizons = horizons;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    /// Dispatch folds on the current rayon pool
    pub fn with_parallel_folds(mut self, parallel: bool) -> Self {
        self.parallel_folds = parallel;
        self
    }

    pub fn registry(&self) -> &'a PluginRegistry {
        self.registry
    }

    pub fn task(&self) -> TaskType {
        self.task
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn horizons(&self) -> &[f64] {
        &self.horizons
    }

    /// Fold assignment; identical for every call with the same dataset
    pub fn splits(&self, dataset: &Dataset) -> Result<Vec<CVSplit>> {
        CrossValidator::new(CVStrategy::for_task(self.task, self.n_folds))
            .with_random_state(self.random_state)
            .split(dataset.n_samples(), Some(dataset.y()))
    }

    /// Cross-validate one configuration of a template.
    ///
    /// Failed folds are scored with the metric sentinel and counted. Fails
    /// with [`PrognosError::FoldFailure`] only when every fold fails.
    pub fn evaluate(
        &self,
        template: &PipelineTemplate,
        config: &Configuration,
        dataset: &Dataset,
    ) -> Result<Evaluation> {
        let splits = self.splits(dataset)?;
        let results = self.run_folds(&splits, |split| self.score_fold(template, config, dataset, split));

        let mut fold_scores = Vec::with_capacity(results.len());
        let mut failed_folds = 0;
        let mut last_error = None;
        for (split, result) in splits.iter().zip(results) {
            match result {
                Ok(scores) => fold_scores.push(scores),
                Err(e) => {
                    warn!(
                        template = %template,
                        fold = split.fold_idx,
                        error = %e,
                        "fold failed, scoring with sentinel"
                    );
                    failed_folds += 1;
                    last_error = Some(e.to_string());
                    fold_scores.push(self.metrics.iter().map(|m| (*m, m.sentinel())).collect());
                }
            }
        }

        if failed_folds == splits.len() {
            return Err(PrognosError::FoldFailure {
                failed: failed_folds,
                total: splits.len(),
                last_error: last_error.unwrap_or_default(),
            });
        }

        let summary = self
            .metrics
            .iter()
            .map(|m| {
                let scores: Vec<f64> = fold_scores.iter().map(|f| f[m]).collect();
                (m.name().to_string(), MetricStats::from_scores(&scores))
            })
            .collect();

        debug!(template = %template, failed_folds, "evaluation finished");
        Ok(Evaluation {
            summary,
            fold_scores,
            failed_folds,
            n_folds: splits.len(),
        })
    }

    /// Out-of-fold predictions for every row, in dataset order.
    ///
    /// Class probabilities are aligned to the dataset's full label set. Any
    /// failing fold fails the whole call.
    pub fn cross_val_predict(
        &self,
        template: &PipelineTemplate,
        config: &Configuration,
        dataset: &Dataset,
    ) -> Result<Predictions> {
        let splits = self.splits(dataset)?;
        let results = self.run_folds(&splits, |split| {
            let train = dataset.subset(&split.train_indices);
            let test = dataset.subset(&split.test_indices);
            self.fold_predictions(template, config, &train, &test)
        });
        let folds = results.into_iter().collect::<Result<Vec<_>>>()?;

        let n = dataset.n_samples();
        match self.task {
            TaskType::Classification => {
                let classes = dataset.classes();
                let mut values = Array2::zeros((n, classes.len()));
                for (split, preds) in splits.iter().zip(folds.iter()) {
                    let aligned = preds.aligned_probabilities(&classes)?;
                    for (row, &idx) in split.test_indices.iter().enumerate() {
                        values.row_mut(idx).assign(&aligned.row(row));
                    }
                }
                Ok(Predictions::Probabilities { classes, values })
            }
            TaskType::Regression => {
                let mut values = Array1::zeros(n);
                for (split, preds) in splits.iter().zip(folds.iter()) {
                    let fold_values = match preds {
                        Predictions::Values(v) => v,
                        _ => return Err(unexpected_kind(template)),
                    };
                    for (row, &idx) in split.test_indices.iter().enumerate() {
                        values[idx] = fold_values[row];
                    }
                }
                Ok(Predictions::Values(values))
            }
            TaskType::RiskEstimation => {
                let mut values = Array2::zeros((n, self.horizons.len()));
                for (split, preds) in splits.iter().zip(folds.iter()) {
                    let fold_values = match preds {
                        Predictions::Risks { values, .. } if values.ncols() == self.horizons.len() => values,
                        _ => return Err(unexpected_kind(template)),
                    };
                    for (row, &idx) in split.test_indices.iter().enumerate() {
                        values.row_mut(idx).assign(&fold_values.row(row));
                    }
                }
                Ok(Predictions::Risks {
                    horizons: self.horizons.clone(),
                    values,
                })
            }
        }
    }

    /// Censoring distribution for survival metrics, fitted on the training rows
    pub fn censoring(&self, train: &Dataset) -> Result<Option<SurvivalFunction>> {
        if self.task != TaskType::RiskEstimation {
            return Ok(None);
        }
        let (event, time) = train.target().survival()?;
        let event = event.to_vec();
        let time = time.to_vec();
        Ok(Some(SurvivalFunction::fit_censoring(&event, &time)?))
    }

    fn fold_predictions(
        &self,
        template: &PipelineTemplate,
        config: &Configuration,
        train: &Dataset,
        test: &Dataset,
    ) -> Result<Predictions> {
        let mut pipeline = template.instantiate(self.registry, config, &self.horizons)?;
        pipeline.fit(train.x(), train.target())?;
        pipeline.predict(test.x())
    }

    fn score_fold(
        &self,
        template: &PipelineTemplate,
        config: &Configuration,
        dataset: &Dataset,
        split: &CVSplit,
    ) -> Result<BTreeMap<Metric, f64>> {
        let train = dataset.subset(&split.train_indices);
        let test = dataset.subset(&split.test_indices);
        let predictions = self.fold_predictions(template, config, &train, &test)?;
        let censoring = self.censoring(&train)?;
        score_all(&self.metrics, &predictions, test.target(), censoring.as_ref())
    }

    /// Run one closure per fold, catching panics, results in fold order
    fn run_folds<T, F>(&self, splits: &[CVSplit], fold: F) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&CVSplit) -> Result<T> + Sync,
    {
        let guarded = |split: &CVSplit| {
            panic::catch_unwind(AssertUnwindSafe(|| fold(split))).unwrap_or_else(|payload| {
                Err(PrognosError::TrainingError(format!(
                    "fold {} panicked: {}",
                    split.fold_idx,
                    panic_message(payload.as_ref())
                )))
            })
        };
        if self.parallel_folds {
            splits.par_iter().map(guarded).collect()
        } else {
            splits.iter().map(guarded).collect()
        }
    }
}

fn unexpected_kind(template: &PipelineTemplate) -> PrognosError {
    PrognosError::ComputationError(format!("{} produced an unexpected prediction kind", template))
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Score a fitted model on held-out data.
///
/// Returns the same mapping as cross-validation, with a single observation
/// per metric (std 0). For survival metrics the censoring distribution is
/// fitted on `reference` (typically the training data) when given, otherwise
/// on `data` itself.
pub fn evaluate_model<P: Predict + ?Sized>(
    model: &P,
    data: &Dataset,
    metrics: &[Metric],
    reference: Option<&Dataset>,
) -> Result<MetricSummary> {
    let predictions = model.predict(data.x())?;
    let censoring = match reference {
        Some(r) if r.time().is_some() => {
            let (event, time) = r.target().survival()?;
            Some(SurvivalFunction::fit_censoring(&event.to_vec(), &time.to_vec())?)
        }
        _ => None,
    };
    let scores = score_all(metrics, &predictions, data.target(), censoring.as_ref())?;
    Ok(scores
        .into_iter()
        .map(|(m, v)| (m.name().to_string(), MetricStats::from_scores(&[v])))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Target;
    use crate::export::{encode, ArtifactKind};
    use crate::plugins::{Plugin, PluginCategory, PluginFactory, PluginSubtype, Regressor};
    use crate::optimizer::HyperparameterSpace;
    use ndarray::array;
    use serde::{Deserialize, Serialize};

    fn classification_data() -> Dataset {
        let x = array![
            [0.1, 1.0],
            [0.3, 0.8],
            [0.2, 1.2],
            [0.4, 0.9],
            [0.5, 1.1],
            [2.1, 0.2],
            [2.3, 0.1],
            [1.9, 0.4],
            [2.5, 0.3],
            [2.2, 0.0]
        ];
        let y = array![0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        Dataset::new(x, y)
    }

    fn regression_data() -> Dataset {
        let x = Array2::from_shape_fn((10, 1), |(i, _)| i as f64);
        let y = x.column(0).mapv(|v| 2.0 * v + 1.0);
        Dataset::new(x, y)
    }

    /// Fails whenever its training fold has an even number of rows
    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct EvenFailing {
        mean: Option<f64>,
    }

    impl Plugin for EvenFailing {
        fn name(&self) -> &'static str {
            "even_failing"
        }

        fn fit(&mut self, x: &Array2<f64>, target: Target<'_>) -> Result<()> {
            if x.nrows() % 2 == 0 {
                return Err(PrognosError::TrainingError("even fold".to_string()));
            }
            self.mean = target.y.mean();
            Ok(())
        }

        fn to_bytes(&self) -> Result<Vec<u8>> {
            encode(ArtifactKind::Plugin, self)
        }
    }

    impl Regressor for EvenFailing {
        fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
            let mean = self.mean.ok_or(PrognosError::ModelNotFitted)?;
            Ok(Array1::from_elem(x.nrows(), mean))
        }
    }

    #[derive(Debug, Clone, Default, Serialize, Deserialize)]
    struct Panicking;

    impl Plugin for Panicking {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn fit(&mut self, _x: &Array2<f64>, _target: Target<'_>) -> Result<()> {
            panic!("numerical blow-up")
        }

        fn to_bytes(&self) -> Result<Vec<u8>> {
            encode(ArtifactKind::Plugin, self)
        }
    }

    impl Regressor for Panicking {
        fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
            Ok(Array1::zeros(x.nrows()))
        }
    }

    fn registry_with_faulty_plugins() -> PluginRegistry {
        let mut registry = PluginRegistry::with_builtin_plugins().unwrap();
        registry
            .register(
                "even_failing",
                PluginCategory::Prediction,
                PluginSubtype::Regressor,
                PluginFactory::regressor(|_| Ok(EvenFailing::default())),
                HyperparameterSpace::new(),
            )
            .unwrap();
        registry
            .register(
                "panicking",
                PluginCategory::Prediction,
                PluginSubtype::Regressor,
                PluginFactory::regressor(|_| Ok(Panicking)),
                HyperparameterSpace::new(),
            )
            .unwrap();
        registry
    }

    #[test]
    fn test_classification_summary() {
        let registry = PluginRegistry::with_builtin_plugins().unwrap();
        let evaluator = Evaluator::new(&registry, TaskType::Classification).with_n_folds(2);
        let template = PipelineTemplate::new(vec!["standard_scaler".into()], "gaussian_naive_bayes");
        let evaluation = evaluator
            .evaluate(&template, &Configuration::new(), &classification_data())
            .unwrap();

        assert_eq!(evaluation.failed_folds, 0);
        assert_eq!(evaluation.n_folds, 2);
        assert_eq!(evaluation.summary.len(), 3);
        assert!(evaluation.summary["aucroc"].mean > 0.9);
        assert!(evaluation.summary["accuracy"].mean > 0.9);
    }

    #[test]
    fn test_failed_fold_uses_sentinel() {
        let registry = registry_with_faulty_plugins();
        let evaluator = Evaluator::new(&registry, TaskType::Regression)
            .with_n_folds(3)
            .with_metrics(vec![Metric::Mae]);
        let template = PipelineTemplate::new(vec![], "even_failing");
        let evaluation = evaluator
            .evaluate(&template, &Configuration::new(), &regression_data())
            .unwrap();

        // folds of 4, 3, 3 rows leave training sets of 6, 7, 7
        assert_eq!(evaluation.failed_folds, 1);
        assert!((evaluation.failure_rate() - 1.0 / 3.0).abs() < 1e-12);
        assert!(evaluation.fold_scores.iter().any(|f| f[&Metric::Mae] == Metric::Mae.sentinel()));
        assert!(evaluation.summary["mae"].mean > 1e9);
    }

    #[test]
    fn test_all_folds_failing() {
        let registry = registry_with_faulty_plugins();
        let evaluator = Evaluator::new(&registry, TaskType::Regression).with_parallel_folds(true);
        let template = PipelineTemplate::new(vec![], "panicking");
        let result = evaluator.evaluate(&template, &Configuration::new(), &regression_data());
        match result {
            Err(PrognosError::FoldFailure { failed, total, last_error }) => {
                assert_eq!(failed, 3);
                assert_eq!(total, 3);
                assert!(last_error.contains("numerical blow-up"));
            }
            other => panic!("expected fold failure, got {:?}", other),
        }
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let registry = PluginRegistry::with_builtin_plugins().unwrap();
        let template = PipelineTemplate::new(vec![], "ridge_regression");
        let data = regression_data();
        let sequential = Evaluator::new(&registry, TaskType::Regression)
            .evaluate(&template, &Configuration::new(), &data)
            .unwrap();
        let parallel = Evaluator::new(&registry, TaskType::Regression)
            .with_parallel_folds(true)
            .evaluate(&template, &Configuration::new(), &data)
            .unwrap();
        assert_eq!(sequential.fold_scores, parallel.fold_scores);
    }

    #[test]
    fn test_cross_val_predict_covers_every_row() {
        let registry = PluginRegistry::with_builtin_plugins().unwrap();
        let evaluator = Evaluator::new(&registry, TaskType::Classification);
        let template = PipelineTemplate::new(vec![], "logistic_regression");
        let data = classification_data();
        let preds = evaluator
            .cross_val_predict(&template, &Configuration::new(), &data)
            .unwrap();
        match preds {
            Predictions::Probabilities { classes, values } => {
                assert_eq!(classes, vec![0.0, 1.0]);
                assert_eq!(values.nrows(), 10);
                for row in values.rows() {
                    assert!((row.sum() - 1.0).abs() < 1e-9);
                }
            }
            other => panic!("unexpected predictions {:?}", other),
        }
    }

    #[test]
    fn test_evaluate_model_on_held_out() {
        let registry = PluginRegistry::with_builtin_plugins().unwrap();
        let data = regression_data();
        let mut pipeline = PipelineTemplate::new(vec![], "ridge_regression")
            .instantiate(&registry, &Configuration::new(), &[])
            .unwrap();
        pipeline.fit(data.x(), data.target()).unwrap();

        let summary = evaluate_model(&pipeline, &data, &[Metric::R2, Metric::Mae], None).unwrap();
        assert!(summary["r2"].mean > 0.99);
        assert_eq!(summary["mae"].std, 0.0);
    }
}
