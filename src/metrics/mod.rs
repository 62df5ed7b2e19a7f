//! Task-specific evaluation metrics
//!
//! Classification: AUROC, accuracy, macro F1. Regression: R², MAE.
//! Risk estimation: Uno's C-index and the IPCW Brier score, both averaged
//! over the evaluation horizons.

pub mod survival;

pub use survival::{brier_score_ipcw, concordance_index_ipcw, kaplan_meier, SurvivalFunction};

use crate::data::{distinct_sorted, Target, TaskType};
use crate::error::{PrognosError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Output of a fitted predictor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predictions {
    /// Class probabilities, one column per entry of `classes`
    Probabilities { classes: Vec<f64>, values: Array2<f64> },
    /// Continuous predictions
    Values(Array1<f64>),
    /// Event risk, one column per horizon
    Risks { horizons: Vec<f64>, values: Array2<f64> },
}

impl Predictions {
    pub fn n_samples(&self) -> usize {
        match self {
            Predictions::Probabilities { values, .. } => values.nrows(),
            Predictions::Values(values) => values.len(),
            Predictions::Risks { values, .. } => values.nrows(),
        }
    }

    /// Most probable class per row, for probability outputs
    pub fn labels(&self) -> Result<Array1<f64>> {
        match self {
            Predictions::Probabilities { classes, values } => Ok(values
                .rows()
                .into_iter()
                .map(|row| {
                    let mut best = 0;
                    for (j, p) in row.iter().enumerate() {
                        if *p > row[best] {
                            best = j;
                        }
                    }
                    classes.get(best).copied().unwrap_or(f64::NAN)
                })
                .collect()),
            _ => Err(PrognosError::InvalidInput(
                "labels are only defined for class probabilities".to_string(),
            )),
        }
    }

    /// Probability columns reordered onto `classes`; classes the model never
    /// saw get zero probability
    pub fn aligned_probabilities(&self, classes: &[f64]) -> Result<Array2<f64>> {
        let (own, values) = match self {
            Predictions::Probabilities { classes, values } => (classes, values),
            _ => {
                return Err(PrognosError::InvalidInput(
                    "only class probabilities can be aligned".to_string(),
                ))
            }
        };
        let mut out = Array2::zeros((values.nrows(), classes.len()));
        for (j, class) in own.iter().enumerate() {
            let target = classes.iter().position(|c| c == class).ok_or_else(|| {
                PrognosError::DataError(format!("class {} missing from the label set", class))
            })?;
            out.column_mut(target).assign(&values.column(j));
        }
        Ok(out)
    }
}

/// Evaluation metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Aucroc,
    Accuracy,
    F1ScoreMacro,
    R2,
    Mae,
    CIndex,
    BrierScore,
}

impl Metric {
    pub fn name(&self) -> &'static str {
        match self {
            Metric::Aucroc => "aucroc",
            Metric::Accuracy => "accuracy",
            Metric::F1ScoreMacro => "f1_score_macro",
            Metric::R2 => "r2",
            Metric::Mae => "mae",
            Metric::CIndex => "c_index",
            Metric::BrierScore => "brier_score",
        }
    }

    pub fn higher_is_better(&self) -> bool {
        !matches!(self, Metric::Mae | Metric::BrierScore)
    }

    /// Worst attainable value, recorded for failed folds and trials
    pub fn sentinel(&self) -> f64 {
        match self {
            Metric::Aucroc | Metric::Accuracy | Metric::F1ScoreMacro | Metric::CIndex => 0.0,
            Metric::BrierScore => 1.0,
            Metric::R2 => -1e10,
            Metric::Mae => 1e10,
        }
    }

    /// Metrics reported for a task
    pub fn suite(task: TaskType) -> Vec<Metric> {
        match task {
            TaskType::Classification => vec![Metric::Aucroc, Metric::Accuracy, Metric::F1ScoreMacro],
            TaskType::Regression => vec![Metric::R2, Metric::Mae],
            TaskType::RiskEstimation => vec![Metric::CIndex, Metric::BrierScore],
        }
    }

    /// Default optimisation target for a task
    pub fn primary(task: TaskType) -> Metric {
        match task {
            TaskType::Classification => Metric::Aucroc,
            TaskType::Regression => Metric::R2,
            TaskType::RiskEstimation => Metric::CIndex,
        }
    }

    /// Whether the metric applies to a task
    pub fn supports(&self, task: TaskType) -> bool {
        Metric::suite(task).contains(self)
    }

    /// Map a value so that larger is always better
    pub fn oriented(&self, value: f64) -> f64 {
        if self.higher_is_better() {
            value
        } else {
            -value
        }
    }

    /// Direction-aware threshold check
    pub fn meets_threshold(&self, value: f64, threshold: f64) -> bool {
        if self.higher_is_better() {
            value >= threshold
        } else {
            value <= threshold
        }
    }

    /// Score predictions against the truth.
    ///
    /// `censoring` weights the survival metrics; when absent it is estimated
    /// from `truth` itself.
    pub fn compute(
        &self,
        predictions: &Predictions,
        truth: Target<'_>,
        censoring: Option<&SurvivalFunction>,
    ) -> Result<f64> {
        if predictions.n_samples() != truth.y.len() {
            return Err(PrognosError::ShapeError {
                expected: format!("{} predictions", truth.y.len()),
                actual: format!("{} predictions", predictions.n_samples()),
            });
        }

        let value = match (self, predictions) {
            (Metric::Aucroc, Predictions::Probabilities { classes, values }) => {
                auroc(truth.y, classes, values)?
            }
            (Metric::Accuracy, Predictions::Probabilities { .. }) => {
                accuracy(truth.y, &predictions.labels()?)
            }
            (Metric::F1ScoreMacro, Predictions::Probabilities { .. }) => {
                f1_macro(truth.y, &predictions.labels()?)
            }
            (Metric::R2, Predictions::Values(pred)) => r2_score(truth.y, pred),
            (Metric::Mae, Predictions::Values(pred)) => mean_absolute_error(truth.y, pred),
            (Metric::CIndex, Predictions::Risks { horizons, values })
            | (Metric::BrierScore, Predictions::Risks { horizons, values }) => {
                survival_score(*self, truth, horizons, values, censoring)?
            }
            _ => {
                return Err(PrognosError::InvalidInput(format!(
                    "metric {} cannot score this prediction kind",
                    self
                )))
            }
        };

        if value.is_finite() {
            Ok(value)
        } else {
            Err(PrognosError::ComputationError(format!("{} is not finite", self)))
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Mean and population standard deviation across folds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricStats {
    pub mean: f64,
    pub std: f64,
}

impl MetricStats {
    pub fn from_scores(scores: &[f64]) -> Self {
        if scores.is_empty() {
            return Self {
                mean: f64::NAN,
                std: f64::NAN,
            };
        }
        let n = scores.len() as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let var = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n;
        Self {
            mean,
            std: var.sqrt(),
        }
    }
}

/// Metric name to fold statistics
pub type MetricSummary = BTreeMap<String, MetricStats>;

/// Score every metric of a suite, failing on the first metric that fails
pub fn score_all(
    metrics: &[Metric],
    predictions: &Predictions,
    truth: Target<'_>,
    censoring: Option<&SurvivalFunction>,
) -> Result<BTreeMap<Metric, f64>> {
    metrics
        .iter()
        .map(|m| Ok((*m, m.compute(predictions, truth, censoring)?)))
        .collect()
}

/// Area under the ROC curve; macro one-vs-rest for more than two classes
pub fn auroc(y: &Array1<f64>, classes: &[f64], proba: &Array2<f64>) -> Result<f64> {
    if proba.ncols() != classes.len() {
        return Err(PrognosError::ShapeError {
            expected: format!("{} probability columns", classes.len()),
            actual: format!("{} probability columns", proba.ncols()),
        });
    }
    if classes.len() == 2 {
        let positive: Vec<bool> = y.iter().map(|v| *v == classes[1]).collect();
        let scores: Vec<f64> = proba.column(1).to_vec();
        return binary_auroc(&positive, &scores).ok_or_else(|| {
            PrognosError::ComputationError("AUROC needs both classes in the truth".to_string())
        });
    }

    let mut total = 0.0;
    let mut counted = 0usize;
    for (k, class) in classes.iter().enumerate() {
        let positive: Vec<bool> = y.iter().map(|v| v == class).collect();
        let scores: Vec<f64> = proba.column(k).to_vec();
        if let Some(auc) = binary_auroc(&positive, &scores) {
            total += auc;
            counted += 1;
        }
    }
    if counted == 0 {
        return Err(PrognosError::ComputationError(
            "AUROC undefined: no class has both positives and negatives".to_string(),
        ));
    }
    Ok(total / counted as f64)
}

/// Mann–Whitney AUC with average ranks for ties
fn binary_auroc(positive: &[bool], scores: &[f64]) -> Option<f64> {
    let n_pos = positive.iter().filter(|p| **p).count();
    let n_neg = positive.len() - n_pos;
    if n_pos == 0 || n_neg == 0 {
        return None;
    }

    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[a].total_cmp(&scores[b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && scores[order[j + 1]] == scores[order[i]] {
            j += 1;
        }
        // ranks i+1..=j+1 share their average
        let avg_rank = (i + j + 2) as f64 / 2.0;
        for &idx in &order[i..=j] {
            if positive[idx] {
                rank_sum += avg_rank;
            }
        }
        i = j + 1;
    }

    let n_pos = n_pos as f64;
    let u = rank_sum - n_pos * (n_pos + 1.0) / 2.0;
    Some(u / (n_pos * n_neg as f64))
}

pub fn accuracy(y: &Array1<f64>, pred: &Array1<f64>) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    let correct = y.iter().zip(pred.iter()).filter(|(a, b)| a == b).count();
    correct as f64 / y.len() as f64
}

/// Unweighted mean of per-class F1 over classes seen in truth or prediction
pub fn f1_macro(y: &Array1<f64>, pred: &Array1<f64>) -> f64 {
    let mut classes = distinct_sorted(y);
    classes.extend(distinct_sorted(pred));
    classes.sort_by(|a, b| a.total_cmp(b));
    classes.dedup();
    if classes.is_empty() {
        return f64::NAN;
    }

    let mut total = 0.0;
    for class in &classes {
        let mut tp = 0.0;
        let mut fp = 0.0;
        let mut fn_ = 0.0;
        for (t, p) in y.iter().zip(pred.iter()) {
            match (t == class, p == class) {
                (true, true) => tp += 1.0,
                (false, true) => fp += 1.0,
                (true, false) => fn_ += 1.0,
                _ => {}
            }
        }
        let denom = 2.0 * tp + fp + fn_;
        if denom > 0.0 {
            total += 2.0 * tp / denom;
        }
    }
    total / classes.len() as f64
}

pub fn r2_score(y: &Array1<f64>, pred: &Array1<f64>) -> f64 {
    let mean = y.mean().unwrap_or(0.0);
    let ss_res: f64 = y.iter().zip(pred.iter()).map(|(t, p)| (t - p).powi(2)).sum();
    let ss_tot: f64 = y.iter().map(|t| (t - mean).powi(2)).sum();
    if ss_tot == 0.0 {
        return if ss_res == 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - ss_res / ss_tot
}

pub fn mean_absolute_error(y: &Array1<f64>, pred: &Array1<f64>) -> f64 {
    if y.is_empty() {
        return f64::NAN;
    }
    y.iter().zip(pred.iter()).map(|(t, p)| (t - p).abs()).sum::<f64>() / y.len() as f64
}

fn survival_score(
    metric: Metric,
    truth: Target<'_>,
    horizons: &[f64],
    risks: &Array2<f64>,
    censoring: Option<&SurvivalFunction>,
) -> Result<f64> {
    let (event, time) = truth.survival()?;
    let event = event.to_vec();
    let time = time.to_vec();
    if horizons.is_empty() || risks.ncols() != horizons.len() {
        return Err(PrognosError::ShapeError {
            expected: format!("{} risk columns", horizons.len()),
            actual: format!("{} risk columns", risks.ncols()),
        });
    }

    let owned;
    let censoring = match censoring {
        Some(g) => g,
        None => {
            owned = SurvivalFunction::fit_censoring(&event, &time)?;
            &owned
        }
    };

    let mut total = 0.0;
    let mut counted = 0usize;
    for (k, &horizon) in horizons.iter().enumerate() {
        let risk = risks.column(k).to_vec();
        let score = match metric {
            Metric::CIndex => concordance_index_ipcw(censoring, &event, &time, &risk, horizon),
            _ => {
                let surv: Vec<f64> = risk.iter().map(|r| 1.0 - r).collect();
                brier_score_ipcw(censoring, &event, &time, &surv, horizon)
            }
        };
        // horizons without comparable pairs are skipped
        if let Ok(s) = score {
            total += s;
            counted += 1;
        }
    }

    if counted == 0 {
        return Err(PrognosError::ComputationError(format!(
            "{} undefined at every horizon",
            metric
        )));
    }
    Ok(total / counted as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_binary_auroc_with_ties() {
        let y = array![0.0, 0.0, 1.0, 1.0];
        let proba = array![[0.9, 0.1], [0.6, 0.4], [0.6, 0.4], [0.2, 0.8]];
        let auc = auroc(&y, &[0.0, 1.0], &proba).unwrap();
        // pairs: (0.4 vs 0.1) win, (0.4 vs 0.4) tie, (0.8 vs both) win
        assert!((auc - 0.875).abs() < 1e-12);
    }

    #[test]
    fn test_auroc_single_class_fails() {
        let y = array![1.0, 1.0];
        let proba = array![[0.5, 0.5], [0.2, 0.8]];
        assert!(auroc(&y, &[0.0, 1.0], &proba).is_err());
    }

    #[test]
    fn test_multiclass_auroc_perfect() {
        let y = array![0.0, 1.0, 2.0];
        let proba = array![[0.8, 0.1, 0.1], [0.1, 0.8, 0.1], [0.1, 0.1, 0.8]];
        let auc = auroc(&y, &[0.0, 1.0, 2.0], &proba).unwrap();
        assert!((auc - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_accuracy_and_f1() {
        let y = array![0.0, 1.0, 1.0, 0.0];
        let pred = array![0.0, 1.0, 0.0, 0.0];
        assert!((accuracy(&y, &pred) - 0.75).abs() < 1e-12);
        // class 0: tp=2 fp=1 fn=0 -> 0.8; class 1: tp=1 fp=0 fn=1 -> 2/3
        let expected = (0.8 + 2.0 / 3.0) / 2.0;
        assert!((f1_macro(&y, &pred) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_regression_metrics() {
        let y = array![1.0, 2.0, 3.0];
        assert!((r2_score(&y, &y) - 1.0).abs() < 1e-12);
        let flat = array![2.0, 2.0, 2.0];
        assert!(r2_score(&y, &flat).abs() < 1e-12);
        assert!((mean_absolute_error(&y, &flat) - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_sentinels_are_worst() {
        assert_eq!(Metric::Aucroc.sentinel(), 0.0);
        assert_eq!(Metric::BrierScore.sentinel(), 1.0);
        assert!(Metric::Mae.oriented(Metric::Mae.sentinel()) < Metric::Mae.oriented(0.0));
        assert!(!Metric::Mae.meets_threshold(2.0, 1.0));
        assert!(Metric::Aucroc.meets_threshold(0.7, 0.5));
    }

    #[test]
    fn test_metric_stats_population_std() {
        let stats = MetricStats::from_scores(&[1.0, 3.0]);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.std, 1.0);
    }

    #[test]
    fn test_compute_rejects_wrong_kind() {
        let y = array![1.0, 2.0];
        let preds = Predictions::Values(array![1.0, 2.0]);
        let result = Metric::Aucroc.compute(&preds, Target::new(&y, None), None);
        assert!(matches!(result, Err(PrognosError::InvalidInput(_))));
    }

    #[test]
    fn test_survival_metrics() {
        let event = array![1.0, 1.0, 0.0, 1.0, 0.0];
        let time = array![1.0, 2.0, 3.0, 4.0, 5.0];
        let risks = Predictions::Risks {
            horizons: vec![3.5],
            values: array![[0.9], [0.8], [0.4], [0.3], [0.1]],
        };
        let truth = Target::new(&event, Some(&time));
        let c = Metric::CIndex.compute(&risks, truth, None).unwrap();
        assert!((c - 1.0).abs() < 1e-12);
        let b = Metric::BrierScore.compute(&risks, truth, None).unwrap();
        assert!((0.0..1.0).contains(&b));
    }
}
