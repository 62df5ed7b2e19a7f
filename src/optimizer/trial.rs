//! Trial records and best-trial ordering

use super::search_space::Configuration;
use crate::metrics::{Metric, MetricSummary};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Outcome of a trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TrialStatus {
    Complete,
    /// Evaluation raised; scores hold the metric sentinel
    Failed { reason: String },
}

/// One evaluated configuration. Immutable once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    /// Monotonically increasing across the template's whole history
    pub index: usize,
    pub configuration: Configuration,
    /// Mean of the primary metric across folds
    pub value: f64,
    /// Std of the primary metric across folds
    pub std: f64,
    /// `value` oriented so that larger is better
    pub objective: f64,
    pub metrics: MetricSummary,
    pub status: TrialStatus,
    pub duration_secs: f64,
}

impl Trial {
    pub fn completed(
        index: usize,
        configuration: Configuration,
        metric: Metric,
        metrics: MetricSummary,
        duration_secs: f64,
    ) -> Self {
        let (value, std) = metrics
            .get(metric.name())
            .map(|s| (s.mean, s.std))
            .unwrap_or((metric.sentinel(), 0.0));
        Self {
            index,
            configuration,
            value,
            std,
            objective: metric.oriented(value),
            metrics,
            status: TrialStatus::Complete,
            duration_secs,
        }
    }

    pub fn failed(
        index: usize,
        configuration: Configuration,
        metric: Metric,
        reason: impl Into<String>,
        duration_secs: f64,
    ) -> Self {
        let value = metric.sentinel();
        Self {
            index,
            configuration,
            value,
            std: 0.0,
            objective: metric.oriented(value),
            metrics: MetricSummary::new(),
            status: TrialStatus::Failed {
                reason: reason.into(),
            },
            duration_secs,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == TrialStatus::Complete
    }

    /// Ranking: higher objective, then lower std, then earlier index
    pub fn rank_cmp(&self, other: &Trial) -> Ordering {
        other
            .objective
            .total_cmp(&self.objective)
            .then_with(|| self.std.total_cmp(&other.std))
            .then_with(|| self.index.cmp(&other.index))
    }
}

/// Best complete trial of a history, if any trial completed
pub fn best_trial(history: &[Trial]) -> Option<&Trial> {
    history
        .iter()
        .filter(|t| t.is_complete())
        .min_by(|a, b| a.rank_cmp(b))
}
