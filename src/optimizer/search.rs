//! Budgeted sequential search over one hyperparameter space

use super::proposer::{create_proposer, ProposerKind};
use super::search_space::{Configuration, HyperparameterSpace};
use super::trial::{best_trial, Trial};
use crate::error::Result;
use crate::metrics::{Metric, MetricSummary};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// Cooperative cancellation flag, observed between trials
#[derive(Debug, Clone, Default)]
pub struct StopHandle {
    flag: Arc<AtomicBool>,
}

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop; running searches return after their current trial
    pub fn stop(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a previous stop request; every clone observes the reset
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Trial-count and wall-clock limits; the first one reached ends the search
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SearchBudget {
    pub max_trials: usize,
    pub timeout_secs: Option<f64>,
}

impl SearchBudget {
    pub fn trials(max_trials: usize) -> Self {
        Self {
            max_trials,
            timeout_secs: None,
        }
    }

    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }
}

/// Configuration for the optimizer loop
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    pub budget: SearchBudget,
    pub proposer: ProposerKind,
    /// Random proposals before the surrogate is used
    pub n_startup_trials: usize,
    pub seed: u64,
    /// Primary metric; sets direction and failure sentinel
    pub metric: Metric,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            budget: SearchBudget::trials(50),
            proposer: ProposerKind::GaussianProcess,
            n_startup_trials: 5,
            seed: 0,
            metric: Metric::Aucroc,
        }
    }
}

impl SearchConfig {
    pub fn new(metric: Metric) -> Self {
        Self {
            metric,
            ..Self::default()
        }
    }

    /// Builder method to set the budget
    pub fn with_budget(mut self, budget: SearchBudget) -> Self {
        self.budget = budget;
        self
    }

    /// Builder method to set the proposer
    pub fn with_proposer(mut self, proposer: ProposerKind) -> Self {
        self.proposer = proposer;
        self
    }

    pub fn with_n_startup_trials(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }
}

/// Result of a search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    /// Best complete trial over the whole history
    pub best: Option<Trial>,
    /// Prior history followed by this search's trials
    pub history: Vec<Trial>,
    /// False when the stop handle cut the search short
    pub completed: bool,
    pub elapsed_secs: f64,
}

/// Sequential black-box optimizer
pub struct OptimizerLoop {
    config: SearchConfig,
}

impl OptimizerLoop {
    pub fn new(config: SearchConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run the search.
    ///
    /// Every trial of `prior_history` informs the proposer; new trial indices
    /// continue after it. `warm_start` is evaluated first when given. A failed
    /// evaluation is recorded with the metric sentinel and the loop continues.
    /// A malformed space fails with `ConfigError` before any trial runs.
    pub fn search<F>(
        &self,
        space: &HyperparameterSpace,
        objective: F,
        prior_history: Vec<Trial>,
        warm_start: Option<Configuration>,
        stop: &StopHandle,
    ) -> Result<SearchOutcome>
    where
        F: Fn(&Configuration) -> Result<MetricSummary>,
    {
        space.check()?;
        let start = Instant::now();
        let metric = self.config.metric;
        let budget = self.config.budget;
        let mut proposer =
            create_proposer(self.config.proposer, self.config.seed, self.config.n_startup_trials);

        let mut history = prior_history;
        for trial in &history {
            proposer.update(trial);
        }
        let mut next_index = history.iter().map(|t| t.index + 1).max().unwrap_or(0);
        let mut warm_start = warm_start.filter(|c| space.validate(c).is_ok());
        let mut completed = true;

        for _ in 0..budget.max_trials {
            if stop.is_stopped() {
                completed = false;
                break;
            }
            if let Some(t) = budget.timeout_secs {
                if start.elapsed().as_secs_f64() > t {
                    debug!(trials = history.len(), "search timeout reached");
                    break;
                }
            }

            let trial_start = Instant::now();
            let configuration = match warm_start.take() {
                Some(config) => config,
                None => proposer.propose(space, &history),
            };

            let outcome = panic::catch_unwind(AssertUnwindSafe(|| objective(&configuration)));
            let duration = trial_start.elapsed().as_secs_f64();
            let trial = match outcome {
                Ok(Ok(metrics)) if metrics.contains_key(metric.name()) => {
                    Trial::completed(next_index, configuration, metric, metrics, duration)
                }
                Ok(Ok(_)) => Trial::failed(
                    next_index,
                    configuration,
                    metric,
                    format!("objective did not report {}", metric),
                    duration,
                ),
                Ok(Err(e)) => Trial::failed(next_index, configuration, metric, e.to_string(), duration),
                Err(_) => Trial::failed(next_index, configuration, metric, "evaluation panicked", duration),
            };

            if trial.is_complete() {
                debug!(
                    trial = trial.index,
                    value = trial.value,
                    std = trial.std,
                    "trial complete"
                );
            } else {
                warn!(trial = trial.index, status = ?trial.status, "trial failed");
            }

            proposer.update(&trial);
            history.push(trial);
            next_index += 1;
        }

        Ok(SearchOutcome {
            best: best_trial(&history).cloned(),
            history,
            completed,
            elapsed_secs: start.elapsed().as_secs_f64(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PrognosError;
    use crate::metrics::MetricStats;

    fn summary(value: f64) -> MetricSummary {
        let mut m = MetricSummary::new();
        m.insert("r2".to_string(), MetricStats { mean: value, std: 0.0 });
        m
    }

    fn quadratic(config: &Configuration) -> Result<MetricSummary> {
        let x = config["x"].as_float().unwrap_or(0.0);
        Ok(summary(1.0 - (x - 0.3).powi(2)))
    }

    fn search_config(n: usize) -> SearchConfig {
        SearchConfig::new(Metric::R2)
            .with_budget(SearchBudget::trials(n))
            .with_seed(42)
    }

    #[test]
    fn test_search_respects_trial_budget() {
        let space = HyperparameterSpace::new().float("x", -1.0, 1.0);
        let outcome = OptimizerLoop::new(search_config(12)).search(
            &space,
            quadratic,
            Vec::new(),
            None,
            &StopHandle::new(),
        )
        .unwrap();
        assert_eq!(outcome.history.len(), 12);
        assert!(outcome.completed);
        let indices: Vec<usize> = outcome.history.iter().map(|t| t.index).collect();
        assert_eq!(indices, (0..12).collect::<Vec<_>>());
        assert!(outcome.best.unwrap().value > 0.5);
    }

    #[test]
    fn test_failures_are_recorded_not_raised() {
        let space = HyperparameterSpace::new().float("x", 0.0, 1.0);
        let objective = |config: &Configuration| -> Result<MetricSummary> {
            let x = config["x"].as_float().unwrap_or(0.0);
            if x < 0.5 {
                Err(PrognosError::TrainingError("diverged".to_string()))
            } else {
                Ok(summary(x))
            }
        };
        let outcome = OptimizerLoop::new(search_config(10).with_proposer(ProposerKind::Random))
            .search(&space, objective, Vec::new(), None, &StopHandle::new())
            .unwrap();
        assert_eq!(outcome.history.len(), 10);
        let failed = outcome.history.iter().filter(|t| !t.is_complete()).count();
        assert!(failed > 0);
        assert!(outcome
            .history
            .iter()
            .filter(|t| !t.is_complete())
            .all(|t| t.value == Metric::R2.sentinel()));
    }

    #[test]
    fn test_panicking_objective_is_contained() {
        let space = HyperparameterSpace::new().float("x", 0.0, 1.0);
        let objective = |_: &Configuration| -> Result<MetricSummary> { panic!("bad plugin") };
        let outcome = OptimizerLoop::new(search_config(3))
            .search(&space, objective, Vec::new(), None, &StopHandle::new())
            .unwrap();
        assert_eq!(outcome.history.len(), 3);
        assert!(outcome.best.is_none());
    }

    #[test]
    fn test_stop_handle_returns_partial() {
        let space = HyperparameterSpace::new().float("x", 0.0, 1.0);
        let stop = StopHandle::new();
        let stopper = stop.clone();
        let objective = move |config: &Configuration| -> Result<MetricSummary> {
            stopper.stop();
            quadratic(config)
        };
        let outcome = OptimizerLoop::new(search_config(10))
            .search(&space, objective, Vec::new(), None, &stop)
            .unwrap();
        assert_eq!(outcome.history.len(), 1);
        assert!(!outcome.completed);
        assert!(outcome.best.is_some());

        stop.reset();
        assert!(!stop.is_stopped());
    }

    #[test]
    fn test_malformed_space_fails_before_any_trial() {
        let calls = std::cell::Cell::new(0);
        let objective = |config: &Configuration| -> Result<MetricSummary> {
            calls.set(calls.get() + 1);
            quadratic(config)
        };
        for space in [
            HyperparameterSpace::new().integer("k", 5, 1),
            HyperparameterSpace::new().add(crate::optimizer::Dimension::categorical("kind", vec![])),
            HyperparameterSpace::new().log_float("alpha", -1.0, 1.0),
        ] {
            let result = OptimizerLoop::new(search_config(5).with_proposer(ProposerKind::Random))
                .search(&space, objective, Vec::new(), None, &StopHandle::new());
            assert!(matches!(result, Err(PrognosError::ConfigError(_))));
        }
        assert_eq!(calls.get(), 0);
    }

    #[test]
    fn test_warm_start_and_index_continuation() {
        let space = HyperparameterSpace::new().float("x", -1.0, 1.0);
        let first = OptimizerLoop::new(search_config(4)).search(
            &space,
            quadratic,
            Vec::new(),
            None,
            &StopHandle::new(),
        )
        .unwrap();
        let warm = first.best.as_ref().map(|t| t.configuration.clone());
        let second = OptimizerLoop::new(search_config(3)).search(
            &space,
            quadratic,
            first.history.clone(),
            warm.clone(),
            &StopHandle::new(),
        )
        .unwrap();
        assert_eq!(second.history.len(), 7);
        assert_eq!(second.history[4].index, 4);
        assert_eq!(Some(second.history[4].configuration.clone()), warm);
    }

    #[test]
    fn test_search_is_deterministic() {
        let space = HyperparameterSpace::new().float("x", -1.0, 1.0).integer("k", 1, 5);
        let run = || {
            OptimizerLoop::new(search_config(10))
                .search(&space, quadratic, Vec::new(), None, &StopHandle::new())
                .unwrap()
                .history
                .into_iter()
                .map(|t| (t.configuration, t.value))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
