//! Study controller
//!
//! Drives the outer loop: every template is searched for `num_study_iter`
//! passes, each pass warm-started from the previous best and checkpointed
//! as soon as it finishes. Templates whose best trial misses the score
//! threshold are dropped and the survivors go to ensemble selection.

use super::config::StudyConfig;
use super::workspace::{Checkpoint, CheckpointStatus, Workspace};
use crate::data::{Dataset, TaskType};
use crate::ensemble::{Candidate, EnsembleModel, EnsembleSelector};
use crate::error::{PrognosError, Result};
use crate::evaluation::Evaluator;
use crate::export::fnv1a;
use crate::optimizer::{
    Configuration, OptimizerLoop, SearchBudget, SearchConfig, StopHandle, Trial,
};
use crate::pipeline::PipelineTemplate;
use crate::plugins::PluginRegistry;
use crate::utils::{parallel_map_with_config, ParallelConfig};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use tracing::{info, warn};

/// Lifecycle of a study
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StudyState {
    Created,
    Running,
    /// Checkpoints found at `run()`, being loaded
    Resuming,
    Completed,
    Failed,
}

impl fmt::Display for StudyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StudyState::Created => "created",
            StudyState::Running => "running",
            StudyState::Resuming => "resuming",
            StudyState::Completed => "completed",
            StudyState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Best result of one template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub template: PipelineTemplate,
    pub best: Option<Trial>,
    pub n_trials: usize,
    /// Best trial meets the score threshold
    pub qualified: bool,
}

/// A search-and-ensemble study over every candidate template
pub struct Study {
    config: StudyConfig,
    dataset: Dataset,
    registry: PluginRegistry,
    horizons: Vec<f64>,
    templates: Vec<PipelineTemplate>,
    workspace: Workspace,
    state: StudyState,
    stop: StopHandle,
    leaderboard: Vec<LeaderboardEntry>,
}

impl Study {
    /// Validate everything up front; no search work happens here
    pub fn new(config: StudyConfig, dataset: Dataset, registry: PluginRegistry) -> Result<Self> {
        config.validate(&registry)?;
        dataset.validate(config.task)?;
        let horizons = resolve_horizons(&config, &dataset)?;

        let predictors = config.resolved_predictors(&registry);
        let mut seen = BTreeSet::new();
        let templates: Vec<PipelineTemplate> =
            PipelineTemplate::enumerate(&registry, &config.preprocessing, &predictors)?
                .into_iter()
                .filter(|t| seen.insert(t.id()))
                .collect();
        for template in &templates {
            template.validate(&registry, config.task)?;
        }

        let workspace = Workspace::new(&config.workspace, &config.study_name);
        info!(
            study = %config.study_name,
            task = %config.task,
            templates = templates.len(),
            samples = dataset.n_samples(),
            "study created"
        );

        Ok(Self {
            config,
            dataset,
            registry,
            horizons,
            templates,
            workspace,
            state: StudyState::Created,
            stop: StopHandle::new(),
            leaderboard: Vec::new(),
        })
    }

    pub fn config(&self) -> &StudyConfig {
        &self.config
    }

    pub fn state(&self) -> StudyState {
        self.state
    }

    /// Handle that cancels a running study between trials
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    pub fn templates(&self) -> &[PipelineTemplate] {
        &self.templates
    }

    /// Resolved evaluation horizons (risk estimation only)
    pub fn horizons(&self) -> &[f64] {
        &self.horizons
    }

    pub fn workspace(&self) -> &Workspace {
        &self.workspace
    }

    pub fn registry(&self) -> &PluginRegistry {
        &self.registry
    }

    /// Best trial per template from the last run, best first
    pub fn leaderboard(&self) -> &[LeaderboardEntry] {
        &self.leaderboard
    }

    /// Load the persisted `model.p`
    pub fn load_model(&self) -> Result<EnsembleModel> {
        self.workspace.load_model(&self.registry)
    }

    /// Run (or resume) the study and persist the final ensemble
    pub fn run(&mut self) -> Result<EnsembleModel> {
        let result = self.run_inner();
        match &result {
            Ok(model) => {
                self.state = StudyState::Completed;
                info!(
                    study = %self.config.study_name,
                    members = model.members().len(),
                    weights = ?model.weights(),
                    "study completed"
                );
            }
            Err(e) => {
                self.state = StudyState::Failed;
                warn!(study = %self.config.study_name, error = %e, "study failed");
            }
        }
        result
    }

    fn run_inner(&mut self) -> Result<EnsembleModel> {
        // a stop request only cancels the run it interrupted
        self.stop.reset();
        self.workspace.ensure()?;
        if self.workspace.has_checkpoints() {
            self.state = StudyState::Resuming;
            info!(study = %self.config.study_name, "resuming from workspace");
        }
        let checkpoints = self.load_checkpoints();
        self.state = StudyState::Running;

        let mut leaderboard = Vec::new();
        let result = self.execute(checkpoints, &mut leaderboard);
        self.leaderboard = leaderboard;
        result
    }

    fn load_checkpoints(&self) -> Vec<Checkpoint> {
        self.templates
            .iter()
            .map(|template| match self.workspace.load_checkpoint(template) {
                Some(mut checkpoint) => {
                    info!(
                        template = %template,
                        passes = checkpoint.passes_completed,
                        status = ?checkpoint.status,
                        trials = checkpoint.history.len(),
                        "checkpoint loaded"
                    );
                    checkpoint.score_threshold = self.config.score_threshold;
                    checkpoint
                }
                None => Checkpoint::new(template.clone(), self.config.score_threshold),
            })
            .collect()
    }

    fn evaluator(&self) -> Evaluator<'_> {
        Evaluator::new(&self.registry, self.config.task)
            .with_n_folds(self.config.n_folds)
            .with_horizons(self.horizons.clone())
            .with_random_state(self.config.random_state)
            .with_parallel_folds(self.config.parallel_folds)
    }

    fn execute(
        &self,
        mut checkpoints: Vec<Checkpoint>,
        leaderboard: &mut Vec<LeaderboardEntry>,
    ) -> Result<EnsembleModel> {
        let evaluator = self.evaluator();
        let metric = self.config.primary_metric();

        for pass in 0..self.config.num_study_iter {
            if self.stop.is_stopped() {
                break;
            }
            let pending: Vec<(usize, Checkpoint)> = checkpoints
                .iter()
                .enumerate()
                .filter(|(_, c)| c.passes_completed <= pass)
                .map(|(i, c)| (i, c.clone()))
                .collect();
            if pending.is_empty() {
                continue;
            }
            info!(pass, templates = pending.len(), "search pass started");

            if self.config.n_jobs > 1 {
                let pool = ParallelConfig::new().with_threads(self.config.n_jobs);
                let searched = parallel_map_with_config(pending, &pool, |(i, checkpoint)| {
                    (i, self.search_template(&evaluator, checkpoint, pass))
                })?;
                for (i, checkpoint) in searched {
                    checkpoints[i] = checkpoint?;
                }
            } else {
                for (i, checkpoint) in pending {
                    checkpoints[i] = self.search_template(&evaluator, checkpoint, pass)?;
                }
            }
        }

        *leaderboard = self.rank(&checkpoints);

        if checkpoints
            .iter()
            .any(|c| c.passes_completed < self.config.num_study_iter)
        {
            info!(study = %self.config.study_name, "study cancelled, checkpoints flushed");
            return Err(PrognosError::Cancelled);
        }

        let candidates: Vec<Candidate> = leaderboard
            .iter()
            .filter(|entry| entry.qualified)
            .filter_map(|entry| {
                entry.best.as_ref().map(|best| Candidate {
                    template: entry.template.clone(),
                    configuration: best.configuration.clone(),
                    score: best.value,
                })
            })
            .collect();
        for entry in leaderboard.iter().filter(|e| !e.qualified) {
            info!(
                template = %entry.template,
                best = ?entry.best.as_ref().map(|t| t.value),
                threshold = self.config.score_threshold,
                "template excluded"
            );
        }

        if candidates.is_empty() {
            return Err(PrognosError::NoQualifyingPipeline {
                threshold: self.config.score_threshold,
                best: leaderboard
                    .iter()
                    .find_map(|e| e.best.as_ref())
                    .map(|t| t.value),
            });
        }

        let selector = EnsembleSelector::new(&evaluator, metric, self.config.ensemble.clone());
        let model = selector.select(&candidates, &self.dataset)?;
        self.workspace.save_model(&model)?;
        Ok(model)
    }

    /// One pass of the optimizer loop for one template, persisted on return
    fn search_template(
        &self,
        evaluator: &Evaluator<'_>,
        mut checkpoint: Checkpoint,
        pass: usize,
    ) -> Result<Checkpoint> {
        if self.stop.is_stopped() {
            return Ok(checkpoint);
        }
        let template = checkpoint.template.clone();
        let metric = self.config.primary_metric();

        // an incomplete checkpoint continues the pass it was cut from
        let (consumed, pass_elapsed) = match checkpoint.status {
            CheckpointStatus::Incomplete => (checkpoint.trials_consumed, checkpoint.pass_elapsed_secs),
            CheckpointStatus::Complete => (0, 0.0),
        };
        let remaining = self.config.num_iter.saturating_sub(consumed);
        let mut budget = SearchBudget::trials(remaining);
        if let Some(timeout) = self.config.timeout_secs {
            budget = budget.with_timeout((timeout - pass_elapsed).max(0.0));
        }
        let search = OptimizerLoop::new(
            SearchConfig::new(metric)
                .with_budget(budget)
                .with_proposer(self.config.proposer)
                .with_n_startup_trials(self.config.n_startup_trials)
                .with_seed(template_seed(self.config.random_state, &template, pass, consumed)),
        );
        let warm_start = if consumed == 0 && pass > 0 {
            checkpoint.best.as_ref().map(|t| t.configuration.clone())
        } else {
            None
        };

        let space = template.search_space(&self.registry)?;
        info!(template = %template, pass, remaining, "template search started");

        let prior = std::mem::take(&mut checkpoint.history);
        let n_prior = prior.len();
        let objective = |config: &Configuration| {
            evaluator
                .evaluate(&template, config, &self.dataset)
                .map(|evaluation| evaluation.summary)
        };
        let outcome = search.search(&space, objective, prior, warm_start, &self.stop)?;

        let new_trials = outcome.history.len() - n_prior;
        checkpoint.history = outcome.history;
        checkpoint.best = outcome.best;
        checkpoint.elapsed_secs += outcome.elapsed_secs;
        if outcome.completed {
            checkpoint.passes_completed = pass + 1;
            checkpoint.status = CheckpointStatus::Complete;
            checkpoint.trials_consumed = 0;
            checkpoint.pass_elapsed_secs = 0.0;
        } else {
            checkpoint.status = CheckpointStatus::Incomplete;
            checkpoint.trials_consumed = consumed + new_trials;
            checkpoint.pass_elapsed_secs = pass_elapsed + outcome.elapsed_secs;
        }

        self.workspace.save_checkpoint(&checkpoint)?;
        info!(
            template = %template,
            pass,
            trials = new_trials,
            best = ?checkpoint.best.as_ref().map(|t| t.value),
            "template search finished"
        );
        Ok(checkpoint)
    }

    /// Leaderboard ordered by best trial; templates without one come last
    fn rank(&self, checkpoints: &[Checkpoint]) -> Vec<LeaderboardEntry> {
        let metric = self.config.primary_metric();
        let mut entries: Vec<LeaderboardEntry> = checkpoints
            .iter()
            .map(|c| LeaderboardEntry {
                template: c.template.clone(),
                best: c.best.clone(),
                n_trials: c.history.len(),
                qualified: c
                    .best
                    .as_ref()
                    .map_or(false, |t| metric.meets_threshold(t.value, self.config.score_threshold)),
            })
            .collect();
        entries.sort_by(|a, b| match (&a.best, &b.best) {
            (Some(x), Some(y)) => x
                .objective
                .total_cmp(&y.objective)
                .reverse()
                .then(x.std.total_cmp(&y.std))
                .then_with(|| a.template.id().cmp(&b.template.id())),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => a.template.id().cmp(&b.template.id()),
        });
        entries
    }
}

/// Seed for one template's search, independent of scheduling order
fn template_seed(random_state: u64, template: &PipelineTemplate, pass: usize, consumed: usize) -> u64 {
    let mut bytes = random_state.to_le_bytes().to_vec();
    bytes.extend_from_slice(template.id().as_bytes());
    bytes.extend_from_slice(&(pass as u64).to_le_bytes());
    bytes.extend_from_slice(&(consumed as u64).to_le_bytes());
    fnv1a(&bytes)
}

/// Configured horizons checked against the observed times, or the event
/// time quartiles when none are configured. A quartile at the first event
/// time moves to the next distinct event time, since no pair is comparable
/// before it.
fn resolve_horizons(config: &StudyConfig, dataset: &Dataset) -> Result<Vec<f64>> {
    if config.task != TaskType::RiskEstimation {
        return Ok(Vec::new());
    }
    let (min, max) = dataset
        .time_range()
        .ok_or_else(|| PrognosError::DataError("no observed times".to_string()))?;

    if !config.horizons.is_empty() {
        if let Some(h) = config.horizons.iter().find(|h| **h < min || **h > max) {
            return Err(PrognosError::ConfigError(format!(
                "horizon {} outside observed time range [{}, {}]",
                h, min, max
            )));
        }
        return Ok(config.horizons.clone());
    }

    let time = dataset
        .time()
        .ok_or_else(|| PrognosError::DataError("no observed times".to_string()))?;
    let mut event_times: Vec<f64> = time
        .iter()
        .zip(dataset.y().iter())
        .filter(|(_, e)| **e == 1.0)
        .map(|(t, _)| *t)
        .collect();
    event_times.sort_by(|a, b| a.total_cmp(b));
    let first = *event_times
        .first()
        .ok_or_else(|| PrognosError::DataError("no observed events".to_string()))?;
    let second = event_times.iter().copied().find(|t| *t > first).ok_or_else(|| {
        PrognosError::DataError(format!(
            "every event happens at time {}; configure horizons explicitly",
            first
        ))
    })?;
    let mut horizons: Vec<f64> = [0.25, 0.5, 0.75]
        .iter()
        .map(|q| event_times[((event_times.len() - 1) as f64 * q).floor() as usize])
        .map(|h| if h <= first { second } else { h })
        .collect();
    horizons.dedup();
    Ok(horizons)
}
