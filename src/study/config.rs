//! Study configuration

use crate::data::TaskType;
use crate::ensemble::EnsembleConfig;
use crate::error::{PrognosError, Result};
use crate::metrics::Metric;
use crate::optimizer::ProposerKind;
use crate::plugins::{PluginCategory, PluginRegistry, PluginSubtype};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration for a study
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StudyConfig {
    /// Workspace subdirectory; re-running with the same name resumes
    pub study_name: String,

    pub task: TaskType,

    /// Label column (event indicator for risk estimation)
    pub target: String,

    /// Time-to-event column, risk estimation only
    pub time_column: Option<String>,

    /// Evaluation horizons for risk estimation. Empty means the quartiles
    /// of the observed event times.
    pub horizons: Vec<f64>,

    /// Candidate preprocessing plugins
    pub preprocessing: Vec<String>,

    /// Candidate prediction plugins. Empty means every registered plugin of
    /// the task's subtype.
    pub predictors: Vec<String>,

    /// Trials per template per pass
    pub num_iter: usize,

    /// Outer refinement passes
    pub num_study_iter: usize,

    /// Minimum primary metric for a template to reach the ensemble
    pub score_threshold: f64,

    /// Cross-validation folds
    pub n_folds: usize,

    /// Random seed
    pub random_state: u64,

    /// Metric to optimize; the task's primary metric when absent
    pub metric: Option<Metric>,

    pub proposer: ProposerKind,

    /// Number of initial random samples before the surrogate takes over
    pub n_startup_trials: usize,

    /// Number of templates searched in parallel
    pub n_jobs: usize,

    /// Evaluate folds in parallel
    pub parallel_folds: bool,

    /// Wall-clock limit per template per pass, in seconds
    pub timeout_secs: Option<f64>,

    pub ensemble: EnsembleConfig,

    pub workspace: PathBuf,
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            study_name: "study".to_string(),
            task: TaskType::Classification,
            target: "target".to_string(),
            time_column: None,
            horizons: Vec::new(),
            preprocessing: Vec::new(),
            predictors: Vec::new(),
            num_iter: 50,
            num_study_iter: 1,
            score_threshold: 0.65,
            n_folds: 3,
            random_state: 0,
            metric: None,
            proposer: ProposerKind::GaussianProcess,
            n_startup_trials: 5,
            n_jobs: 1,
            parallel_folds: false,
            timeout_secs: None,
            ensemble: EnsembleConfig::default(),
            workspace: PathBuf::from("workspace"),
        }
    }
}

impl StudyConfig {
    pub fn new(study_name: impl Into<String>, task: TaskType) -> Self {
        Self {
            study_name: study_name.into(),
            task,
            ..Self::default()
        }
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn with_time_column(mut self, column: impl Into<String>) -> Self {
        self.time_column = Some(column.into());
        self
    }

    pub fn with_horizons(mut self, horizons: Vec<f64>) -> Self {
        self.horizons = horizons;
        self
    }

    pub fn with_preprocessing(mut self, names: Vec<String>) -> Self {
        self.preprocessing = names;
        self
    }

    pub fn with_predictors(mut self, names: Vec<String>) -> Self {
        self.predictors = names;
        self
    }

    pub fn with_num_iter(mut self, n: usize) -> Self {
        self.num_iter = n;
        self
    }

    pub fn with_num_study_iter(mut self, n: usize) -> Self {
        self.num_study_iter = n;
        self
    }

    pub fn with_score_threshold(mut self, threshold: f64) -> Self {
        self.score_threshold = threshold;
        self
    }

    pub fn with_n_folds(mut self, n: usize) -> Self {
        self.n_folds = n;
        self
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = seed;
        self
    }

    pub fn with_metric(mut self, metric: Metric) -> Self {
        self.metric = Some(metric);
        self
    }

    pub fn with_proposer(mut self, proposer: ProposerKind) -> Self {
        self.proposer = proposer;
        self
    }

    pub fn with_n_startup_trials(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    pub fn with_n_jobs(mut self, n: usize) -> Self {
        self.n_jobs = n;
        self
    }

    pub fn with_parallel_folds(mut self, parallel: bool) -> Self {
        self.parallel_folds = parallel;
        self
    }

    pub fn with_timeout(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_ensemble(mut self, ensemble: EnsembleConfig) -> Self {
        self.ensemble = ensemble;
        self
    }

    pub fn with_workspace(mut self, path: impl Into<PathBuf>) -> Self {
        self.workspace = path.into();
        self
    }

    /// Load from a JSON file; missing fields take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = fs::read_to_string(path.as_ref()).map_err(|e| {
            PrognosError::ConfigError(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Metric the search optimizes
    pub fn primary_metric(&self) -> Metric {
        self.metric.unwrap_or_else(|| Metric::primary(self.task))
    }

    /// `workspace/<study_name>`
    pub fn study_dir(&self) -> PathBuf {
        self.workspace.join(&self.study_name)
    }

    /// Candidate predictors, falling back to every plugin of the task subtype
    pub fn resolved_predictors(&self, registry: &PluginRegistry) -> Vec<String> {
        if self.predictors.is_empty() {
            registry.list_available(
                Some(PluginCategory::Prediction),
                Some(PluginSubtype::for_task(self.task)),
            )
        } else {
            self.predictors.clone()
        }
    }

    /// Fail fast on invalid settings and plugin names
    pub fn validate(&self, registry: &PluginRegistry) -> Result<()> {
        if self.study_name.is_empty()
            || self.study_name.contains(['/', '\\'])
            || self.study_name == "."
            || self.study_name == ".."
        {
            return Err(PrognosError::ConfigError(format!(
                "invalid study name '{}'",
                self.study_name
            )));
        }
        if self.num_iter == 0 {
            return Err(PrognosError::ConfigError("num_iter must be at least 1".to_string()));
        }
        if self.num_study_iter == 0 {
            return Err(PrognosError::ConfigError("num_study_iter must be at least 1".to_string()));
        }
        if self.n_folds < 2 {
            return Err(PrognosError::ConfigError("n_folds must be at least 2".to_string()));
        }
        if self.n_jobs == 0 {
            return Err(PrognosError::ConfigError("n_jobs must be at least 1".to_string()));
        }
        if !self.score_threshold.is_finite() {
            return Err(PrognosError::ConfigError("score_threshold must be finite".to_string()));
        }
        if let Some(t) = self.timeout_secs {
            if !(t > 0.0) {
                return Err(PrognosError::ConfigError("timeout_secs must be positive".to_string()));
            }
        }
        if self.ensemble.max_size == 0 || self.ensemble.max_repeats == 0 {
            return Err(PrognosError::ConfigError(
                "ensemble max_size and max_repeats must be at least 1".to_string(),
            ));
        }

        let metric = self.primary_metric();
        if !metric.supports(self.task) {
            return Err(PrognosError::ConfigError(format!(
                "metric {} does not apply to {}",
                metric, self.task
            )));
        }

        if self.task == TaskType::RiskEstimation {
            if self.horizons.iter().any(|h| !h.is_finite() || *h <= 0.0) {
                return Err(PrognosError::ConfigError(
                    "horizons must be finite and positive".to_string(),
                ));
            }
        } else if !self.horizons.is_empty() {
            return Err(PrognosError::ConfigError(format!(
                "horizons only apply to risk estimation, not {}",
                self.task
            )));
        }

        for name in &self.preprocessing {
            let descriptor = registry.descriptor(name)?;
            if descriptor.category != PluginCategory::Preprocessing {
                return Err(PrognosError::ConfigError(format!(
                    "'{}' is not a preprocessing plugin",
                    name
                )));
            }
        }

        let predictors = self.resolved_predictors(registry);
        if predictors.is_empty() {
            return Err(PrognosError::ConfigError(format!(
                "no prediction plugin available for {}",
                self.task
            )));
        }
        let required = PluginSubtype::for_task(self.task);
        for name in &predictors {
            let descriptor = registry.descriptor(name)?;
            if descriptor.subtype != required {
                return Err(PrognosError::CapabilityAbsent {
                    plugin: name.clone(),
                    capability: required.capability().to_string(),
                });
            }
        }

        Ok(())
    }
}
