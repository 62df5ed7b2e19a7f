//! Prognos - search-and-ensemble engine for tabular prediction
//!
//! A study enumerates pipeline templates (preprocessing stages followed by a
//! predictor), searches each template's hyperparameters with cross-validated
//! scoring, keeps the templates that reach a score threshold and combines
//! them into a weighted ensemble. Search progress is checkpointed per
//! template so an interrupted study resumes where it stopped.
//!
//! # Modules
//!
//! ## Building blocks
//! - [`data`] - Datasets, task types and survival targets
//! - [`plugins`] - Plugin contract, registry and built-in plugins
//! - [`pipeline`] - Pipeline templates and fitted pipelines
//! - [`metrics`] - Classification, regression and survival metrics
//!
//! ## Search
//! - [`evaluation`] - K-fold cross-validation of a configured template
//! - [`optimizer`] - Hyperparameter spaces, proposers and the search loop
//! - [`ensemble`] - Greedy ensemble selection and the persisted model
//! - [`study`] - Study configuration, controller and workspace
//!
//! ## Support
//! - [`export`] - Versioned artifact encoding and atomic writes
//! - [`utils`] - Thread pool configuration
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Building blocks
pub mod data;
pub mod metrics;
pub mod pipeline;
pub mod plugins;

// Search
pub mod ensemble;
pub mod evaluation;
pub mod optimizer;
pub mod study;

// Support
pub mod cli;
pub mod export;
pub mod utils;

pub use error::{PrognosError, Result};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::data::{Dataset, TaskType};
    pub use crate::ensemble::{EnsembleConfig, EnsembleModel};
    pub use crate::error::{PrognosError, Result};
    pub use crate::evaluation::{evaluate_model, Evaluator};
    pub use crate::metrics::{Metric, MetricSummary, Predictions};
    pub use crate::optimizer::{Configuration, HyperparameterSpace, ProposerKind, StopHandle};
    pub use crate::pipeline::{Pipeline, PipelineTemplate, Predict};
    pub use crate::plugins::{PluginCategory, PluginRegistry, PluginSubtype};
    pub use crate::study::{Study, StudyConfig, StudyState};
}
