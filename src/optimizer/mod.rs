//! Hyperparameter optimization
//!
//! Provides:
//! - Hyperparameter space descriptors
//! - Random and Gaussian Process proposers
//! - The budgeted, cancellable optimizer loop

pub mod gaussian_process;
pub mod proposer;
pub mod search;
pub mod search_space;
mod trial;

pub use gaussian_process::{AcquisitionFunction, GaussianProcess, KernelType};
pub use proposer::{
    create_proposer, GaussianProcessProposer, Proposer, ProposerKind, RandomProposer,
};
pub use search::{OptimizerLoop, SearchBudget, SearchConfig, SearchOutcome, StopHandle};
pub use search_space::{
    Configuration, Dimension, DimensionKind, HyperparameterSpace, ParameterValue,
};
pub use trial::{best_trial, Trial, TrialStatus};
