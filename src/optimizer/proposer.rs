//! Configuration proposers
//!
//! A [`Proposer`] suggests the next configuration from the trial history.
//! Random search and a Gaussian Process surrogate are provided.

use super::gaussian_process::{AcquisitionFunction, GaussianProcess, KernelType};
use super::search_space::{Configuration, HyperparameterSpace};
use super::trial::Trial;
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// Type of proposer to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposerKind {
    /// Uniform random sampling
    Random,
    /// Bayesian optimization with a Gaussian Process surrogate
    GaussianProcess,
}

/// Trait for configuration proposers
pub trait Proposer: Send {
    /// Propose the next configuration to evaluate
    fn propose(&mut self, space: &HyperparameterSpace, history: &[Trial]) -> Configuration;

    /// Observe a recorded trial
    fn update(&mut self, _trial: &Trial) {}
}

/// Random proposer
#[derive(Debug)]
pub struct RandomProposer {
    rng: Xoshiro256PlusPlus,
}

impl RandomProposer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }
}

impl Proposer for RandomProposer {
    fn propose(&mut self, space: &HyperparameterSpace, _history: &[Trial]) -> Configuration {
        space.sample(&mut self.rng)
    }
}

/// GP-based proposer.
///
/// Samples randomly for the first `n_startup_trials`, then fits a GP on the
/// encoded history and returns the random candidate with the highest
/// acquisition value.
#[derive(Debug)]
pub struct GaussianProcessProposer {
    rng: Xoshiro256PlusPlus,
    n_startup_trials: usize,
    n_candidates: usize,
    kernel: KernelType,
    acquisition: AcquisitionFunction,
}

impl GaussianProcessProposer {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            n_startup_trials: 5,
            n_candidates: 256,
            kernel: KernelType::default(),
            acquisition: AcquisitionFunction::default(),
        }
    }

    /// Set number of random startup trials
    pub fn with_n_startup(mut self, n: usize) -> Self {
        self.n_startup_trials = n;
        self
    }

    /// Set number of acquisition candidates
    pub fn with_n_candidates(mut self, n: usize) -> Self {
        self.n_candidates = n.max(1);
        self
    }

    pub fn with_acquisition(mut self, acquisition: AcquisitionFunction) -> Self {
        self.acquisition = acquisition;
        self
    }

    fn surrogate_proposal(
        &mut self,
        space: &HyperparameterSpace,
        history: &[Trial],
    ) -> Option<Configuration> {
        let successful: Vec<f64> = history
            .iter()
            .filter(|t| t.is_complete())
            .map(|t| t.objective)
            .collect();
        if successful.len() < 2 {
            return None;
        }
        // failed trials count as the worst successful outcome
        let floor = successful.iter().copied().fold(f64::INFINITY, f64::min);
        let best = successful.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let dim = space.len();
        let mut x = Array2::zeros((history.len(), dim));
        let mut y = Array1::zeros(history.len());
        for (i, trial) in history.iter().enumerate() {
            for (j, v) in space.encode(&trial.configuration).into_iter().enumerate() {
                x[[i, j]] = v;
            }
            y[i] = if trial.is_complete() { trial.objective } else { floor };
        }

        let mut gp = GaussianProcess::new(self.kernel.clone()).with_noise(1e-4);
        gp.fit(x, &y).ok()?;

        let candidates: Vec<Configuration> = (0..self.n_candidates)
            .map(|_| space.sample(&mut self.rng))
            .collect();
        let mut encoded = Array2::zeros((candidates.len(), dim));
        for (i, c) in candidates.iter().enumerate() {
            for (j, v) in space.encode(c).into_iter().enumerate() {
                encoded[[i, j]] = v;
            }
        }
        let (mean, var) = gp.predict(&encoded).ok()?;

        let mut best_idx = None;
        let mut best_acq = f64::NEG_INFINITY;
        for i in 0..candidates.len() {
            if history.iter().any(|t| t.configuration == candidates[i]) {
                continue;
            }
            let acq = self.acquisition.value(mean[i], var[i], best);
            if acq > best_acq {
                best_acq = acq;
                best_idx = Some(i);
            }
        }

        best_idx.map(|i| candidates[i].clone())
    }
}

impl Proposer for GaussianProcessProposer {
    fn propose(&mut self, space: &HyperparameterSpace, history: &[Trial]) -> Configuration {
        if space.is_empty() {
            return Configuration::new();
        }
        if history.len() < self.n_startup_trials {
            return space.sample(&mut self.rng);
        }
        match self.surrogate_proposal(space, history) {
            Some(config) => config,
            None => space.sample(&mut self.rng),
        }
    }
}

/// Create a proposer from its kind
pub fn create_proposer(kind: ProposerKind, seed: u64, n_startup_trials: usize) -> Box<dyn Proposer> {
    match kind {
        ProposerKind::Random => Box::new(RandomProposer::new(seed)),
        ProposerKind::GaussianProcess => {
            Box::new(GaussianProcessProposer::new(seed).with_n_startup(n_startup_trials))
        }
    }
}
