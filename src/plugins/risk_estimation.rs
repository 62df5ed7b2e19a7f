//! Risk estimation plugins

use super::regressors::cholesky_solve;
use super::registry::{PluginFactory, PluginRegistry};
use super::{check_rows, check_width, float_param, Plugin, PluginCategory, PluginSubtype, RiskEstimator};
use crate::data::Target;
use crate::error::{PrognosError, Result};
use crate::export::{encode, ArtifactKind};
use crate::optimizer::{Dimension, HyperparameterSpace, ParameterValue};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Register every risk estimation plugin
pub fn register_all(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        CoxPh::NAME,
        PluginCategory::Prediction,
        PluginSubtype::RiskEstimation,
        PluginFactory::risk_estimator(|c| Ok(CoxPh::new(float_param(c, "penalizer")?))),
        CoxPh::space(),
    )?;
    Ok(())
}

const MAX_LINEAR_PREDICTOR: f64 = 50.0;

/// Cox proportional hazards with an L2 penalty.
///
/// Coefficients maximise the Breslow partial likelihood by damped Newton
/// steps; the baseline cumulative hazard is the Breslow estimator. Risk at a
/// horizon is `1 - S(t | x)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoxPh {
    pub penalizer: f64,
    pub max_iter: usize,
    x_mean: Option<Array1<f64>>,
    coefficients: Option<Array1<f64>>,
    /// Distinct event times, ascending
    baseline_times: Vec<f64>,
    /// Cumulative baseline hazard at `baseline_times`
    baseline_hazard: Vec<f64>,
}

impl CoxPh {
    pub const NAME: &'static str = "cox_ph";

    pub fn new(penalizer: f64) -> Self {
        Self {
            penalizer,
            max_iter: 50,
            x_mean: None,
            coefficients: None,
            baseline_times: Vec::new(),
            baseline_hazard: Vec::new(),
        }
    }

    pub fn space() -> HyperparameterSpace {
        HyperparameterSpace::new().add(
            Dimension::log_float("penalizer", 1e-4, 10.0).with_default(ParameterValue::Float(0.1)),
        )
    }

    pub fn coefficients(&self) -> Option<&Array1<f64>> {
        self.coefficients.as_ref()
    }

    fn linear_predictor(x: &Array2<f64>, beta: &Array1<f64>) -> Array1<f64> {
        x.dot(beta)
            .mapv(|v| v.clamp(-MAX_LINEAR_PREDICTOR, MAX_LINEAR_PREDICTOR))
    }

    /// Penalised log partial likelihood, its gradient and negative Hessian
    fn partial_likelihood(
        &self,
        x: &Array2<f64>,
        event: &Array1<f64>,
        order: &[usize],
        time: &Array1<f64>,
        beta: &Array1<f64>,
    ) -> (f64, Array1<f64>, Array2<f64>) {
        let d = x.ncols();
        let eta = Self::linear_predictor(x, beta);
        let w = eta.mapv(f64::exp);

        let mut loglik = -0.5 * self.penalizer * beta.dot(beta);
        let mut grad = -self.penalizer * beta;
        let mut hess = Array2::<f64>::eye(d) * self.penalizer;

        let mut s0 = 0.0;
        let mut s1 = Array1::<f64>::zeros(d);
        let mut s2 = Array2::<f64>::zeros((d, d));

        // order is by descending time: the risk set grows as we go
        let mut i = 0;
        while i < order.len() {
            let t = time[order[i]];
            let mut j = i;
            while j < order.len() && time[order[j]] == t {
                let idx = order[j];
                let xi = x.row(idx);
                s0 += w[idx];
                s1.scaled_add(w[idx], &xi);
                for a in 0..d {
                    for b in 0..d {
                        s2[[a, b]] += w[idx] * xi[a] * xi[b];
                    }
                }
                j += 1;
            }
            for &idx in &order[i..j] {
                if event[idx] < 0.5 {
                    continue;
                }
                let mean = &s1 / s0;
                loglik += eta[idx] - s0.ln();
                grad = grad + (&x.row(idx) - &mean);
                for a in 0..d {
                    for b in 0..d {
                        hess[[a, b]] += s2[[a, b]] / s0 - mean[a] * mean[b];
                    }
                }
            }
            i = j;
        }

        (loglik, grad, hess)
    }
}

impl Plugin for CoxPh {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&mut self, x: &Array2<f64>, target: Target<'_>) -> Result<()> {
        let (event, time) = target.survival()?;
        check_rows(x, event)?;
        if time.len() != x.nrows() {
            return Err(PrognosError::ShapeError {
                expected: format!("{} time values", x.nrows()),
                actual: format!("{} time values", time.len()),
            });
        }
        if !event.iter().any(|e| *e > 0.5) {
            return Err(PrognosError::TrainingError("no events in training data".to_string()));
        }

        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PrognosError::TrainingError("no training rows".to_string()))?;
        let xc = x - &x_mean.clone().insert_axis(Axis(0));

        let mut order: Vec<usize> = (0..time.len()).collect();
        order.sort_by(|&a, &b| time[b].total_cmp(&time[a]));

        let mut beta = Array1::zeros(x.ncols());
        let (mut loglik, mut grad, mut hess) =
            self.partial_likelihood(&xc, event, &order, time, &beta);

        for iter in 0..self.max_iter {
            let step = cholesky_solve(&hess, &grad).ok_or_else(|| {
                PrognosError::ComputationError("Hessian is not positive definite".to_string())
            })?;

            // step halving until the likelihood improves
            let mut scale = 1.0;
            let mut accepted = None;
            for _ in 0..20 {
                let candidate = &beta + &(scale * &step);
                let (ll, g, h) = self.partial_likelihood(&xc, event, &order, time, &candidate);
                if ll.is_finite() && ll >= loglik - 1e-12 {
                    accepted = Some((candidate, ll, g, h));
                    break;
                }
                scale *= 0.5;
            }
            let (candidate, ll, g, h) = match accepted {
                Some(a) => a,
                None => break,
            };

            let improvement = ll - loglik;
            beta = candidate;
            loglik = ll;
            grad = g;
            hess = h;
            if improvement.abs() < 1e-10 {
                debug!(iterations = iter + 1, loglik, "cox_ph converged");
                break;
            }
        }

        if beta.iter().any(|b: &f64| !b.is_finite()) {
            return Err(PrognosError::TrainingError("cox_ph diverged".to_string()));
        }

        // Breslow baseline cumulative hazard at ascending event times
        let w = Self::linear_predictor(&xc, &beta).mapv(f64::exp);
        let mut ascending = order.clone();
        ascending.reverse();
        let mut at_risk: f64 = w.sum();
        let mut cumulative = 0.0;
        let mut times = Vec::new();
        let mut hazard = Vec::new();
        let mut i = 0;
        while i < ascending.len() {
            let t = time[ascending[i]];
            let mut j = i;
            let mut deaths = 0.0;
            let mut leaving = 0.0;
            while j < ascending.len() && time[ascending[j]] == t {
                if event[ascending[j]] > 0.5 {
                    deaths += 1.0;
                }
                leaving += w[ascending[j]];
                j += 1;
            }
            if deaths > 0.0 && at_risk > 0.0 {
                cumulative += deaths / at_risk;
                times.push(t);
                hazard.push(cumulative);
            }
            at_risk -= leaving;
            i = j;
        }

        self.x_mean = Some(x_mean);
        self.coefficients = Some(beta);
        self.baseline_times = times;
        self.baseline_hazard = hazard;
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(ArtifactKind::Plugin, self)
    }
}

impl RiskEstimator for CoxPh {
    fn predict_risk(&self, x: &Array2<f64>, horizons: &[f64]) -> Result<Array2<f64>> {
        let (x_mean, beta) = match (&self.x_mean, &self.coefficients) {
            (Some(m), Some(b)) => (m, b),
            _ => return Err(PrognosError::ModelNotFitted),
        };
        check_width(beta.len(), x)?;

        let xc = x - &x_mean.clone().insert_axis(Axis(0));
        let relative = Self::linear_predictor(&xc, beta).mapv(f64::exp);
        let cumulative: Vec<f64> = horizons
            .iter()
            .map(|&t| match self.baseline_times.partition_point(|&u| u <= t) {
                0 => 0.0,
                idx => self.baseline_hazard[idx - 1],
            })
            .collect();

        let mut risk = Array2::zeros((x.nrows(), horizons.len()));
        for (i, r) in relative.iter().enumerate() {
            for (k, h) in cumulative.iter().enumerate() {
                risk[[i, k]] = 1.0 - (-h * r).exp();
            }
        }
        Ok(risk)
    }
}
