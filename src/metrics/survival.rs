//! Nonparametric survival estimators and IPCW-based survival metrics
//!
//! The censoring distribution G(t) is the Kaplan–Meier estimate with events
//! and censorings swapped. It weights both Uno's concordance index and the
//! time-dependent Brier score.

use crate::error::{PrognosError, Result};

/// Unique ordered times with event, at-risk and censoring counts
struct Counts {
    times: Vec<f64>,
    n_events: Vec<f64>,
    n_at_risk: Vec<f64>,
    n_censored: Vec<f64>,
}

fn compute_counts(event: &[f64], time: &[f64]) -> Counts {
    let n = time.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| time[a].total_cmp(&time[b]));

    let mut counts = Counts {
        times: Vec::new(),
        n_events: Vec::new(),
        n_at_risk: Vec::new(),
        n_censored: Vec::new(),
    };

    let mut at_risk = n as f64;
    let mut i = 0;
    while i < n {
        let t = time[order[i]];
        let mut events = 0.0;
        let mut total = 0.0;
        while i < n && time[order[i]] == t {
            if event[order[i]] > 0.5 {
                events += 1.0;
            }
            total += 1.0;
            i += 1;
        }
        counts.times.push(t);
        counts.n_events.push(events);
        counts.n_at_risk.push(at_risk);
        counts.n_censored.push(total - events);
        at_risk -= total;
    }

    counts
}

/// Kaplan–Meier estimate of the survival function.
///
/// With `reverse`, estimates the censoring distribution instead: at tied
/// times events come first and are removed from the risk set.
pub fn kaplan_meier(event: &[f64], time: &[f64], reverse: bool) -> Result<(Vec<f64>, Vec<f64>)> {
    if event.len() != time.len() {
        return Err(PrognosError::ShapeError {
            expected: format!("{} event indicators", time.len()),
            actual: format!("{} event indicators", event.len()),
        });
    }
    if time.is_empty() {
        return Err(PrognosError::DataError("no survival observations".to_string()));
    }

    let counts = compute_counts(event, time);
    let mut prob = Vec::with_capacity(counts.times.len());
    let mut surv = 1.0;
    for k in 0..counts.times.len() {
        let (n_events, n_at_risk) = if reverse {
            (counts.n_censored[k], counts.n_at_risk[k] - counts.n_events[k])
        } else {
            (counts.n_events[k], counts.n_at_risk[k])
        };
        // 0/0 counts as no drop
        let ratio = if n_events != 0.0 && n_at_risk > 0.0 {
            n_events / n_at_risk
        } else {
            0.0
        };
        surv *= 1.0 - ratio;
        prob.push(surv);
    }

    Ok((counts.times, prob))
}

/// Step-function survival estimate S(t) = P(T > t)
#[derive(Debug, Clone)]
pub struct SurvivalFunction {
    times: Vec<f64>,
    prob: Vec<f64>,
}

impl SurvivalFunction {
    /// Kaplan–Meier estimate of the event-time distribution
    pub fn fit(event: &[f64], time: &[f64]) -> Result<Self> {
        let (times, prob) = kaplan_meier(event, time, false)?;
        Ok(Self { times, prob })
    }

    /// Kaplan–Meier estimate of the censoring distribution G
    pub fn fit_censoring(event: &[f64], time: &[f64]) -> Result<Self> {
        if event.iter().all(|e| *e > 0.5) {
            let mut times = time.to_vec();
            times.sort_by(|a, b| a.total_cmp(b));
            times.dedup();
            let prob = vec![1.0; times.len()];
            return Ok(Self { times, prob });
        }
        let (times, prob) = kaplan_meier(event, time, true)?;
        Ok(Self { times, prob })
    }

    /// Evaluate at `t`; beyond the last observed time the last value holds
    pub fn at(&self, t: f64) -> f64 {
        match self.times.partition_point(|&u| u <= t) {
            0 => 1.0,
            idx => self.prob[idx - 1],
        }
    }

    /// Left limit S(t-), the value just before any drop at `t`
    pub fn before(&self, t: f64) -> f64 {
        match self.times.partition_point(|&u| u < t) {
            0 => 1.0,
            idx => self.prob[idx - 1],
        }
    }
}

/// Uno's IPCW concordance index truncated at `tau`.
///
/// Comparable pairs are (i, j) with an event at `T_i < T_j` and `T_i < tau`,
/// weighted by `G(T_i-)^-2`, so censorings tied with `T_i` do not shrink
/// its weight. Tied risks count one half.
pub fn concordance_index_ipcw(
    censoring: &SurvivalFunction,
    event: &[f64],
    time: &[f64],
    risk: &[f64],
    tau: f64,
) -> Result<f64> {
    let n = time.len();
    if event.len() != n || risk.len() != n {
        return Err(PrognosError::ShapeError {
            expected: format!("{} observations", n),
            actual: format!("{} events / {} risks", event.len(), risk.len()),
        });
    }

    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..n {
        if event[i] < 0.5 || time[i] >= tau {
            continue;
        }
        let g = censoring.before(time[i]);
        if g <= 0.0 {
            continue;
        }
        let weight = 1.0 / (g * g);
        for j in 0..n {
            if time[i] < time[j] {
                denominator += weight;
                if risk[i] > risk[j] {
                    numerator += weight;
                } else if risk[i] == risk[j] {
                    numerator += 0.5 * weight;
                }
            }
        }
    }

    if denominator == 0.0 {
        return Err(PrognosError::ComputationError(format!(
            "no comparable pairs before horizon {}",
            tau
        )));
    }
    Ok(numerator / denominator)
}

/// IPCW Brier score of predicted survival probabilities at horizon `t`
pub fn brier_score_ipcw(
    censoring: &SurvivalFunction,
    event: &[f64],
    time: &[f64],
    survival: &[f64],
    t: f64,
) -> Result<f64> {
    let n = time.len();
    if n == 0 || event.len() != n || survival.len() != n {
        return Err(PrognosError::ShapeError {
            expected: format!("{} observations", n),
            actual: format!("{} events / {} predictions", event.len(), survival.len()),
        });
    }

    let g_t = censoring.at(t);
    let mut total = 0.0;
    for i in 0..n {
        if time[i] <= t && event[i] > 0.5 {
            let g = censoring.at(time[i]);
            if g > 0.0 {
                total += survival[i] * survival[i] / g;
            }
        } else if time[i] > t && g_t > 0.0 {
            total += (1.0 - survival[i]).powi(2) / g_t;
        }
    }
    Ok(total / n as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kaplan_meier_no_censoring() {
        let event = [1.0, 1.0, 1.0, 1.0];
        let time = [1.0, 2.0, 3.0, 4.0];
        let (times, prob) = kaplan_meier(&event, &time, false).unwrap();
        assert_eq!(times, vec![1.0, 2.0, 3.0, 4.0]);
        let expected = [0.75, 0.5, 0.25, 0.0];
        for (p, e) in prob.iter().zip(expected.iter()) {
            assert!((p - e).abs() < 1e-12);
        }
    }

    #[test]
    fn test_kaplan_meier_with_censoring() {
        // censored at 2: the risk set shrinks without a drop
        let event = [1.0, 0.0, 1.0];
        let time = [1.0, 2.0, 3.0];
        let (_, prob) = kaplan_meier(&event, &time, false).unwrap();
        assert!((prob[0] - 2.0 / 3.0).abs() < 1e-12);
        assert!((prob[1] - 2.0 / 3.0).abs() < 1e-12);
        assert!(prob[2].abs() < 1e-12);
    }

    #[test]
    fn test_censoring_distribution_all_events() {
        let g = SurvivalFunction::fit_censoring(&[1.0, 1.0], &[1.0, 2.0]).unwrap();
        assert_eq!(g.at(5.0), 1.0);
    }

    #[test]
    fn test_step_evaluation() {
        let s = SurvivalFunction::fit(&[1.0, 1.0], &[1.0, 3.0]).unwrap();
        assert_eq!(s.at(0.5), 1.0);
        assert!((s.at(1.0) - 0.5).abs() < 1e-12);
        assert!((s.at(2.0) - 0.5).abs() < 1e-12);
        assert_eq!(s.at(10.0), 0.0);
    }

    #[test]
    fn test_perfect_concordance() {
        let event = [1.0, 1.0, 1.0, 0.0];
        let time = [1.0, 2.0, 3.0, 4.0];
        let risk = [0.9, 0.7, 0.5, 0.1];
        let g = SurvivalFunction::fit_censoring(&event, &time).unwrap();
        let c = concordance_index_ipcw(&g, &event, &time, &risk, 10.0).unwrap();
        assert!((c - 1.0).abs() < 1e-12);

        let reversed: Vec<f64> = risk.iter().map(|r| 1.0 - r).collect();
        let c = concordance_index_ipcw(&g, &event, &time, &reversed, 10.0).unwrap();
        assert!(c.abs() < 1e-12);
    }

    #[test]
    fn test_concordance_weights_use_left_limit() {
        // the censoring at t=2 is tied with the event at t=2
        let event = [1.0, 0.0, 1.0, 1.0];
        let time = [1.0, 2.0, 2.0, 3.0];
        let g = SurvivalFunction::fit_censoring(&event, &time).unwrap();
        assert!((g.at(2.0) - 0.5).abs() < 1e-12);
        assert_eq!(g.before(2.0), 1.0);
        assert_eq!(g.before(1.0), 1.0);

        // subject 0 is concordant with its three pairs, subject 2 is
        // discordant with its one; all four pairs weigh 1
        let risk = [0.9, 0.1, 0.2, 0.5];
        let c = concordance_index_ipcw(&g, &event, &time, &risk, 10.0).unwrap();
        assert!((c - 0.75).abs() < 1e-12);
    }

    #[test]
    fn test_brier_perfect_prediction() {
        let event = [1.0, 1.0, 0.0, 0.0];
        let time = [1.0, 2.0, 5.0, 6.0];
        let g = SurvivalFunction::fit_censoring(&event, &time).unwrap();
        // died before 3 -> S=0, alive after 3 -> S=1
        let surv = [0.0, 0.0, 1.0, 1.0];
        let b = brier_score_ipcw(&g, &event, &time, &surv, 3.0).unwrap();
        assert!(b.abs() < 1e-12);
    }
}
