//! Dataset handling
//!
//! A [`Dataset`] is the read-only input of a study: a feature matrix, a label
//! vector and, for risk estimation, a time-to-event vector. Ingestion from a
//! polars `DataFrame` casts every feature column to `f64`.

use crate::error::{PrognosError, Result};
use ndarray::{Array1, Array2, Axis};
use polars::prelude::*;
use serde::{Deserialize, Serialize};

/// Type of learning task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Binary or multi-class classification
    Classification,
    /// Continuous target regression
    Regression,
    /// Time-to-event risk estimation (event indicator as label)
    RiskEstimation,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Classification => "classification",
            TaskType::Regression => "regression",
            TaskType::RiskEstimation => "risk_estimation",
        }
    }
}

impl std::fmt::Display for TaskType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Borrowed view of the supervision signal passed to `fit`
#[derive(Debug, Clone, Copy)]
pub struct Target<'a> {
    /// Labels (class ids, regression values or event indicators)
    pub y: &'a Array1<f64>,
    /// Time to event or censoring, risk estimation only
    pub time: Option<&'a Array1<f64>>,
}

impl<'a> Target<'a> {
    pub fn new(y: &'a Array1<f64>, time: Option<&'a Array1<f64>>) -> Self {
        Self { y, time }
    }

    /// Event/time pair, failing when the time vector is absent
    pub fn survival(&self) -> Result<(&'a Array1<f64>, &'a Array1<f64>)> {
        let time = self.time.ok_or_else(|| {
            PrognosError::DataError("risk estimation requires a time-to-event vector".to_string())
        })?;
        Ok((self.y, time))
    }
}

/// Tabular dataset: features, labels and optional time-to-event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    feature_names: Vec<String>,
    x: Array2<f64>,
    y: Array1<f64>,
    time: Option<Array1<f64>>,
}

impl Dataset {
    /// Build a dataset from arrays. Alignment is checked by [`Dataset::validate`].
    pub fn new(x: Array2<f64>, y: Array1<f64>) -> Self {
        let feature_names = (0..x.ncols()).map(|i| format!("feature_{}", i)).collect();
        Self {
            feature_names,
            x,
            y,
            time: None,
        }
    }

    /// Attach a time-to-event vector
    pub fn with_time(mut self, time: Array1<f64>) -> Self {
        self.time = Some(time);
        self
    }

    /// Override feature names
    pub fn with_feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = names;
        self
    }

    /// Extract a dataset from a DataFrame.
    ///
    /// Every column other than `target` and `time_column` becomes a feature.
    pub fn from_dataframe(df: &DataFrame, target: &str, time_column: Option<&str>) -> Result<Self> {
        let feature_names: Vec<String> = df
            .get_column_names()
            .into_iter()
            .map(|name| name.to_string())
            .filter(|name| name != target && Some(name.as_str()) != time_column)
            .collect();

        let y = Array1::from_vec(column_values(df, target)?);
        let time = match time_column {
            Some(col) => Some(Array1::from_vec(column_values(df, col)?)),
            None => None,
        };

        let col_data: Vec<Vec<f64>> = feature_names
            .iter()
            .map(|name| column_values(df, name))
            .collect::<Result<Vec<_>>>()?;

        let n_rows = df.height();
        let x = Array2::from_shape_fn((n_rows, col_data.len()), |(r, c)| col_data[c][r]);

        Ok(Self {
            feature_names,
            x,
            y,
            time,
        })
    }

    pub fn x(&self) -> &Array2<f64> {
        &self.x
    }

    pub fn y(&self) -> &Array1<f64> {
        &self.y
    }

    pub fn time(&self) -> Option<&Array1<f64>> {
        self.time.as_ref()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn target(&self) -> Target<'_> {
        Target::new(&self.y, self.time.as_ref())
    }

    pub fn n_samples(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.x.ncols()
    }

    /// Observed (min, max) time-to-event, if any
    pub fn time_range(&self) -> Option<(f64, f64)> {
        let time = self.time.as_ref()?;
        let min = time.iter().copied().fold(f64::INFINITY, f64::min);
        let max = time.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        if min.is_finite() && max.is_finite() {
            Some((min, max))
        } else {
            None
        }
    }

    /// Sorted distinct label values
    pub fn classes(&self) -> Vec<f64> {
        distinct_sorted(&self.y)
    }

    /// Row subset, preserving the given order
    pub fn subset(&self, indices: &[usize]) -> Dataset {
        Dataset {
            feature_names: self.feature_names.clone(),
            x: self.x.select(Axis(0), indices),
            y: self.y.select(Axis(0), indices),
            time: self.time.as_ref().map(|t| t.select(Axis(0), indices)),
        }
    }

    /// Check row alignment and task-specific label requirements
    pub fn validate(&self, task: TaskType) -> Result<()> {
        let n = self.x.nrows();
        if n == 0 {
            return Err(PrognosError::DataError("dataset is empty".to_string()));
        }
        if self.y.len() != n {
            return Err(PrognosError::ShapeError {
                expected: format!("{} labels", n),
                actual: format!("{} labels", self.y.len()),
            });
        }
        if self.feature_names.len() != self.x.ncols() {
            return Err(PrognosError::ShapeError {
                expected: format!("{} feature names", self.x.ncols()),
                actual: format!("{} feature names", self.feature_names.len()),
            });
        }

        match task {
            TaskType::Classification => {
                if self.y.iter().any(|v| !v.is_finite()) {
                    return Err(PrognosError::DataError("labels contain missing values".to_string()));
                }
                if self.classes().len() < 2 {
                    return Err(PrognosError::DataError(
                        "classification requires at least two classes".to_string(),
                    ));
                }
            }
            TaskType::Regression => {
                if self.y.iter().any(|v| !v.is_finite()) {
                    return Err(PrognosError::DataError("targets contain missing values".to_string()));
                }
            }
            TaskType::RiskEstimation => {
                let time = self.time.as_ref().ok_or_else(|| {
                    PrognosError::DataError("risk estimation requires a time-to-event column".to_string())
                })?;
                if time.len() != n {
                    return Err(PrognosError::ShapeError {
                        expected: format!("{} time values", n),
                        actual: format!("{} time values", time.len()),
                    });
                }
                if time.iter().any(|t| !t.is_finite() || *t < 0.0) {
                    return Err(PrognosError::DataError(
                        "time-to-event values must be finite and non-negative".to_string(),
                    ));
                }
                if self.y.iter().any(|e| *e != 0.0 && *e != 1.0) {
                    return Err(PrognosError::DataError(
                        "event indicators must be 0 or 1".to_string(),
                    ));
                }
                if !self.y.iter().any(|e| *e == 1.0) {
                    return Err(PrognosError::DataError("no events observed".to_string()));
                }
            }
        }

        Ok(())
    }
}

/// Sorted distinct values of a label vector
pub fn distinct_sorted(y: &Array1<f64>) -> Vec<f64> {
    let mut values: Vec<f64> = y.iter().copied().filter(|v| v.is_finite()).collect();
    values.sort_by(|a, b| a.total_cmp(b));
    values.dedup();
    values
}

fn column_values(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let column = df
        .column(name)
        .map_err(|_| PrognosError::DataError(format!("column not found: {}", name)))?;
    let series = column.as_materialized_series().cast(&DataType::Float64)?;
    Ok(series
        .f64()?
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect())
}
