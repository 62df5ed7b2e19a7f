//! Preprocessing plugins: feature scaling and feature selection

use super::registry::{PluginFactory, PluginRegistry};
use super::{check_width, float_param, Plugin, PluginCategory, PluginSubtype, Transformer};
use crate::data::Target;
use crate::error::{PrognosError, Result};
use crate::export::{encode, ArtifactKind};
use crate::optimizer::HyperparameterSpace;
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Register every preprocessing plugin
pub fn register_all(registry: &mut PluginRegistry) -> Result<()> {
    registry.register(
        StandardScaler::NAME,
        PluginCategory::Preprocessing,
        PluginSubtype::FeatureScaling,
        PluginFactory::transformer(|_| Ok(StandardScaler::default())),
        HyperparameterSpace::new(),
    )?;
    registry.register(
        MinMaxScaler::NAME,
        PluginCategory::Preprocessing,
        PluginSubtype::FeatureScaling,
        PluginFactory::transformer(|_| Ok(MinMaxScaler::default())),
        HyperparameterSpace::new(),
    )?;
    registry.register(
        VarianceThreshold::NAME,
        PluginCategory::Preprocessing,
        PluginSubtype::FeatureSelection,
        PluginFactory::transformer(|c| Ok(VarianceThreshold::new(float_param(c, "threshold")?))),
        VarianceThreshold::space(),
    )?;
    Ok(())
}

/// Per-column (center, scale) statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ColumnStats {
    center: Array1<f64>,
    scale: Array1<f64>,
}

impl ColumnStats {
    fn apply(&self, x: &Array2<f64>) -> Array2<f64> {
        let mut out = x.clone();
        for mut row in out.rows_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = (*v - self.center[j]) / self.scale[j];
            }
        }
        out
    }
}

fn column_variance(x: &Array2<f64>) -> Array1<f64> {
    x.var_axis(Axis(0), 0.0)
}

/// Standard scaling (z-score normalization): (x - mean) / std
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    stats: Option<ColumnStats>,
}

impl StandardScaler {
    pub const NAME: &'static str = "standard_scaler";
}

impl Plugin for StandardScaler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&mut self, x: &Array2<f64>, _target: Target<'_>) -> Result<()> {
        let center = x
            .mean_axis(Axis(0))
            .ok_or_else(|| PrognosError::TrainingError("no rows to scale".to_string()))?;
        // constant columns are left centred but unscaled
        let scale = column_variance(x).mapv(|v| if v > 1e-12 { v.sqrt() } else { 1.0 });
        self.stats = Some(ColumnStats { center, scale });
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(ArtifactKind::Plugin, self)
    }
}

impl Transformer for StandardScaler {
    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let stats = self.stats.as_ref().ok_or(PrognosError::ModelNotFitted)?;
        check_width(stats.center.len(), x)?;
        Ok(stats.apply(x))
    }
}

/// Min-Max scaling: (x - min) / (max - min)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinMaxScaler {
    stats: Option<ColumnStats>,
}

impl MinMaxScaler {
    pub const NAME: &'static str = "minmax_scaler";
}

impl Plugin for MinMaxScaler {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&mut self, x: &Array2<f64>, _target: Target<'_>) -> Result<()> {
        if x.nrows() == 0 {
            return Err(PrognosError::TrainingError("no rows to scale".to_string()));
        }
        let min = x.fold_axis(Axis(0), f64::INFINITY, |a, b| a.min(*b));
        let max = x.fold_axis(Axis(0), f64::NEG_INFINITY, |a, b| a.max(*b));
        let scale = (&max - &min).mapv(|r| if r > 1e-12 { r } else { 1.0 });
        self.stats = Some(ColumnStats { center: min, scale });
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(ArtifactKind::Plugin, self)
    }
}

impl Transformer for MinMaxScaler {
    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let stats = self.stats.as_ref().ok_or(PrognosError::ModelNotFitted)?;
        check_width(stats.center.len(), x)?;
        Ok(stats.apply(x))
    }
}

/// Drops features whose variance does not exceed `threshold`.
///
/// At least one feature (the highest-variance one) is always kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceThreshold {
    threshold: f64,
    n_features: usize,
    selected: Option<Vec<usize>>,
}

impl VarianceThreshold {
    pub const NAME: &'static str = "variance_threshold";

    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            n_features: 0,
            selected: None,
        }
    }

    pub fn space() -> HyperparameterSpace {
        HyperparameterSpace::new().float("threshold", 0.0, 0.2)
    }

    /// Indices of retained features
    pub fn selected(&self) -> Option<&[usize]> {
        self.selected.as_deref()
    }
}

impl Plugin for VarianceThreshold {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn fit(&mut self, x: &Array2<f64>, _target: Target<'_>) -> Result<()> {
        if x.ncols() == 0 || x.nrows() == 0 {
            return Err(PrognosError::TrainingError("empty training matrix".to_string()));
        }
        let variance = column_variance(x);
        let mut selected: Vec<usize> = (0..variance.len())
            .filter(|&j| variance[j] > self.threshold)
            .collect();
        if selected.is_empty() {
            let mut best = 0;
            for j in 1..variance.len() {
                if variance[j] > variance[best] {
                    best = j;
                }
            }
            selected.push(best);
        }
        self.n_features = x.ncols();
        self.selected = Some(selected);
        Ok(())
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        encode(ArtifactKind::Plugin, self)
    }
}

impl Transformer for VarianceThreshold {
    fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        let selected = self.selected.as_ref().ok_or(PrognosError::ModelNotFitted)?;
        check_width(self.n_features, x)?;
        Ok(x.select(Axis(1), selected))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fit<T: Plugin>(plugin: &mut T, x: &Array2<f64>) {
        let y = Array1::zeros(x.nrows());
        plugin.fit(x, Target::new(&y, None)).unwrap();
    }

    #[test]
    fn test_standard_scaler() {
        let x = array![[1.0, 5.0], [3.0, 5.0]];
        let mut scaler = StandardScaler::default();
        fit(&mut scaler, &x);
        let out = scaler.transform(&x).unwrap();
        assert_eq!(out, array![[-1.0, 0.0], [1.0, 0.0]]);
    }

    #[test]
    fn test_minmax_scaler() {
        let x = array![[0.0], [5.0], [10.0]];
        let mut scaler = MinMaxScaler::default();
        fit(&mut scaler, &x);
        let out = scaler.transform(&x).unwrap();
        assert_eq!(out.column(0).to_vec(), vec![0.0, 0.5, 1.0]);
    }

    #[test]
    fn test_variance_threshold_keeps_one() {
        let x = array![[1.0, 2.0, 0.0], [1.0, 2.0, 0.1]];
        let mut vt = VarianceThreshold::new(0.5);
        fit(&mut vt, &x);
        assert_eq!(vt.selected().unwrap(), &[2]);
        let out = vt.transform(&x).unwrap();
        assert_eq!(out.ncols(), 1);
    }

    #[test]
    fn test_unfitted_and_width_errors() {
        let scaler = StandardScaler::default();
        assert!(matches!(
            scaler.transform(&array![[1.0]]),
            Err(PrognosError::ModelNotFitted)
        ));

        let mut scaler = StandardScaler::default();
        fit(&mut scaler, &array![[1.0, 2.0], [2.0, 3.0]]);
        assert!(matches!(
            scaler.transform(&array![[1.0]]),
            Err(PrognosError::ShapeError { .. })
        ));
    }
}
