//! Error types for the prognos study engine

use thiserror::Error;

/// Result type alias for prognos operations
pub type Result<T> = std::result::Result<T, PrognosError>;

/// Main error type for the prognos engine
#[derive(Error, Debug)]
pub enum PrognosError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Plugin '{name}' is already registered in category {category}")]
    DuplicateName { category: String, name: String },

    #[error("Unknown plugin: {0}")]
    UnknownPlugin(String),

    #[error("Invalid hyperparameter: {name} = {value}, {reason}")]
    InvalidHyperparameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Plugin '{plugin}' lacks capability: {capability}")]
    CapabilityAbsent { plugin: String, capability: String },

    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },

    #[error("Training error: {0}")]
    TrainingError(String),

    #[error("All {total} folds failed (failed: {failed}), last error: {last_error}")]
    FoldFailure {
        failed: usize,
        total: usize,
        last_error: String,
    },

    #[error("No pipeline reached the score threshold {threshold} (best: {best:?})")]
    NoQualifyingPipeline { threshold: f64, best: Option<f64> },

    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Model not fitted")]
    ModelNotFitted,

    #[error("Study cancelled")]
    Cancelled,

    #[error("Computation error: {0}")]
    ComputationError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl From<polars::error::PolarsError> for PrognosError {
    fn from(err: polars::error::PolarsError) -> Self {
        PrognosError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for PrognosError {
    fn from(err: serde_json::Error) -> Self {
        PrognosError::SerializationError(err.to_string())
    }
}

impl From<bincode::Error> for PrognosError {
    fn from(err: bincode::Error) -> Self {
        PrognosError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for PrognosError {
    fn from(err: ndarray::ShapeError) -> Self {
        PrognosError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PrognosError::UnknownPlugin("xgboost".to_string());
        assert_eq!(err.to_string(), "Unknown plugin: xgboost");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: PrognosError = io_err.into();
        assert!(matches!(err, PrognosError::IoError(_)));
    }

    #[test]
    fn test_no_qualifying_display() {
        let err = PrognosError::NoQualifyingPipeline {
            threshold: 0.99,
            best: Some(0.6),
        };
        assert!(err.to_string().contains("0.99"));
    }
}
