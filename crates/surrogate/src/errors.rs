use thiserror::Error;

/// A result type for surrogate modeling
pub type Result<T> = std::result::Result<T, SurrogateError>;

/// An error when training, using or persisting a surrogate model
#[derive(Error, Debug)]
pub enum SurrogateError {
    /// When too few samples are given to train a model
    #[error("Insufficient data: at least {required} samples required, got {actual}")]
    InsufficientDataError {
        /// Minimum number of samples
        required: usize,
        /// Number of samples given
        actual: usize,
    },
    /// When no model is registered under the given id
    #[error("Unknown surrogate model '{0}'")]
    UnknownModelError(String),
    /// When the model kind does not support the requested operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperationError(String),
    /// When likelihood computation fails
    #[error("Likelihood computation error: {0}")]
    LikelihoodComputationError(String),
    /// When error due to a bad value
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
    #[error(transparent)]
    /// When linear algebra computation fails
    LinalgError(#[from] linfa_linalg::LinalgError),
    /// When a linfa error occurs
    #[error(transparent)]
    LinfaError(#[from] linfa::error::Error),
    /// When a file cannot be read or written
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    /// When (de)serialization to json fails
    #[error("Json error: {0}")]
    JsonError(#[from] serde_json::Error),
}
