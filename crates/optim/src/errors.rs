use thiserror::Error;

/// A result type for optimization errors
pub type Result<T> = std::result::Result<T, OptimError>;

/// An error for constrained optimization runs
#[derive(Error, Debug)]
pub enum OptimError {
    /// When solver configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfigError(String),
    /// When a parameter definition is invalid (bounds, initial value, duplicated name)
    #[error("Invalid parameter: {0}")]
    InvalidParameterError(String),
    /// When the requested method is not registered
    #[error("Unsupported optimization method: {0}")]
    UnsupportedMethodError(String),
    /// When a run is moved to a status it cannot reach
    #[error("Invalid run status transition: {from} -> {to}")]
    InvalidStateTransition {
        /// Current status
        from: String,
        /// Requested status
        to: String,
    },
    /// When a run id is not known
    #[error("Unknown run: {0}")]
    UnknownRunError(String),
    /// When a run was cancelled before producing any point
    #[error("Run cancelled: {0}")]
    CancelledError(String),
    /// When an objective evaluator is referenced but not registered
    #[error("Unknown evaluator: {0}")]
    UnknownEvaluatorError(String),
    /// When an expression or a constraint is invalid
    #[error(transparent)]
    ExprError(#[from] tunebox_expr::ExprError),
    /// When a surrogate model operation fails
    #[error(transparent)]
    SurrogateError(#[from] tunebox_surrogate::SurrogateError),
    /// When an Argmin framework error is raised
    #[error(transparent)]
    ArgminError(#[from] argmin::core::Error),
    /// When (de)serialization to json fails
    #[error("Json error")]
    JsonError(#[from] serde_json::Error),
    /// When IO fails
    #[error("IO error")]
    IoError(#[from] std::io::Error),
}
