use thiserror::Error;

/// A result type for expression and constraint handling
pub type Result<T> = std::result::Result<T, ExprError>;

/// An error when parsing or evaluating user expressions or building constraints
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExprError {
    /// When the expression text is malformed or uses a token outside the allow-list
    #[error("Syntax error at position {position}: {message}")]
    ExpressionSyntaxError {
        /// Byte offset in the source text
        position: usize,
        /// What went wrong
        message: String,
    },
    /// When a free variable of the expression is not bound
    #[error("Undefined variable: {0}")]
    UndefinedVariableError(String),
    /// When a constraint with the same name already exists
    #[error("Duplicate constraint: {0}")]
    DuplicateConstraintError(String),
    /// When the constraint type is neither equality nor inequality
    #[error("Invalid constraint type: {0}")]
    InvalidConstraintTypeError(String),
    /// When a value is out of its valid domain
    #[error("InvalidValue error: {0}")]
    InvalidValueError(String),
}
