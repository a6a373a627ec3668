use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StateValueError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Type error: {0}")]
    TypeError(String),

    #[error("Range error: {0}")]
    RangeError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}
