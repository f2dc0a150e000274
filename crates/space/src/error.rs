//! Error types for the configuration-space crate.

use thiserror::Error;

use crate::value::Value;

/// A dynamic value could not be narrowed to the requested type.
#[derive(Debug, Clone, Error)]
#[error("value `{value}` cannot be cast to {target}")]
pub struct CastError {
    value: String,
    target: &'static str,
}

impl CastError {
    pub(crate) fn new(value: &Value, target: &'static str) -> Self {
        CastError {
            value: value.to_string(),
            target,
        }
    }
}

#[derive(Debug, Error)]
pub enum SpaceError {
    #[error(transparent)]
    Cast(#[from] CastError),

    #[error("division or modulo by zero")]
    DivideByZero,

    #[error("arithmetic overflow")]
    Overflow,

    #[error("unknown parameter `{0}`")]
    MissingParam(String),

    #[error("parameter `{0}` is already defined")]
    DuplicateParam(String),

    #[error("parameter `{0}` has an empty value domain")]
    EmptyDomain(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),
}
