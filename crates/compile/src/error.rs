//! Compilation errors.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CompileError {
    /// The compiler rejected the kernel; the message carries its log.
    #[error("kernel compilation failed:\n{log}")]
    Failed { log: String },

    #[error("cannot read kernel source `{path}`: {message}")]
    Source { path: String, message: String },

    #[error("cannot form a template argument from `{0}`")]
    BadTemplateArg(String),

    #[error("background compile worker disappeared")]
    Disconnected,

    #[error("compiler backend error: {0}")]
    Backend(String),
}
