//! Kernel source files and inline sources.

use std::fs;

use crate::error::CompileError;

/// A kernel source: a file name, optionally with inline content.
///
/// With inline content the file name only serves as the name compilers show
/// in diagnostics; nothing is read from disk.
#[derive(Debug, Clone)]
pub struct KernelSource {
    filename: String,
    content: Option<String>,
}

impl KernelSource {
    pub fn from_file(filename: impl Into<String>) -> Self {
        KernelSource {
            filename: filename.into(),
            content: None,
        }
    }

    pub fn inline(filename: impl Into<String>, content: impl Into<String>) -> Self {
        KernelSource {
            filename: filename.into(),
            content: Some(content.into()),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.filename
    }

    pub fn read(&self) -> Result<String, CompileError> {
        match &self.content {
            Some(content) => Ok(content.clone()),
            None => fs::read_to_string(&self.filename).map_err(|err| CompileError::Source {
                path: self.filename.clone(),
                message: err.to_string(),
            }),
        }
    }
}

impl From<&str> for KernelSource {
    fn from(filename: &str) -> Self {
        KernelSource::from_file(filename)
    }
}

impl From<String> for KernelSource {
    fn from(filename: String) -> Self {
        KernelSource::from_file(filename)
    }
}
