use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SourceError {
    #[error("Script path cannot be empty")]
    EmptyPath,

    #[error("Script path must be absolute: {0}")]
    RelativePath(PathBuf),
}

/// A script to evaluate: absolute path plus its text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptSource {
    file_path: PathBuf,
    code: String,
}

impl ScriptSource {
    pub fn new(file_path: impl Into<PathBuf>, code: impl Into<String>) -> Result<Self, SourceError> {
        let file_path = file_path.into();
        if file_path.as_os_str().is_empty() {
            return Err(SourceError::EmptyPath);
        }
        if !file_path.is_absolute() {
            return Err(SourceError::RelativePath(file_path));
        }
        Ok(Self {
            file_path,
            code: code.into(),
        })
    }

    /// Read a script from disk
    pub fn from_file(file_path: &Path) -> Result<Self> {
        let code = fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read script: {}", file_path.display()))?;
        Ok(Self::new(file_path, code)?)
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}
