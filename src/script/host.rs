/// Script host abstraction
///
/// The engine never executes code itself. A [`ScriptHost`] receives the script and a prepared
/// [`ScriptContext`] and reports either success, compile diagnostics, or runtime failures.
use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

use super::context::ScriptContext;
use super::source::ScriptSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A compiler-style diagnostic. Line and column are one-based; zero means unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub file_path: Option<PathBuf>,
}

impl Diagnostic {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            message: message.into(),
            line: 0,
            column: 0,
            file_path: None,
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(message)
        }
    }

    pub fn at(mut self, line: usize, column: usize) -> Self {
        self.line = line;
        self.column = column;
        self
    }

    pub fn in_file(mut self, path: &Path) -> Self {
        self.file_path = Some(path.to_path_buf());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(path) = &self.file_path {
            write!(f, "{}", path.display())?;
        }
        if self.line > 0 {
            write!(f, "({},{})", self.line, self.column)?;
        }
        if self.file_path.is_some() || self.line > 0 {
            write!(f, ": ")?;
        }
        f.write_str(&self.message)
    }
}

#[derive(Debug, Error)]
pub enum EvaluationError {
    /// The script never ran
    #[error("compilation failed with {} diagnostic(s)", .0.len())]
    Compile(Vec<Diagnostic>),

    #[error("{0:#}")]
    Runtime(anyhow::Error),

    /// Several independent failures surfaced from one run
    #[error("{} runtime errors", .0.len())]
    Aggregate(Vec<anyhow::Error>),
}

pub trait ScriptHost: Send + Sync {
    fn evaluate(
        &self,
        source: &ScriptSource,
        context: &mut ScriptContext,
    ) -> Result<(), EvaluationError>;
}

impl<F> ScriptHost for F
where
    F: Fn(&ScriptSource, &mut ScriptContext) -> Result<(), EvaluationError> + Send + Sync,
{
    fn evaluate(
        &self,
        source: &ScriptSource,
        context: &mut ScriptContext,
    ) -> Result<(), EvaluationError> {
        self(source, context)
    }
}
