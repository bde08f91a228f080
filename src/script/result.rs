use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};

use super::context::ScriptMessage;
use super::host::Diagnostic;
use crate::output::OutputFileInfo;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EvaluationOutcome {
    Succeeded,
    CompileFailed,
    RuntimeFailed,
}

impl EvaluationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationOutcome::Succeeded => "succeeded",
            EvaluationOutcome::CompileFailed => "compile-failed",
            EvaluationOutcome::RuntimeFailed => "runtime-failed",
        }
    }
}

impl fmt::Display for EvaluationOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One error surfaced by an evaluation. Line and column are one-based; zero means unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptError {
    pub message: String,
    pub line: usize,
    pub column: usize,
    pub file_path: Option<PathBuf>,
}

impl ScriptError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            line: 0,
            column: 0,
            file_path: None,
        }
    }

    pub fn in_file(mut self, path: &Path) -> Self {
        self.file_path = Some(path.to_path_buf());
        self
    }
}

impl From<Diagnostic> for ScriptError {
    fn from(diagnostic: Diagnostic) -> Self {
        Self {
            message: diagnostic.message,
            line: diagnostic.line,
            column: diagnostic.column,
            file_path: diagnostic.file_path,
        }
    }
}

impl fmt::Display for ScriptError {
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

/// Everything an evaluation produced. Built once by the engine and never mutated.
#[derive(Debug, Clone, Serialize)]
pub struct ScriptResult {
    script_path: PathBuf,
    outcome: EvaluationOutcome,
    output_files: Vec<OutputFileInfo>,
    errors: Vec<ScriptError>,
    messages: Vec<ScriptMessage>,
}

impl ScriptResult {
    pub(crate) fn new(
        script_path: PathBuf,
        outcome: EvaluationOutcome,
        output_files: Vec<OutputFileInfo>,
        errors: Vec<ScriptError>,
        messages: Vec<ScriptMessage>,
    ) -> Self {
        Self {
            script_path,
            outcome,
            output_files,
            errors,
            messages,
        }
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn outcome(&self) -> EvaluationOutcome {
        self.outcome
    }

    pub fn output_files(&self) -> &[OutputFileInfo] {
        &self.output_files
    }

    pub fn errors(&self) -> &[ScriptError] {
        &self.errors
    }

    pub fn messages(&self) -> &[ScriptMessage] {
        &self.messages
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    /// Files that replaced their targets
    pub fn generated_files(&self) -> impl Iterator<Item = &OutputFileInfo> {
        self.output_files.iter().filter(|f| f.output_was_generated)
    }

    /// `{BuildAction}|{FilePath}` for every promoted file
    pub fn promotion_records(&self) -> Vec<String> {
        self.generated_files()
            .map(|f| format!("{}|{}", f.build_action, f.file_path.display()))
            .collect()
    }
}
