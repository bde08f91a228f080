use serde::Serialize;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;

use super::directives::{DirectiveKind, ResolutionTargetType, ScriptDirective};
use super::host::Diagnostic;
use crate::output::{OutputError, OutputFileCollection};
use crate::project::Project;
use crate::resolver::{DefaultSourceResolver, InterceptingResolver, MetadataReference, SourceResolver};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MessageType {
    Info,
    Warning,
    Error,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MessageType::Info => "Info",
            MessageType::Warning => "Warning",
            MessageType::Error => "Error",
        })
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Ok(MessageType::Info),
            "warning" => Ok(MessageType::Warning),
            "error" => Ok(MessageType::Error),
            other => Err(format!("Unknown message type: {}", other)),
        }
    }
}

/// A message logged by a script while it runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptMessage {
    pub message_type: MessageType,
    pub message: String,
    pub line: usize,
    pub column: usize,
}

impl ScriptMessage {
    pub fn new(message_type: MessageType, message: impl Into<String>) -> Self {
        Self {
            message_type,
            message: message.into(),
            line: 0,
            column: 0,
        }
    }

    /// `{MessageType}|{Message}`
    pub fn structured(&self) -> String {
        format!("{}|{}", self.message_type, self.message)
    }

    /// Parse a `{MessageType}|{Message}` line
    pub fn parse_structured(line: &str) -> Option<Self> {
        let (kind, message) = line.split_once('|')?;
        let message_type = kind.parse().ok()?;
        Some(Self::new(message_type, message))
    }
}

/// A `#load` target after resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedSource {
    pub directive: ScriptDirective,
    /// Where the (possibly rewritten) text can be read from
    pub path: PathBuf,
    pub text: String,
}

fn looks_like_path(reference: &str) -> bool {
    reference.contains('/')
        || reference.contains('\\')
        || Path::new(reference)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("dll") || e.eq_ignore_ascii_case("exe"))
}

fn directive_diagnostic(directive: &ScriptDirective, message: String) -> Diagnostic {
    Diagnostic::error(message)
        .at(directive.line_number + 1, directive.column + 1)
        .in_file(&directive.script_path)
}

/// Resolve `#r` directives into metadata references
///
/// Bare assembly names that do not exist as files are kept as named references. Anything that
/// looks like a file path must exist.
pub fn resolve_assembly_references(
    resolver: &DefaultSourceResolver,
    directives: &[ScriptDirective],
) -> (Vec<MetadataReference>, Vec<Diagnostic>) {
    let mut references = Vec::new();
    let mut diagnostics = Vec::new();

    for directive in directives
        .iter()
        .filter(|d| d.kind == DirectiveKind::AssemblyReference)
    {
        let reference = match resolver.resolve_reference(&directive.reference, &directive.script_path) {
            Some(path) => MetadataReference::from_assembly_path(&path),
            None if !directive.reference.is_empty() && !looks_like_path(&directive.reference) => {
                MetadataReference::new(
                    directive.reference.clone(),
                    vec![directive.reference.clone()],
                )
            }
            None => {
                diagnostics.push(directive_diagnostic(
                    directive,
                    format!("Metadata file '{}' could not be found", directive.reference),
                ));
                continue;
            }
        };
        if !references.contains(&reference) {
            references.push(reference);
        }
    }

    (references, diagnostics)
}

/// Everything a script can see and touch during one evaluation
#[derive(Debug)]
pub struct ScriptContext {
    script_path: PathBuf,
    project: Arc<Project>,
    output: OutputFileCollection,
    resolver: InterceptingResolver,
    directives: Vec<ScriptDirective>,
    loads: Vec<LoadedSource>,
    references: Vec<MetadataReference>,
    messages: Vec<ScriptMessage>,
}

impl ScriptContext {
    pub fn new(
        script_path: &Path,
        project: Arc<Project>,
        resolver: InterceptingResolver,
    ) -> Result<Self, OutputError> {
        Ok(Self {
            output: OutputFileCollection::new(script_path)?,
            script_path: script_path.to_path_buf(),
            project,
            resolver,
            directives: Vec::new(),
            loads: Vec::new(),
            references: Vec::new(),
            messages: Vec::new(),
        })
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn project_file_path(&self) -> &Path {
        self.project.file_path()
    }

    pub fn solution_file_path(&self) -> Option<&Path> {
        self.project.solution_path()
    }

    pub fn output(&mut self) -> &mut OutputFileCollection {
        &mut self.output
    }

    pub fn outputs(&self) -> &OutputFileCollection {
        &self.output
    }

    pub fn directives(&self) -> &[ScriptDirective] {
        &self.directives
    }

    pub fn loads(&self) -> &[LoadedSource] {
        &self.loads
    }

    pub fn references(&self) -> &[MetadataReference] {
        &self.references
    }

    pub fn messages(&self) -> &[ScriptMessage] {
        &self.messages
    }

    pub fn log(&mut self, message_type: MessageType, message: impl Into<String>) {
        let message = ScriptMessage::new(message_type, message);
        match message_type {
            MessageType::Info => tracing::info!(script = %self.script_path.display(), "{}", message.message),
            MessageType::Warning => tracing::warn!(script = %self.script_path.display(), "{}", message.message),
            MessageType::Error => tracing::error!(script = %self.script_path.display(), "{}", message.message),
        }
        self.messages.push(message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.log(MessageType::Info, message);
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        self.log(MessageType::Warning, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.log(MessageType::Error, message);
    }

    pub(crate) fn set_references(&mut self, references: Vec<MetadataReference>) {
        self.references = references;
    }

    /// Resolve every `#load` directive through the session resolver
    ///
    /// Class files are rewritten and staged next to their source so hosts can read them from
    /// disk. Returns one diagnostic per directive that could not be loaded.
    pub(crate) fn load_directives(&mut self, directives: Vec<ScriptDirective>) -> Vec<Diagnostic> {
        let mut diagnostics = Vec::new();

        for mut directive in directives {
            if directive.kind != DirectiveKind::ScriptReference {
                self.directives.push(directive);
                continue;
            }

            match self.load_one(&mut directive) {
                Ok(loaded) => self.loads.push(loaded),
                Err(message) => diagnostics.push(directive_diagnostic(&directive, message)),
            }
            self.directives.push(directive);
        }

        diagnostics
    }

    fn load_one(&mut self, directive: &mut ScriptDirective) -> Result<LoadedSource, String> {
        let resolved = self
            .resolver
            .resolve_reference(&directive.reference, &directive.script_path)
            .ok_or_else(|| format!("Source file '{}' could not be found", directive.reference))?;

        let mut reader = self
            .resolver
            .open_read(&resolved)
            .map_err(|e| e.to_string())?;
        let mut text = String::new();
        reader
            .read_to_string(&mut text)
            .map_err(|e| format!("Failed to read {}: {}", resolved.display(), e))?;

        let path = if ResolutionTargetType::of(&resolved) == ResolutionTargetType::Cs {
            let staging = self
                .resolver
                .normalize_path(&resolved.to_string_lossy(), &directive.script_path)
                .ok_or_else(|| format!("Could not normalize '{}'", directive.reference))?;
            std::fs::write(&staging, &text)
                .map_err(|e| format!("Failed to stage {}: {}", staging.display(), e))?;
            self.resolver.track_staged_file(staging.clone());
            directive.set_rewritten_path(staging.clone());
            staging
        } else {
            resolved
        };

        tracing::debug!(
            operation = "directive.load",
            script = %directive.script_path.display(),
            path = %path.display(),
            "loaded directive target"
        );

        Ok(LoadedSource {
            directive: directive.clone(),
            path,
            text,
        })
    }

    /// Delete temp outputs and staged rewrites. Never fails.
    pub(crate) fn cleanup(&mut self) {
        self.output.cleanup_all_temp_data();
        self.resolver.cleanup();
    }

    pub(crate) fn into_messages(self) -> Vec<ScriptMessage> {
        self.messages
    }
}
