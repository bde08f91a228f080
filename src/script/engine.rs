/// Script evaluation and output reconciliation
///
/// One call to [`Engine::evaluate`] runs a script through its [`ScriptHost`] against a fresh
/// [`ScriptContext`], classifies the outcome, decides from the [`OutputBehavior`] whether temp
/// outputs replace their targets, and always removes every temp artifact before returning.
use anyhow::{Context, Result};
use std::any::Any;
use std::fs;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::behavior::OutputBehavior;
use super::context::{resolve_assembly_references, ScriptContext};
use super::directives::scan_directives;
use super::host::{EvaluationError, ScriptHost};
use super::result::{EvaluationOutcome, ScriptError, ScriptResult};
use super::source::{ScriptSource, SourceError};
use crate::output::{BraceFormatter, Formatter, FormatterOptions, OutputError, OutputFileWriter};
use crate::project::Project;
use crate::resolver::{ClassFileRewriter, DefaultSourceResolver, InterceptingResolver};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error("Failed to read script {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Output(#[from] OutputError),

    #[error("Evaluation of {0} was cancelled")]
    Cancelled(PathBuf),

    #[error("Evaluation task for {path} failed: {message}")]
    Task { path: PathBuf, message: String },
}

pub struct Engine {
    project: Arc<Project>,
    host: Arc<dyn ScriptHost>,
    formatter: Arc<dyn Formatter>,
    output_behavior: OutputBehavior,
    search_paths: Vec<PathBuf>,
    mirror_rewrites: bool,
    max_parallel: usize,
}

impl Engine {
    pub fn new(project: Arc<Project>, host: Arc<dyn ScriptHost>) -> Self {
        Self {
            project,
            host,
            formatter: Arc::new(BraceFormatter),
            output_behavior: OutputBehavior::default(),
            search_paths: Vec::new(),
            mirror_rewrites: false,
            max_parallel: num_cpus::get().max(1),
        }
    }

    pub fn with_output_behavior(mut self, behavior: OutputBehavior) -> Self {
        self.output_behavior = behavior;
        self
    }

    pub fn with_formatter(mut self, formatter: Arc<dyn Formatter>) -> Self {
        self.formatter = formatter;
        self
    }

    /// Extra directories searched for `#load` and `#r` targets
    pub fn with_search_paths(mut self, search_paths: Vec<PathBuf>) -> Self {
        self.search_paths = search_paths;
        self
    }

    pub fn with_mirrored_rewrites(mut self, mirror: bool) -> Self {
        self.mirror_rewrites = mirror;
        self
    }

    pub fn with_max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = max_parallel.max(1);
        self
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    pub fn output_behavior(&self) -> OutputBehavior {
        self.output_behavior
    }

    /// Read a script from disk and evaluate it
    pub fn evaluate_file(&self, script_path: &Path) -> Result<ScriptResult, EngineError> {
        let code = fs::read_to_string(script_path).map_err(|source| EngineError::Read {
            path: script_path.to_path_buf(),
            source,
        })?;
        let source = ScriptSource::new(script_path, code)?;
        self.evaluate(&source)
    }

    pub fn evaluate(&self, source: &ScriptSource) -> Result<ScriptResult, EngineError> {
        let script_path = source.file_path();
        tracing::info!(
            operation = "evaluate",
            script = %script_path.display(),
            behavior = %self.output_behavior,
            "evaluating script"
        );

        let directives = scan_directives(source.code(), script_path);
        let default_resolver = DefaultSourceResolver::new(
            self.search_paths.clone(),
            Some(self.project.directory().to_path_buf()),
        );
        let (references, mut diagnostics) =
            resolve_assembly_references(&default_resolver, &directives);
        let resolver = InterceptingResolver::new(
            default_resolver,
            Arc::new(ClassFileRewriter::new(references.clone())),
        )
        .with_mirrored_rewrites(self.mirror_rewrites);

        let mut context = ScriptContext::new(script_path, Arc::clone(&self.project), resolver)?;
        context.set_references(references);
        diagnostics.extend(context.load_directives(directives));

        let (outcome, mut errors) = if diagnostics.is_empty() {
            self.run_host(source, &mut context)
        } else {
            let errors = diagnostics.into_iter().map(ScriptError::from).collect();
            (EvaluationOutcome::CompileFailed, errors)
        };

        if self.output_behavior.should_promote(outcome) {
            errors.extend(self.promote(&mut context));
        } else {
            tracing::debug!(
                operation = "evaluate",
                script = %script_path.display(),
                status = %outcome,
                "outputs discarded"
            );
        }

        let output_files = context.outputs().output_file_infos();
        context.cleanup();

        tracing::info!(
            operation = "evaluate",
            script = %script_path.display(),
            status = %outcome,
            errors = errors.len(),
            "evaluation finished"
        );

        Ok(ScriptResult::new(
            script_path.to_path_buf(),
            outcome,
            output_files,
            errors,
            context.into_messages(),
        ))
    }

    fn run_host(
        &self,
        source: &ScriptSource,
        context: &mut ScriptContext,
    ) -> (EvaluationOutcome, Vec<ScriptError>) {
        let script_path = source.file_path();
        let ran = panic::catch_unwind(AssertUnwindSafe(|| self.host.evaluate(source, context)));

        match ran {
            Ok(Ok(())) => (EvaluationOutcome::Succeeded, Vec::new()),
            Ok(Err(EvaluationError::Compile(diagnostics))) => {
                let mut errors: Vec<ScriptError> = diagnostics
                    .into_iter()
                    .map(|d| {
                        let d = if d.file_path.is_none() { d.in_file(script_path) } else { d };
                        ScriptError::from(d)
                    })
                    .collect();
                if errors.is_empty() {
                    errors.push(ScriptError::new("Compilation failed").in_file(script_path));
                }
                (EvaluationOutcome::CompileFailed, errors)
            }
            Ok(Err(EvaluationError::Runtime(error))) => (
                EvaluationOutcome::RuntimeFailed,
                vec![ScriptError::new(format!("{:#}", error)).in_file(script_path)],
            ),
            Ok(Err(EvaluationError::Aggregate(inner))) => {
                let mut errors: Vec<ScriptError> = inner
                    .iter()
                    .map(|e| ScriptError::new(format!("{:#}", e)).in_file(script_path))
                    .collect();
                if errors.is_empty() {
                    errors.push(ScriptError::new("Script failed").in_file(script_path));
                }
                (EvaluationOutcome::RuntimeFailed, errors)
            }
            Err(payload) => (
                EvaluationOutcome::RuntimeFailed,
                vec![ScriptError::new(format!(
                    "Script host panicked: {}",
                    panic_message(payload.as_ref())
                ))
                .in_file(script_path)],
            ),
        }
    }

    /// Replace every qualifying target with its temp file. Per-file failures are collected.
    fn promote(&self, context: &mut ScriptContext) -> Vec<ScriptError> {
        let script_path = context.script_path().to_path_buf();
        let defaults = self.project.formatting_defaults().clone();
        let mut errors = Vec::new();

        let writers = match context.output().output_files_for_writing() {
            Ok(writers) => writers,
            Err(e) => {
                errors.push(ScriptError::new(e.to_string()).in_file(&script_path));
                return errors;
            }
        };

        for writer in writers {
            match promote_file(writer, &defaults, self.formatter.as_ref()) {
                Ok(()) => tracing::info!(
                    operation = "promote",
                    script = %script_path.display(),
                    path = %writer.file_path().display(),
                    build_action = %writer.build_action(),
                    "generated output"
                ),
                Err(e) => {
                    tracing::error!(
                        operation = "promote",
                        path = %writer.file_path().display(),
                        error = %e,
                        "failed to promote output"
                    );
                    errors.push(ScriptError::new(format!("{:#}", e)).in_file(writer.file_path()));
                }
            }
        }

        errors
    }

    /// Evaluate many scripts on the blocking pool
    ///
    /// At most `max_parallel` evaluations run at once. `cancel` is checked before each
    /// evaluation starts; scripts not yet started when it is set report [`EngineError::Cancelled`].
    /// Results arrive in completion order.
    pub async fn evaluate_all(
        self: &Arc<Self>,
        scripts: Vec<PathBuf>,
        cancel: Arc<AtomicBool>,
    ) -> Vec<(PathBuf, Result<ScriptResult, EngineError>)> {
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks = JoinSet::new();

        for script in scripts {
            let engine = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let cancel = Arc::clone(&cancel);

            tasks.spawn(async move {
                let Ok(permit) = semaphore.acquire_owned().await else {
                    return (script.clone(), Err(EngineError::Cancelled(script)));
                };
                if cancel.load(Ordering::SeqCst) {
                    return (script.clone(), Err(EngineError::Cancelled(script)));
                }

                let path = script.clone();
                let result = tokio::task::spawn_blocking(move || engine.evaluate_file(&path))
                    .await
                    .unwrap_or_else(|e| {
                        Err(EngineError::Task {
                            path: script.clone(),
                            message: e.to_string(),
                        })
                    });
                drop(permit);
                (script, result)
            });
        }

        let mut results = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(e) => tracing::error!(error = %e, "evaluation task aborted"),
            }
        }
        results
    }
}

fn promote_file(
    writer: &mut OutputFileWriter,
    defaults: &FormatterOptions,
    formatter: &dyn Formatter,
) -> Result<()> {
    replace_file(writer.temp_file_path(), writer.file_path())?;
    writer.mark_generated();

    if writer.format_enabled() {
        let target = writer.file_path();
        let format = writer.formatter_options().merged_over(defaults);
        let text = fs::read_to_string(target)
            .with_context(|| format!("Failed to read {} for formatting", target.display()))?;
        let formatted = formatter
            .format(&text, &format)
            .with_context(|| format!("Failed to format {}", target.display()))?;
        write_atomically(target, &formatted)?;
    }

    Ok(())
}

/// Move `from` over `to`, falling back to copy and delete across filesystems
fn replace_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    fs::copy(from, to)
        .with_context(|| format!("Failed to replace {} with {}", to.display(), from.display()))?;
    fs::remove_file(from).with_context(|| format!("Failed to delete {}", from.display()))?;
    Ok(())
}

fn write_atomically(target: &Path, contents: &str) -> Result<()> {
    let dir = target
        .parent()
        .with_context(|| format!("{} has no parent directory", target.display()))?;
    let mut temp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("Failed to create temp file in {}", dir.display()))?;
    temp.write_all(contents.as_bytes())?;
    temp.persist(target)
        .map_err(|e| e.error)
        .with_context(|| format!("Failed to write {}", target.display()))?;
    Ok(())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
