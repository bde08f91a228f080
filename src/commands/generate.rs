/// `scriptgen generate` command implementation
///
/// Evaluates scripts against a project. Promotion records go to stdout, errors and script
/// messages to stderr.
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::ExitCode;
use crate::cli::GenerateArgs;
use crate::config_discovery::load_config_with_discovery;
use crate::merger::MergedGenerateConfig;
use crate::paths::absolutize;
use crate::project::Project;
use crate::script::{Engine, ProcessHost, ScriptError};

/// Settings passed as JSON on stdin by build integrations
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct StdinSettings {
    pub project_file_path: Option<PathBuf>,
    pub solution_file_path: Option<PathBuf>,
    pub script_file_paths: Vec<PathBuf>,
    pub properties: BTreeMap<String, String>,
}

impl StdinSettings {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        serde_json::from_reader(reader).context("Failed to parse settings from stdin")
    }

    /// Fill what the command line left unset. Command-line properties win.
    pub fn apply_to(self, mut args: GenerateArgs) -> GenerateArgs {
        args.project = args.project.or(self.project_file_path);
        args.solution = args.solution.or(self.solution_file_path);
        if args.scripts.is_empty() {
            args.scripts = self.script_file_paths;
        }
        let mut properties: Vec<(String, String)> = self.properties.into_iter().collect();
        properties.append(&mut args.properties);
        args.properties = properties;
        args
    }
}

fn prepare(args: GenerateArgs, cwd: &Path) -> Result<MergedGenerateConfig> {
    let args = if args.project.is_none() {
        StdinSettings::from_reader(io::stdin().lock())?.apply_to(args)
    } else {
        args
    };
    let Some(project) = &args.project else {
        bail!("No project file path was given on the command line or stdin");
    };

    let project_path = absolutize(project, cwd);
    let start_dir = if project_path.is_dir() {
        project_path.clone()
    } else {
        project_path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| cwd.to_path_buf())
    };
    let (file_config, config_path) = load_config_with_discovery(args.config.as_deref(), &start_dir)?;
    if let Some(path) = config_path {
        tracing::debug!(path = %path.display(), "using configuration");
    }

    MergedGenerateConfig::merge(&args, file_config, cwd)
}

pub async fn run(args: GenerateArgs) -> Result<ExitCode> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;

    let merged = match prepare(args, &cwd) {
        Ok(merged) => merged,
        Err(e) => {
            eprintln!("error: {:#}", e);
            return Ok(ExitCode::CommandLineError);
        }
    };

    let project = Project::new(&merged.project_path)?
        .with_solution(merged.solution_path.clone())
        .with_properties(merged.properties.clone());
    let scripts = merged.resolve_scripts(&project)?;
    if scripts.is_empty() {
        tracing::info!(
            project = %merged.project_path.display(),
            "no scripts to evaluate"
        );
        return Ok(ExitCode::Normal);
    }

    let host = ProcessHost::new()
        .with_runtime(merged.runtime.clone())
        .with_timeout(merged.timeout);
    let engine = Arc::new(
        Engine::new(Arc::new(project), Arc::new(host))
            .with_output_behavior(merged.output_behavior)
            .with_search_paths(merged.search_paths.clone())
            .with_mirrored_rewrites(merged.mirror_rewrites)
            .with_max_parallel(merged.max_parallel),
    );

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_on_signal = Arc::clone(&cancel);
    let signal = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing running scripts");
            cancel_on_signal.store(true, Ordering::SeqCst);
        }
    });

    let mut results = engine.evaluate_all(scripts, cancel).await;
    signal.abort();
    results.sort_by(|a, b| a.0.cmp(&b.0));

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failed = false;

    for (script, result) in results {
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                failed = true;
                eprintln!("{}: error: {}", script.display(), e);
                continue;
            }
        };

        for record in result.promotion_records() {
            writeln!(out, "{}", record)?;
        }
        if merged.messages {
            for message in result.messages() {
                eprintln!("{}", message.structured());
            }
        }
        for error in result.errors() {
            failed = true;
            eprintln!("{}", render_error(error, result.script_path(), merged.full_errors));
        }
    }
    out.flush()?;

    Ok(if failed {
        ExitCode::EvaluationError
    } else {
        ExitCode::Normal
    })
}

/// `file(line,column): error: message`, with only the first line unless `full` is set
fn render_error(error: &ScriptError, script: &Path, full: bool) -> String {
    let file = error.file_path.as_deref().unwrap_or(script);
    let message = if full {
        error.message.as_str()
    } else {
        error.message.lines().next().unwrap_or_default()
    };
    if error.line > 0 {
        format!(
            "{}({},{}): error: {}",
            file.display(),
            error.line,
            error.column,
            message
        )
    } else {
        format!("{}: error: {}", file.display(), message)
    }
}
