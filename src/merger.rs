/// Configuration merger: CLI args > Env vars > Config file > Defaults
///
/// This module handles merging configuration from multiple sources:
/// 1. CLI arguments (highest priority)
/// 2. Environment variables (handled by clap)
/// 3. Configuration file
/// 4. Built-in defaults (lowest priority)
use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cli::GenerateArgs;
use crate::config::{parse_duration, ScriptgenConfig};
use crate::paths::absolutize;
use crate::project::Project;
use crate::script::{OutputBehavior, RuntimeCommand};

/// Merged configuration for the generate command
#[derive(Debug, Clone)]
pub struct MergedGenerateConfig {
    pub project_path: PathBuf,
    pub solution_path: Option<PathBuf>,
    /// Explicit scripts, already absolute. Empty means discover them.
    pub scripts: Vec<PathBuf>,
    pub script_patterns: Vec<String>,
    pub script_extension: String,
    pub properties: BTreeMap<String, String>,
    pub output_behavior: OutputBehavior,
    pub messages: bool,
    pub full_errors: bool,
    pub runtime: Option<RuntimeCommand>,
    pub timeout: Option<Duration>,
    pub max_parallel: usize,
    pub search_paths: Vec<PathBuf>,
    pub mirror_rewrites: bool,
}

impl MergedGenerateConfig {
    /// Merge configuration from CLI args and config file
    /// Precedence: CLI > env (already handled by clap) > config file > defaults
    pub fn merge(args: &GenerateArgs, file: ScriptgenConfig, cwd: &Path) -> Result<Self> {
        let Some(project) = &args.project else {
            bail!("A project file path is required");
        };
        let project_path = absolutize(project, cwd);
        let project_dir = if project_path.is_dir() {
            project_path.clone()
        } else {
            project_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| project_path.clone())
        };

        let output_behavior = OutputBehavior::from_flags(
            args.dont_overwrite_on_failure,
            args.never_generate,
            args.script_controls_output,
        )?
        .unwrap_or(file.generation.output_behavior);

        let mut properties = file.generation.properties.clone();
        properties.extend(args.properties.iter().cloned());

        let runtime = match &args.runtime {
            Some(command) => {
                let mut parts = command.split_whitespace().map(str::to_string);
                let program = parts
                    .next()
                    .context("--runtime must name an executable")?;
                Some(RuntimeCommand::new(program, parts.collect()))
            }
            None => file.runtime.runtime_command(),
        };

        let timeout = match &args.timeout {
            Some(timeout) => Some(parse_duration(timeout)?),
            None => file.runtime.timeout()?,
        };

        let max_parallel = match args.jobs.unwrap_or(file.generation.max_parallel) {
            0 => num_cpus::get(),
            n => n,
        };

        Ok(Self {
            solution_path: args.solution.as_ref().map(|s| absolutize(s, cwd)),
            scripts: args
                .scripts
                .iter()
                .map(|s| absolutize(s, &project_dir))
                .collect(),
            script_patterns: file.generation.scripts.clone(),
            script_extension: file.generation.script_extension.clone(),
            properties,
            output_behavior,
            messages: args.messages || file.generation.messages,
            full_errors: args.full_errors,
            runtime,
            timeout,
            max_parallel,
            search_paths: file.resolver.search_paths_in(&project_dir),
            mirror_rewrites: file.resolver.mirror_rewrites,
            project_path,
        })
    }

    /// Scripts to evaluate: explicit ones, else configured globs, else every script in the project
    pub fn resolve_scripts(&self, project: &Project) -> Result<Vec<PathBuf>> {
        if !self.scripts.is_empty() {
            return Ok(self.scripts.clone());
        }

        if self.script_patterns.is_empty() {
            return Ok(project.scripts_with_extension(&self.script_extension));
        }

        let mut scripts = Vec::new();
        for pattern in &self.script_patterns {
            let full = project.directory().join(pattern);
            let full = full.to_string_lossy();
            for entry in glob::glob(&full).with_context(|| format!("Invalid script pattern: {}", pattern))? {
                match entry {
                    Ok(path) if path.is_file() && !scripts.contains(&path) => scripts.push(path),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(pattern = %pattern, error = %e, "skipping unreadable match"),
                }
            }
        }
        Ok(scripts)
    }
}
