use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::config_expansion::expand_env_vars;
use crate::output::FormatterOptions;
use crate::script::{OutputBehavior, RuntimeCommand};

/// Complete scriptgen configuration (loaded from TOML file)
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ScriptgenConfig {
    #[serde(default)]
    pub generation: GenerationConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub resolver: ResolverConfig,

    /// Workspace formatting defaults for generated files
    #[serde(default)]
    pub format: FormatterOptions,
}

/// What to evaluate and what to do with the outputs
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    #[serde(default)]
    pub output_behavior: OutputBehavior,

    /// Extension of script files found when no scripts are listed
    #[serde(default = "default_script_extension")]
    pub script_extension: String,

    /// Script paths or glob patterns, relative to the project directory
    #[serde(default)]
    pub scripts: Vec<String>,

    /// Build properties exposed to scripts
    #[serde(default)]
    pub properties: BTreeMap<String, String>,

    /// Print script messages as `{MessageType}|{Message}` on stderr
    #[serde(default)]
    pub messages: bool,

    /// Maximum concurrent evaluations (0 = number of CPUs)
    #[serde(default)]
    pub max_parallel: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            output_behavior: OutputBehavior::default(),
            script_extension: default_script_extension(),
            scripts: Vec::new(),
            properties: BTreeMap::new(),
            messages: false,
            max_parallel: 0,
        }
    }
}

/// Interpreter used to run scripts
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RuntimeConfig {
    /// Runtime executable. Unset means the script's shebang, then `sh`.
    #[serde(default)]
    pub command: Option<String>,

    #[serde(default)]
    pub args: Vec<String>,

    /// Kill scripts running longer than this (e.g., "30s", "5m")
    #[serde(default)]
    pub timeout: Option<String>,
}

impl RuntimeConfig {
    pub fn runtime_command(&self) -> Option<RuntimeCommand> {
        self.command
            .as_ref()
            .map(|command| RuntimeCommand::new(command.clone(), self.args.clone()))
    }

    pub fn timeout(&self) -> Result<Option<Duration>, ConfigError> {
        self.timeout.as_deref().map(parse_duration).transpose()
    }
}

/// Where `#load` and `#r` targets are looked up
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ResolverConfig {
    /// Extra search directories, relative to the project directory
    #[serde(default)]
    pub search_paths: Vec<String>,

    /// Keep a copy of each rewritten class file next to its source while evaluating
    #[serde(default)]
    pub mirror_rewrites: bool,
}

impl ResolverConfig {
    pub fn search_paths_in(&self, project_dir: &Path) -> Vec<PathBuf> {
        self.search_paths
            .iter()
            .map(|p| project_dir.join(p))
            .collect()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("generation.script_extension must not be empty")]
    EmptyScriptExtension,

    #[error("runtime.command must not be empty when set")]
    EmptyRuntimeCommand,

    #[error("Invalid duration '{0}'. Use a number followed by s, m or h")]
    InvalidDuration(String),

    #[error("format.indent_size must be between 1 and 16, got {0}")]
    InvalidIndentSize(usize),
}

fn default_script_extension() -> String {
    "csx".to_string()
}

/// Parse duration string (e.g., "500ms", "30s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    let s = s.trim();
    let invalid = || ConfigError::InvalidDuration(s.to_string());
    let split = s
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(invalid)?;
    let (number, unit) = s.split_at(split);
    let number: u64 = number.parse().map_err(|_| invalid())?;

    match unit {
        "ms" => Ok(Duration::from_millis(number)),
        "s" => Ok(Duration::from_secs(number)),
        "m" => Ok(Duration::from_secs(number * 60)),
        "h" => Ok(Duration::from_secs(number * 3600)),
        _ => Err(invalid()),
    }
}

/// Commented starting point written by `scriptgen init`
pub const EXAMPLE_CONFIG: &str = r#"# scriptgen configuration
#
# Values may reference environment variables: ${VAR} or ${VAR:-default}.

[generation]
# dont-overwrite-if-evaluation-fails | script-controls-output | never-generate-output
output_behavior = "dont-overwrite-if-evaluation-fails"
# Scripts evaluated when none are given on the command line
script_extension = "csx"
# scripts = ["codegen/*.csx"]
messages = false

[generation.properties]
# RootNamespace = "MyApp"

[runtime]
# command = "dotnet-script"
# args = []
timeout = "5m"

[resolver]
# search_paths = ["shared"]
mirror_rewrites = false

[format]
indent_style = "spaces"
indent_size = 4
new_line = "lf"
trim_trailing_whitespace = true
insert_final_newline = true
max_blank_lines = 2
"#;

impl ScriptgenConfig {
    /// Load configuration from TOML file, expanding environment variables first
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let content = expand_env_vars(&content)
            .with_context(|| format!("Failed to expand config file: {}", path.display()))?;

        let config: ScriptgenConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.generation.script_extension.trim_start_matches('.').is_empty() {
            return Err(ConfigError::EmptyScriptExtension);
        }

        if self
            .runtime
            .command
            .as_deref()
            .is_some_and(|c| c.trim().is_empty())
        {
            return Err(ConfigError::EmptyRuntimeCommand);
        }

        self.runtime.timeout()?;

        if let Some(size) = self.format.indent_size {
            if size == 0 || size > 16 {
                return Err(ConfigError::InvalidIndentSize(size));
            }
        }

        Ok(())
    }
}
