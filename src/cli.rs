use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// scriptgen - Build-time code generation from scripts
///
/// Evaluates scripts against a project and reconciles the files they generate with the ones
/// already on disk.
#[derive(Parser, Debug)]
#[command(name = "scriptgen")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build-time code generation from scripts", long_about = None)]
pub struct Cli {
    /// Verbose logging (same as RUST_LOG=debug)
    #[arg(short = 'v', long, global = true, env = "SCRIPTGEN_VERBOSE")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Evaluate scripts and generate their outputs
    Generate(GenerateArgs),

    /// Show the #load and #r directives of a script
    Directives(DirectivesArgs),

    /// Show the standalone units extracted from a class file
    Extract(ExtractArgs),

    /// Initialize scriptgen configuration for a project
    Init(InitArgs),
}

#[derive(Parser, Debug, Default)]
pub struct GenerateArgs {
    /// The full path of the project file. Omit to read settings as JSON from stdin
    pub project: Option<PathBuf>,

    /// Script files to evaluate (absolute or relative to the project)
    pub scripts: Vec<PathBuf>,

    /// Config file path
    #[arg(short = 'c', long, env = "SCRIPTGEN_CONFIG")]
    pub config: Option<PathBuf>,

    /// Solution file the project belongs to
    #[arg(long, env = "SCRIPTGEN_SOLUTION")]
    pub solution: Option<PathBuf>,

    /// Build property exposed to scripts (repeatable)
    #[arg(short = 'p', long = "property", value_name = "KEY=VALUE", value_parser = parse_key_val)]
    pub properties: Vec<(String, String)>,

    // OUTPUT BEHAVIOR (mutually exclusive)
    /// Do not produce or overwrite output on evaluation errors. This is the default.
    #[arg(long = "outnoc", group = "output_behavior")]
    pub dont_overwrite_on_failure: bool,

    /// Do not produce or overwrite output
    #[arg(long = "outnev", group = "output_behavior")]
    pub never_generate: bool,

    /// The script determines what output is retained
    #[arg(long = "outscr", group = "output_behavior")]
    pub script_controls_output: bool,

    /// Print script messages as {MessageType}|{Message} on stderr
    #[arg(long, env = "SCRIPTGEN_MESSAGES")]
    pub messages: bool,

    /// Display full error details instead of just the message
    #[arg(short = 'e', long = "full-errors")]
    pub full_errors: bool,

    /// Runtime used to run scripts (overrides shebangs)
    #[arg(long, env = "SCRIPTGEN_RUNTIME")]
    pub runtime: Option<String>,

    /// Kill scripts running longer than this (e.g., "30s", "5m")
    #[arg(long, env = "SCRIPTGEN_TIMEOUT")]
    pub timeout: Option<String>,

    /// Maximum concurrent evaluations (default: number of CPUs)
    #[arg(short = 'j', long, env = "SCRIPTGEN_JOBS")]
    pub jobs: Option<usize>,
}

#[derive(Parser, Debug)]
pub struct DirectivesArgs {
    /// Script file to scan
    pub script: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct ExtractArgs {
    /// Class file (.cs) to extract
    pub file: PathBuf,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct InitArgs {
    /// Directory to write scriptgen.toml into (default: current directory)
    pub directory: Option<PathBuf>,

    /// Overwrite an existing configuration
    #[arg(long)]
    pub force: bool,
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", s))?;
    if key.trim().is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", s));
    }
    Ok((key.trim().to_string(), value.to_string()))
}
