// Library interface for scriptgen
// This allows integration tests and build integrations to drive evaluations directly

pub mod cli;
pub mod commands;
pub mod config;
pub mod config_discovery;
pub mod config_expansion;
pub mod logging;
pub mod merger;
pub mod output;
pub mod paths;
pub mod project;
pub mod resolver;
pub mod script;

// Re-export commonly used types
pub use config::ScriptgenConfig;
pub use config_discovery::discover_config;
pub use output::{BuildAction, OutputFileCollection, OutputFileInfo, OutputFileWriter};
pub use project::Project;
pub use script::{
    Engine, EvaluationError, EvaluationOutcome, OutputBehavior, ProcessHost, ScriptContext,
    ScriptHost, ScriptResult, ScriptSource,
};
