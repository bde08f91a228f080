/// Script evaluation
///
/// Directives are scanned from the script header, resolved through an intercepting resolver,
/// and the script is handed to a [`ScriptHost`]. The [`Engine`] reconciles the outputs.
pub mod behavior;
pub mod context;
pub mod directives;
pub mod engine;
pub mod host;
pub mod process;
pub mod result;
pub mod source;

pub use behavior::{BehaviorError, OutputBehavior};
pub use context::{LoadedSource, MessageType, ScriptContext, ScriptMessage};
pub use directives::{
    parse_directives, scan_directives, DirectiveKind, ResolutionTargetType, ScriptDirective,
};
pub use engine::{Engine, EngineError};
pub use host::{Diagnostic, EvaluationError, ScriptHost, Severity};
pub use process::{ProcessHost, RuntimeCommand};
pub use result::{EvaluationOutcome, ScriptError, ScriptResult};
pub use source::{ScriptSource, SourceError};
