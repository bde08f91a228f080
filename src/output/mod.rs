/// Output streams written by scripts
pub mod build_action;
pub mod collection;
pub mod formatter;
pub mod writer;

use std::path::PathBuf;
use thiserror::Error;

pub use build_action::BuildAction;
pub use collection::OutputFileCollection;
pub use formatter::{
    BraceFormatter, Formatter, FormatterOptions, IndentStyle, NewLineStyle, ResolvedFormat,
};
pub use writer::{IndentGuard, OutputFileInfo, OutputFileWriter};

/// Suffix of the temp files that back output streams until promotion
pub const TEMP_FILE_SUFFIX: &str = "scriptgentmp";

#[derive(Debug, Error)]
pub enum OutputError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid output path: {0}")]
    InvalidPath(String),

    #[error("Invalid output extension: '{0}'")]
    InvalidExtension(String),

    #[error("Default output {0} is already in use and can no longer be redirected")]
    DefaultOutputFrozen(PathBuf),
}
