/// `#load` / `#r` target resolution and class file rewriting
pub mod intercept;
pub mod rewriter;
pub mod syntax;

use std::path::PathBuf;
use thiserror::Error;

pub use intercept::{DefaultSourceResolver, InterceptingResolver, SourceResolver};
pub use rewriter::{
    rewrite_file_path, AssemblyCompiler, ClassFileExtractor, ClassFileRewriter, CompilationTarget,
    CompileOutput, CompileRequest, CsExtraction, MetadataReference, RewrittenAssembly,
};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to get compilation targets from {path}. {message}")]
    Extraction { path: PathBuf, message: String },

    #[error("{0} contains no type declarations")]
    NoTypes(PathBuf),
}
