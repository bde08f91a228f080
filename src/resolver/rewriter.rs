/// Class file rewriting
///
/// A plain class file cannot be loaded into a script as-is: its types sit inside namespaces and
/// its imports are spread across file and namespace level. The rewriter lifts every type
/// declaration out into a standalone unit carrying the flattened, deduplicated imports it needs.
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

use super::syntax::{parse_compilation_unit, TypeDeclaration};
use crate::paths::{append_suffix, random_token};
use crate::script::host::{Diagnostic, Severity};

/// A referenced assembly and the namespaces it is assumed to export
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct MetadataReference {
    pub display: String,
    pub namespaces: Vec<String>,
}

impl MetadataReference {
    pub fn new(display: impl Into<String>, namespaces: Vec<String>) -> Self {
        Self {
            display: display.into(),
            namespaces,
        }
    }

    /// Reference to an assembly file; its file stem is taken as the namespace it exports
    pub fn from_assembly_path(path: &Path) -> Self {
        let namespaces = path
            .file_stem()
            .map(|s| vec![s.to_string_lossy().into_owned()])
            .unwrap_or_default();
        Self::new(path.to_string_lossy(), namespaces)
    }

    pub fn core_runtime() -> Self {
        Self::new(
            "System.Runtime",
            [
                "System",
                "System.Collections.Generic",
                "System.IO",
                "System.Linq",
                "System.Text",
                "System.Threading.Tasks",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        )
    }

    pub fn data_access() -> Self {
        Self::new("System.Data", vec!["System.Data".to_string()])
    }

    pub fn script_context() -> Self {
        Self::new(
            "Scriptgen.Core",
            vec!["Scriptgen.Core".to_string(), "Scriptgen.Core.Output".to_string()],
        )
    }
}

/// One standalone unit lifted out of a class file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CompilationTarget {
    pub type_name: String,
    pub namespace: Option<String>,
    pub text: String,
}

impl CompilationTarget {
    fn from_declaration(decl: &TypeDeclaration) -> Self {
        let mut usings: Vec<&str> = Vec::new();
        for using in &decl.usings {
            if !usings.contains(&using.text.as_str()) {
                usings.push(&using.text);
            }
        }
        let text = if usings.is_empty() {
            format!("{}\n", decl.text)
        } else {
            format!("{}\n\n{}\n", usings.join("\n"), decl.text)
        };
        Self {
            type_name: decl.name.clone(),
            namespace: decl.namespace.clone(),
            text,
        }
    }
}

/// Result of extracting a class file. When `errors` is non-empty the other lists are empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CsExtraction {
    pub file_path: PathBuf,
    pub compilation_units: Vec<CompilationTarget>,
    pub namespaces: Vec<String>,
    pub metadata_references: Vec<MetadataReference>,
    pub errors: Vec<String>,
}

impl CsExtraction {
    fn failed(file_path: &Path, error: String) -> Self {
        Self {
            file_path: file_path.to_path_buf(),
            compilation_units: Vec::new(),
            namespaces: Vec::new(),
            metadata_references: Vec::new(),
            errors: vec![error],
        }
    }

    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Seam over extraction, so resolvers can be driven by something other than the file system
pub trait ClassFileExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> CsExtraction;
}

pub struct CompileRequest<'a> {
    pub assembly_name: String,
    pub sources: &'a [CompilationTarget],
    pub references: &'a [MetadataReference],
    pub usings: &'a [String],
}

#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    pub assembly: Vec<u8>,
    pub symbols: Vec<u8>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Host compiler capable of turning units into an in-memory library
pub trait AssemblyCompiler: Send + Sync {
    fn compile(&self, request: &CompileRequest<'_>) -> anyhow::Result<CompileOutput>;
}

/// Compiled form of a rewritten class file. Nothing is written to disk.
#[derive(Debug, Clone)]
pub struct RewrittenAssembly {
    original_file_path: PathBuf,
    assembly_file_path: PathBuf,
    assembly_bytes: Vec<u8>,
    symbols_file_path: PathBuf,
    symbol_bytes: Vec<u8>,
    found_namespaces: Vec<String>,
    found_assemblies: Vec<String>,
    diagnostics: Vec<Diagnostic>,
}

impl RewrittenAssembly {
    pub fn is_compiled(&self) -> bool {
        !self.assembly_bytes.is_empty()
    }

    pub fn original_file_path(&self) -> &Path {
        &self.original_file_path
    }

    pub fn assembly_file_path(&self) -> &Path {
        &self.assembly_file_path
    }

    pub fn assembly_bytes(&self) -> &[u8] {
        &self.assembly_bytes
    }

    pub fn symbols_file_path(&self) -> &Path {
        &self.symbols_file_path
    }

    pub fn symbol_bytes(&self) -> &[u8] {
        &self.symbol_bytes
    }

    pub fn found_namespaces(&self) -> &[String] {
        &self.found_namespaces
    }

    pub fn found_assemblies(&self) -> &[String] {
        &self.found_assemblies
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }
}

/// Suggested staging path for rewritten source: `{path}.{token}.rewrite.tmp`
pub fn rewrite_file_path(path: &Path) -> PathBuf {
    append_suffix(path, &format!("{}.rewrite.tmp", random_token()))
}

/// Extracts class files for one evaluation session
#[derive(Debug, Clone, Default)]
pub struct ClassFileRewriter {
    session_references: Vec<MetadataReference>,
}

impl ClassFileRewriter {
    /// `session_references` are the assemblies the calling script already references
    pub fn new(session_references: Vec<MetadataReference>) -> Self {
        Self { session_references }
    }

    pub fn session_references(&self) -> &[MetadataReference] {
        &self.session_references
    }

    pub fn extract_compilation_unit(&self, path: &Path) -> CsExtraction {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                return CsExtraction::failed(
                    path,
                    format!("Could not read {}: {}", path.display(), e),
                )
            }
        };

        let unit = match parse_compilation_unit(&text) {
            Ok(unit) => unit,
            Err(e) => {
                return CsExtraction::failed(
                    path,
                    format!("Could not parse compilation unit {}{}", path.display(), e),
                )
            }
        };

        let compilation_units: Vec<CompilationTarget> = unit
            .types
            .iter()
            .map(CompilationTarget::from_declaration)
            .collect();

        let mut namespaces: Vec<String> = Vec::new();
        let imported = unit.all_imports().map(|u| u.name.clone());
        let exported = self
            .session_references
            .iter()
            .flat_map(|r| r.namespaces.iter().cloned());
        for ns in imported.chain(exported) {
            if !namespaces.contains(&ns) {
                namespaces.push(ns);
            }
        }

        tracing::debug!(
            operation = "rewrite.extract",
            path = %path.display(),
            units = compilation_units.len(),
            namespaces = namespaces.len(),
            "extracted class file"
        );

        CsExtraction {
            file_path: path.to_path_buf(),
            compilation_units,
            namespaces,
            metadata_references: self.session_references.clone(),
            errors: Vec::new(),
        }
    }

    /// Extract `path` and compile every unit into one library through `compiler`
    pub fn compile_to_assembly(
        &self,
        path: &Path,
        compiler: &dyn AssemblyCompiler,
    ) -> RewrittenAssembly {
        let token = random_token();
        let mut result = RewrittenAssembly {
            original_file_path: path.to_path_buf(),
            assembly_file_path: append_suffix(path, &format!("{}.rewrite.dll", token)),
            assembly_bytes: Vec::new(),
            symbols_file_path: append_suffix(path, &format!("{}.rewrite.pdb", token)),
            symbol_bytes: Vec::new(),
            found_namespaces: Vec::new(),
            found_assemblies: Vec::new(),
            diagnostics: Vec::new(),
        };

        let extraction = self.extract_compilation_unit(path);
        if !extraction.is_success() {
            result.diagnostics = extraction
                .errors
                .iter()
                .map(|e| Diagnostic::error(e.clone()).in_file(path))
                .collect();
            return result;
        }

        let mut references = vec![
            MetadataReference::core_runtime(),
            MetadataReference::data_access(),
            MetadataReference::script_context(),
        ];
        for reference in &self.session_references {
            if !references.contains(reference) {
                references.push(reference.clone());
            }
        }

        let assembly_name = format!(
            "{}.rewrite",
            path.file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "rewrite".to_string())
        );
        let request = CompileRequest {
            assembly_name,
            sources: &extraction.compilation_units,
            references: &references,
            usings: &extraction.namespaces,
        };

        result.found_namespaces = extraction.namespaces.clone();
        result.found_assemblies = references.iter().map(|r| r.display.clone()).collect();

        match compiler.compile(&request) {
            Ok(output) => {
                let failed = output
                    .diagnostics
                    .iter()
                    .any(|d| d.severity == Severity::Error);
                if !failed {
                    result.assembly_bytes = output.assembly;
                    result.symbol_bytes = output.symbols;
                }
                result.diagnostics = output.diagnostics;
            }
            Err(e) => {
                result.diagnostics = vec![Diagnostic::error(format!("{:#}", e)).in_file(path)];
            }
        }

        tracing::debug!(
            operation = "rewrite.compile",
            path = %path.display(),
            compiled = result.is_compiled(),
            "compiled rewritten class file"
        );
        result
    }
}

impl ClassFileExtractor for ClassFileRewriter {
    fn extract(&self, path: &Path) -> CsExtraction {
        self.extract_compilation_unit(path)
    }
}
