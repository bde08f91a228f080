/// Directive scanner
///
/// Parses `#load` and `#r` lines from the header of a script. The header ends at the first line
/// that looks like code (`using`, or anything starting with `n`, `p`, `i`, `c` or `{`), so
/// directives written after code begins are never reported.
use anyhow::{Context, Result};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

pub const SCRIPT_LOAD_DIRECTIVE: &str = "#load";
pub const ASSEMBLY_LOAD_DIRECTIVE: &str = "#r";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum DirectiveKind {
    /// `#load`: pull another source file into the script
    ScriptReference,
    /// `#r`: reference an assembly
    AssemblyReference,
}

impl DirectiveKind {
    pub fn keyword(&self) -> &'static str {
        match self {
            DirectiveKind::ScriptReference => SCRIPT_LOAD_DIRECTIVE,
            DirectiveKind::AssemblyReference => ASSEMBLY_LOAD_DIRECTIVE,
        }
    }
}

impl fmt::Display for DirectiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// How a directive target is resolved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTargetType {
    /// Plain class file, routed through the class file rewriter
    Cs,
    /// Script file
    Script,
    Other,
}

impl ResolutionTargetType {
    pub fn of(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("cs") => ResolutionTargetType::Cs,
            Some(ext) if ext.eq_ignore_ascii_case("csx") => ResolutionTargetType::Script,
            _ => ResolutionTargetType::Other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScriptDirective {
    pub kind: DirectiveKind,
    /// The line as it appears in the script
    pub raw_line: String,
    /// Reference with the keyword and quotes removed
    pub reference: String,
    pub script_path: PathBuf,
    /// Zero-based
    pub line_number: usize,
    /// Zero-based column of the directive keyword
    pub column: usize,
    pub rewritten_path: Option<PathBuf>,
}

impl ScriptDirective {
    pub fn set_rewritten_path(&mut self, path: PathBuf) {
        self.rewritten_path = Some(path);
    }

    pub fn rewrite_was_needed(&self) -> bool {
        self.rewritten_path.is_some()
    }

    pub fn target_type(&self) -> ResolutionTargetType {
        ResolutionTargetType::of(Path::new(&self.reference))
    }
}

fn starts_with_ignore_case(text: &str, prefix: &str) -> bool {
    text.get(..prefix.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
}

fn begins_code(trimmed: &str) -> bool {
    starts_with_ignore_case(trimmed, "using")
        || ["n", "p", "i", "c"]
            .iter()
            .any(|p| starts_with_ignore_case(trimmed, p))
        || trimmed.starts_with('{')
}

fn directive_kind(trimmed: &str) -> Option<DirectiveKind> {
    if starts_with_ignore_case(trimmed, SCRIPT_LOAD_DIRECTIVE) {
        return Some(DirectiveKind::ScriptReference);
    }
    if starts_with_ignore_case(trimmed, ASSEMBLY_LOAD_DIRECTIVE) {
        // `#region` and friends are not references
        let rest = &trimmed[ASSEMBLY_LOAD_DIRECTIVE.len()..];
        if rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '"') {
            return Some(DirectiveKind::AssemblyReference);
        }
    }
    None
}

fn directive_reference(trimmed: &str, kind: DirectiveKind) -> String {
    trimmed[kind.keyword().len()..]
        .replace('"', "")
        .trim()
        .to_string()
}

/// Scan directives from script text already in memory
pub fn scan_directives(text: &str, script_path: &Path) -> Vec<ScriptDirective> {
    let mut directives = Vec::new();

    for (line_number, line) in text.lines().enumerate() {
        let trimmed = line.trim();
        if begins_code(trimmed) {
            break;
        }
        let Some(kind) = directive_kind(trimmed) else {
            continue;
        };
        directives.push(ScriptDirective {
            kind,
            raw_line: line.to_string(),
            reference: directive_reference(trimmed, kind),
            script_path: script_path.to_path_buf(),
            line_number,
            column: line.len() - line.trim_start().len(),
            rewritten_path: None,
        });
    }

    directives
}

/// Read a script and scan its directives
pub fn parse_directives(script_path: &Path) -> Result<Vec<ScriptDirective>> {
    let text = fs::read_to_string(script_path)
        .with_context(|| format!("Failed to read script: {}", script_path.display()))?;
    Ok(scan_directives(&text, script_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_parse_load_and_reference_directives() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("gen.csx");
        fs::write(
            &script,
            "// header\n#load \"lib/Model.cs\"\n  #r \"System.Data.dll\"\n#LOAD other.csx\n\nusing System;\n#load \"late.cs\"\n",
        )
        .unwrap();

        let directives = parse_directives(&script).unwrap();

        assert_eq!(directives.len(), 3);
        assert_eq!(directives[0].kind, DirectiveKind::ScriptReference);
        assert_eq!(directives[0].reference, "lib/Model.cs");
        assert_eq!(directives[0].line_number, 1);
        assert_eq!(directives[0].target_type(), ResolutionTargetType::Cs);
        assert_eq!(directives[1].kind, DirectiveKind::AssemblyReference);
        assert_eq!(directives[1].reference, "System.Data.dll");
        assert_eq!(directives[1].column, 2);
        assert_eq!(directives[1].raw_line, "  #r \"System.Data.dll\"");
        assert_eq!(directives[2].reference, "other.csx");
        assert_eq!(directives[2].target_type(), ResolutionTargetType::Script);
        assert!(directives.iter().all(|d| d.script_path == script));
    }

    #[test]
    fn test_scanning_stops_when_code_begins() {
        for first_code in ["namespace A {", "public class X", "internal class Y", "class Z", "{", "Using X;"] {
            let text = format!("#r \"a.dll\"\n{}\n#r \"b.dll\"\n", first_code);
            let directives = scan_directives(&text, Path::new("/s.csx"));
            assert_eq!(directives.len(), 1, "stopped at {}", first_code);
        }
    }

    #[test]
    fn test_region_is_not_a_reference() {
        let directives = scan_directives("#region Helpers\n#r a.dll\n", Path::new("/s.csx"));
        assert_eq!(directives.len(), 1);
        assert_eq!(directives[0].reference, "a.dll");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let temp = TempDir::new().unwrap();
        assert!(parse_directives(&temp.path().join("missing.csx")).is_err());
    }
}
