/// Project model scripts are evaluated against
///
/// The file tree and the workspace formatting defaults are computed lazily, once per project,
/// and shared by every evaluation that holds the same `Arc<Project>`.
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::{DirEntry, WalkDir};

use crate::config::ScriptgenConfig;
use crate::config_discovery::discover_config;
use crate::output::FormatterOptions;
use crate::paths::{normalize_lexically, path_key};

const IGNORED_DIRS: &[&str] = &["bin", "obj", "target", ".git", "node_modules"];

#[derive(Debug)]
pub struct Project {
    file_path: PathBuf,
    directory: PathBuf,
    solution_path: Option<PathBuf>,
    properties: BTreeMap<String, String>,
    files: OnceLock<Vec<PathBuf>>,
    formatting_defaults: OnceLock<FormatterOptions>,
}

impl Project {
    /// `file_path` is a project file or a project directory and must be absolute
    pub fn new(file_path: impl Into<PathBuf>) -> Result<Self> {
        let file_path = file_path.into();
        if file_path.as_os_str().is_empty() {
            bail!("Project file path cannot be empty");
        }
        if !file_path.is_absolute() {
            bail!("Project file path must be absolute: {}", file_path.display());
        }
        let file_path = normalize_lexically(&file_path);
        let directory = if file_path.is_dir() {
            file_path.clone()
        } else {
            file_path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| file_path.clone())
        };

        Ok(Self {
            file_path,
            directory,
            solution_path: None,
            properties: BTreeMap::new(),
            files: OnceLock::new(),
            formatting_defaults: OnceLock::new(),
        })
    }

    pub fn with_solution(mut self, solution_path: Option<PathBuf>) -> Self {
        self.solution_path = solution_path;
        self
    }

    pub fn with_properties(mut self, properties: BTreeMap<String, String>) -> Self {
        self.properties = properties;
        self
    }

    /// Use these defaults instead of discovering them from configuration
    pub fn with_formatting_defaults(self, defaults: FormatterOptions) -> Self {
        // A fresh OnceLock cannot already be set
        let _ = self.formatting_defaults.set(defaults);
        self
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn solution_path(&self) -> Option<&Path> {
        self.solution_path.as_deref()
    }

    pub fn properties(&self) -> &BTreeMap<String, String> {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties.get(name).map(String::as_str)
    }

    /// Every file in the project directory, skipping build output and VCS folders
    pub fn files(&self) -> &[PathBuf] {
        self.files.get_or_init(|| {
            let files: Vec<PathBuf> = WalkDir::new(&self.directory)
                .follow_links(false)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(|e| !is_ignored(e))
                .filter_map(|e| match e {
                    Ok(entry) => Some(entry),
                    Err(err) => {
                        tracing::warn!(error = %err, "skipping unreadable project entry");
                        None
                    }
                })
                .filter(|e| e.file_type().is_file())
                .map(DirEntry::into_path)
                .collect();
            tracing::debug!(
                operation = "project.scan",
                path = %self.directory.display(),
                files = files.len(),
                "scanned project tree"
            );
            files
        })
    }

    /// Project files whose extension matches `extension` (with or without a leading dot)
    pub fn scripts_with_extension(&self, extension: &str) -> Vec<PathBuf> {
        let wanted = extension.trim_start_matches('.');
        self.files()
            .iter()
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case(wanted))
            })
            .cloned()
            .collect()
    }

    /// Whether `path` is a document of this project
    pub fn contains(&self, path: &Path) -> bool {
        let key = path_key(path);
        self.files().iter().any(|f| path_key(f) == key)
    }

    /// Workspace formatting defaults, loaded from the nearest configuration on first use
    pub fn formatting_defaults(&self) -> &FormatterOptions {
        self.formatting_defaults.get_or_init(|| {
            let start = self
                .solution_path
                .as_deref()
                .and_then(Path::parent)
                .unwrap_or(&self.directory);
            match discover_config(start) {
                Ok(Some(path)) => match ScriptgenConfig::from_file(&path) {
                    Ok(config) => config.format,
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable formatting defaults");
                        FormatterOptions::default()
                    }
                },
                Ok(None) => FormatterOptions::default(),
                Err(e) => {
                    tracing::warn!(error = %e, "formatting defaults discovery failed");
                    FormatterOptions::default()
                }
            }
        })
    }
}

fn is_ignored(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| IGNORED_DIRS.contains(&name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_rejects_relative_project_path() {
        assert!(Project::new("app/App.csproj").is_err());
        assert!(Project::new("").is_err());
    }

    #[test]
    fn test_file_tree_skips_build_output() {
        let temp = TempDir::new().unwrap();
        let project_file = temp.path().join("App.csproj");
        fs::write(&project_file, "<Project />").unwrap();
        fs::create_dir_all(temp.path().join("scripts")).unwrap();
        fs::create_dir_all(temp.path().join("obj")).unwrap();
        fs::write(temp.path().join("scripts/a.csx"), "").unwrap();
        fs::write(temp.path().join("b.CSX"), "").unwrap();
        fs::write(temp.path().join("obj/c.csx"), "").unwrap();

        let project = Project::new(&project_file).unwrap();

        assert_eq!(project.directory(), temp.path());
        let scripts = project.scripts_with_extension(".csx");
        assert_eq!(scripts.len(), 2);
        assert!(project.contains(&temp.path().join("scripts/a.csx")));
        assert!(!project.contains(&temp.path().join("obj/c.csx")));
    }

    #[test]
    fn test_properties_and_solution() {
        let temp = TempDir::new().unwrap();
        let mut properties = BTreeMap::new();
        properties.insert("Configuration".to_string(), "Release".to_string());

        let project = Project::new(temp.path())
            .unwrap()
            .with_solution(Some(temp.path().join("App.sln")))
            .with_properties(properties);

        assert_eq!(project.property("Configuration"), Some("Release"));
        assert_eq!(project.property("Missing"), None);
        assert_eq!(project.solution_path(), Some(temp.path().join("App.sln").as_path()));
    }

    #[test]
    fn test_formatting_defaults_come_from_config() {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("scriptgen.toml"),
            "[format]\nindent_size = 2\nindent_style = \"tabs\"\n",
        )
        .unwrap();

        let project = Project::new(temp.path()).unwrap();

        assert_eq!(project.formatting_defaults().indent_size, Some(2));
        assert_eq!(
            project.formatting_defaults().indent_style,
            Some(crate::output::IndentStyle::Tabs)
        );
    }

    #[test]
    fn test_explicit_formatting_defaults_win() {
        let temp = TempDir::new().unwrap();
        let defaults = FormatterOptions {
            indent_size: Some(3),
            ..Default::default()
        };
        let project = Project::new(temp.path())
            .unwrap()
            .with_formatting_defaults(defaults.clone());
        assert_eq!(project.formatting_defaults(), &defaults);
    }
}
