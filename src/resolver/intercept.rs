use std::collections::HashMap;
use std::fmt;
use std::fs::{self, File};
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::rewriter::{rewrite_file_path, ClassFileExtractor};
use super::ResolveError;
use crate::paths::{absolutize, path_key, remove_if_exists};
use crate::script::directives::ResolutionTargetType;

/// Resolution hooks a script session uses for `#load` targets
pub trait SourceResolver: Send + Sync {
    /// Normalize `path` relative to the file that references it. The result need not exist.
    fn normalize_path(&self, path: &str, base_file: &Path) -> Option<PathBuf>;

    /// Find an existing file for `path`, or `None`
    fn resolve_reference(&self, path: &str, base_file: &Path) -> Option<PathBuf>;

    /// Open a resolved path for reading
    fn open_read(&mut self, resolved: &Path) -> Result<Box<dyn Read + Send>, ResolveError>;
}

/// Plain file resolution: relative to the referencing file, then search paths, then a base directory
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DefaultSourceResolver {
    search_paths: Vec<PathBuf>,
    base_directory: Option<PathBuf>,
}

impl DefaultSourceResolver {
    pub fn new(search_paths: Vec<PathBuf>, base_directory: Option<PathBuf>) -> Self {
        Self {
            search_paths,
            base_directory,
        }
    }

    fn base_dir_of(&self, base_file: &Path) -> Option<PathBuf> {
        base_file
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .or_else(|| self.base_directory.clone())
    }
}

impl SourceResolver for DefaultSourceResolver {
    fn normalize_path(&self, path: &str, base_file: &Path) -> Option<PathBuf> {
        if path.trim().is_empty() {
            return None;
        }
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return Some(absolutize(candidate, Path::new("/")));
        }
        self.base_dir_of(base_file)
            .map(|dir| absolutize(candidate, &dir))
    }

    fn resolve_reference(&self, path: &str, base_file: &Path) -> Option<PathBuf> {
        if let Some(normalized) = self.normalize_path(path, base_file) {
            if normalized.is_file() {
                return Some(normalized);
            }
        }
        let candidate = Path::new(path);
        if candidate.is_absolute() {
            return None;
        }
        self.search_paths
            .iter()
            .chain(self.base_directory.iter())
            .map(|dir| absolutize(candidate, dir))
            .find(|p| p.is_file())
    }

    fn open_read(&mut self, resolved: &Path) -> Result<Box<dyn Read + Send>, ResolveError> {
        let file = File::open(resolved).map_err(|source| ResolveError::Io {
            path: resolved.to_path_buf(),
            source,
        })?;
        Ok(Box::new(file))
    }
}

/// Routes `.cs` targets through class file extraction and everything else to default resolution
///
/// Rewritten text is cached per resolved path (case-insensitive) for the lifetime of the
/// session. Only the first unit of a class file is served, so a multi-type file exposes just its
/// first type through `#load`.
pub struct InterceptingResolver {
    default: DefaultSourceResolver,
    extractor: Arc<dyn ClassFileExtractor>,
    rewritten: HashMap<String, String>,
    mirror_rewrites: bool,
    staged_files: Vec<PathBuf>,
}

impl InterceptingResolver {
    pub fn new(default: DefaultSourceResolver, extractor: Arc<dyn ClassFileExtractor>) -> Self {
        Self {
            default,
            extractor,
            rewritten: HashMap::new(),
            mirror_rewrites: false,
            staged_files: Vec::new(),
        }
    }

    /// Also write each rewritten unit next to its source for inspection
    pub fn with_mirrored_rewrites(mut self, mirror: bool) -> Self {
        self.mirror_rewrites = mirror;
        self
    }

    pub fn default_resolver(&self) -> &DefaultSourceResolver {
        &self.default
    }

    pub fn cached_rewrites(&self) -> usize {
        self.rewritten.len()
    }

    pub fn staged_files(&self) -> &[PathBuf] {
        &self.staged_files
    }

    /// Track a file written on behalf of this session so cleanup removes it
    pub fn track_staged_file(&mut self, path: PathBuf) {
        self.staged_files.push(path);
    }

    /// Delete every staged or mirrored file. Failures are logged.
    pub fn cleanup(&mut self) {
        for path in self.staged_files.drain(..) {
            if let Err(e) = remove_if_exists(&path) {
                tracing::warn!(
                    operation = "resolver.cleanup",
                    path = %path.display(),
                    error = %e,
                    "failed to delete staged rewrite"
                );
            }
        }
    }

    fn rewritten_text(&mut self, resolved: &Path) -> Result<String, ResolveError> {
        let key = path_key(resolved);
        if let Some(text) = self.rewritten.get(&key) {
            tracing::trace!(path = %resolved.display(), "rewrite cache hit");
            return Ok(text.clone());
        }

        let extraction = self.extractor.extract(resolved);
        if !extraction.errors.is_empty() {
            return Err(ResolveError::Extraction {
                path: resolved.to_path_buf(),
                message: extraction.errors.join(","),
            });
        }
        let Some(first) = extraction.compilation_units.into_iter().next() else {
            return Err(ResolveError::NoTypes(resolved.to_path_buf()));
        };

        if self.mirror_rewrites {
            let mirror = rewrite_file_path(resolved);
            match fs::write(&mirror, &first.text) {
                Ok(()) => self.staged_files.push(mirror),
                Err(e) => tracing::warn!(
                    path = %mirror.display(),
                    error = %e,
                    "failed to mirror rewritten source"
                ),
            }
        }

        self.rewritten.insert(key, first.text.clone());
        Ok(first.text)
    }
}

impl SourceResolver for InterceptingResolver {
    fn normalize_path(&self, path: &str, base_file: &Path) -> Option<PathBuf> {
        let normalized = self.default.normalize_path(path, base_file)?;
        match ResolutionTargetType::of(&normalized) {
            ResolutionTargetType::Cs => Some(rewrite_file_path(&normalized)),
            _ => Some(normalized),
        }
    }

    fn resolve_reference(&self, path: &str, base_file: &Path) -> Option<PathBuf> {
        self.default.resolve_reference(path, base_file)
    }

    fn open_read(&mut self, resolved: &Path) -> Result<Box<dyn Read + Send>, ResolveError> {
        if ResolutionTargetType::of(resolved) != ResolutionTargetType::Cs {
            return self.default.open_read(resolved);
        }
        let text = self.rewritten_text(resolved)?;
        Ok(Box::new(Cursor::new(text.into_bytes())))
    }
}

impl PartialEq for InterceptingResolver {
    fn eq(&self, other: &Self) -> bool {
        self.rewritten == other.rewritten && self.default == other.default
    }
}

impl fmt::Debug for InterceptingResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterceptingResolver")
            .field("default", &self.default)
            .field("rewritten", &self.rewritten.keys().collect::<Vec<_>>())
            .field("mirror_rewrites", &self.mirror_rewrites)
            .field("staged_files", &self.staged_files)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::rewriter::{ClassFileRewriter, CsExtraction};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct CountingExtractor {
        inner: ClassFileRewriter,
        calls: AtomicUsize,
    }

    impl ClassFileExtractor for CountingExtractor {
        fn extract(&self, path: &Path) -> CsExtraction {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.inner.extract_compilation_unit(path)
        }
    }

    fn counting() -> Arc<CountingExtractor> {
        Arc::new(CountingExtractor {
            inner: ClassFileRewriter::default(),
            calls: AtomicUsize::new(0),
        })
    }

    fn read_all(mut reader: Box<dyn Read + Send>) -> String {
        let mut text = String::new();
        reader.read_to_string(&mut text).unwrap();
        text
    }

    #[test]
    fn test_cs_reads_are_cached_case_insensitively() {
        let temp = TempDir::new().unwrap();
        let model = temp.path().join("Model.cs");
        fs::write(&model, "namespace N { using System; public class Model {} }").unwrap();
        let extractor = counting();
        let mut resolver =
            InterceptingResolver::new(DefaultSourceResolver::default(), extractor.clone());

        let first = read_all(resolver.open_read(&model).unwrap());
        let upper = PathBuf::from(model.to_string_lossy().to_uppercase());
        let second = read_all(resolver.open_read(&upper).unwrap());

        assert_eq!(first, "using System;\n\npublic class Model {}\n");
        assert_eq!(first, second);
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(resolver.cached_rewrites(), 1);
    }

    #[test]
    fn test_only_first_type_is_served() {
        let temp = TempDir::new().unwrap();
        let model = temp.path().join("Two.cs");
        fs::write(&model, "namespace N { class A {} class B {} }").unwrap();
        let mut resolver = InterceptingResolver::new(DefaultSourceResolver::default(), counting());

        let text = read_all(resolver.open_read(&model).unwrap());

        assert!(text.contains("class A"));
        assert!(!text.contains("class B"));
    }

    #[test]
    fn test_extraction_errors_are_aggregated() {
        let temp = TempDir::new().unwrap();
        let broken = temp.path().join("Broken.cs");
        fs::write(&broken, "namespace N { class A {").unwrap();
        let mut resolver = InterceptingResolver::new(DefaultSourceResolver::default(), counting());

        let err = resolver.open_read(&broken).err().unwrap();
        assert!(matches!(err, ResolveError::Extraction { .. }));

        let empty = temp.path().join("Empty.cs");
        fs::write(&empty, "// nothing here\n").unwrap();
        assert!(matches!(
            resolver.open_read(&empty).err().unwrap(),
            ResolveError::NoTypes(_)
        ));
    }

    #[test]
    fn test_non_cs_targets_use_default_resolution() {
        let temp = TempDir::new().unwrap();
        let helper = temp.path().join("helper.csx");
        fs::write(&helper, "var x = 1;").unwrap();
        let script = temp.path().join("main.csx");
        let extractor = counting();
        let mut resolver =
            InterceptingResolver::new(DefaultSourceResolver::default(), extractor.clone());

        assert_eq!(resolver.normalize_path("helper.csx", &script), Some(helper.clone()));
        assert_eq!(resolver.resolve_reference("./helper.csx", &script), Some(helper.clone()));
        assert_eq!(read_all(resolver.open_read(&helper).unwrap()), "var x = 1;");
        assert_eq!(extractor.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cs_normalization_yields_unique_staging_paths() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("main.csx");
        let resolver = InterceptingResolver::new(DefaultSourceResolver::default(), counting());

        let a = resolver.normalize_path("lib/Model.cs", &script).unwrap();
        let b = resolver.normalize_path("lib/Model.cs", &script).unwrap();

        assert_ne!(a, b);
        let a = a.to_string_lossy().into_owned();
        assert!(a.starts_with(&temp.path().join("lib/Model.cs").to_string_lossy().into_owned()));
        assert!(a.ends_with(".rewrite.tmp"));
    }

    #[test]
    fn test_search_paths_and_base_directory() {
        let temp = TempDir::new().unwrap();
        let shared = temp.path().join("shared");
        let base = temp.path().join("base");
        fs::create_dir_all(&shared).unwrap();
        fs::create_dir_all(&base).unwrap();
        fs::write(shared.join("a.csx"), "").unwrap();
        fs::write(base.join("b.csx"), "").unwrap();
        let resolver = DefaultSourceResolver::new(vec![shared.clone()], Some(base.clone()));
        let script = temp.path().join("scripts/main.csx");

        assert_eq!(resolver.resolve_reference("a.csx", &script), Some(shared.join("a.csx")));
        assert_eq!(resolver.resolve_reference("b.csx", &script), Some(base.join("b.csx")));
        assert_eq!(resolver.resolve_reference("c.csx", &script), None);
    }

    #[test]
    fn test_equality_covers_cache_and_configuration() {
        let temp = TempDir::new().unwrap();
        let model = temp.path().join("Model.cs");
        fs::write(&model, "class Model {}").unwrap();

        let mut a = InterceptingResolver::new(DefaultSourceResolver::default(), counting());
        let b = InterceptingResolver::new(DefaultSourceResolver::default(), counting());
        let c = InterceptingResolver::new(
            DefaultSourceResolver::new(vec![temp.path().to_path_buf()], None),
            counting(),
        );
        assert_eq!(a, b);
        assert_ne!(a, c);

        a.open_read(&model).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_mirrored_rewrites_are_cleaned_up() {
        let temp = TempDir::new().unwrap();
        let model = temp.path().join("Model.cs");
        fs::write(&model, "class Model {}").unwrap();
        let mut resolver = InterceptingResolver::new(DefaultSourceResolver::default(), counting())
            .with_mirrored_rewrites(true);

        resolver.open_read(&model).unwrap();
        let staged = resolver.staged_files().to_vec();
        assert_eq!(staged.len(), 1);
        assert_eq!(fs::read_to_string(&staged[0]).unwrap(), "class Model {}\n");

        resolver.cleanup();
        assert!(!staged[0].exists());
        assert!(resolver.staged_files().is_empty());
    }
}
