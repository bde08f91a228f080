use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::writer::{OutputFileInfo, OutputFileWriter};
use super::OutputError;
use crate::paths::{absolutize, path_key, remove_if_exists};

/// Extension of the default output when the script does not pick one
pub const DEFAULT_TARGET_EXTENSION: &str = "cs";

/// Every output stream opened during one evaluation, plus the implicit default stream
///
/// The default stream targets the script path with a `.cs` extension. Its target may be
/// redirected with [`set_file_path`](Self::set_file_path) or
/// [`set_extension`](Self::set_extension) until the default stream is first used; afterwards the
/// path is frozen.
#[derive(Debug)]
pub struct OutputFileCollection {
    script_path: PathBuf,
    script_dir: PathBuf,
    default_target: PathBuf,
    writers: Vec<OutputFileWriter>,
    index: HashMap<String, usize>,
    default_used: bool,
    keep_output: bool,
}

impl OutputFileCollection {
    pub fn new(script_path: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let script_path = script_path.into();
        if script_path.as_os_str().is_empty() {
            return Err(OutputError::InvalidPath(
                "script path cannot be empty".to_string(),
            ));
        }
        if !script_path.is_absolute() {
            return Err(OutputError::InvalidPath(format!(
                "script path must be absolute: {}",
                script_path.display()
            )));
        }
        let script_dir = script_path
            .parent()
            .map(Path::to_path_buf)
            .ok_or_else(|| {
                OutputError::InvalidPath(format!(
                    "script path has no parent directory: {}",
                    script_path.display()
                ))
            })?;

        let default_target = script_path.with_extension(DEFAULT_TARGET_EXTENSION);
        let mut collection = Self {
            script_path,
            script_dir,
            default_target: default_target.clone(),
            writers: Vec::new(),
            index: HashMap::new(),
            default_used: false,
            keep_output: true,
        };
        collection.register(&default_target)?;
        Ok(collection)
    }

    fn register(&mut self, target: &Path) -> Result<usize, OutputError> {
        let resolved = absolutize(target, &self.script_dir);
        let key = path_key(&resolved);
        if let Some(&idx) = self.index.get(&key) {
            return Ok(idx);
        }
        let writer = OutputFileWriter::new(resolved)?;
        self.writers.push(writer);
        let idx = self.writers.len() - 1;
        self.index.insert(key, idx);
        Ok(idx)
    }

    fn is_default(&self, path: &Path) -> bool {
        path_key(path) == path_key(&self.default_target)
    }

    /// Get or create the stream for `target`, resolved against the script directory
    pub fn get(&mut self, target: impl AsRef<Path>) -> Result<&mut OutputFileWriter, OutputError> {
        let target = target.as_ref();
        if target.as_os_str().is_empty() || target.to_string_lossy().trim().is_empty() {
            return Err(OutputError::InvalidPath(
                "output path cannot be empty".to_string(),
            ));
        }
        let idx = self.register(target)?;
        if self.is_default(self.writers[idx].file_path()) {
            self.default_used = true;
        }
        Ok(&mut self.writers[idx])
    }

    /// The default stream. Using it freezes the default target path.
    pub fn default_output(&mut self) -> Result<&mut OutputFileWriter, OutputError> {
        let target = self.default_target.clone();
        self.default_used = true;
        self.get(target)
    }

    /// Redirect the default stream before it is used
    pub fn set_file_path(&mut self, path: impl AsRef<Path>) -> Result<&mut Self, OutputError> {
        let target = absolutize(path.as_ref(), &self.script_dir);
        self.redirect_default(target)?;
        Ok(self)
    }

    /// Change the default stream's extension before it is used
    ///
    /// `"json"`, `".json"`, `"test.json"` and `".test.json"` are all accepted and always applied
    /// to the script path, so `script.csx` becomes `script.json` or `script.test.json`.
    pub fn set_extension(&mut self, extension: &str) -> Result<&mut Self, OutputError> {
        let normalized = extension.trim().trim_start_matches('.');
        if normalized.is_empty() {
            return Err(OutputError::InvalidExtension(extension.to_string()));
        }
        let target = self.script_path.with_extension(normalized);
        self.redirect_default(target)?;
        Ok(self)
    }

    fn redirect_default(&mut self, target: PathBuf) -> Result<(), OutputError> {
        if self.default_used {
            return Err(OutputError::DefaultOutputFrozen(
                self.default_target.clone(),
            ));
        }
        if self.is_default(&target) {
            return Ok(());
        }

        let old_key = path_key(&self.default_target);
        if let Some(idx) = self.index.remove(&old_key) {
            let mut old = self.writers.remove(idx);
            if let Err(e) = old.close() {
                tracing::warn!(path = %old.temp_file_path().display(), error = %e, "failed to close unused default output");
            }
            if let Err(e) = remove_if_exists(old.temp_file_path()) {
                tracing::warn!(path = %old.temp_file_path().display(), error = %e, "failed to delete unused default output");
            }
            self.reindex();
        }

        tracing::debug!(
            operation = "output.redirect",
            from = %self.default_target.display(),
            to = %target.display(),
            "default output redirected"
        );
        // A stream the script already opened by name keeps its content as the default
        let adopted = self.index.contains_key(&path_key(&target));
        self.default_target = target.clone();
        self.register(&target)?;
        if adopted {
            self.default_used = true;
        }
        Ok(())
    }

    fn reindex(&mut self) {
        self.index = self
            .writers
            .iter()
            .enumerate()
            .map(|(idx, w)| (path_key(w.file_path()), idx))
            .collect();
    }

    pub fn default_target_path(&self) -> &Path {
        &self.default_target
    }

    pub fn script_path(&self) -> &Path {
        &self.script_path
    }

    pub fn default_output_used(&self) -> bool {
        self.default_used
    }

    /// Whether the default stream is retained once it has been used
    pub fn keep_output(&self) -> bool {
        self.keep_output
    }

    pub fn set_keep_output(&mut self, keep: bool) {
        self.keep_output = keep;
    }

    pub fn len(&self) -> usize {
        self.writers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputFileWriter> {
        self.writers.iter()
    }

    /// Flush and close every stream, then return the ones that qualify for promotion
    ///
    /// A stream is skipped when its keep flag is false, when it is the default stream and was
    /// never used, or when it is the used default stream and the collection keep flag is false.
    pub fn output_files_for_writing(&mut self) -> Result<Vec<&mut OutputFileWriter>, OutputError> {
        for writer in &mut self.writers {
            writer.close().map_err(|source| OutputError::Io {
                path: writer.temp_file_path().to_path_buf(),
                source,
            })?;
        }

        let default_key = path_key(&self.default_target);
        let default_used = self.default_used;
        let keep_default = self.keep_output;

        Ok(self
            .writers
            .iter_mut()
            .filter(|w| {
                if !w.keep_output() {
                    return false;
                }
                let is_default = path_key(w.file_path()) == default_key;
                !(is_default && (!default_used || !keep_default))
            })
            .collect())
    }

    /// Close every stream and delete its temp file. Failures are logged, never returned.
    pub fn cleanup_all_temp_data(&mut self) {
        for writer in &mut self.writers {
            if let Err(e) = writer.close() {
                tracing::warn!(
                    operation = "output.cleanup",
                    path = %writer.temp_file_path().display(),
                    error = %e,
                    "failed to close output stream"
                );
            }
            match remove_if_exists(writer.temp_file_path()) {
                Ok(true) => tracing::trace!(path = %writer.temp_file_path().display(), "deleted temp output"),
                Ok(false) => {}
                Err(e) => tracing::warn!(
                    operation = "output.cleanup",
                    path = %writer.temp_file_path().display(),
                    error = %e,
                    "failed to delete temp output"
                ),
            }
        }
    }

    pub fn output_file_infos(&self) -> Vec<OutputFileInfo> {
        self.writers.iter().map(OutputFileWriter::info).collect()
    }
}
