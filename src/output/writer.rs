use std::fmt::Display;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::build_action::BuildAction;
use super::formatter::FormatterOptions;
use super::{OutputError, TEMP_FILE_SUFFIX};
use crate::paths::{append_suffix, random_token};

const DEFAULT_INDENT: &str = "    ";

/// Snapshot of one output stream, taken when an evaluation finishes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFileInfo {
    pub file_path: PathBuf,
    pub temp_file_path: PathBuf,
    pub build_action: BuildAction,
    pub keep_output: bool,
    pub output_was_generated: bool,
    pub is_closed: bool,
    pub indent_level: usize,
    pub indent_string: String,
    pub format_enabled: bool,
    pub formatter_options: FormatterOptions,
}

/// A named output stream backed by a temp file next to its target
///
/// Text goes to `{target}.{token}.scriptgentmp` until the evaluation is reconciled. Indentation
/// is deferred: after a line break the indent is written in front of the next content write, so
/// trailing blank lines never carry whitespace.
#[derive(Debug)]
pub struct OutputFileWriter {
    file_path: PathBuf,
    temp_file_path: PathBuf,
    writer: Option<BufWriter<File>>,
    indent_level: usize,
    indent_string: String,
    pending_indent: bool,
    new_line: String,
    keep_output: bool,
    build_action: BuildAction,
    format_enabled: bool,
    formatter_options: FormatterOptions,
    output_was_generated: bool,
}

impl OutputFileWriter {
    /// Open a writer for `file_path`, creating its directory and temp file
    pub fn new(file_path: impl Into<PathBuf>) -> Result<Self, OutputError> {
        let file_path = file_path.into();
        if let Some(parent) = file_path.parent() {
            fs::create_dir_all(parent).map_err(|source| OutputError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let temp_file_path =
            append_suffix(&file_path, &format!("{}.{}", random_token(), TEMP_FILE_SUFFIX));
        let file = File::create(&temp_file_path).map_err(|source| OutputError::Io {
            path: temp_file_path.clone(),
            source,
        })?;

        tracing::debug!(
            operation = "output.open",
            path = %file_path.display(),
            temp = %temp_file_path.display(),
            "opened output stream"
        );

        Ok(Self {
            build_action: BuildAction::for_path(&file_path),
            file_path,
            temp_file_path,
            writer: Some(BufWriter::new(file)),
            indent_level: 0,
            indent_string: DEFAULT_INDENT.to_string(),
            pending_indent: true,
            new_line: "\n".to_string(),
            keep_output: true,
            format_enabled: false,
            formatter_options: FormatterOptions::default(),
            output_was_generated: false,
        })
    }

    fn sink(&mut self) -> io::Result<&mut BufWriter<File>> {
        let path = &self.file_path;
        self.writer.as_mut().ok_or_else(|| {
            io::Error::other(format!("output file is closed: {}", path.display()))
        })
    }

    fn write_raw(&mut self, text: &str) -> io::Result<()> {
        self.sink()?.write_all(text.as_bytes())
    }

    /// Write a value, preceded by the current indentation if a line was just ended
    pub fn write<T: Display>(&mut self, value: T) -> io::Result<&mut Self> {
        let text = value.to_string();
        if text.is_empty() {
            return Ok(self);
        }
        if self.pending_indent {
            let indent = self.indent_string.repeat(self.indent_level);
            self.write_raw(&indent)?;
            self.pending_indent = false;
        }
        self.write_raw(&text)?;
        Ok(self)
    }

    pub fn write_line<T: Display>(&mut self, value: T) -> io::Result<&mut Self> {
        self.write(value)?;
        self.new_line()
    }

    /// End the current line without writing any indentation
    pub fn new_line(&mut self) -> io::Result<&mut Self> {
        let new_line = self.new_line.clone();
        self.write_raw(&new_line)?;
        self.pending_indent = true;
        Ok(self)
    }

    /// Increase the indent level by one, returning the previous level
    pub fn indent(&mut self) -> usize {
        let previous = self.indent_level;
        self.indent_level += 1;
        previous
    }

    /// Set the indent level (negative values clamp to zero), returning the previous level
    pub fn indent_to(&mut self, level: isize) -> usize {
        let previous = self.indent_level;
        self.indent_level = level.max(0) as usize;
        previous
    }

    /// Decrease the indent level by one, never below zero, returning the previous level
    pub fn dedent(&mut self) -> usize {
        let previous = self.indent_level;
        self.indent_level = previous.saturating_sub(1);
        previous
    }

    /// Indent by one level until the returned guard is dropped
    pub fn with_indent(&mut self) -> IndentGuard<'_> {
        let previous = self.indent();
        IndentGuard {
            writer: self,
            previous,
        }
    }

    /// Use `level` until the returned guard is dropped
    pub fn with_indent_to(&mut self, level: isize) -> IndentGuard<'_> {
        let previous = self.indent_to(level);
        IndentGuard {
            writer: self,
            previous,
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Flush and release the temp file. Closing twice is a no-op.
    pub fn close(&mut self) -> io::Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }

    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    pub fn temp_file_path(&self) -> &Path {
        &self.temp_file_path
    }

    pub fn indent_level(&self) -> usize {
        self.indent_level
    }

    pub fn indent_string(&self) -> &str {
        &self.indent_string
    }

    pub fn set_indent_string(&mut self, indent: impl Into<String>) {
        self.indent_string = indent.into();
    }

    pub fn new_line_str(&self) -> &str {
        &self.new_line
    }

    pub fn set_new_line(&mut self, new_line: impl Into<String>) {
        self.new_line = new_line.into();
    }

    pub fn keep_output(&self) -> bool {
        self.keep_output
    }

    pub fn set_keep_output(&mut self, keep: bool) {
        self.keep_output = keep;
    }

    pub fn build_action(&self) -> BuildAction {
        self.build_action
    }

    pub fn set_build_action(&mut self, action: BuildAction) {
        self.build_action = action;
    }

    pub fn format_enabled(&self) -> bool {
        self.format_enabled
    }

    pub fn set_format_enabled(&mut self, enabled: bool) {
        self.format_enabled = enabled;
    }

    pub fn formatter_options(&self) -> &FormatterOptions {
        &self.formatter_options
    }

    pub fn formatter_options_mut(&mut self) -> &mut FormatterOptions {
        &mut self.formatter_options
    }

    pub fn output_was_generated(&self) -> bool {
        self.output_was_generated
    }

    pub(crate) fn mark_generated(&mut self) {
        self.output_was_generated = true;
    }

    pub fn info(&self) -> OutputFileInfo {
        OutputFileInfo {
            file_path: self.file_path.clone(),
            temp_file_path: self.temp_file_path.clone(),
            build_action: self.build_action,
            keep_output: self.keep_output,
            output_was_generated: self.output_was_generated,
            is_closed: self.is_closed(),
            indent_level: self.indent_level,
            indent_string: self.indent_string.clone(),
            format_enabled: self.format_enabled,
            formatter_options: self.formatter_options.clone(),
        }
    }
}

/// Restores the writer's previous indent level when dropped
pub struct IndentGuard<'a> {
    writer: &'a mut OutputFileWriter,
    previous: usize,
}

impl Deref for IndentGuard<'_> {
    type Target = OutputFileWriter;

    fn deref(&self) -> &Self::Target {
        self.writer
    }
}

impl DerefMut for IndentGuard<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.writer
    }
}

impl Drop for IndentGuard<'_> {
    fn drop(&mut self) {
        self.writer.indent_level = self.previous;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn contents(writer: &mut OutputFileWriter) -> String {
        writer.close().unwrap();
        fs::read_to_string(writer.temp_file_path()).unwrap()
    }

    #[test]
    fn test_writes_go_to_temp_file() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("gen").join("Out.cs");
        let mut writer = OutputFileWriter::new(&target).unwrap();

        writer.write("a").unwrap().write(1).unwrap().write_line(true).unwrap();

        assert_eq!(contents(&mut writer), "a1true\n");
        assert!(!target.exists());
        let temp_name = writer.temp_file_path().file_name().unwrap().to_string_lossy();
        assert!(temp_name.starts_with("Out.cs."));
        assert!(temp_name.ends_with(".scriptgentmp"));
        assert_eq!(writer.build_action(), BuildAction::Compile);
    }

    #[test]
    fn test_indent_returns_previous_level() {
        let temp = TempDir::new().unwrap();
        let mut writer = OutputFileWriter::new(temp.path().join("a.txt")).unwrap();

        assert_eq!(writer.indent(), 0);
        assert_eq!(writer.indent(), 1);
        assert_eq!(writer.indent_to(5), 2);
        assert_eq!(writer.indent_to(-3), 5);
        assert_eq!(writer.indent_level(), 0);
        assert_eq!(writer.dedent(), 0);
        assert_eq!(writer.indent_level(), 0);
        assert_eq!(writer.build_action(), BuildAction::None);
    }

    #[test]
    fn test_nested_guards_restore_levels() {
        let temp = TempDir::new().unwrap();
        let mut writer = OutputFileWriter::new(temp.path().join("a.txt")).unwrap();

        writer.write_line("A").unwrap();
        {
            let mut outer = writer.with_indent();
            outer.write_line("B").unwrap();
            {
                let mut inner = outer.with_indent_to(3);
                inner.write_line("C").unwrap();
            }
            assert_eq!(outer.indent_level(), 1);
            outer.write_line("D").unwrap();
        }
        assert_eq!(writer.indent_level(), 0);
        writer.write_line("E").unwrap();

        assert_eq!(
            contents(&mut writer),
            "A\n    B\n            C\n    D\nE\n"
        );
    }

    #[test]
    fn test_new_line_defers_indentation() {
        let temp = TempDir::new().unwrap();
        let mut writer = OutputFileWriter::new(temp.path().join("a.txt")).unwrap();
        writer.indent_to(2);

        writer.new_line().unwrap().new_line().unwrap();
        writer.write("x").unwrap().write("y").unwrap();

        assert_eq!(contents(&mut writer), "\n\n        xy");
    }

    #[test]
    fn test_custom_indent_string_and_new_line() {
        let temp = TempDir::new().unwrap();
        let mut writer = OutputFileWriter::new(temp.path().join("a.txt")).unwrap();
        writer.set_indent_string("\t");
        writer.set_new_line("\r\n");

        writer.write_line("{").unwrap();
        writer.indent();
        writer.write_line("x").unwrap();

        assert_eq!(contents(&mut writer), "{\r\n\tx\r\n");
    }

    #[test]
    fn test_close_is_idempotent_and_blocks_writes() {
        let temp = TempDir::new().unwrap();
        let mut writer = OutputFileWriter::new(temp.path().join("a.txt")).unwrap();
        writer.write("x").unwrap();

        writer.close().unwrap();
        writer.close().unwrap();

        assert!(writer.is_closed());
        assert!(writer.write("y").is_err());
        assert!(writer.info().is_closed);
    }

    #[test]
    fn test_panic_inside_guard_restores_level() {
        let temp = TempDir::new().unwrap();
        let mut writer = OutputFileWriter::new(temp.path().join("a.txt")).unwrap();

        let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _guard = writer.with_indent_to(4);
            panic!("boom");
        }));

        assert!(result.is_err());
        assert_eq!(writer.indent_level(), 0);
    }
}
