/// Formatting of generated files
///
/// A generated file opts into formatting through its writer. Its own options are merged over the
/// project's workspace defaults and the merged result drives a [`Formatter`]. The built-in
/// [`BraceFormatter`] re-indents C-family source by brace depth while leaving string literals and
/// comments untouched.
use anyhow::Result;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndentStyle {
    Spaces,
    Tabs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NewLineStyle {
    Lf,
    Crlf,
}

impl NewLineStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            NewLineStyle::Lf => "\n",
            NewLineStyle::Crlf => "\r\n",
        }
    }
}

/// Per-file formatting overrides. Unset fields fall back to the workspace defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatterOptions {
    pub indent_style: Option<IndentStyle>,
    pub indent_size: Option<usize>,
    pub new_line: Option<NewLineStyle>,
    pub trim_trailing_whitespace: Option<bool>,
    pub insert_final_newline: Option<bool>,
    pub max_blank_lines: Option<usize>,
    /// `Some(true)` puts opening braces on their own line, `Some(false)` joins them to the
    /// preceding line, `None` keeps them where they are
    pub braces_on_new_line: Option<bool>,
}

impl FormatterOptions {
    /// Resolve these overrides against `defaults`, then against built-in values
    pub fn merged_over(&self, defaults: &FormatterOptions) -> ResolvedFormat {
        ResolvedFormat {
            indent_style: self
                .indent_style
                .or(defaults.indent_style)
                .unwrap_or(IndentStyle::Spaces),
            indent_size: self.indent_size.or(defaults.indent_size).unwrap_or(4),
            new_line: self
                .new_line
                .or(defaults.new_line)
                .unwrap_or(NewLineStyle::Lf),
            trim_trailing_whitespace: self
                .trim_trailing_whitespace
                .or(defaults.trim_trailing_whitespace)
                .unwrap_or(true),
            insert_final_newline: self
                .insert_final_newline
                .or(defaults.insert_final_newline)
                .unwrap_or(true),
            max_blank_lines: self.max_blank_lines.or(defaults.max_blank_lines).unwrap_or(2),
            braces_on_new_line: self.braces_on_new_line.or(defaults.braces_on_new_line),
        }
    }
}

/// Fully resolved formatting settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFormat {
    pub indent_style: IndentStyle,
    pub indent_size: usize,
    pub new_line: NewLineStyle,
    pub trim_trailing_whitespace: bool,
    pub insert_final_newline: bool,
    pub max_blank_lines: usize,
    pub braces_on_new_line: Option<bool>,
}

impl Default for ResolvedFormat {
    fn default() -> Self {
        FormatterOptions::default().merged_over(&FormatterOptions::default())
    }
}

impl ResolvedFormat {
    fn indent_unit(&self) -> String {
        match self.indent_style {
            IndentStyle::Spaces => " ".repeat(self.indent_size),
            IndentStyle::Tabs => "\t".to_string(),
        }
    }
}

pub trait Formatter: Send + Sync {
    fn format(&self, text: &str, format: &ResolvedFormat) -> Result<String>;
}

/// Brace-depth formatter for C-family languages
#[derive(Debug, Default, Clone, Copy)]
pub struct BraceFormatter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexState {
    Code,
    BlockComment,
    Verbatim,
    Raw,
}

#[derive(Debug, Clone)]
struct LineScan {
    starts_in: LexState,
    ends_in: LexState,
    opens: usize,
    closes: usize,
    leading_closers: usize,
    /// Byte offset of a `{` that is the last code character on the line
    trailing_open: Option<usize>,
    ends_in_line_comment: bool,
}

fn scan_line(line: &str, state: LexState) -> LineScan {
    let chars: Vec<(usize, char)> = line.char_indices().collect();
    let mut scan = LineScan {
        starts_in: state,
        ends_in: state,
        opens: 0,
        closes: 0,
        leading_closers: 0,
        trailing_open: None,
        ends_in_line_comment: false,
    };
    let mut state = state;
    let mut leading = true;
    let mut last_code: Option<(usize, char)> = None;
    let mut i = 0;

    while i < chars.len() {
        let (offset, c) = chars[i];
        let next = chars.get(i + 1).map(|(_, c)| *c);
        match state {
            LexState::BlockComment => {
                if c == '*' && next == Some('/') {
                    state = LexState::Code;
                    i += 1;
                }
            }
            LexState::Verbatim => {
                if c == '"' {
                    if next == Some('"') {
                        i += 1;
                    } else {
                        state = LexState::Code;
                    }
                }
            }
            LexState::Raw => {
                if line[offset..].starts_with("\"\"\"") {
                    state = LexState::Code;
                    i += 2;
                }
            }
            LexState::Code => {
                if c.is_whitespace() {
                    i += 1;
                    continue;
                }
                if c == '/' && next == Some('/') {
                    scan.ends_in_line_comment = true;
                    break;
                }
                if c == '/' && next == Some('*') {
                    state = LexState::BlockComment;
                    i += 2;
                    continue;
                }
                if line[offset..].starts_with("\"\"\"") {
                    state = LexState::Raw;
                    i += 3;
                    last_code = Some((offset, '"'));
                    leading = false;
                    continue;
                }
                if c == '@' && (next == Some('"') || next == Some('$')) {
                    let quote = if next == Some('$') { i + 2 } else { i + 1 };
                    if chars.get(quote).map(|(_, c)| *c) == Some('"') {
                        state = LexState::Verbatim;
                        i = quote + 1;
                        last_code = Some((offset, '"'));
                        leading = false;
                        continue;
                    }
                }
                if c == '"' || c == '\'' {
                    i = skip_quoted(&chars, i, c);
                    last_code = Some((offset, c));
                    leading = false;
                    continue;
                }
                if c == '}' {
                    scan.closes += 1;
                    if leading {
                        scan.leading_closers += 1;
                    }
                } else {
                    leading = false;
                    if c == '{' {
                        scan.opens += 1;
                    }
                }
                last_code = Some((offset, c));
            }
        }
        i += 1;
    }

    scan.ends_in = state;
    if state == LexState::Code {
        if let Some((offset, '{')) = last_code {
            scan.trailing_open = Some(offset);
        }
    }
    scan
}

/// Returns the index just past the closing quote of a regular string or char literal
fn skip_quoted(chars: &[(usize, char)], start: usize, quote: char) -> usize {
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i].1 {
            '\\' => i += 2,
            c if c == quote => return i + 1,
            _ => i += 1,
        }
    }
    i
}

fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n')
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect()
}

impl BraceFormatter {
    fn place_braces(lines: Vec<String>, new_line: bool) -> Vec<String> {
        let mut out: Vec<String> = Vec::with_capacity(lines.len());
        let mut out_scans: Vec<LineScan> = Vec::with_capacity(lines.len());
        let mut state = LexState::Code;

        for line in lines {
            let scan = scan_line(&line, state);
            state = scan.ends_in;
            let trimmed = line.trim();

            if scan.starts_in != LexState::Code {
                out.push(line);
                out_scans.push(scan);
                continue;
            }

            if new_line && trimmed != "{" && !scan.ends_in_line_comment {
                if let Some(offset) = scan.trailing_open {
                    let head = line[..offset].trim_end().to_string();
                    if !head.trim().is_empty() {
                        let indent: String =
                            line.chars().take_while(|c| c.is_whitespace()).collect();
                        let head_scan = scan_line(&head, LexState::Code);
                        out.push(head);
                        out_scans.push(head_scan);
                        let brace = format!("{}{{", indent);
                        let brace_scan = scan_line(&brace, LexState::Code);
                        out.push(brace);
                        out_scans.push(brace_scan);
                        continue;
                    }
                }
            }

            if !new_line && trimmed == "{" {
                let joinable = match (out.last(), out_scans.last()) {
                    (Some(prev), Some(prev_scan)) => {
                        let prev_trimmed = prev.trim_end();
                        prev_scan.ends_in == LexState::Code
                            && !prev_scan.ends_in_line_comment
                            && !prev_trimmed.trim_start().is_empty()
                            && !prev_trimmed.trim_start().starts_with('#')
                            && !prev_trimmed.ends_with(';')
                            && !prev_trimmed.ends_with('{')
                            && !prev_trimmed.ends_with('}')
                    }
                    _ => false,
                };
                if joinable {
                    if let Some(prev) = out.pop() {
                        out_scans.pop();
                        let joined = format!("{} {{", prev.trim_end());
                        let joined_scan = scan_line(&joined, LexState::Code);
                        out.push(joined);
                        out_scans.push(joined_scan);
                        continue;
                    }
                }
            }

            out.push(line);
            out_scans.push(scan);
        }
        out
    }
}

impl Formatter for BraceFormatter {
    fn format(&self, text: &str, format: &ResolvedFormat) -> Result<String> {
        let mut lines: Vec<String> = split_lines(text).into_iter().map(String::from).collect();
        // A trailing newline shows up as a final empty element
        if lines.last().is_some_and(|l| l.is_empty()) {
            lines.pop();
        }
        if let Some(new_line) = format.braces_on_new_line {
            lines = Self::place_braces(lines, new_line);
        }

        let unit = format.indent_unit();
        let mut out: Vec<String> = Vec::with_capacity(lines.len());
        let mut depth: usize = 0;
        let mut blank_run = 0;
        let mut state = LexState::Code;

        for line in &lines {
            let scan = scan_line(line, state);
            state = scan.ends_in;

            if scan.starts_in != LexState::Code {
                out.push(if format.trim_trailing_whitespace && scan.ends_in == LexState::Code {
                    line.trim_end().to_string()
                } else {
                    line.clone()
                });
                depth = (depth + scan.opens).saturating_sub(scan.closes);
                blank_run = 0;
                continue;
            }

            let body = if format.trim_trailing_whitespace {
                line.trim()
            } else {
                line.trim_start()
            };

            if body.trim().is_empty() {
                blank_run += 1;
                if blank_run <= format.max_blank_lines {
                    out.push(String::new());
                }
                continue;
            }
            blank_run = 0;

            if body.starts_with('#') {
                out.push(body.to_string());
            } else {
                let level = depth.saturating_sub(scan.leading_closers);
                out.push(format!("{}{}", unit.repeat(level), body));
            }
            depth = (depth + scan.opens).saturating_sub(scan.closes);
        }

        let newline = format.new_line.as_str();
        let mut result = out.join(newline);
        if format.insert_final_newline && !result.is_empty() {
            result.push_str(newline);
        }
        Ok(result)
    }
}
