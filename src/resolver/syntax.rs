/// Lightweight C# compilation-unit scanner
///
/// Finds using directives, namespaces (block and file-scoped) and the type declarations inside
/// them. Member bodies are skipped as balanced brace blocks; string literals, character literals,
/// comments and preprocessor lines are recognised so braces inside them never count.
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Class,
    Struct,
    Interface,
    Enum,
    Record,
    Delegate,
}

impl TypeKind {
    fn from_keyword(word: &str) -> Option<Self> {
        match word {
            "class" => Some(TypeKind::Class),
            "struct" => Some(TypeKind::Struct),
            "interface" => Some(TypeKind::Interface),
            "enum" => Some(TypeKind::Enum),
            "record" => Some(TypeKind::Record),
            "delegate" => Some(TypeKind::Delegate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UsingDirective {
    /// Normalized directive, e.g. `using System.Data;`
    pub text: String,
    /// Imported namespace or type, without alias or `static`
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDeclaration {
    pub name: String,
    pub usings: Vec<UsingDirective>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeDeclaration {
    pub kind: TypeKind,
    pub name: String,
    /// Declaration source, re-indented to column zero
    pub text: String,
    pub namespace: Option<String>,
    /// File-level usings followed by those of every enclosing namespace
    pub usings: Vec<UsingDirective>,
    /// Zero-based
    pub line: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompilationUnit {
    pub usings: Vec<UsingDirective>,
    pub namespaces: Vec<NamespaceDeclaration>,
    pub types: Vec<TypeDeclaration>,
}

impl CompilationUnit {
    /// Every using name in the order it was encountered
    pub fn all_imports(&self) -> impl Iterator<Item = &UsingDirective> {
        self.usings
            .iter()
            .chain(self.namespaces.iter().flat_map(|ns| ns.usings.iter()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    pub message: String,
    /// Zero-based
    pub line: usize,
    /// Zero-based
    pub column: usize,
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{}): {}", self.line + 1, self.column + 1, self.message)
    }
}

impl std::error::Error for SyntaxError {}

#[derive(Clone)]
struct Scope {
    name: Option<String>,
    usings: Vec<UsingDirective>,
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
    unit: CompilationUnit,
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

impl<'a> Parser<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
            unit: CompilationUnit::default(),
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn location(&self, offset: usize) -> (usize, usize) {
        let before = &self.text[..offset.min(self.text.len())];
        let line = before.matches('\n').count();
        let column = before.len() - before.rfind('\n').map(|i| i + 1).unwrap_or(0);
        (line, column)
    }

    fn error(&self, offset: usize, message: impl Into<String>) -> SyntaxError {
        let (line, column) = self.location(offset);
        SyntaxError {
            message: message.into(),
            line,
            column,
        }
    }

    fn skip_to_line_end(&mut self) {
        while let Some(b) = self.peek() {
            if b == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    /// Skip whitespace, comments and preprocessor lines
    fn skip_trivia(&mut self) -> Result<(), SyntaxError> {
        while let Some(b) = self.peek() {
            match b {
                b if b.is_ascii_whitespace() => self.pos += 1,
                b'/' if self.peek_at(1) == Some(b'/') => self.skip_to_line_end(),
                b'/' if self.peek_at(1) == Some(b'*') => {
                    let start = self.pos;
                    match self.text[self.pos + 2..].find("*/") {
                        Some(end) => self.pos += 2 + end + 2,
                        None => return Err(self.error(start, "unterminated block comment")),
                    }
                }
                b'#' => self.skip_to_line_end(),
                _ => break,
            }
        }
        Ok(())
    }

    /// Skip a string or character literal at the cursor. Returns false when there is none.
    fn skip_literal(&mut self) -> Result<bool, SyntaxError> {
        let start = self.pos;
        let mut i = self.pos;
        let mut interpolated = false;
        let mut verbatim = false;
        while let Some(&b) = self.bytes.get(i) {
            match b {
                b'$' => interpolated = true,
                b'@' => verbatim = true,
                _ => break,
            }
            i += 1;
        }
        match self.bytes.get(i) {
            Some(b'"') => {}
            Some(b'\'') if i == start => {
                self.pos = i;
                self.skip_quoted(b'\'', false, false, start)?;
                return Ok(true);
            }
            _ => return Ok(false),
        }

        self.pos = i;
        let quotes = self.bytes[i..].iter().take_while(|&&b| b == b'"').count();
        if quotes >= 3 {
            let fence = "\"".repeat(quotes);
            match self.text[i + quotes..].find(&fence) {
                Some(end) => {
                    self.pos = i + quotes + end + quotes;
                    return Ok(true);
                }
                None => return Err(self.error(start, "unterminated raw string literal")),
            }
        }
        self.skip_quoted(b'"', verbatim, interpolated, start)?;
        Ok(true)
    }

    fn skip_quoted(
        &mut self,
        quote: u8,
        verbatim: bool,
        interpolated: bool,
        start: usize,
    ) -> Result<(), SyntaxError> {
        self.pos += 1;
        while let Some(b) = self.peek() {
            if b == quote {
                if verbatim && self.peek_at(1) == Some(quote) {
                    self.pos += 2;
                    continue;
                }
                self.pos += 1;
                return Ok(());
            }
            if b == b'\\' && !verbatim {
                self.pos += 2;
                continue;
            }
            if b == b'\n' && !verbatim {
                break;
            }
            if interpolated && b == b'{' {
                if self.peek_at(1) == Some(b'{') {
                    self.pos += 2;
                    continue;
                }
                self.skip_balanced(b'{', b'}')?;
                continue;
            }
            self.pos += 1;
        }
        Err(self.error(start, "unterminated literal"))
    }

    /// Skip from an opening delimiter to just past its matching closer
    fn skip_balanced(&mut self, open: u8, close: u8) -> Result<(), SyntaxError> {
        let start = self.pos;
        let mut depth = 0usize;
        while self.pos < self.bytes.len() {
            self.skip_trivia()?;
            if self.skip_literal()? {
                continue;
            }
            let Some(b) = self.peek() else { break };
            self.pos += 1;
            if b == open {
                depth += 1;
            } else if b == close {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(());
                }
            }
        }
        Err(self.error(start, format!("missing closing '{}'", close as char)))
    }

    fn peek_word(&self) -> Option<&'a str> {
        let start = self.pos + usize::from(self.peek() == Some(b'@'));
        let len = self.bytes[start.min(self.bytes.len())..]
            .iter()
            .take_while(|&&b| is_ident_byte(b))
            .count();
        if len == 0 {
            None
        } else {
            Some(&self.text[start..start + len])
        }
    }

    fn read_word(&mut self) -> Option<&'a str> {
        let word = self.peek_word()?;
        if self.peek() == Some(b'@') {
            self.pos += 1;
        }
        self.pos += word.len();
        Some(word)
    }

    fn read_qualified_name(&mut self) -> Result<String, SyntaxError> {
        let start = self.pos;
        let mut name = String::new();
        loop {
            self.skip_trivia()?;
            let Some(word) = self.read_word() else {
                return Err(self.error(start, "expected a name"));
            };
            name.push_str(word);
            self.skip_trivia()?;
            if self.peek() == Some(b'.') {
                self.pos += 1;
                name.push('.');
            } else if self.peek() == Some(b':') && self.peek_at(1) == Some(b':') {
                self.pos += 2;
                name.push_str("::");
            } else {
                return Ok(name);
            }
        }
    }

    fn read_until_semicolon(&mut self) -> Result<&'a str, SyntaxError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if self.skip_literal()? {
                continue;
            }
            if b == b';' {
                let body = &self.text[start..self.pos];
                self.pos += 1;
                return Ok(body);
            }
            self.pos += 1;
        }
        Err(self.error(start, "expected ';'"))
    }

    fn parse_using(&mut self) -> Result<UsingDirective, SyntaxError> {
        let body = self.read_until_semicolon()?;
        let collapsed = body
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .replace(" .", ".")
            .replace(". ", ".");
        let target = collapsed
            .strip_prefix("static ")
            .unwrap_or(&collapsed)
            .to_string();
        let name = match target.split_once('=') {
            Some((_, aliased)) => aliased.trim().to_string(),
            None => target,
        };
        Ok(UsingDirective {
            text: format!("using {};", collapsed),
            name,
        })
    }

    fn parse_members(&mut self, scope: &mut Scope, in_block: bool) -> Result<(), SyntaxError> {
        loop {
            self.skip_trivia()?;
            let Some(b) = self.peek() else {
                if in_block {
                    return Err(self.error(self.text.len(), "expected '}'"));
                }
                return Ok(());
            };

            if b == b'}' {
                if in_block {
                    self.pos += 1;
                    return Ok(());
                }
                return Err(self.error(self.pos, "unexpected '}'"));
            }
            if b == b';' {
                self.pos += 1;
                continue;
            }

            match self.peek_word() {
                Some("extern") => {
                    self.read_until_semicolon()?;
                }
                Some("global") | Some("using") => {
                    let checkpoint = self.pos;
                    if self.read_word() == Some("global") {
                        self.skip_trivia()?;
                        if self.read_word() != Some("using") {
                            self.pos = checkpoint;
                            self.parse_declaration(scope)?;
                            continue;
                        }
                    }
                    let using = self.parse_using()?;
                    match scope.name.as_ref() {
                        None => self.unit.usings.push(using.clone()),
                        Some(name) => {
                            if let Some(ns) = self
                                .unit
                                .namespaces
                                .iter_mut()
                                .rev()
                                .find(|ns| &ns.name == name)
                            {
                                ns.usings.push(using.clone());
                            }
                        }
                    }
                    scope.usings.push(using);
                }
                Some("namespace") => {
                    self.read_word();
                    let name = self.read_qualified_name()?;
                    let full_name = match &scope.name {
                        Some(parent) => format!("{}.{}", parent, name),
                        None => name,
                    };
                    self.unit.namespaces.push(NamespaceDeclaration {
                        name: full_name.clone(),
                        usings: Vec::new(),
                    });
                    let mut child = Scope {
                        name: Some(full_name),
                        usings: scope.usings.clone(),
                    };
                    self.skip_trivia()?;
                    match self.peek() {
                        Some(b'{') => {
                            self.pos += 1;
                            self.parse_members(&mut child, true)?;
                        }
                        Some(b';') => {
                            self.pos += 1;
                            // File-scoped: the namespace runs to the end of the file
                            self.parse_members(&mut child, in_block)?;
                            return Ok(());
                        }
                        _ => return Err(self.error(self.pos, "expected '{' or ';' after namespace")),
                    }
                }
                _ => self.parse_declaration(scope)?,
            }
        }
    }

    fn parse_declaration(&mut self, scope: &Scope) -> Result<(), SyntaxError> {
        let start = self.pos;
        let mut words: Vec<&'a str> = Vec::new();
        let mut name_before_paren: Option<&'a str> = None;
        // Last word outside type arguments, so `Task<int> Handler<T>(` names `Handler`
        let mut last_top_level: Option<&'a str> = None;
        let mut angle_depth: usize = 0;

        let end = loop {
            self.skip_trivia()?;
            if self.skip_literal()? {
                continue;
            }
            let Some(b) = self.peek() else {
                return Err(self.error(start, "unterminated declaration"));
            };
            match b {
                b'[' => self.skip_balanced(b'[', b']')?,
                b'(' => {
                    if name_before_paren.is_none() {
                        name_before_paren = last_top_level;
                    }
                    self.skip_balanced(b'(', b')')?;
                }
                b'{' => {
                    self.skip_balanced(b'{', b'}')?;
                    break self.pos;
                }
                b';' => {
                    self.pos += 1;
                    break self.pos;
                }
                b'}' => return Err(self.error(self.pos, "unexpected '}'")),
                b'<' => {
                    angle_depth += 1;
                    self.pos += 1;
                }
                b'>' => {
                    angle_depth = angle_depth.saturating_sub(1);
                    self.pos += 1;
                }
                _ => {
                    if let Some(word) = self.read_word() {
                        if angle_depth == 0 {
                            last_top_level = Some(word);
                        }
                        words.push(word);
                    } else {
                        self.pos += 1;
                    }
                }
            }
        };

        let Some(kind_idx) = words
            .iter()
            .position(|w| TypeKind::from_keyword(w).is_some())
        else {
            tracing::trace!(line = self.location(start).0, "skipping non-type member");
            return Ok(());
        };
        let Some(kind) = TypeKind::from_keyword(words[kind_idx]) else {
            return Ok(());
        };

        let name = match kind {
            TypeKind::Delegate => name_before_paren.unwrap_or_default(),
            TypeKind::Record => words[kind_idx + 1..]
                .iter()
                .find(|w| **w != "class" && **w != "struct")
                .copied()
                .unwrap_or_default(),
            _ => words.get(kind_idx + 1).copied().unwrap_or_default(),
        };

        let (line, column) = self.location(start);
        self.unit.types.push(TypeDeclaration {
            kind,
            name: name.to_string(),
            text: dedent(&self.text[start..end], column),
            namespace: scope.name.clone(),
            usings: scope.usings.clone(),
            line,
        });
        Ok(())
    }
}

/// Remove up to `column` leading whitespace characters from every line after the first
fn dedent(text: &str, column: usize) -> String {
    let mut lines = text.split('\n');
    let mut out = String::with_capacity(text.len());
    if let Some(first) = lines.next() {
        out.push_str(first);
    }
    for line in lines {
        out.push('\n');
        let strip = line
            .char_indices()
            .take(column)
            .take_while(|(_, c)| *c == ' ' || *c == '\t')
            .last()
            .map(|(i, c)| i + c.len_utf8())
            .unwrap_or(0);
        out.push_str(&line[strip..]);
    }
    out
}

pub fn parse_compilation_unit(text: &str) -> Result<CompilationUnit, SyntaxError> {
    let mut parser = Parser::new(text);
    let mut root = Scope {
        name: None,
        usings: Vec::new(),
    };
    parser.parse_members(&mut root, false)?;
    Ok(parser.unit)
}
