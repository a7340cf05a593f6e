//! Kernel source loading.
//!
//! Kernel text is a versioned asset: either the built-in source shipped in
//! `kernels/` for the active backend, or a file named by configuration. A
//! configured file that cannot be read is an error, never a silent fallback.

use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::fs;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use crate::error::{BatchSearchError, Result};
use crate::gpu::backend::BackendKind;

/// Name of the match entry point in every kernel source.
pub const KERNEL_ENTRY_POINT: &str = "match_positions";

/// Built-in OpenCL C source.
pub const OPENCL_KERNEL_SOURCE: &str = include_str!("../../kernels/match_positions.cl");

/// Built-in Metal Shading Language source.
pub const METAL_KERNEL_SOURCE: &str = include_str!("../../kernels/match_positions.metal");

/// Kernel source text plus a digest used as the program cache key.
#[derive(Debug, Clone)]
pub struct KernelSource {
    label: String,
    text: String,
    digest: u64,
}

impl KernelSource {
    /// Wrap in-memory source text. `label` names it in build logs.
    pub fn from_text(label: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let digest = source_digest(&text);
        Self {
            label: label.into(),
            text,
            digest,
        }
    }

    /// Read kernel source from `path`.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| {
            BatchSearchError::KernelSourceUnavailable {
                path: path.to_path_buf(),
                source,
            }
        })?;
        Ok(Self::from_text(path.display().to_string(), text))
    }

    /// The source shipped with the crate for `kind`.
    ///
    /// The CPU pool runs a native scan but still validates the OpenCL text.
    pub fn builtin(kind: BackendKind) -> Self {
        match kind {
            BackendKind::Metal => Self::from_text("match_positions.metal", METAL_KERNEL_SOURCE),
            BackendKind::OpenCl | BackendKind::Cpu => {
                Self::from_text("match_positions.cl", OPENCL_KERNEL_SOURCE)
            }
        }
    }

    /// Configured path if any, otherwise the built-in source for `kind`.
    pub fn resolve(path: Option<&PathBuf>, kind: BackendKind) -> Result<Self> {
        match path {
            Some(path) => Self::from_path(path),
            None => Ok(Self::builtin(kind)),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn digest(&self) -> u64 {
        self.digest
    }

    /// Structural check of the source text.
    ///
    /// Outside comments, string literals and preprocessor lines, every
    /// `(`, `[` and `{` must be closed in order, and the entry point must be
    /// followed by a parameter list and a `{ ... }` body. Backends without a
    /// kernel compiler run this in place of a build.
    pub fn check_structure(&self) -> std::result::Result<(), SourceError> {
        let tokens = tokenize(&self.text)?;
        check_delimiters(&tokens)?;
        check_entry_point(&tokens)
    }
}

/// A structural defect in kernel source, at a 1-based line and column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceError {
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: error: {}", self.line, self.column, self.message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Ident(&'a str),
    Punct(char),
    Literal,
}

#[derive(Debug, Clone, Copy)]
struct Spanned<'a> {
    token: Token<'a>,
    line: usize,
    column: usize,
}

impl Spanned<'_> {
    fn error(&self, message: impl Into<String>) -> SourceError {
        SourceError {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }
}

struct Cursor<'a> {
    text: &'a str,
    pos: usize,
    line: usize,
    column: usize,
}

impl Cursor<'_> {
    fn peek(&self) -> Option<char> {
        self.text[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.text[self.pos..].chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_line(&mut self) {
        while let Some(c) = self.peek() {
            match c {
                '\n' => break,
                '\\' if self.peek_second() == Some('\n') => {
                    self.bump();
                    self.bump();
                }
                _ => {
                    self.bump();
                }
            }
        }
    }
}

fn tokenize(text: &str) -> std::result::Result<Vec<Spanned<'_>>, SourceError> {
    let mut cursor = Cursor {
        text,
        pos: 0,
        line: 1,
        column: 1,
    };
    let mut tokens = Vec::new();
    let mut line_start = true;

    while let Some(c) = cursor.peek() {
        let (line, column) = (cursor.line, cursor.column);
        let at = |message: &str| SourceError {
            line,
            column,
            message: message.to_string(),
        };

        if c == '\n' {
            cursor.bump();
            line_start = true;
            continue;
        }
        if c.is_whitespace() {
            cursor.bump();
            continue;
        }

        match c {
            '#' if line_start => cursor.skip_line(),
            '/' if cursor.peek_second() == Some('/') => cursor.skip_line(),
            '/' if cursor.peek_second() == Some('*') => {
                cursor.bump();
                cursor.bump();
                loop {
                    match cursor.bump() {
                        None => return Err(at("unterminated block comment")),
                        Some('*') if cursor.peek() == Some('/') => {
                            cursor.bump();
                            break;
                        }
                        Some(_) => {}
                    }
                }
            }
            '"' | '\'' => {
                cursor.bump();
                loop {
                    match cursor.bump() {
                        None | Some('\n') => return Err(at("unterminated literal")),
                        Some('\\') => {
                            cursor.bump();
                        }
                        Some(q) if q == c => break,
                        Some(_) => {}
                    }
                }
                tokens.push(Spanned {
                    token: Token::Literal,
                    line,
                    column,
                });
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let start = cursor.pos;
                let number = c.is_ascii_digit();
                while let Some(next) = cursor.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' || (number && next == '.') {
                        cursor.bump();
                    } else {
                        break;
                    }
                }
                let token = if number {
                    Token::Literal
                } else {
                    Token::Ident(&text[start..cursor.pos])
                };
                tokens.push(Spanned {
                    token,
                    line,
                    column,
                });
            }
            _ => {
                cursor.bump();
                tokens.push(Spanned {
                    token: Token::Punct(c),
                    line,
                    column,
                });
            }
        }
        line_start = false;
    }
    Ok(tokens)
}

fn closer(open: char) -> char {
    match open {
        '(' => ')',
        '[' => ']',
        _ => '}',
    }
}

fn check_delimiters(tokens: &[Spanned<'_>]) -> std::result::Result<(), SourceError> {
    let mut open: Vec<(char, &Spanned<'_>)> = Vec::new();
    for token in tokens {
        match token.token {
            Token::Punct(c @ ('(' | '[' | '{')) => open.push((c, token)),
            Token::Punct(c @ (')' | ']' | '}')) => match open.pop() {
                Some((o, _)) if closer(o) == c => {}
                Some((o, at)) => {
                    return Err(token.error(format!(
                        "`{}` does not close `{}` opened at {}:{}",
                        c, o, at.line, at.column
                    )))
                }
                None => return Err(token.error(format!("unmatched `{}`", c))),
            },
            _ => {}
        }
    }
    match open.pop() {
        Some((o, at)) => Err(at.error(format!("unclosed `{}`", o))),
        None => Ok(()),
    }
}

/// Requires `match_positions ( ... ) {`. Delimiters are already balanced.
fn check_entry_point(tokens: &[Spanned<'_>]) -> std::result::Result<(), SourceError> {
    let is_entry = |t: &Spanned<'_>| t.token == Token::Ident(KERNEL_ENTRY_POINT);
    let Some(first) = tokens.iter().position(|t| is_entry(t)) else {
        return Err(SourceError {
            line: 1,
            column: 1,
            message: format!("no kernel entry point named `{}`", KERNEL_ENTRY_POINT),
        });
    };
    let declaration = (first..tokens.len()).find(|&i| {
        is_entry(&tokens[i]) && tokens.get(i + 1).map(|t| t.token) == Some(Token::Punct('('))
    });
    let Some(name) = declaration else {
        return Err(tokens[first].error(format!(
            "`{}` is not followed by a parameter list",
            KERNEL_ENTRY_POINT
        )));
    };

    let mut depth = 0usize;
    let mut params_end = None;
    for (i, token) in tokens.iter().enumerate().skip(name + 1) {
        match token.token {
            Token::Punct('(') => depth += 1,
            Token::Punct(')') => {
                depth -= 1;
                if depth == 0 {
                    params_end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(params_end) = params_end else {
        return Err(tokens[name + 1].error("unclosed `(`"));
    };
    match tokens.get(params_end + 1) {
        Some(t) if t.token == Token::Punct('{') => Ok(()),
        Some(t) => Err(t.error(format!(
            "expected `{{` to open the body of `{}`",
            KERNEL_ENTRY_POINT
        ))),
        None => Err(tokens[params_end].error(format!(
            "`{}` has no body",
            KERNEL_ENTRY_POINT
        ))),
    }
}

fn source_digest(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}
