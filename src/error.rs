//! Error taxonomy (§7): the language-level `ErrorKind` tags carried inside
//! `Value::Error`, and the Rust-level `thiserror` types used by the
//! lexer, parser and module loader to report their own failures.

use std::fmt;
use std::path::PathBuf;

/// Free-form-but-fixed kind tag attached to every `Value::Error` the
/// evaluator raises internally. User code may throw errors with its own
/// kind strings; these are simply the ones the core itself produces.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    Lexical,
    Syntax,
    Name,
    Type,
    Value,
    Io,
    Arity,
    StackOverflow,
    Import,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Lexical => "LexicalError",
            ErrorKind::Syntax => "SyntaxError",
            ErrorKind::Name => "NameError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Value => "ValueError",
            ErrorKind::Io => "IOError",
            ErrorKind::Arity => "ArityError",
            ErrorKind::StackOverflow => "StackOverflow",
            ErrorKind::Import => "ImportError",
        };
        f.write_str(name)
    }
}

/// A lexer failure, carrying the position at which scanning gave up on
/// the current token (§4.1).
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
pub enum LexError {
    #[error("unterminated string literal at {line}:{col}")]
    UnterminatedString { line: u32, col: u32 },

    #[error("unterminated block comment at {line}:{col}")]
    UnterminatedComment { line: u32, col: u32 },

    #[error("unterminated string interpolation at {line}:{col}")]
    UnterminatedInterpolation { line: u32, col: u32 },

    #[error("unexpected character {ch:?} at {line}:{col}")]
    UnexpectedChar { ch: char, line: u32, col: u32 },
}

impl LexError {
    pub fn position(&self) -> (u32, u32) {
        match *self {
            LexError::UnterminatedString { line, col } => (line, col),
            LexError::UnterminatedComment { line, col } => (line, col),
            LexError::UnterminatedInterpolation { line, col } => (line, col),
            LexError::UnexpectedChar { line, col, .. } => (line, col),
        }
    }
}

/// A parser failure recorded during error recovery (§4.2).
#[derive(Clone, Debug, thiserror::Error, PartialEq, Eq)]
#[error("{message} at {line}:{col}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
    pub col: u32,
}

impl ParseError {
    pub fn new(message: impl Into<String>, line: u32, col: u32) -> Self {
        Self {
            message: message.into(),
            line,
            col,
        }
    }
}

/// A module-loader failure (§4.8).
#[derive(Clone, Debug, thiserror::Error)]
pub enum LoadError {
    #[error("Circular import: {}", render_cycle(.stack))]
    CircularImport { stack: Vec<PathBuf> },

    #[error("module not found: {path}")]
    ModuleNotFound { path: PathBuf },

    #[error("failed to read module {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn render_cycle(stack: &[PathBuf]) -> String {
    stack
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// A program-level failure reaching the top of `main`: either an
/// uncaught language-level Throw or a host-side load/parse failure
/// (§6.3, exit codes).
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("{0}")]
    Uncaught(String),

    #[error("{0}")]
    Load(#[from] LoadError),

    #[error("parse errors:\n{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Parse(Vec<ParseError>),

    #[error("lex errors:\n{}", .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("\n"))]
    Lex(Vec<LexError>),

    /// `process.exit(code)` unwinding through `finally` blocks (§4.9).
    #[error("exit({0})")]
    Exit(i32),
}
