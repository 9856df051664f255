use core::fmt;
use std::io;

use crate::ast::Span;

/// A source position, 1-based, used to annotate fatal diagnostics.
#[derive(Debug, PartialEq, Eq, Copy, Clone, Default)]
pub struct Position {
    pub line: usize,
    pub col: usize,
}

impl Position {
    /// Rescans `source` up to `offset`, counting newlines. No running
    /// line/col state is carried anywhere in the pipeline; this is the one
    /// place it's computed, on demand, when a diagnostic is actually built.
    pub fn at(source: &str, offset: usize) -> Position {
        let bytes = source.as_bytes();
        let mut line = 1;
        let mut col = 1;
        for &b in &bytes[..offset.min(bytes.len())] {
            if b == b'\n' {
                line += 1;
                col = 1;
            } else {
                col += 1;
            }
        }
        Position { line, col }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ln {}, col {}", self.line, self.col)
    }
}

/// The source slice a span covers, trimmed, for the "offending source
/// slice" every semantic diagnostic shows alongside its position.
pub fn snippet(source: &str, span: Span) -> String {
    source
        .get(span.begin..span.end)
        .unwrap_or("")
        .trim()
        .to_string()
}

/// The single error type threaded through every compiler stage.
///
/// Every variant is fatal: this compiler does not attempt error recovery,
/// the driver reports the first one and exits.
#[derive(Debug)]
pub enum Error {
    Io(io::Error),
    Scroll(scroll::Error),
    /// Invalid token or unexpected end of input while lexing.
    Lexical { at: Position, msg: String },
    /// A token appeared where the grammar required a different one.
    Syntax { at: Position, msg: String },
    /// Name resolution, type mismatch, overload resolution, or
    /// redeclaration failures.
    Semantic { at: Position, msg: String },
    /// A reserved construct (`__call__`, `__index__`, oversized locals)
    /// that the compiler recognizes but does not implement.
    Unsupported(String),
    /// A structurally malformed artifact (bad magic, truncated buffer) not
    /// tied to a source position, e.g. while assembling the PE image.
    Malformed(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(err) => write!(f, "{}", err),
            Error::Scroll(err) => write!(f, "{}", err),
            Error::Lexical { at, msg } => write!(f, "{}: {}", at, msg),
            Error::Syntax { at, msg } => write!(f, "{}: {}", at, msg),
            Error::Semantic { at, msg } => write!(f, "{}: {}", at, msg),
            Error::Unsupported(msg) => write!(f, "not implemented: {}", msg),
            Error::Malformed(msg) => write!(f, "malformed entity: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            Error::Scroll(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Self {
        Error::Scroll(err)
    }
}

pub type Result<T> = core::result::Result<T, Error>;
