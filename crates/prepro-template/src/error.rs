/*
 * error.rs
 * Copyright (c) 2025 Posit, PBC
 */

//! Error types for preprocessing, compiling and executing templates.
//!
//! Every error maps onto a Python-flavoured class name (see
//! [`TemplateError::class_name`]) because template authors write
//! `except NameError:` clauses against those names and the command-line
//! drivers report them verbatim.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Best-effort position of a failing statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Template name (file path, or `<string>` for literal sources).
    pub file: String,
    /// 1-based source line.
    pub line: usize,
}

impl Location {
    pub fn new(file: impl Into<String>, line: usize) -> Self {
        Self {
            file: file.into(),
            line,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, line ~{}", self.file, self.line)
    }
}

/// Runtime error classes raised while executing a compiled template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NameError,
    AttributeError,
    TypeError,
    ValueError,
    KeyError,
    IndexError,
    ZeroDivisionError,
    OverflowError,
    FileNotFoundError,
    RecursionError,
}

impl ErrorKind {
    pub fn name(self) -> &'static str {
        match self {
            ErrorKind::NameError => "NameError",
            ErrorKind::AttributeError => "AttributeError",
            ErrorKind::TypeError => "TypeError",
            ErrorKind::ValueError => "ValueError",
            ErrorKind::KeyError => "KeyError",
            ErrorKind::IndexError => "IndexError",
            ErrorKind::ZeroDivisionError => "ZeroDivisionError",
            ErrorKind::OverflowError => "OverflowError",
            ErrorKind::FileNotFoundError => "FileNotFoundError",
            ErrorKind::RecursionError => "RecursionError",
        }
    }

    /// Whether an `except <class_name>:` clause catches this kind.
    pub fn matches(self, class_name: &str) -> bool {
        match class_name {
            "Exception" | "BaseException" => true,
            "LookupError" => matches!(self, ErrorKind::KeyError | ErrorKind::IndexError),
            "ArithmeticError" => {
                matches!(self, ErrorKind::ZeroDivisionError | ErrorKind::OverflowError)
            }
            "OSError" | "IOError" => self == ErrorKind::FileNotFoundError,
            "RuntimeError" => self == ErrorKind::RecursionError,
            other => other == self.name(),
        }
    }
}

fn at(location: &Option<Location>) -> String {
    match location {
        Some(loc) => format!(" ({loc})"),
        None => String::new(),
    }
}

/// Errors that can occur during template operations.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// Invalid delimiter or option configuration; raised before any text is processed.
    #[error("{message}")]
    Configuration { message: String },

    /// An inline span with nothing but whitespace inside it.
    #[error("Empty inline expression `{span}` ({location})")]
    EmptyExpression { span: String, location: Location },

    /// `include` used without call syntax.
    #[error("{message}{}", at(.location))]
    IncludeSyntax {
        message: String,
        location: Option<Location>,
    },

    /// Malformed statement or expression.
    #[error("{message}{}", at(.location))]
    Syntax {
        message: String,
        location: Option<Location>,
    },

    /// Error raised while executing the compiled template.
    #[error("{message}{}", at(.location))]
    Runtime {
        kind: ErrorKind,
        message: String,
        location: Option<Location>,
    },

    /// Unbalanced or unrecognized parameter file.
    #[error("Could not parse parameters file {}: {message}", .path.display())]
    ParamsFormat { path: PathBuf, message: String },

    /// Malformed JSON include.
    #[error("Invalid JSON include: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error (e.g., reading a template or include file).
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl TemplateError {
    pub fn configuration(message: impl Into<String>) -> Self {
        TemplateError::Configuration {
            message: message.into(),
        }
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        TemplateError::Syntax {
            message: message.into(),
            location: None,
        }
    }

    pub fn runtime(kind: ErrorKind, message: impl Into<String>) -> Self {
        TemplateError::Runtime {
            kind,
            message: message.into(),
            location: None,
        }
    }

    pub fn name_error(name: &str) -> Self {
        Self::runtime(ErrorKind::NameError, format!("name '{name}' is not defined"))
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::TypeError, message)
    }

    pub fn value_error(message: impl Into<String>) -> Self {
        Self::runtime(ErrorKind::ValueError, message)
    }

    /// Python-style class name reported to users.
    pub fn class_name(&self) -> &'static str {
        match self {
            TemplateError::Configuration { .. } => "ConfigurationError",
            TemplateError::EmptyExpression { .. } => "EmptyExpressionError",
            TemplateError::IncludeSyntax { .. } => "IncludeSyntaxError",
            TemplateError::Syntax { .. } => "SyntaxError",
            TemplateError::Runtime { kind, .. } => kind.name(),
            TemplateError::ParamsFormat { .. } => "ParamsFormatError",
            TemplateError::Json(_) => "JSONDecodeError",
            TemplateError::Io(_) => "IOError",
        }
    }

    /// Runtime kind, if this error can be caught by a template `except` clause.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            TemplateError::Runtime { kind, .. } => Some(*kind),
            TemplateError::Io(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Some(ErrorKind::FileNotFoundError)
            }
            _ => None,
        }
    }

    /// Message without the location suffix, as bound by `except ... as e`.
    pub fn message(&self) -> String {
        match self {
            TemplateError::Configuration { message }
            | TemplateError::IncludeSyntax { message, .. }
            | TemplateError::Syntax { message, .. }
            | TemplateError::Runtime { message, .. }
            | TemplateError::ParamsFormat { message, .. } => message.clone(),
            TemplateError::EmptyExpression { span, .. } => {
                format!("Empty inline expression `{span}`")
            }
            TemplateError::Json(err) => err.to_string(),
            TemplateError::Io(err) => err.to_string(),
        }
    }

    pub fn location(&self) -> Option<&Location> {
        match self {
            TemplateError::EmptyExpression { location, .. } => Some(location),
            TemplateError::IncludeSyntax { location, .. }
            | TemplateError::Syntax { location, .. }
            | TemplateError::Runtime { location, .. } => location.as_ref(),
            _ => None,
        }
    }

    /// Attach a location unless one is already recorded. Errors coming out of
    /// a nested include keep the innermost position.
    pub fn with_location(mut self, file: &str, line: usize) -> Self {
        match &mut self {
            TemplateError::IncludeSyntax { location, .. }
            | TemplateError::Syntax { location, .. }
            | TemplateError::Runtime { location, .. } => {
                if location.is_none() {
                    *location = Some(Location::new(file, line));
                }
            }
            _ => {}
        }
        self
    }
}

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_class_names() {
        assert_eq!(TemplateError::name_error("x").class_name(), "NameError");
        assert_eq!(
            TemplateError::configuration("bad").class_name(),
            "ConfigurationError"
        );
        assert_eq!(TemplateError::syntax("bad").class_name(), "SyntaxError");
    }

    #[test]
    fn test_location_is_attached_once() {
        let err = TemplateError::name_error("x")
            .with_location("inner.inp", 3)
            .with_location("outer.inp", 10);
        assert_eq!(err.location(), Some(&Location::new("inner.inp", 3)));
        assert_eq!(
            err.to_string(),
            "name 'x' is not defined (inner.inp, line ~3)"
        );
    }

    #[test]
    fn test_except_matching() {
        assert!(ErrorKind::KeyError.matches("LookupError"));
        assert!(ErrorKind::ZeroDivisionError.matches("Exception"));
        assert!(ErrorKind::NameError.matches("NameError"));
        assert!(!ErrorKind::NameError.matches("KeyError"));
    }
}
