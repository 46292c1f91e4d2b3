//! Error taxonomy for every pipeline stage.
//!
//! Each stage has its own error type so callers can match on exactly what a
//! stage can fail with. [`Error`] wraps all of them for the CLI and for
//! callers that run the whole pipeline.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// What went wrong while building the schema model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// The text is not a readable JSON/YAML/TOML document.
    Syntax(String),
    MissingField,
    TypeMismatch { expected: &'static str },
    DuplicateName { name: String },
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Syntax(message) => write!(f, "syntax error: {}", message),
            Self::MissingField => write!(f, "missing field"),
            Self::TypeMismatch { expected } => write!(f, "expected {}", expected),
            Self::DuplicateName { name } => write!(f, "duplicate name '{}'", name),
        }
    }
}

/// Structural error, located by its dotted path in the document tree.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} at '{path}'")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub path: String,
}

impl ParseError {
    pub fn missing(path: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::MissingField,
            path: path.into(),
        }
    }

    pub fn mismatch(path: impl Into<String>, expected: &'static str) -> Self {
        Self {
            kind: ParseErrorKind::TypeMismatch { expected },
            path: path.into(),
        }
    }

    pub fn duplicate(path: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::DuplicateName { name: name.into() },
            path: path.into(),
        }
    }

    pub fn syntax(message: impl fmt::Display) -> Self {
        Self {
            kind: ParseErrorKind::Syntax(message.to_string()),
            path: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionErrorKind {
    DanglingReference,
    AmbiguousReference,
}

impl fmt::Display for ResolutionErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DanglingReference => write!(f, "dangling reference"),
            Self::AmbiguousReference => write!(f, "ambiguous reference"),
        }
    }
}

/// A name reference that does not bind to exactly one entity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} '{ref_name}' (referenced from {referenced_from})")]
pub struct ResolutionError {
    pub kind: ResolutionErrorKind,
    pub ref_name: String,
    pub referenced_from: String,
}

/// Optic overlays that loop back onto themselves.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("optic overlay cycle: {}", chain.join(" -> "))]
pub struct OverlayCycleError {
    pub chain: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unsupported location kind '{kind}'")]
pub struct UnsupportedLocationKind {
    pub kind: String,
}

/// Load plan construction failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("unknown sequence '{name}'")]
    UnknownSequence { name: String },

    #[error("unknown range '{name}' in sequence '{sequence}'")]
    UnknownRange { sequence: String, name: String },

    #[error("unknown optic '{name}'")]
    UnknownOptic { name: String },

    /// The requested name is declared more than once.
    #[error("ambiguous {entity} '{name}'")]
    AmbiguousName { entity: &'static str, name: String },

    #[error("invalid corrector filter regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error(transparent)]
    OverlayCycle(#[from] OverlayCycleError),

    #[error(transparent)]
    UnsupportedLocation(#[from] UnsupportedLocationKind),
}

/// Any failure of the parse → resolve → plan pipeline.
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("plan error: {0}")]
    Build(#[from] BuildError),

    #[error("unknown model '{name}'")]
    UnknownModel { name: String },

    #[error("document holds several models; choose one of: {}", names.join(", "))]
    ModelRequired { names: Vec<String> },

    #[error("serialize error: {0}")]
    Serialize(#[from] serde_json::Error),
}
