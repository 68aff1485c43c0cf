//! Crate-level error classification and diagnostics.
//!
//! Each module keeps its own `thiserror` enum; they all convert into
//! [`RemixError`], whose [`ErrorKind`] is what callers branch on. Broken
//! references and unsupported features never fail a whole operation: they
//! travel as [`Diagnostic`]s or per-item failures next to the results.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::export::ExportError;
use crate::project::ProjectError;
use crate::texture::TextureError;
use crate::usd::{ParseError, StageError};

/// Broad failure classes surfaced to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    MalformedDocument,
    BrokenReference,
    UnsupportedFeature,
    ConversionFailure,
    InvalidTextureData,
    ConcurrentMutationConflict,
    Project,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::MalformedDocument => "malformed document",
            ErrorKind::BrokenReference => "broken reference",
            ErrorKind::UnsupportedFeature => "unsupported feature",
            ErrorKind::ConversionFailure => "conversion failure",
            ErrorKind::InvalidTextureData => "invalid texture data",
            ErrorKind::ConcurrentMutationConflict => "concurrent mutation conflict",
            ErrorKind::Project => "project error",
            ErrorKind::Io => "I/O error",
        };
        f.write_str(name)
    }
}

/// Top-level error type.
#[derive(Error, Debug)]
pub enum RemixError {
    #[error("Malformed document {path}: {message}")]
    MalformedDocument { path: PathBuf, message: String },

    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Texture(#[from] TextureError),

    #[error(transparent)]
    Project(#[from] ProjectError),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ParseError> for RemixError {
    fn from(err: ParseError) -> Self {
        RemixError::MalformedDocument {
            path: PathBuf::new(),
            message: err.to_string(),
        }
    }
}

impl RemixError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemixError::MalformedDocument { .. } => ErrorKind::MalformedDocument,
            RemixError::Stage(e) => e.kind(),
            RemixError::Texture(e) => e.kind(),
            RemixError::Project(e) => e.kind(),
            RemixError::Export(e) => e.kind(),
            RemixError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Result type for top-level operations.
pub type RemixResult<T> = Result<T, RemixError>;

/// How serious a diagnostic is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A non-fatal finding attached to an operation result.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub kind: ErrorKind,
    /// Prim path, file path or texture the finding is about
    pub subject: String,
    pub message: String,
}

impl Diagnostic {
    pub fn warning(kind: ErrorKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        let d = Self {
            severity: Severity::Warning,
            kind,
            subject: subject.into(),
            message: message.into(),
        };
        log::warn!("{}: {} ({})", d.kind, d.message, d.subject);
        d
    }

    pub fn info(kind: ErrorKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        let d = Self {
            severity: Severity::Info,
            kind,
            subject: subject.into(),
            message: message.into(),
        };
        log::info!("{}: {} ({})", d.kind, d.message, d.subject);
        d
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {} ({})", self.severity, self.kind, self.message, self.subject)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err: RemixError = ParseError::UnexpectedEof.into();
        assert_eq!(err.kind(), ErrorKind::MalformedDocument);

        let err: RemixError = ProjectError::NoConverter.into();
        assert_eq!(err.kind(), ErrorKind::Project);
        let err: RemixError = std::io::Error::other("disk gone").into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn test_diagnostic_display() {
        let d = Diagnostic::warning(ErrorKind::BrokenReference, "/A", "missing material");
        assert_eq!(d.severity, Severity::Warning);
        assert_eq!(
            d.to_string(),
            "[Warning] broken reference: missing material (/A)"
        );
    }
}
