use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Errors that surface to callers of the public operations.
///
/// Everything recoverable (unreadable series folders, malformed metadata,
/// stale cache frames, index collisions) is folded into [`Diagnostics`]
/// returned alongside the successful value instead.
#[derive(Error, Debug)]
pub enum MangaError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, MangaError>;

impl MangaError {
    /// Exit code for the thin CLI layer: 2 for a failed precondition, 3 for
    /// cancellation, 1 for anything else. 0 (success) and 4 (partial scan)
    /// are the caller's to report.
    pub fn exit_code(&self) -> u8 {
        match self {
            MangaError::Precondition(_) => 2,
            MangaError::Cancelled => 3,
            _ => 1,
        }
    }
}

/// Classification of a recovered, non-fatal failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiagnosticKind {
    /// A single series directory or `series.json` could not be processed.
    PerItem,
    /// A parsed range was rejected for validity reasons.
    ParseWarning,
    /// The fast snapshot was unreadable or incompatible.
    CacheRead,
    /// A cache write failed; the in-memory library remains valid.
    CacheWrite,
    /// Two series share a non-empty external ID; the first binding was kept.
    IndexCollision,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub path: Option<PathBuf>,
    pub detail: String,
}

/// Ordered collection of recovered failures, returned alongside results.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, kind: DiagnosticKind, path: Option<PathBuf>, detail: impl Into<String>) {
        self.entries.push(Diagnostic {
            kind,
            path,
            detail: detail.into(),
        });
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    /// Entries of one kind, for callers that report selectively.
    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }
}
