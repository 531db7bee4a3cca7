//! Error types for the pull-diagnostics engine.

use diagpull_types::ProjectOrDocumentId;
use url::Url;

/// Why a pull request did not complete.
///
/// Single-source failures never reach this type; they are logged and turned
/// into an empty diagnostic set by the handler.
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    #[error("request cancelled")]
    Cancelled,
    #[error("no diagnostic provider registered for category '{0}'")]
    UnknownCategory(String),
    #[error(transparent)]
    Workspace(#[from] WorkspaceError),
}

impl PullError {
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// A diagnostic source failed to produce diagnostics.
#[derive(Debug, Clone, thiserror::Error)]
#[error("diagnostic source {source_id} failed: {message}")]
pub struct SourceError {
    pub source_id: ProjectOrDocumentId,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WorkspaceError {
    #[error("document already exists: {0}")]
    DuplicateDocument(Url),
    #[error("unknown document: {0}")]
    UnknownDocument(Url),
    #[error("unknown project: {0}")]
    UnknownProject(String),
    #[error("not a valid document uri: {0}")]
    InvalidUri(String),
}
