//! Diagnostic sources: the units of work a pull request is made of.
//!
//! A provider turns a request scope into an ordered list of sources; each
//! source computes the diagnostics for one document or one project. The
//! handlers treat both as black boxes.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use diagpull_types::{Diagnostic, DocumentId, ProjectOrDocumentId};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::SourceError;
use crate::workspace::{Project, Solution};

/// Future type alias for source and provider operations.
pub type SourceFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Per-request state handed to providers and sources.
pub struct RequestContext {
    solution: Arc<Solution>,
    category: String,
    cancel: CancellationToken,
}

impl RequestContext {
    #[must_use]
    pub fn new(solution: Arc<Solution>, category: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            solution,
            category: category.into(),
            cancel,
        }
    }

    /// The snapshot this request works against.
    #[must_use]
    pub fn solution(&self) -> &Arc<Solution> {
        &self.solution
    }

    #[must_use]
    pub fn category(&self) -> &str {
        &self.category
    }

    #[must_use]
    pub fn cancel(&self) -> &CancellationToken {
        &self.cancel
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// What a request asks diagnostics for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceScope {
    Document(DocumentId),
    Workspace,
}

pub trait DiagnosticSource: Send + Sync {
    fn id(&self) -> ProjectOrDocumentId;

    /// Owning project; its versions, and those of the projects it
    /// references, decide staleness.
    fn project(&self) -> &Arc<Project>;

    /// Identifier reported to the client.
    fn uri(&self) -> &Url;

    /// Client version of the document, when the source is one.
    fn lsp_version(&self) -> Option<i32> {
        None
    }

    /// Live sources reflect current edits. Diagnostics from other sources
    /// only change when a build runs and are reported as build-only.
    fn is_live_source(&self) -> bool {
        true
    }

    fn diagnostics<'a>(
        &'a self,
        ctx: &'a RequestContext,
    ) -> SourceFut<'a, Result<Vec<Diagnostic>, SourceError>>;
}

pub trait DiagnosticSourceProvider: Send + Sync {
    /// Sources to examine for `scope`, in reporting order.
    fn create_ordered_sources<'a>(
        &'a self,
        scope: SourceScope,
        ctx: &'a RequestContext,
    ) -> SourceFut<'a, Vec<Arc<dyn DiagnosticSource>>>;
}
