//! Pull handlers for document and workspace diagnostic requests.
//!
//! Both run the same pass over a request:
//!
//! 1. resolve the client's previous results against the snapshot, collecting
//!    the ones that no longer resolve;
//! 2. report those as removed;
//! 3. walk the provider's ordered sources, letting the cache decide which ones
//!    need new diagnostics;
//! 4. report previous results whose source was not seen this pass as removed.
//!
//! The workspace handler additionally parks a pass that changed nothing until
//! the next change for its category.

mod document;
mod workspace;

pub use document::{DocumentPullHandler, DocumentPullRequest};
pub use workspace::{WorkspacePullHandler, WorkspacePullOptions, WorkspacePullRequest};

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use dashmap::DashMap;
use diagpull_types::{Diagnostic, ProjectOrDocumentId, VersionStamp};
use url::Url;

use crate::cache::{CacheOutcome, VersionedPullCache};
use crate::checksum::Checksum;
use crate::error::PullError;
use crate::refresh::Refresher;
use crate::report::{PreviousPullResult, PullReport, ReportSink};
use crate::source::{DiagnosticSource, DiagnosticSourceProvider, RequestContext, SourceScope};

/// Global state version and the newest edit stamp of the owning project and
/// every project it references.
pub type CheapVersion = (u64, VersionStamp);

/// Global state version and the content checksum over the same projects.
pub type ExpensiveVersion = (u64, Checksum);

pub type DiagnosticsCache = VersionedPullCache<CheapVersion, ExpensiveVersion>;

/// One cache per category, created on first use.
#[derive(Default)]
pub struct CategoryCaches {
    caches: DashMap<String, Arc<DiagnosticsCache>>,
}

impl CategoryCaches {
    #[must_use]
    pub fn get(&self, category: &str) -> Arc<DiagnosticsCache> {
        if let Some(cache) = self.caches.get(category) {
            return cache.clone();
        }
        self.caches
            .entry(category.to_string())
            .or_insert_with(|| Arc::new(DiagnosticsCache::new(category)))
            .clone()
    }

    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        self.caches.iter().map(|e| e.key().clone()).collect()
    }
}

/// Everything one pass needs besides its inputs.
struct Pass<'a> {
    cache: &'a DiagnosticsCache,
    provider: &'a dyn DiagnosticSourceProvider,
    refresher: &'a Refresher,
    ctx: &'a Arc<RequestContext>,
    report_unchanged: bool,
}

impl Pass<'_> {
    async fn run(
        &self,
        scope: SourceScope,
        previous_results: &[PreviousPullResult],
        sink: &mut ReportSink,
    ) -> Result<(), PullError> {
        let solution = self.ctx.solution();
        let category = self.ctx.category();

        let mut previous: HashMap<ProjectOrDocumentId, PreviousPullResult> = HashMap::new();
        let mut removed: Vec<Url> = Vec::new();
        for result in previous_results {
            match solution.resolve(&result.uri) {
                Some(id) => {
                    previous.insert(id, result.clone());
                }
                None if !removed.contains(&result.uri) => removed.push(result.uri.clone()),
                None => {}
            }
        }

        for uri in removed {
            check_cancelled(self.ctx)?;
            tracing::debug!(category, %uri, "Previous result no longer resolves");
            sink.emit(PullReport::Removed { uri }).await;
        }

        let sources = cancellable(
            self.ctx,
            self.provider.create_ordered_sources(scope, self.ctx),
        )
        .await?;

        let mut seen: HashSet<ProjectOrDocumentId> = HashSet::new();
        for source in sources {
            check_cancelled(self.ctx)?;
            let source_id = source.id();
            if !seen.insert(source_id) {
                tracing::debug!(category, source = %source_id, "Duplicate source skipped");
                continue;
            }
            self.check_source(&source, &previous, sink).await?;
        }

        let mut retracted: HashSet<ProjectOrDocumentId> = HashSet::new();
        for result in previous_results {
            let Some(id) = solution.resolve(&result.uri) else {
                continue;
            };
            if seen.contains(&id) || !retracted.insert(id) {
                continue;
            }
            check_cancelled(self.ctx)?;
            tracing::debug!(category, source = %id, "Source vanished from this pass");
            sink.emit(PullReport::Removed {
                uri: result.uri.clone(),
            })
            .await;
        }

        Ok(())
    }

    async fn check_source(
        &self,
        source: &Arc<dyn DiagnosticSource>,
        previous: &HashMap<ProjectOrDocumentId, PreviousPullResult>,
        sink: &mut ReportSink,
    ) -> Result<(), PullError> {
        let source_id = source.id();
        let project = source.project().id();
        let solution = self.ctx.solution();
        let global = self.refresher.global_state_version();

        let outcome = self
            .cache
            .get_or_compute_new_data(
                previous,
                source_id,
                || async { (global, solution.dependent_version(project)) },
                || async { (global, solution.dependent_checksum(project)) },
                || compute_diagnostics(source.clone(), self.ctx.clone()),
            )
            .await?;

        let (result_id, diagnostics) = match outcome {
            CacheOutcome::Updated { result_id, data } => (result_id, data),
            // Report nothing for the source this round; the id is unknown to
            // the cache, so the next pull retries.
            CacheOutcome::Failed { result_id } => (result_id, Vec::new()),
            CacheOutcome::Unchanged => {
                if !self.report_unchanged {
                    return Ok(());
                }
                // The cache only reports unchanged when the client holds its id.
                if let Some(prev) = previous.get(&source_id) {
                    sink.emit(PullReport::Unchanged {
                        uri: source.uri().clone(),
                        version: source.lsp_version(),
                        result_id: prev.result_id.clone(),
                    })
                    .await;
                }
                return Ok(());
            }
        };

        tracing::debug!(
            category = self.ctx.category(),
            source = %source_id,
            %result_id,
            count = diagnostics.len(),
            "Reporting new diagnostics"
        );
        sink.emit(PullReport::Updated {
            uri: source.uri().clone(),
            version: source.lsp_version(),
            diagnostics,
            result_id,
        })
        .await;
        Ok(())
    }
}

fn check_cancelled(ctx: &RequestContext) -> Result<(), PullError> {
    if ctx.is_cancelled() {
        return Err(PullError::Cancelled);
    }
    Ok(())
}

/// Await `fut` unless the request is cancelled first.
async fn cancellable<T>(ctx: &RequestContext, fut: impl Future<Output = T>) -> Result<T, PullError> {
    tokio::select! {
        biased;
        () = ctx.cancel().cancelled() => Err(PullError::Cancelled),
        value = fut => Ok(value),
    }
}

/// Run one source on its own task.
///
/// Output of sources that are not live is marked build-only. `Ok(None)` for a
/// failing or panicking source; only cancellation fails the request.
async fn compute_diagnostics(
    source: Arc<dyn DiagnosticSource>,
    ctx: Arc<RequestContext>,
) -> Result<Option<Vec<Diagnostic>>, PullError> {
    let source_id = source.id();
    let live = source.is_live_source();
    let task_ctx = ctx.clone();
    let mut task = tokio::spawn(async move { source.diagnostics(&task_ctx).await });

    tokio::select! {
        biased;
        () = ctx.cancel().cancelled() => {
            task.abort();
            Err(PullError::Cancelled)
        }
        joined = &mut task => match joined {
            Ok(Ok(diagnostics)) if live => Ok(Some(diagnostics)),
            Ok(Ok(diagnostics)) => Ok(Some(
                diagnostics.into_iter().map(Diagnostic::into_build_only).collect(),
            )),
            Ok(Err(err)) => {
                tracing::warn!(category = ctx.category(), source = %source_id, "{err}");
                Ok(None)
            }
            Err(err) => {
                tracing::warn!(
                    category = ctx.category(),
                    source = %source_id,
                    "Diagnostic source task failed: {err}"
                );
                Ok(None)
            }
        },
    }
}
