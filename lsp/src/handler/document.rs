use std::sync::Arc;

use diagpull_types::{ProjectOrDocumentId, ResultId};
use url::Url;

use super::{CategoryCaches, Pass};
use crate::error::PullError;
use crate::refresh::Refresher;
use crate::report::{PreviousPullResult, PullReport, ReportSink};
use crate::source::{DiagnosticSourceProvider, RequestContext, SourceScope};

/// `textDocument/diagnostic` for one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentPullRequest {
    pub uri: Url,
    pub previous_result_id: Option<ResultId>,
    pub category: Option<String>,
}

pub struct DocumentPullHandler {
    refresher: Arc<Refresher>,
    caches: CategoryCaches,
}

impl DocumentPullHandler {
    #[must_use]
    pub fn new(refresher: Arc<Refresher>) -> Self {
        Self {
            refresher,
            caches: CategoryCaches::default(),
        }
    }

    #[must_use]
    pub fn caches(&self) -> &CategoryCaches {
        &self.caches
    }

    /// Always produces exactly one report for the requested document.
    pub async fn handle(
        &self,
        request: &DocumentPullRequest,
        provider: &dyn DiagnosticSourceProvider,
        ctx: &Arc<RequestContext>,
    ) -> Result<PullReport, PullError> {
        let previous: Vec<PreviousPullResult> = request
            .previous_result_id
            .iter()
            .map(|result_id| PreviousPullResult {
                uri: request.uri.clone(),
                result_id: result_id.clone(),
            })
            .collect();

        let Some(ProjectOrDocumentId::Document(document)) = ctx.solution().resolve(&request.uri)
        else {
            tracing::debug!(uri = %request.uri, "Document pull for unknown document");
            return Ok(PullReport::Removed {
                uri: request.uri.clone(),
            });
        };

        let cache = self.caches.get(ctx.category());
        let pass = Pass {
            cache: &cache,
            provider,
            refresher: &self.refresher,
            ctx,
            // The response must carry something; unchanged is the cheapest.
            report_unchanged: true,
        };
        let mut sink = ReportSink::collecting();
        pass.run(SourceScope::Document(document), &previous, &mut sink)
            .await?;

        let report = sink
            .into_reports()
            .into_iter()
            .find(|report| report.uri() == &request.uri);
        Ok(report.unwrap_or(PullReport::Removed {
            uri: request.uri.clone(),
        }))
    }
}
