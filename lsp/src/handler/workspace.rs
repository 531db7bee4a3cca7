use std::sync::Arc;

use dashmap::DashMap;

use super::{CategoryCaches, DiagnosticsCache, Pass, cancellable};
use crate::error::PullError;
use crate::event::ReleaseAllAutoResetEvent;
use crate::refresh::Refresher;
use crate::report::{PreviousPullResult, ReportSink};
use crate::source::{DiagnosticSourceProvider, RequestContext, SourceScope};
use crate::workspace::Workspace;

/// `workspace/diagnostic` over every source a category knows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkspacePullRequest {
    pub previous_results: Vec<PreviousPullResult>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub struct WorkspacePullOptions {
    /// Park a pass that changed nothing until the category's next change.
    pub long_poll: bool,
    pub report_unchanged: bool,
}

impl Default for WorkspacePullOptions {
    fn default() -> Self {
        Self {
            long_poll: true,
            report_unchanged: false,
        }
    }
}

pub struct WorkspacePullHandler {
    refresher: Arc<Refresher>,
    /// Live workspace, consulted before evicting cache entries.
    workspace: Arc<Workspace>,
    caches: CategoryCaches,
    changed: DashMap<String, Arc<ReleaseAllAutoResetEvent>>,
    options: WorkspacePullOptions,
}

impl WorkspacePullHandler {
    #[must_use]
    pub fn new(
        refresher: Arc<Refresher>,
        workspace: Arc<Workspace>,
        options: WorkspacePullOptions,
    ) -> Self {
        Self {
            refresher,
            workspace,
            caches: CategoryCaches::default(),
            changed: DashMap::new(),
            options,
        }
    }

    #[must_use]
    pub fn caches(&self) -> &CategoryCaches {
        &self.caches
    }

    #[must_use]
    pub fn options(&self) -> WorkspacePullOptions {
        self.options
    }

    /// Change event for `category`, created on first use.
    #[must_use]
    pub fn changed_event(&self, category: &str) -> Arc<ReleaseAllAutoResetEvent> {
        if let Some(event) = self.changed.get(category) {
            return event.clone();
        }
        self.changed
            .entry(category.to_string())
            .or_default()
            .clone()
    }

    /// Something changed: release every parked request, in every category.
    pub fn notify_changed(&self) {
        for event in self.changed.iter() {
            event.value().set();
        }
    }

    /// Run one pass into `sink`. When long polling and the pass changed
    /// nothing, wait for the next change (or cancellation) before returning.
    pub async fn handle(
        &self,
        request: &WorkspacePullRequest,
        provider: &dyn DiagnosticSourceProvider,
        ctx: &Arc<RequestContext>,
        sink: &mut ReportSink,
    ) -> Result<(), PullError> {
        let category = ctx.category();
        // Registered before the pass so a change during it is not missed.
        let changed = self
            .options
            .long_poll
            .then(|| self.changed_event(category).wait());

        let cache = self.caches.get(category);
        let pass = Pass {
            cache: &cache,
            provider,
            refresher: &self.refresher,
            ctx,
            report_unchanged: self.options.report_unchanged,
        };
        pass.run(SourceScope::Workspace, &request.previous_results, sink)
            .await?;

        self.evict_removed(&cache, ctx);

        if let Some(changed) = changed
            && sink.changes() == 0
        {
            tracing::debug!(category, "Nothing changed; waiting for the next change");
            cancellable(ctx, changed).await?;
            tracing::debug!(category, "Woken by change");
        }
        Ok(())
    }

    /// Drop cache entries for sources the workspace no longer has. Skipped
    /// when the request ran on an outdated snapshot: a newer request may
    /// already have cached sources this one never saw.
    fn evict_removed(&self, cache: &DiagnosticsCache, ctx: &RequestContext) {
        let current = self.workspace.current();
        if !Arc::ptr_eq(ctx.solution(), &current) {
            tracing::debug!(category = ctx.category(), "Snapshot outdated; skipping eviction");
            return;
        }
        cache.retain(|id| current.contains(id));
    }
}
