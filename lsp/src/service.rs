//! The long-lived diagnostics service: one per server process.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use diagpull_types::DEFAULT_CATEGORY;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::{LintConfig, ServerConfig};
use crate::error::PullError;
use crate::handler::{
    DocumentPullHandler, DocumentPullRequest, WorkspacePullHandler, WorkspacePullOptions,
    WorkspacePullRequest,
};
use crate::lint::LintSourceProvider;
use crate::refresh::{RefreshQueue, Refresher};
use crate::report::{PullReport, ReportSink};
use crate::source::{DiagnosticSourceProvider, RequestContext};
use crate::workspace::Workspace;

pub struct DiagnosticsService {
    workspace: Arc<Workspace>,
    refresher: Arc<Refresher>,
    providers: DashMap<String, Arc<dyn DiagnosticSourceProvider>>,
    lint: Arc<LintSourceProvider>,
    documents: DocumentPullHandler,
    workspace_pulls: Arc<WorkspacePullHandler>,
}

impl DiagnosticsService {
    /// Build the service with the built-in lint provider registered under
    /// the default category.
    #[must_use]
    pub fn new(config: &ServerConfig) -> Self {
        let refresher = Arc::new(Refresher::new());
        let lint = Arc::new(LintSourceProvider::new(config.lint.clone()));
        let providers: DashMap<String, Arc<dyn DiagnosticSourceProvider>> = DashMap::new();
        providers.insert(DEFAULT_CATEGORY.to_string(), lint.clone());

        let workspace = Arc::new(Workspace::new());

        Self {
            documents: DocumentPullHandler::new(refresher.clone()),
            workspace_pulls: Arc::new(WorkspacePullHandler::new(
                refresher.clone(),
                workspace.clone(),
                WorkspacePullOptions {
                    long_poll: config.workspace_long_poll,
                    report_unchanged: config.report_unchanged_in_workspace,
                },
            )),
            workspace,
            refresher,
            providers,
            lint,
        }
    }

    #[must_use]
    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    #[must_use]
    pub fn refresher(&self) -> &Arc<Refresher> {
        &self.refresher
    }

    #[must_use]
    pub fn workspace_handler(&self) -> &Arc<WorkspacePullHandler> {
        &self.workspace_pulls
    }

    /// Register (or replace) the provider for `category`.
    pub fn register_provider(
        &self,
        category: impl Into<String>,
        provider: Arc<dyn DiagnosticSourceProvider>,
    ) {
        let category = category.into();
        tracing::info!(category = %category, "Registered diagnostic provider");
        self.providers.insert(category, provider);
    }

    #[must_use]
    pub fn categories(&self) -> Vec<String> {
        let mut categories: Vec<String> = self.providers.iter().map(|e| e.key().clone()).collect();
        categories.sort();
        categories
    }

    #[must_use]
    pub fn lint_config(&self) -> Arc<LintConfig> {
        self.lint.config()
    }

    /// Replace the lint options. A real change invalidates every cached result.
    pub fn set_lint_config(&self, config: LintConfig) -> bool {
        if !self.lint.set_config(config) {
            return false;
        }
        tracing::info!("Lint options changed");
        self.refresher.request_workspace_refresh();
        true
    }

    /// Start the queue that wakes parked workspace requests and emits
    /// debounced refresh notifications.
    pub fn spawn_refresh_queue(&self, debounce: Duration) -> (RefreshQueue, mpsc::Receiver<()>) {
        let handler = self.workspace_pulls.clone();
        RefreshQueue::spawn(
            &self.refresher,
            self.workspace.subscribe(),
            debounce,
            Arc::new(move || handler.notify_changed()),
        )
    }

    fn request_context(
        &self,
        category: Option<&str>,
        cancel: CancellationToken,
    ) -> Result<(Arc<dyn DiagnosticSourceProvider>, Arc<RequestContext>), PullError> {
        let category = category.unwrap_or(DEFAULT_CATEGORY);
        let provider = self
            .providers
            .get(category)
            .map(|p| p.value().clone())
            .ok_or_else(|| PullError::UnknownCategory(category.to_string()))?;
        let ctx = RequestContext::new(self.workspace.current(), category, cancel);
        Ok((provider, Arc::new(ctx)))
    }

    pub async fn pull_document(
        &self,
        request: &DocumentPullRequest,
        cancel: CancellationToken,
    ) -> Result<PullReport, PullError> {
        let (provider, ctx) = self.request_context(request.category.as_deref(), cancel)?;
        self.documents.handle(request, provider.as_ref(), &ctx).await
    }

    pub async fn pull_workspace(
        &self,
        request: &WorkspacePullRequest,
        cancel: CancellationToken,
        sink: &mut ReportSink,
    ) -> Result<(), PullError> {
        let (provider, ctx) = self.request_context(request.category.as_deref(), cancel)?;
        self.workspace_pulls
            .handle(request, provider.as_ref(), &ctx, sink)
            .await
    }
}
