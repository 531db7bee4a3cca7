//! Protocol-neutral pull reports and the sink handlers emit them into.

use diagpull_types::{Diagnostic, ResultId};
use tokio::sync::mpsc;
use url::Url;

/// What the client says it already holds for one identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviousPullResult {
    pub uri: Url,
    pub result_id: ResultId,
}

/// One entry of a pull response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PullReport {
    /// New diagnostics under a fresh result id.
    Updated {
        uri: Url,
        version: Option<i32>,
        diagnostics: Vec<Diagnostic>,
        result_id: ResultId,
    },
    /// The client's diagnostics for `uri` are still current.
    Unchanged {
        uri: Url,
        version: Option<i32>,
        result_id: ResultId,
    },
    /// The client should drop everything it has for `uri`.
    Removed { uri: Url },
}

impl PullReport {
    #[must_use]
    pub fn uri(&self) -> &Url {
        match self {
            Self::Updated { uri, .. } | Self::Unchanged { uri, .. } | Self::Removed { uri } => uri,
        }
    }

    #[must_use]
    pub fn result_id(&self) -> Option<&ResultId> {
        match self {
            Self::Updated { result_id, .. } | Self::Unchanged { result_id, .. } => Some(result_id),
            Self::Removed { .. } => None,
        }
    }

    /// Whether the client has to do anything with this report.
    #[must_use]
    pub fn is_change(&self) -> bool {
        !matches!(self, Self::Unchanged { .. })
    }
}

/// Receives reports in emission order.
///
/// A collecting sink keeps them for the final response; a streaming sink
/// forwards each one as soon as it exists (partial results).
pub struct ReportSink {
    reports: Vec<PullReport>,
    progress: Option<mpsc::Sender<PullReport>>,
    emitted: usize,
    changes: usize,
}

impl ReportSink {
    #[must_use]
    pub fn collecting() -> Self {
        Self {
            reports: Vec::new(),
            progress: None,
            emitted: 0,
            changes: 0,
        }
    }

    #[must_use]
    pub fn streaming(progress: mpsc::Sender<PullReport>) -> Self {
        Self {
            progress: Some(progress),
            ..Self::collecting()
        }
    }

    pub async fn emit(&mut self, report: PullReport) {
        self.emitted += 1;
        if report.is_change() {
            self.changes += 1;
        }
        match &self.progress {
            Some(tx) => {
                if tx.send(report).await.is_err() {
                    tracing::debug!("Progress receiver dropped; report discarded");
                }
            }
            None => self.reports.push(report),
        }
    }

    /// Reports emitted so far, streamed or not.
    #[must_use]
    pub fn emitted(&self) -> usize {
        self.emitted
    }

    /// `Updated` and `Removed` reports emitted so far.
    #[must_use]
    pub fn changes(&self) -> usize {
        self.changes
    }

    /// Collected reports. Empty for a streaming sink.
    #[must_use]
    pub fn into_reports(self) -> Vec<PullReport> {
        self.reports
    }
}
