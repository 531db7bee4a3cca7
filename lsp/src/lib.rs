//! Pull-diagnostics engine and LSP server.
//!
//! Clients ask for diagnostics per document (`textDocument/diagnostic`) or for
//! the whole workspace (`workspace/diagnostic`), passing the result ids they
//! already hold. The engine answers with updated, unchanged or removed
//! reports, recomputing only sources whose versions moved.
//!
//! ```text
//! Server -> DiagnosticsService -> {Document,Workspace}PullHandler
//!                                     |-> DiagnosticSourceProvider -> DiagnosticSource
//!                                     '-> VersionedPullCache (per category)
//! Refresher -> RefreshQueue -> workspace/diagnostic/refresh + long-poll wakeups
//! ```

pub mod cache;
pub mod checksum;
pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod lint;
pub mod protocol;
pub mod refresh;
pub mod report;
pub mod server;
pub mod service;
pub mod source;
pub mod workspace;

pub use cache::{CacheOutcome, VersionedPullCache};
pub use checksum::Checksum;
pub use config::{AnalysisScope, ConfigError, LintConfig, ServerConfig, config_path};
pub use error::{PullError, SourceError, WorkspaceError};
pub use event::ReleaseAllAutoResetEvent;
pub use handler::{
    DocumentPullHandler, DocumentPullRequest, WorkspacePullHandler, WorkspacePullOptions,
    WorkspacePullRequest,
};
pub use lint::{LintSourceProvider, lint_text};
pub use refresh::{RefreshQueue, Refresher};
pub use report::{PreviousPullResult, PullReport, ReportSink};
pub use server::{Server, ServerExit};
pub use service::DiagnosticsService;
pub use source::{DiagnosticSource, DiagnosticSourceProvider, RequestContext, SourceScope};
pub use workspace::{Document, Project, Solution, Workspace, WorkspaceChange};
