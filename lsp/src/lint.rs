//! Built-in line rules and the diagnostic sources that run them.

use std::sync::{Arc, PoisonError, RwLock};

use diagpull_types::{Diagnostic, DiagnosticSeverity, Position, ProjectOrDocumentId, Range};
use url::Url;

use crate::config::{AnalysisScope, LintConfig};
use crate::error::SourceError;
use crate::source::{
    DiagnosticSource, DiagnosticSourceProvider, RequestContext, SourceFut, SourceScope,
};
use crate::workspace::{Document, Project};

/// `source` field of every diagnostic produced here.
pub const LINT_SOURCE_NAME: &str = "diagpull";

/// LSP positions count UTF-16 code units.
fn utf16_len(s: &str) -> u32 {
    s.encode_utf16().count() as u32
}

/// Run the configured line rules over `text`.
#[must_use]
pub fn lint_text(text: &str, config: &LintConfig) -> Vec<Diagnostic> {
    let mut out = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line_no = line_no as u32;
        let line_len = utf16_len(line);

        if config.trailing_whitespace {
            let trimmed = line.trim_end();
            if trimmed.len() < line.len() {
                out.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Warning,
                        Range::on_line(line_no, utf16_len(trimmed), line_len),
                        "trailing whitespace",
                        LINT_SOURCE_NAME,
                    )
                    .with_code("trailing-whitespace"),
                );
            }
        }

        if let Some(max) = config.max_line_length
            && line_len > max
        {
            out.push(
                Diagnostic::new(
                    DiagnosticSeverity::Information,
                    Range::on_line(line_no, max, line_len),
                    format!("line is {line_len} characters long (max {max})"),
                    LINT_SOURCE_NAME,
                )
                .with_code("line-too-long"),
            );
        }

        for marker in config.todo_markers.iter().filter(|m| !m.is_empty()) {
            if let Some(byte_pos) = line.find(marker.as_str()) {
                let start = utf16_len(&line[..byte_pos]);
                out.push(
                    Diagnostic::new(
                        DiagnosticSeverity::Hint,
                        Range::on_line(line_no, start, start + utf16_len(marker)),
                        format!("{marker} marker"),
                        LINT_SOURCE_NAME,
                    )
                    .with_code("todo"),
                );
            }
        }
    }

    out
}

/// Line rules over one document.
pub struct DocumentLintSource {
    project: Arc<Project>,
    document: Arc<Document>,
    config: Arc<LintConfig>,
}

impl DocumentLintSource {
    #[must_use]
    pub fn new(project: Arc<Project>, document: Arc<Document>, config: Arc<LintConfig>) -> Self {
        Self {
            project,
            document,
            config,
        }
    }
}

impl DiagnosticSource for DocumentLintSource {
    fn id(&self) -> ProjectOrDocumentId {
        ProjectOrDocumentId::Document(self.document.id())
    }

    fn project(&self) -> &Arc<Project> {
        &self.project
    }

    fn uri(&self) -> &Url {
        self.document.uri()
    }

    fn lsp_version(&self) -> Option<i32> {
        self.document.lsp_version()
    }

    fn diagnostics<'a>(
        &'a self,
        _ctx: &'a RequestContext,
    ) -> SourceFut<'a, Result<Vec<Diagnostic>, SourceError>> {
        Box::pin(async move { Ok(lint_text(self.document.text(), &self.config)) })
    }
}

/// Project-level checks.
pub struct ProjectLintSource {
    project: Arc<Project>,
}

impl ProjectLintSource {
    #[must_use]
    pub fn new(project: Arc<Project>) -> Self {
        Self { project }
    }
}

impl DiagnosticSource for ProjectLintSource {
    fn id(&self) -> ProjectOrDocumentId {
        ProjectOrDocumentId::Project(self.project.id())
    }

    fn project(&self) -> &Arc<Project> {
        &self.project
    }

    fn uri(&self) -> &Url {
        self.project.root()
    }

    fn diagnostics<'a>(
        &'a self,
        _ctx: &'a RequestContext,
    ) -> SourceFut<'a, Result<Vec<Diagnostic>, SourceError>> {
        Box::pin(async move {
            if self.project.documents().next().is_some() {
                return Ok(Vec::new());
            }
            Ok(vec![
                Diagnostic::new(
                    DiagnosticSeverity::Information,
                    Range::new(Position::default(), Position::default()),
                    format!("project '{}' contains no documents", self.project.name()),
                    LINT_SOURCE_NAME,
                )
                .with_code("empty-project"),
            ])
        })
    }
}

/// Provider for the default category.
///
/// Workspace requests list open documents first, then closed ones, then one
/// source per project.
pub struct LintSourceProvider {
    config: RwLock<Arc<LintConfig>>,
}

impl LintSourceProvider {
    #[must_use]
    pub fn new(config: LintConfig) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
        }
    }

    #[must_use]
    pub fn config(&self) -> Arc<LintConfig> {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replace the options. Returns whether anything changed.
    pub fn set_config(&self, config: LintConfig) -> bool {
        let mut guard = self.config.write().unwrap_or_else(PoisonError::into_inner);
        if **guard == config {
            return false;
        }
        *guard = Arc::new(config);
        true
    }
}

impl DiagnosticSourceProvider for LintSourceProvider {
    fn create_ordered_sources<'a>(
        &'a self,
        scope: SourceScope,
        ctx: &'a RequestContext,
    ) -> SourceFut<'a, Vec<Arc<dyn DiagnosticSource>>> {
        Box::pin(async move {
            let config = self.config();
            let solution = ctx.solution();

            let document_source = |document: &Arc<Document>| -> Option<Arc<dyn DiagnosticSource>> {
                let project = solution.project(document.id().project())?;
                Some(Arc::new(DocumentLintSource::new(
                    project.clone(),
                    document.clone(),
                    config.clone(),
                )))
            };

            match scope {
                SourceScope::Document(id) => solution
                    .document(id)
                    .and_then(document_source)
                    .into_iter()
                    .collect(),
                SourceScope::Workspace => {
                    let open_only = config.analysis_scope == AnalysisScope::OpenDocuments;
                    let mut documents: Vec<&Arc<Document>> = solution
                        .documents()
                        .filter(|doc| !open_only || doc.is_open())
                        .collect();
                    documents.sort_by(|a, b| {
                        b.is_open()
                            .cmp(&a.is_open())
                            .then_with(|| a.uri().as_str().cmp(b.uri().as_str()))
                    });

                    let mut sources: Vec<Arc<dyn DiagnosticSource>> =
                        documents.into_iter().filter_map(document_source).collect();
                    if open_only {
                        return sources;
                    }
                    sources.extend(
                        solution
                            .projects()
                            .filter(|p| Some(p.id()) != solution.misc_project())
                            .map(|p| {
                                Arc::new(ProjectLintSource::new(p.clone()))
                                    as Arc<dyn DiagnosticSource>
                            }),
                    );
                    sources
                }
            }
        })
    }
}
