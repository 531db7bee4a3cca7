//! LSP wire types for pull diagnostics and the mapping from [`PullReport`].

use diagpull_types::{DEFAULT_CATEGORY, Diagnostic, Range, ResultId};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::report::{PreviousPullResult, PullReport};
use crate::workspace::parse_uri;

pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;
pub const SERVER_NOT_INITIALIZED: i64 = -32002;
pub const REQUEST_CANCELLED: i64 = -32800;

#[derive(Debug, Serialize)]
pub struct Request {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Request {
    pub fn new(
        id: impl Into<serde_json::Value>,
        method: &'static str,
        params: Option<serde_json::Value>,
    ) -> Self {
        Self {
            jsonrpc: "2.0",
            id: id.into(),
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Notification {
    pub jsonrpc: &'static str,
    pub method: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl Notification {
    pub fn new(method: &'static str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
}

/// Exactly one of `result` and `error` is present.
#[derive(Debug, Serialize)]
pub struct Response {
    pub jsonrpc: &'static str,
    pub id: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
}

impl Response {
    pub fn ok(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn err(id: serde_json::Value, code: i64, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            result: None,
            error: Some(ResponseError {
                code,
                message: message.into(),
            }),
        }
    }
}

// Incoming params. Unknown fields are ignored.

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentIdentifier {
    pub uri: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextDocumentItem {
    pub uri: String,
    pub version: i32,
    pub text: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidOpenParams {
    pub text_document: TextDocumentItem,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedTextDocumentIdentifier {
    pub uri: String,
    pub version: i32,
}

#[derive(Debug, Deserialize)]
pub struct ContentChange {
    pub text: String,
}

/// Full-text sync only: the last change carries the whole document.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidChangeParams {
    pub text_document: VersionedTextDocumentIdentifier,
    pub content_changes: Vec<ContentChange>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DidCloseParams {
    pub text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
pub struct DidChangeConfigurationParams {
    #[serde(default)]
    pub settings: serde_json::Value,
}

impl DidChangeConfigurationParams {
    /// The lint table, under `diagpull.lint` or top-level `lint`.
    #[must_use]
    pub fn lint_settings(&self) -> Option<&serde_json::Value> {
        self.settings
            .pointer("/diagpull/lint")
            .or_else(|| self.settings.get("lint"))
    }
}

#[derive(Debug, Deserialize)]
pub struct CancelParams {
    pub id: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDiagnosticParams {
    pub text_document: TextDocumentIdentifier,
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub previous_result_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct PreviousResultId {
    pub uri: String,
    pub value: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceDiagnosticParams {
    #[serde(default)]
    pub identifier: Option<String>,
    #[serde(default)]
    pub previous_result_ids: Vec<PreviousResultId>,
    #[serde(default)]
    pub partial_result_token: Option<serde_json::Value>,
}

impl WorkspaceDiagnosticParams {
    /// Previous results with parseable uris. Others are dropped with a warning;
    /// the client re-learns them from the next full report.
    #[must_use]
    pub fn previous_results(&self) -> Vec<PreviousPullResult> {
        self.previous_result_ids
            .iter()
            .filter_map(|prev| match parse_uri(&prev.uri) {
                Ok(uri) => Some(PreviousPullResult {
                    uri,
                    result_id: ResultId::new(prev.value.clone()),
                }),
                Err(err) => {
                    tracing::warn!("Ignoring previous result: {err}");
                    None
                }
            })
            .collect()
    }
}

// Outgoing reports.

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LspDiagnostic {
    pub range: Range,
    pub severity: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub source: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<LspDiagnosticData>,
}

/// Carried in a diagnostic's `data` field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LspDiagnosticData {
    pub build_only: bool,
}

impl From<&Diagnostic> for LspDiagnostic {
    fn from(diag: &Diagnostic) -> Self {
        Self {
            range: diag.range(),
            severity: diag.severity().to_lsp(),
            code: diag.code().map(String::from),
            source: diag.source().to_string(),
            message: diag.message().to_string(),
            data: diag
                .is_build_only()
                .then_some(LspDiagnosticData { build_only: true }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DocumentDiagnosticReport {
    Full {
        #[serde(rename = "resultId", skip_serializing_if = "Option::is_none")]
        result_id: Option<String>,
        items: Vec<LspDiagnostic>,
    },
    Unchanged {
        #[serde(rename = "resultId")]
        result_id: String,
    },
}

impl From<PullReport> for DocumentDiagnosticReport {
    fn from(report: PullReport) -> Self {
        match report {
            PullReport::Updated {
                diagnostics,
                result_id,
                ..
            } => Self::Full {
                result_id: Some(result_id.as_str().to_string()),
                items: diagnostics.iter().map(LspDiagnostic::from).collect(),
            },
            PullReport::Unchanged { result_id, .. } => Self::Unchanged {
                result_id: result_id.as_str().to_string(),
            },
            // An empty full report without a result id clears the client.
            PullReport::Removed { .. } => Self::Full {
                result_id: None,
                items: Vec::new(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkspaceDocumentDiagnosticReport {
    pub uri: Url,
    /// Serialized as `null` when unknown.
    pub version: Option<i32>,
    #[serde(flatten)]
    pub report: DocumentDiagnosticReport,
}

impl From<PullReport> for WorkspaceDocumentDiagnosticReport {
    fn from(report: PullReport) -> Self {
        let uri = report.uri().clone();
        let version = match &report {
            PullReport::Updated { version, .. } | PullReport::Unchanged { version, .. } => *version,
            PullReport::Removed { .. } => None,
        };
        Self {
            uri,
            version,
            report: report.into(),
        }
    }
}

/// Also the shape of a `$/progress` partial result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkspaceDiagnosticReport {
    pub items: Vec<WorkspaceDocumentDiagnosticReport>,
}

impl FromIterator<PullReport> for WorkspaceDiagnosticReport {
    fn from_iter<I: IntoIterator<Item = PullReport>>(iter: I) -> Self {
        Self {
            items: iter.into_iter().map(Into::into).collect(),
        }
    }
}

pub fn progress_params(token: &serde_json::Value, value: &impl Serialize) -> serde_json::Value {
    serde_json::json!({
        "token": token,
        "value": value,
    })
}

pub fn initialize_result() -> serde_json::Value {
    serde_json::json!({
        "capabilities": {
            "textDocumentSync": {
                "openClose": true,
                "change": 1
            },
            "diagnosticProvider": {
                "identifier": DEFAULT_CATEGORY,
                "interFileDependencies": true,
                "workspaceDiagnostics": true
            }
        },
        "serverInfo": {
            "name": "diagpull",
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Whether the client accepts `workspace/diagnostic/refresh`.
pub fn client_supports_refresh(initialize_params: &serde_json::Value) -> bool {
    initialize_params
        .pointer("/capabilities/workspace/diagnostics/refreshSupport")
        .and_then(serde_json::Value::as_bool)
        .unwrap_or(false)
}
