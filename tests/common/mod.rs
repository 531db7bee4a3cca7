//! Shared test utilities and fixtures
//!
//! Service builders, a second diagnostic provider, and a framed JSON-RPC
//! client that talks to a [`Server`] over an in-memory pipe.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use diagpull_lsp::codec::{FrameReader, FrameWriter};
use diagpull_lsp::source::SourceFut;
use diagpull_lsp::{
    DiagnosticSource, DiagnosticSourceProvider, DiagnosticsService, DocumentPullRequest, Project,
    PullReport, ReportSink, RequestContext, Server, ServerConfig, ServerExit, SourceError,
    SourceScope, WorkspacePullRequest,
};
use diagpull_types::{Diagnostic, DiagnosticSeverity, ProjectOrDocumentId, Range, ResultId};
use serde_json::{Value, json};
use tokio::io::{DuplexStream, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use url::Url;

/// How long a test waits for any single frame.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub fn uri(s: &str) -> Url {
    Url::parse(s).unwrap()
}

/// Config for tests that must not park on an idle workspace pass.
pub fn no_long_poll() -> ServerConfig {
    ServerConfig {
        workspace_long_poll: false,
        ..ServerConfig::default()
    }
}

pub fn service() -> DiagnosticsService {
    DiagnosticsService::new(&no_long_poll())
}

pub async fn pull_document(
    service: &DiagnosticsService,
    uri: &Url,
    previous: Option<&ResultId>,
    category: Option<&str>,
) -> PullReport {
    let request = DocumentPullRequest {
        uri: uri.clone(),
        previous_result_id: previous.cloned(),
        category: category.map(String::from),
    };
    service
        .pull_document(&request, CancellationToken::new())
        .await
        .unwrap()
}

pub async fn pull_workspace(
    service: &DiagnosticsService,
    request: &WorkspacePullRequest,
) -> Vec<PullReport> {
    let mut sink = ReportSink::collecting();
    service
        .pull_workspace(request, CancellationToken::new(), &mut sink)
        .await
        .unwrap();
    sink.into_reports()
}

/// Result id of an `Updated` report; panics on anything else.
pub fn updated_id(report: &PullReport) -> ResultId {
    match report {
        PullReport::Updated { result_id, .. } => result_id.clone(),
        other => panic!("expected updated report, got {other:?}"),
    }
}

pub fn diagnostics_of(report: &PullReport) -> &[Diagnostic] {
    match report {
        PullReport::Updated { diagnostics, .. } => diagnostics,
        other => panic!("expected updated report, got {other:?}"),
    }
}

// A second category: flags the misspelling "teh" in every document.

pub const SPELLING: &str = "spelling";

struct SpellingSource {
    id: ProjectOrDocumentId,
    project: Arc<Project>,
    uri: Url,
    version: Option<i32>,
    text: String,
}

impl DiagnosticSource for SpellingSource {
    fn id(&self) -> ProjectOrDocumentId {
        self.id
    }

    fn project(&self) -> &Arc<Project> {
        &self.project
    }

    fn uri(&self) -> &Url {
        &self.uri
    }

    fn lsp_version(&self) -> Option<i32> {
        self.version
    }

    fn diagnostics<'a>(
        &'a self,
        _ctx: &'a RequestContext,
    ) -> SourceFut<'a, Result<Vec<Diagnostic>, SourceError>> {
        Box::pin(async move {
            let found = self
                .text
                .lines()
                .enumerate()
                .flat_map(|(line, text)| {
                    text.match_indices("teh").map(move |(col, _)| {
                        Diagnostic::new(
                            DiagnosticSeverity::Information,
                            Range::on_line(line as u32, col as u32, col as u32 + 3),
                            "possible misspelling of 'the'",
                            SPELLING,
                        )
                    })
                })
                .collect();
            Ok(found)
        })
    }
}

#[derive(Default)]
pub struct SpellingProvider;

impl DiagnosticSourceProvider for SpellingProvider {
    fn create_ordered_sources<'a>(
        &'a self,
        scope: SourceScope,
        ctx: &'a RequestContext,
    ) -> SourceFut<'a, Vec<Arc<dyn DiagnosticSource>>> {
        Box::pin(async move {
            let solution = ctx.solution();
            let mut documents: Vec<_> = match scope {
                SourceScope::Document(id) => solution.document(id).into_iter().collect(),
                SourceScope::Workspace => solution.documents().collect(),
            };
            documents.sort_by(|a, b| a.uri().as_str().cmp(b.uri().as_str()));

            documents
                .into_iter()
                .filter_map(|doc| {
                    let project = solution.project(doc.id().project())?.clone();
                    Some(Arc::new(SpellingSource {
                        id: ProjectOrDocumentId::Document(doc.id()),
                        project,
                        uri: doc.uri().clone(),
                        version: doc.lsp_version(),
                        text: doc.text().to_string(),
                    }) as Arc<dyn DiagnosticSource>)
                })
                .collect()
        })
    }
}

// Framed JSON-RPC client.

pub struct TestClient {
    writer: FrameWriter<WriteHalf<DuplexStream>>,
    reader: FrameReader<ReadHalf<DuplexStream>>,
    next_id: i64,
    /// Frames read while looking for something else.
    pending: VecDeque<Value>,
    server: JoinHandle<anyhow::Result<ServerExit>>,
}

impl TestClient {
    pub fn start(config: ServerConfig) -> Self {
        let (client_io, server_io) = tokio::io::duplex(256 * 1024);
        let (server_read, server_write) = tokio::io::split(server_io);
        let server = tokio::spawn(Server::new(config).run(server_read, server_write));

        let (client_read, client_write) = tokio::io::split(client_io);
        Self {
            writer: FrameWriter::new(client_write),
            reader: FrameReader::new(client_read),
            next_id: 0,
            pending: VecDeque::new(),
            server,
        }
    }

    /// Start a server and complete the initialize handshake.
    pub async fn initialized(config: ServerConfig, refresh_support: bool) -> Self {
        let mut client = Self::start(config);
        let id = client
            .request(
                "initialize",
                json!({
                    "processId": null,
                    "rootUri": null,
                    "capabilities": {
                        "workspace": {"diagnostics": {"refreshSupport": refresh_support}}
                    }
                }),
            )
            .await;
        let response = client.response(id).await;
        assert!(response.get("error").is_none(), "{response}");
        client.notify("initialized", json!({})).await;
        client
    }

    pub async fn request(&mut self, method: &str, params: Value) -> i64 {
        self.next_id += 1;
        let id = self.next_id;
        self.writer
            .write_frame(&json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}))
            .await
            .unwrap();
        id
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.writer
            .write_frame(&json!({"jsonrpc": "2.0", "method": method, "params": params}))
            .await
            .unwrap();
    }

    /// Answer a request the server sent us.
    pub async fn reply(&mut self, id: Value, result: Value) {
        self.writer
            .write_frame(&json!({"jsonrpc": "2.0", "id": id, "result": result}))
            .await
            .unwrap();
    }

    pub async fn open(&mut self, uri: &str, text: &str) {
        self.notify(
            "textDocument/didOpen",
            json!({"textDocument": {"uri": uri, "languageId": "plaintext", "version": 1, "text": text}}),
        )
        .await;
    }

    async fn read(&mut self) -> Value {
        tokio::time::timeout(FRAME_TIMEOUT, self.reader.read_frame())
            .await
            .expect("timed out waiting for a frame")
            .unwrap()
            .expect("server closed the stream")
    }

    /// The response to request `id`. Frames read on the way are kept for
    /// [`Self::take`].
    pub async fn response(&mut self, id: i64) -> Value {
        let is_response = |frame: &Value| frame["id"] == id && frame.get("method").is_none();
        if let Some(pos) = self.pending.iter().position(|f| is_response(f)) {
            return self.pending.remove(pos).unwrap();
        }
        loop {
            let frame = self.read().await;
            if is_response(&frame) {
                return frame;
            }
            self.pending.push_back(frame);
        }
    }

    /// The next frame with `method`, reading more if none is buffered.
    pub async fn message(&mut self, method: &str) -> Value {
        if let Some(pos) = self.pending.iter().position(|f| f["method"] == method) {
            return self.pending.remove(pos).unwrap();
        }
        loop {
            let frame = self.read().await;
            if frame["method"] == method {
                return frame;
            }
            self.pending.push_back(frame);
        }
    }

    /// Drain buffered frames with `method`, in arrival order.
    pub fn take(&mut self, method: &str) -> Vec<Value> {
        let (taken, kept): (Vec<_>, Vec<_>) =
            self.pending.drain(..).partition(|f| f["method"] == method);
        self.pending = kept.into();
        taken
    }

    pub async fn call(&mut self, method: &str, params: Value) -> Value {
        let id = self.request(method, params).await;
        self.response(id).await
    }

    /// Send `shutdown` then `exit` and wait for the server to stop.
    pub async fn shutdown(mut self) -> ServerExit {
        let response = self.call("shutdown", Value::Null).await;
        assert_eq!(response["result"], Value::Null);
        self.notify("exit", Value::Null).await;
        self.finish().await
    }

    /// Wait for the server task; the client's streams are dropped first.
    pub async fn finish(self) -> ServerExit {
        let Self { writer, reader, server, .. } = self;
        drop(writer);
        drop(reader);
        tokio::time::timeout(FRAME_TIMEOUT, server)
            .await
            .expect("server did not stop")
            .unwrap()
            .unwrap()
    }
}
