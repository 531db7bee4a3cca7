//! JSON-RPC server loop: reads client frames, drives the diagnostics service,
//! writes responses and notifications.
//!
//! Pull requests run on their own tasks so a parked workspace request never
//! blocks the loop; `$/cancelRequest` cancels them through their token.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use diagpull_types::ResultId;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{FrameReader, FrameWriter};
use crate::config::{LintConfig, ServerConfig};
use crate::error::PullError;
use crate::handler::{DocumentPullRequest, WorkspacePullRequest};
use crate::protocol::{
    self, CancelParams, DidChangeConfigurationParams, DidChangeParams, DidCloseParams,
    DidOpenParams, DocumentDiagnosticParams, DocumentDiagnosticReport, Notification, Request,
    Response, WorkspaceDiagnosticParams, WorkspaceDiagnosticReport,
};
use crate::report::{PullReport, ReportSink};
use crate::service::DiagnosticsService;
use crate::workspace::parse_uri;

const OUTGOING_CHANNEL_CAPACITY: usize = 64;

const PROGRESS_CHANNEL_CAPACITY: usize = 16;

const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

enum IncomingFrame {
    Request {
        id: serde_json::Value,
        method: String,
        params: serde_json::Value,
    },
    Notification {
        method: String,
        params: serde_json::Value,
    },
    /// Reply to one of our own requests.
    Response { id: serde_json::Value },
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let params = frame
        .get("params")
        .cloned()
        .unwrap_or(serde_json::Value::Null);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id), None, true) => Some(IncomingFrame::Response { id: id.clone() }),
        (Some(id), Some(method), _) => Some(IncomingFrame::Request {
            id: id.clone(),
            method,
            params,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification { method, params }),
        _ => None,
    }
}

/// How the session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerExit {
    /// `shutdown` arrived before the connection ended.
    pub shutdown_requested: bool,
}

/// Cancellation tokens of running requests, keyed by request id.
#[derive(Default)]
struct InFlight {
    tokens: Mutex<HashMap<String, CancellationToken>>,
}

impl InFlight {
    fn key(id: &serde_json::Value) -> String {
        id.to_string()
    }

    fn register(&self, id: &serde_json::Value) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(Self::key(id), token.clone());
        token
    }

    fn finish(&self, id: &serde_json::Value) {
        self.tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&Self::key(id));
    }

    fn cancel(&self, id: &serde_json::Value) -> bool {
        let token = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&Self::key(id))
            .cloned();
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    fn cancel_all(&self) {
        let tokens: Vec<CancellationToken> = self
            .tokens
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, t)| t)
            .collect();
        for token in tokens {
            token.cancel();
        }
    }
}

async fn send(outgoing: &mpsc::Sender<serde_json::Value>, msg: &impl Serialize) {
    let frame = match serde_json::to_value(msg) {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!("Failed to serialize outgoing message: {e}");
            return;
        }
    };
    if outgoing.send(frame).await.is_err() {
        tracing::debug!("Writer closed; outgoing message dropped");
    }
}

fn ok_response(id: serde_json::Value, result: &impl Serialize) -> Response {
    match serde_json::to_value(result) {
        Ok(value) => Response::ok(id, value),
        Err(e) => Response::err(id, protocol::INTERNAL_ERROR, e.to_string()),
    }
}

fn error_response(id: serde_json::Value, err: &PullError) -> Response {
    let code = match err {
        PullError::Cancelled => protocol::REQUEST_CANCELLED,
        PullError::UnknownCategory(_) | PullError::Workspace(_) => protocol::INVALID_PARAMS,
    };
    Response::err(id, code, err.to_string())
}

#[derive(PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

struct Session {
    service: Arc<DiagnosticsService>,
    outgoing: mpsc::Sender<serde_json::Value>,
    in_flight: Arc<InFlight>,
    refresh_supported: Arc<AtomicBool>,
    initialized: bool,
    shutdown_requested: bool,
}

impl Session {
    async fn dispatch(&mut self, frame: &serde_json::Value) -> Flow {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!("Ignoring malformed JSON-RPC frame");
            return Flow::Continue;
        };
        match incoming {
            IncomingFrame::Request { id, method, params } => {
                self.handle_request(id, &method, params).await;
                Flow::Continue
            }
            IncomingFrame::Notification { method, params } => {
                self.handle_notification(&method, params)
            }
            IncomingFrame::Response { id } => {
                tracing::trace!("Client answered request {id}");
                Flow::Continue
            }
        }
    }

    async fn reply(&self, response: Response) {
        send(&self.outgoing, &response).await;
    }

    async fn handle_request(&mut self, id: serde_json::Value, method: &str, params: serde_json::Value) {
        if self.shutdown_requested {
            self.reply(Response::err(id, protocol::INVALID_REQUEST, "server is shutting down"))
                .await;
            return;
        }

        match method {
            "initialize" if self.initialized => {
                self.reply(Response::err(id, protocol::INVALID_REQUEST, "already initialized"))
                    .await;
            }
            "initialize" => {
                let refresh = protocol::client_supports_refresh(&params);
                self.refresh_supported.store(refresh, Ordering::SeqCst);
                self.initialized = true;
                tracing::info!(refresh_support = refresh, "Client initialized");
                self.reply(Response::ok(id, protocol::initialize_result()))
                    .await;
            }
            _ if !self.initialized => {
                self.reply(Response::err(
                    id,
                    protocol::SERVER_NOT_INITIALIZED,
                    "server not initialized",
                ))
                .await;
            }
            "shutdown" => {
                tracing::info!("Shutdown requested");
                self.shutdown_requested = true;
                self.in_flight.cancel_all();
                self.reply(Response::ok(id, serde_json::Value::Null)).await;
            }
            "textDocument/diagnostic" => self.spawn_document_pull(id, params).await,
            "workspace/diagnostic" => self.spawn_workspace_pull(id, params).await,
            _ => {
                tracing::debug!("Unsupported request: {method}");
                self.reply(Response::err(
                    id,
                    protocol::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                ))
                .await;
            }
        }
    }

    async fn spawn_document_pull(&self, id: serde_json::Value, params: serde_json::Value) {
        let params: DocumentDiagnosticParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                self.reply(Response::err(id, protocol::INVALID_PARAMS, e.to_string()))
                    .await;
                return;
            }
        };
        let uri = match parse_uri(&params.text_document.uri) {
            Ok(uri) => uri,
            Err(e) => {
                self.reply(Response::err(id, protocol::INVALID_PARAMS, e.to_string()))
                    .await;
                return;
            }
        };
        let request = DocumentPullRequest {
            uri,
            previous_result_id: params.previous_result_id.map(ResultId::new),
            category: params.identifier,
        };

        let cancel = self.in_flight.register(&id);
        let service = self.service.clone();
        let outgoing = self.outgoing.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let result = service.pull_document(&request, cancel).await;
            in_flight.finish(&id);
            let response = match result {
                Ok(report) => ok_response(id, &DocumentDiagnosticReport::from(report)),
                Err(err) => error_response(id, &err),
            };
            send(&outgoing, &response).await;
        });
    }

    async fn spawn_workspace_pull(&self, id: serde_json::Value, params: serde_json::Value) {
        let params: WorkspaceDiagnosticParams = match serde_json::from_value(params) {
            Ok(params) => params,
            Err(e) => {
                self.reply(Response::err(id, protocol::INVALID_PARAMS, e.to_string()))
                    .await;
                return;
            }
        };
        let request = WorkspacePullRequest {
            previous_results: params.previous_results(),
            category: params.identifier.clone(),
        };

        let (sink, progress) = match params.partial_result_token {
            Some(token) => {
                let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
                let forwarder = spawn_progress_forwarder(token, rx, self.outgoing.clone());
                (ReportSink::streaming(tx), Some(forwarder))
            }
            None => (ReportSink::collecting(), None),
        };

        let cancel = self.in_flight.register(&id);
        let service = self.service.clone();
        let outgoing = self.outgoing.clone();
        let in_flight = self.in_flight.clone();
        tokio::spawn(async move {
            let mut sink = sink;
            let result = service.pull_workspace(&request, cancel, &mut sink).await;
            // Dropping the sink closes the progress stream; flush it before
            // the final response.
            let reports = sink.into_reports();
            if let Some(progress) = progress
                && let Err(e) = progress.await
            {
                tracing::warn!("Progress forwarder failed: {e}");
            }
            in_flight.finish(&id);

            let response = match result {
                Ok(()) => ok_response(
                    id,
                    &reports.into_iter().collect::<WorkspaceDiagnosticReport>(),
                ),
                Err(err) => error_response(id, &err),
            };
            send(&outgoing, &response).await;
        });
    }

    fn handle_notification(&mut self, method: &str, params: serde_json::Value) -> Flow {
        if method == "exit" {
            tracing::info!("Exit notification received");
            return Flow::Exit;
        }
        if !self.initialized {
            tracing::debug!("Dropping {method} before initialize");
            return Flow::Continue;
        }

        let workspace = self.service.workspace();
        let outcome: Result<(), String> = match method {
            "initialized" => Ok(()),
            "$/cancelRequest" => serde_json::from_value::<CancelParams>(params)
                .map(|p| {
                    if !self.in_flight.cancel(&p.id) {
                        tracing::trace!("Cancel for unknown request {}", p.id);
                    }
                })
                .map_err(|e| e.to_string()),
            "textDocument/didOpen" => serde_json::from_value::<DidOpenParams>(params)
                .map_err(|e| e.to_string())
                .and_then(|p| {
                    let doc = p.text_document;
                    let uri = parse_uri(&doc.uri).map_err(|e| e.to_string())?;
                    workspace
                        .open_document(uri, &doc.text, Some(doc.version))
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }),
            "textDocument/didChange" => serde_json::from_value::<DidChangeParams>(params)
                .map_err(|e| e.to_string())
                .and_then(|p| {
                    let uri = parse_uri(&p.text_document.uri).map_err(|e| e.to_string())?;
                    let Some(change) = p.content_changes.last() else {
                        return Ok(());
                    };
                    workspace
                        .change_document(&uri, &change.text, Some(p.text_document.version))
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }),
            "textDocument/didClose" => serde_json::from_value::<DidCloseParams>(params)
                .map_err(|e| e.to_string())
                .and_then(|p| {
                    let uri = parse_uri(&p.text_document.uri).map_err(|e| e.to_string())?;
                    workspace
                        .close_document(&uri)
                        .map(|_| ())
                        .map_err(|e| e.to_string())
                }),
            "workspace/didChangeConfiguration" => {
                serde_json::from_value::<DidChangeConfigurationParams>(params)
                    .map_err(|e| e.to_string())
                    .and_then(|p| {
                        let Some(lint) = p.lint_settings() else {
                            return Ok(());
                        };
                        let config = serde_json::from_value::<LintConfig>(lint.clone())
                            .map_err(|e| e.to_string())?;
                        self.service.set_lint_config(config);
                        Ok(())
                    })
            }
            _ => {
                tracing::trace!("Ignoring notification: {method}");
                Ok(())
            }
        };

        if let Err(e) = outcome {
            tracing::warn!("Failed to handle {method}: {e}");
        }
        Flow::Continue
    }
}

fn spawn_progress_forwarder(
    token: serde_json::Value,
    mut reports: mpsc::Receiver<PullReport>,
    outgoing: mpsc::Sender<serde_json::Value>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(report) = reports.recv().await {
            let value: WorkspaceDiagnosticReport = std::iter::once(report).collect();
            let note = Notification::new(
                "$/progress",
                Some(protocol::progress_params(&token, &value)),
            );
            send(&outgoing, &note).await;
        }
    })
}

fn spawn_refresh_forwarder(
    mut notifications: mpsc::Receiver<()>,
    outgoing: mpsc::Sender<serde_json::Value>,
    refresh_supported: Arc<AtomicBool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut next_id: u64 = 0;
        while notifications.recv().await.is_some() {
            if !refresh_supported.load(Ordering::SeqCst) {
                tracing::trace!("Client lacks refresh support; refresh not sent");
                continue;
            }
            next_id += 1;
            let request = Request::new(
                format!("diagpull/refresh/{next_id}"),
                "workspace/diagnostic/refresh",
                None,
            );
            send(&outgoing, &request).await;
        }
    })
}

pub struct Server {
    service: Arc<DiagnosticsService>,
    config: ServerConfig,
}

impl Server {
    #[must_use]
    pub fn new(config: ServerConfig) -> Self {
        Self {
            service: Arc::new(DiagnosticsService::new(&config)),
            config,
        }
    }

    #[must_use]
    pub fn service(&self) -> &Arc<DiagnosticsService> {
        &self.service
    }

    /// Serve one client until `exit` or end of input.
    pub async fn run<R, W>(self, input: R, output: W) -> Result<ServerExit>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (outgoing, mut outgoing_rx) =
            mpsc::channel::<serde_json::Value>(OUTGOING_CHANNEL_CAPACITY);
        let writer_handle = tokio::spawn(async move {
            let mut writer = FrameWriter::new(output);
            while let Some(frame) = outgoing_rx.recv().await {
                if let Err(e) = writer.write_frame(&frame).await {
                    tracing::warn!("Write error: {e:#}");
                    break;
                }
            }
        });

        let (queue, notifications) = self
            .service
            .spawn_refresh_queue(self.config.refresh_debounce());
        let refresh_supported = Arc::new(AtomicBool::new(false));
        let refresh_forwarder =
            spawn_refresh_forwarder(notifications, outgoing.clone(), refresh_supported.clone());

        let mut session = Session {
            service: self.service.clone(),
            outgoing,
            in_flight: Arc::new(InFlight::default()),
            refresh_supported,
            initialized: false,
            shutdown_requested: false,
        };

        let mut reader = FrameReader::new(input);
        loop {
            match reader.read_frame().await {
                Ok(Some(frame)) => {
                    if session.dispatch(&frame).await == Flow::Exit {
                        break;
                    }
                }
                Ok(None) => {
                    tracing::info!("Client closed the connection");
                    break;
                }
                Err(e) => {
                    tracing::warn!("Read error: {e:#}");
                    break;
                }
            }
        }

        session.in_flight.cancel_all();
        refresh_forwarder.abort();
        drop(queue);
        let exit = ServerExit {
            shutdown_requested: session.shutdown_requested,
        };
        drop(session);

        // Request tasks still holding a sender finish with a cancelled reply.
        match tokio::time::timeout(Duration::from_secs(SHUTDOWN_TIMEOUT_SECS), writer_handle).await
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Writer task failed: {e}"),
            Err(_) => tracing::warn!("Writer did not drain within {SHUTDOWN_TIMEOUT_SECS}s"),
        }
        Ok(exit)
    }
}
