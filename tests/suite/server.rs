//! End-to-end exchanges with the server over framed JSON-RPC.

use std::time::Duration;

use diagpull_lsp::ServerConfig;
use diagpull_lsp::protocol::{
    INVALID_REQUEST, METHOD_NOT_FOUND, REQUEST_CANCELLED, SERVER_NOT_INITIALIZED,
};
use serde_json::{Value, json};

use crate::common::{TestClient, no_long_poll};

const A: &str = "file:///a.txt";
const B: &str = "file:///b.txt";

fn quick_refresh() -> ServerConfig {
    ServerConfig {
        refresh_debounce_ms: 20,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn requests_before_initialize_are_rejected() {
    let mut client = TestClient::start(no_long_poll());
    let response = client
        .call("textDocument/diagnostic", json!({"textDocument": {"uri": A}}))
        .await;
    assert_eq!(response["error"]["code"], SERVER_NOT_INITIALIZED);

    let exit = client.finish().await;
    assert!(!exit.shutdown_requested);
}

#[tokio::test]
async fn initialize_advertises_pull_diagnostics() {
    let mut client = TestClient::start(no_long_poll());
    let response = client
        .call("initialize", json!({"processId": null, "capabilities": {}}))
        .await;
    let provider = &response["result"]["capabilities"]["diagnosticProvider"];
    assert_eq!(provider["identifier"], "lint");
    assert_eq!(provider["workspaceDiagnostics"], true);
    assert_eq!(provider["interFileDependencies"], true);

    let again = client.call("initialize", json!({"capabilities": {}})).await;
    assert_eq!(again["error"]["code"], INVALID_REQUEST);

    let unknown = client.call("textDocument/hover", json!({})).await;
    assert_eq!(unknown["error"]["code"], METHOD_NOT_FOUND);

    assert!(client.shutdown().await.shutdown_requested);
}

#[tokio::test]
async fn document_pull_full_then_unchanged() {
    let mut client = TestClient::initialized(no_long_poll(), false).await;
    client.open(A, "hello  \n").await;

    let full = client
        .call("textDocument/diagnostic", json!({"textDocument": {"uri": A}}))
        .await;
    let result = &full["result"];
    assert_eq!(result["kind"], "full");
    assert_eq!(result["items"].as_array().unwrap().len(), 1);
    assert_eq!(result["items"][0]["code"], "trailing-whitespace");
    assert_eq!(result["items"][0]["severity"], 2);
    let result_id = result["resultId"].as_str().unwrap().to_string();

    let unchanged = client
        .call(
            "textDocument/diagnostic",
            json!({"textDocument": {"uri": A}, "previousResultId": result_id}),
        )
        .await;
    assert_eq!(
        unchanged["result"],
        json!({"kind": "unchanged", "resultId": result_id})
    );

    client
        .notify(
            "textDocument/didClose",
            json!({"textDocument": {"uri": A}}),
        )
        .await;
    let removed = client
        .call(
            "textDocument/diagnostic",
            json!({"textDocument": {"uri": A}, "previousResultId": result_id}),
        )
        .await;
    assert_eq!(removed["result"], json!({"kind": "full", "items": []}));

    assert!(client.shutdown().await.shutdown_requested);
}

#[tokio::test]
async fn workspace_pull_streams_partial_results() {
    let mut client = TestClient::initialized(no_long_poll(), false).await;
    client.open(B, "second TODO\n").await;
    client.open(A, "first\n").await;

    let response = client
        .call(
            "workspace/diagnostic",
            json!({"previousResultIds": [], "partialResultToken": "tok-1"}),
        )
        .await;
    assert_eq!(response["result"], json!({"items": []}));

    let progress = client.take("$/progress");
    assert_eq!(progress.len(), 2);
    let uris: Vec<&Value> = progress
        .iter()
        .map(|note| {
            assert_eq!(note["params"]["token"], "tok-1");
            let items = note["params"]["value"]["items"].as_array().unwrap();
            assert_eq!(items.len(), 1);
            &items[0]["uri"]
        })
        .collect();
    assert_eq!(uris, vec![A, B]);
    assert_eq!(
        progress[1]["params"]["value"]["items"][0]["items"][0]["code"],
        "todo"
    );

    assert!(client.shutdown().await.shutdown_requested);
}

#[tokio::test]
async fn workspace_pull_without_token_returns_items() {
    let mut client = TestClient::initialized(no_long_poll(), false).await;
    client.open(A, "text\n").await;

    let first = client
        .call("workspace/diagnostic", json!({"previousResultIds": []}))
        .await;
    let items = first["result"]["items"].as_array().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0]["uri"], A);
    assert_eq!(items[0]["version"], 1);
    assert_eq!(items[0]["kind"], "full");
    let result_id = items[0]["resultId"].clone();

    client
        .notify("textDocument/didClose", json!({"textDocument": {"uri": A}}))
        .await;
    let second = client
        .call(
            "workspace/diagnostic",
            json!({"previousResultIds": [{"uri": A, "value": result_id}]}),
        )
        .await;
    assert_eq!(
        second["result"],
        json!({"items": [{"uri": A, "version": null, "kind": "full", "items": []}]})
    );

    assert!(client.shutdown().await.shutdown_requested);
}

#[tokio::test]
async fn configuration_change_applies_to_next_pull() {
    let mut client = TestClient::initialized(no_long_poll(), false).await;
    client.open(A, "abcdefgh\n").await;

    let before = client
        .call("textDocument/diagnostic", json!({"textDocument": {"uri": A}}))
        .await;
    assert_eq!(before["result"]["items"], json!([]));

    client
        .notify(
            "workspace/didChangeConfiguration",
            json!({"settings": {"diagpull": {"lint": {"maxLineLength": 5}}}}),
        )
        .await;
    let previous = before["result"]["resultId"].clone();
    let after = client
        .call(
            "textDocument/diagnostic",
            json!({"textDocument": {"uri": A}, "previousResultId": previous}),
        )
        .await;
    assert_eq!(after["result"]["kind"], "full");
    assert_eq!(after["result"]["items"][0]["code"], "line-too-long");

    assert!(client.shutdown().await.shutdown_requested);
}

#[tokio::test]
async fn idle_workspace_pull_waits_for_a_change() {
    let mut client = TestClient::initialized(quick_refresh(), false).await;
    client.open(A, "text\n").await;
    // Let the open settle before any workspace request exists to be woken.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let first = client
        .call("workspace/diagnostic", json!({"previousResultIds": []}))
        .await;
    let result_id = first["result"]["items"][0]["resultId"].clone();

    let parked = client
        .request(
            "workspace/diagnostic",
            json!({"previousResultIds": [{"uri": A, "value": result_id}]}),
        )
        .await;
    let early = tokio::time::timeout(Duration::from_millis(200), client.response(parked)).await;
    assert!(early.is_err(), "idle pass answered before any change");

    client
        .notify(
            "textDocument/didChange",
            json!({"textDocument": {"uri": A, "version": 2}, "contentChanges": [{"text": "text\n"}]}),
        )
        .await;
    let woken = client.response(parked).await;
    assert_eq!(woken["result"], json!({"items": []}));

    assert!(client.shutdown().await.shutdown_requested);
}

#[tokio::test]
async fn parked_workspace_pull_can_be_cancelled() {
    let mut client = TestClient::initialized(quick_refresh(), false).await;

    let parked = client
        .request("workspace/diagnostic", json!({"previousResultIds": []}))
        .await;
    client.notify("$/cancelRequest", json!({"id": parked})).await;

    let response = client.response(parked).await;
    assert_eq!(response["error"]["code"], REQUEST_CANCELLED);

    assert!(client.shutdown().await.shutdown_requested);
}

#[tokio::test]
async fn shutdown_cancels_parked_requests_and_refuses_new_ones() {
    let mut client = TestClient::initialized(quick_refresh(), false).await;

    let parked = client
        .request("workspace/diagnostic", json!({"previousResultIds": []}))
        .await;
    let shutdown = client.call("shutdown", Value::Null).await;
    assert_eq!(shutdown["result"], Value::Null);

    let response = client.response(parked).await;
    assert_eq!(response["error"]["code"], REQUEST_CANCELLED);

    let late = client
        .call("textDocument/diagnostic", json!({"textDocument": {"uri": A}}))
        .await;
    assert_eq!(late["error"]["code"], INVALID_REQUEST);

    client.notify("exit", Value::Null).await;
    assert!(client.finish().await.shutdown_requested);
}

#[tokio::test]
async fn edits_trigger_refresh_when_supported() {
    let mut client = TestClient::initialized(quick_refresh(), true).await;
    client.open(A, "text\n").await;

    let refresh = client.message("workspace/diagnostic/refresh").await;
    assert_eq!(refresh["id"], "diagpull/refresh/1");
    client.reply(refresh["id"].clone(), Value::Null).await;

    client
        .notify(
            "textDocument/didChange",
            json!({"textDocument": {"uri": A, "version": 2}, "contentChanges": [{"text": "more\n"}]}),
        )
        .await;
    let next = client.message("workspace/diagnostic/refresh").await;
    assert_eq!(next["id"], "diagpull/refresh/2");

    assert!(client.shutdown().await.shutdown_requested);
}
