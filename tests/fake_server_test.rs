//! End-to-end runs against a small in-process imitation of the flow server.

use axum::Json;
use axum::body::Body;
use axum::extract::{Path, Query};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use futures::StreamExt;
use langflow_client::{ClientConfig, LangflowClient, RunRequest, StreamHandle, StreamUpdate};
use serde::Deserialize;
use serde_json::{Value, json};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
struct RunQuery {
    stream: bool,
}

async fn run(
    Path(flow): Path<String>,
    Query(query): Query<RunQuery>,
    Json(body): Json<Value>,
) -> Json<Value> {
    let input = body["input_value"].as_str().unwrap_or_default().to_string();
    if query.stream {
        let artifacts = json!({"stream_url": format!("/api/v1/stream/{flow}")});
        return Json(json!({
            "session_id": flow,
            "outputs": [{"outputs": [{"artifacts": artifacts}]}]
        }));
    }

    let message = json!({"message": {"text": format!("echo: {input}")}});
    Json(json!({
        "session_id": flow,
        "outputs": [{"outputs": [{"outputs": {"message": message}}]}]
    }))
}

async fn sse_stream(Path(flow): Path<String>) -> impl IntoResponse {
    let (tx, rx) = tokio::sync::mpsc::channel(8);
    tokio::spawn(async move {
        for chunk in ["Use ", "bamboo ", "brushes \u{1f331}"] {
            let data = json!({"event": "token", "data": {"chunk": chunk, "flow": flow}});
            let event = Event::default().event("token").data(data.to_string());
            if tx.send(Ok::<Event, Infallible>(event)).await.is_err() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    });

    Sse::new(ReceiverStream::new(rx)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_millis(1))
            .text("keep-alive"),
    )
}

/// Body written in chunks that split a multi-byte character and a line.
async fn chunked_stream() -> Response {
    let line = "data: {\"chunk\":\"\u{65e5}\u{672c}\u{1f331}\"}\n\n".as_bytes().to_vec();
    let (head, tail) = line.split_at(20);
    let parts = vec![
        b": comment\n".to_vec(),
        head.to_vec(),
        tail.to_vec(),
        b"data: {\"chunk\":\"end\"}".to_vec(),
    ];
    let body = futures::stream::iter(parts).then(|part| async move {
        tokio::time::sleep(Duration::from_millis(5)).await;
        Ok::<_, Infallible>(part)
    });

    axum::http::Response::builder()
        .header("content-type", "text/event-stream")
        .body(Body::from_stream(body))
        .unwrap()
}

async fn spawn_server() -> String {
    let app = axum::Router::new()
        .route("/api/v1/run/:flow", post(run))
        .route("/api/v1/stream/:flow", get(sse_stream))
        .route("/chunked", get(chunked_stream));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}/")
}

async fn chunks_until_terminal(updates: &mut StreamHandle) -> (Vec<String>, StreamUpdate) {
    let mut chunks = Vec::new();
    loop {
        match updates.next().await.expect("stream ended without terminal update") {
            StreamUpdate::Update(event) => {
                chunks.push(event.chunk().unwrap_or_default().to_string());
            }
            terminal => return (chunks, terminal),
        }
    }
}

#[tokio::test]
async fn non_streaming_run_yields_final_text() {
    let base = spawn_server().await;
    let client = LangflowClient::new(ClientConfig::new(base));

    let run = client
        .run_flow("advisor", &RunRequest::new("toothbrushes?"))
        .await
        .unwrap();

    assert!(run.stream.is_none());
    assert_eq!(run.response.final_text().unwrap(), "echo: toothbrushes?");
}

#[tokio::test]
async fn streaming_run_follows_sse_events_past_keep_alives() {
    let base = spawn_server().await;
    let client = LangflowClient::new(ClientConfig::new(base));

    let run = client
        .run_flow("advisor", &RunRequest::new("toothbrushes?").stream(true))
        .await
        .unwrap();
    assert_eq!(run.response.session_id(), Some("advisor"));

    let mut updates = run.stream.expect("stream handle");
    let (chunks, terminal) = chunks_until_terminal(&mut updates).await;

    assert_eq!(chunks.concat(), "Use bamboo brushes \u{1f331}");
    assert!(matches!(terminal, StreamUpdate::Closed(_)));
    assert!(updates.next().await.is_none());
}

#[tokio::test]
async fn chunk_boundaries_do_not_corrupt_characters() {
    let base = spawn_server().await;
    let client = LangflowClient::new(ClientConfig::new(base));

    let mut updates = client.spawn_stream(&client.resolve_url("/chunked"));
    let (chunks, terminal) = chunks_until_terminal(&mut updates).await;

    assert_eq!(chunks, vec!["\u{65e5}\u{672c}\u{1f331}", "end"]);
    assert!(matches!(terminal, StreamUpdate::Closed(_)));
}

#[tokio::test]
async fn aborted_stream_delivers_nothing_further() {
    let base = spawn_server().await;
    let client = LangflowClient::new(ClientConfig::new(base));

    let updates = client.spawn_stream(&client.resolve_url("/api/v1/stream/slow"));
    updates.abort();

    let remaining: Vec<_> = updates.into_stream().collect().await;
    assert!(remaining.is_empty(), "got {remaining:?}");
}
