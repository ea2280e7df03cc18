//! `HttpCommandService` against a local axum server.

use std::sync::Arc;
use std::time::Duration;

use axum::{http::StatusCode, routing::post, Json, Router};
use soundverse_core::{
    interpret,
    remote::{
        CommandService, HttpCommandService, ProcessAudioRequest, ProcessAudioResponse,
        RemoteInterpreter,
    },
    FALLBACK_REPLY,
};

async fn spawn_server(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}/process-audio")
}

fn interpreter(endpoint: String) -> RemoteInterpreter {
    let service = HttpCommandService::new(endpoint).expect("http client");
    RemoteInterpreter::new(Arc::new(service), Duration::from_secs(5))
}

#[tokio::test]
async fn posts_the_transcript_and_reads_the_reply() {
    let app = Router::new().route(
        "/process-audio",
        post(|Json(body): Json<ProcessAudioRequest>| async move {
            Json(ProcessAudioResponse {
                text: interpret(&body.audio).reply_text().to_string(),
            })
        }),
    );
    let endpoint = spawn_server(app).await;

    let service = HttpCommandService::new(endpoint.clone()).unwrap();
    assert_eq!(service.endpoint(), endpoint);
    assert_eq!(
        service.process("add some reverb please").await.unwrap(),
        "Reverb effect added."
    );
    assert_eq!(
        interpreter(endpoint).interpret_remotely("turn on delay").await,
        "Delay effect applied."
    );
}

#[tokio::test]
async fn server_error_yields_fallback() {
    let app = Router::new().route(
        "/process-audio",
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let endpoint = spawn_server(app).await;

    let service = HttpCommandService::new(endpoint.clone()).unwrap();
    assert!(service.process("add reverb").await.is_err());
    assert_eq!(
        interpreter(endpoint).interpret_remotely("add reverb").await,
        FALLBACK_REPLY
    );
}

#[tokio::test]
async fn malformed_body_yields_fallback() {
    let app = Router::new().route(
        "/process-audio",
        post(|| async { Json(serde_json::json!({ "reply": "wrong field" })) }),
    );
    let endpoint = spawn_server(app).await;

    assert_eq!(
        interpreter(endpoint).interpret_remotely("add reverb").await,
        FALLBACK_REPLY
    );
}

#[tokio::test]
async fn unreachable_host_yields_fallback() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let endpoint = format!("http://{addr}/process-audio");
    assert_eq!(
        interpreter(endpoint).interpret_remotely("add reverb").await,
        FALLBACK_REPLY
    );
}
