//! The command service: answers transcripts with the reply for their intent.
//!
//! | Route | Body | Reply |
//! |-------|------|-------|
//! | `GET /` | | `{"message": ...}` |
//! | `POST /process-audio` | `{"audio": transcript}` | `{"text": reply}` |

use std::net::SocketAddr;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use soundverse_core::{
    interpret,
    remote::{ProcessAudioRequest, ProcessAudioResponse},
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Debug, Serialize)]
pub struct StatusMessage {
    pub message: String,
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(root))
        .route("/process-audio", post(process_audio))
        .layer(CorsLayer::permissive())
}

/// Serve until Ctrl-C.
pub async fn serve(bind: SocketAddr) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(addr = %listener.local_addr()?, "command service listening");
    axum::serve(listener, router())
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("failed to listen for Ctrl-C: {e}");
            }
        })
        .await?;
    info!("command service stopped");
    Ok(())
}

async fn root() -> Json<StatusMessage> {
    Json(StatusMessage {
        message: "Soundverse command service is running".into(),
    })
}

async fn process_audio(Json(request): Json<ProcessAudioRequest>) -> Json<ProcessAudioResponse> {
    let intent = interpret(&request.audio);
    info!(transcript = %request.audio, ?intent, "command received");
    Json(ProcessAudioResponse {
        text: intent.reply_text().to_string(),
    })
}
