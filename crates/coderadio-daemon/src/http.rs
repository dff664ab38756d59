use crate::core::EngineEvent;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use coderadio_proto::protocol::Command;
use coderadio_proto::state::PlayerState;
use coderadio_proto::view::NowPlayingView;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

#[derive(Clone)]
struct HttpState {
    state_rx: watch::Receiver<PlayerState>,
    event_tx: mpsc::Sender<EngineEvent>,
}

#[derive(Serialize)]
struct VolumeStatus {
    volume: u8,
}

pub fn start_server(
    bind_address: String,
    port: u16,
    state_rx: watch::Receiver<PlayerState>,
    event_tx: mpsc::Sender<EngineEvent>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let addr = format!("{}:{}", bind_address, port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                error!("Failed to bind HTTP server to {}: {}", addr, e);
                return;
            }
        };

        info!("HTTP API server listening on http://{}", addr);
        serve(listener, state_rx, event_tx).await;
    })
}

async fn serve(
    listener: TcpListener,
    state_rx: watch::Receiver<PlayerState>,
    event_tx: mpsc::Sender<EngineEvent>,
) {
    let app = router(HttpState { state_rx, event_tx });
    if let Err(e) = axum::serve(listener, app).await {
        error!("HTTP server error: {}", e);
    }
}

fn router(app_state: HttpState) -> Router {
    Router::new()
        .route("/api/state", get(get_state))
        .route("/api/toggle", post(toggle))
        .route("/api/volume/:percent", get(set_volume).post(set_volume))
        .route("/api/volume", get(get_volume))
        .route("/api/artwork", post(download_artwork))
        .route("/api/artwork/:index", post(download_history_artwork))
        .route("/api/resync", post(resync))
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

async fn forward(state: &HttpState, cmd: Command) -> StatusCode {
    if state.event_tx.send(EngineEvent::Command(cmd)).await.is_err() {
        error!("HTTP API: engine is gone");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    StatusCode::OK
}

async fn get_state(State(state): State<HttpState>) -> Json<NowPlayingView> {
    let view = NowPlayingView::from_state(&state.state_rx.borrow());
    Json(view)
}

async fn toggle(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Toggle playback");
    forward(&state, Command::TogglePlayback).await
}

async fn set_volume(State(state): State<HttpState>, Path(percent): Path<i32>) -> StatusCode {
    let value = (percent as f32 / 100.0).clamp(0.0, 1.0);
    info!("HTTP API: Set volume to {}%", percent);
    forward(&state, Command::SetVolume { value }).await
}

async fn get_volume(State(state): State<HttpState>) -> Json<VolumeStatus> {
    let volume = (state.state_rx.borrow().volume * 100.0).round() as u8;
    Json(VolumeStatus { volume })
}

async fn download_artwork(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Download artwork");
    forward(&state, Command::DownloadArtwork { history_index: None }).await
}

async fn download_history_artwork(
    State(state): State<HttpState>,
    Path(index): Path<usize>,
) -> StatusCode {
    info!("HTTP API: Download artwork of history entry {}", index);
    forward(
        &state,
        Command::DownloadArtwork {
            history_index: Some(index),
        },
    )
    .await
}

async fn resync(State(state): State<HttpState>) -> StatusCode {
    info!("HTTP API: Resync");
    forward(&state, Command::Resync).await
}
