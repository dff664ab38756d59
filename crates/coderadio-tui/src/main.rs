mod app;
mod theme;
mod ui;
mod widgets;

use std::sync::Arc;
use std::time::Duration;

use coderadio_daemon::artwork::ArtworkDownloader;
use coderadio_daemon::core::{Collaborators, EngineConfig, EngineEvent, SyncEngine};
use coderadio_daemon::fetcher::{build_client, HttpSnapshotFetcher};
use coderadio_daemon::mpv::MpvTransport;
use coderadio_daemon::sinks::{ChannelNotifier, DiskFileSink, NotificationSink};
use coderadio_proto::config::Config;
use coderadio_proto::state::PersistentState;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let data_dir = coderadio_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("tui.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    // Allow RUST_LOG override; default to debug for app code but suppress noisy
    // connection-level DEBUG from HTTP client internals (hyper_util, reqwest).
    let log_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "debug,hyper_util=warn,reqwest=warn,hyper=warn".to_string());
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_env_filter(log_filter.as_str())
        .with_ansi(false)
        .init();

    // Print log path to stderr so the operator can tail it immediately.
    eprintln!("coderadio log: {}", log_path.display());

    tracing::info!("coderadio starting…");

    // ── Load config ──────────────────────────────────────────────────────────
    let config = Config::load().unwrap_or_default();
    let persistent =
        PersistentState::load(&config.daemon.state_file, config.player.default_volume);

    // ── Notifications (engine → toasts) ─────────────────────────────────────
    let (notify_tx, notify_rx) = mpsc::channel(32);
    let notifier: Arc<dyn NotificationSink> = Arc::new(ChannelNotifier::new(notify_tx));

    // ── EngineEvent channel (TUI/HTTP → SyncEngine) ─────────────────────────
    let (event_tx, event_rx) = mpsc::channel::<EngineEvent>(256);

    // ── Build SyncEngine ─────────────────────────────────────────────────────
    let client = build_client(Duration::from_secs(config.sync.request_timeout_secs))?;
    let fetcher = HttpSnapshotFetcher::new(
        client.clone(),
        config.station.nowplaying_url.clone(),
        config.sync.history_limit,
    );
    let artwork = ArtworkDownloader::new(
        client,
        config.paths.artwork_dir.clone(),
        Arc::new(DiskFileSink),
        notifier.clone(),
    );
    let engine = SyncEngine::new(
        EngineConfig::from_config(&config),
        persistent.volume,
        Collaborators {
            fetcher: Arc::new(fetcher),
            transport: Box::new(MpvTransport::new(config.station.stream_url.clone())),
            notifier,
            artwork,
        },
        event_tx.clone(),
    );
    let state_rx = engine.subscribe();

    // ── HTTP server ──────────────────────────────────────────────────────────
    if config.http.enabled {
        coderadio_daemon::http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            engine.subscribe(),
            event_tx.clone(),
        );
    }

    // ── Spawn SyncEngine (bootstrap, then event loop) ────────────────────────
    let engine_task = tokio::spawn(async move {
        if let Err(e) = engine.start(event_rx).await {
            tracing::error!("SyncEngine exited with error: {}", e);
        }
    });

    // ── Run TUI ──────────────────────────────────────────────────────────────
    let app = app::App::new(state_rx, notify_rx, event_tx.clone());
    let result = app.run().await;

    // Stop mpv before exiting; this also cancels a bootstrap still retrying.
    let _ = event_tx.send(EngineEvent::Shutdown).await;
    match tokio::time::timeout(Duration::from_secs(3), engine_task).await {
        Ok(_) => {}
        Err(_) => tracing::warn!("SyncEngine did not stop in time"),
    }

    result
}
