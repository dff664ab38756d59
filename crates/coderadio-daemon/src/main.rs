use std::sync::Arc;
use std::time::Duration;

use coderadio_daemon::artwork::ArtworkDownloader;
use coderadio_daemon::core::{Collaborators, EngineConfig, EngineEvent, SyncEngine};
use coderadio_daemon::fetcher::{build_client, HttpSnapshotFetcher};
use coderadio_daemon::http;
use coderadio_daemon::mpv::MpvTransport;
use coderadio_daemon::sinks::{DiskFileSink, LogNotifier, NotificationSink};
use coderadio_proto::config::Config;
use coderadio_proto::state::PersistentState;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Setup file logging + stderr
    let data_dir = coderadio_proto::platform::data_dir();
    std::fs::create_dir_all(&data_dir)?;
    let log_path = data_dir.join("daemon.log");

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)?;

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(log_file)
        .with_ansi(false);
    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    tracing_subscriber::registry()
        .with(file_layer)
        .with(stderr_layer)
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new("info,coderadio_daemon=debug")
            }),
        )
        .init();

    info!("Log file: {:?}", log_path);

    let config = Config::load()?;
    info!("Config loaded from: {:?}", Config::config_path());

    let persistent =
        PersistentState::load(&config.daemon.state_file, config.player.default_volume);

    let client = build_client(Duration::from_secs(config.sync.request_timeout_secs))?;
    let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotifier);
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

    // Event channel — all external inputs funnel into the SyncEngine
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<EngineEvent>(256);

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

    if config.http.enabled {
        let _http_handle = http::start_server(
            config.http.bind_address.clone(),
            config.http.port,
            engine.subscribe(),
            event_tx.clone(),
        );
    }

    let shutdown_tx = event_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
            let _ = shutdown_tx.send(EngineEvent::Shutdown).await;
        }
    });

    info!("Daemon initialised, connecting to {}", config.station.nowplaying_url);
    let engine_task = tokio::spawn(engine.start(event_rx));

    match engine_task.await {
        Ok(result) => result?,
        Err(e) => error!("SyncEngine task failed: {}", e),
    }
    Ok(())
}
