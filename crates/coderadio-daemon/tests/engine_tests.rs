//! End-to-end engine tests against a mock station

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use coderadio_daemon::artwork::ArtworkDownloader;
use coderadio_daemon::core::{Collaborators, EngineConfig, EngineEvent, SyncEngine};
use coderadio_daemon::error::TransportError;
use coderadio_daemon::fetcher::{build_client, HttpSnapshotFetcher};
use coderadio_daemon::sinks::{DiskFileSink, LogNotifier, NotificationSink};
use coderadio_daemon::transport::AudioTransport;
use coderadio_proto::protocol::Command;
use serde_json::json;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Clone, Default)]
struct NullTransport {
    calls: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl AudioTransport for NullTransport {
    async fn play(&mut self, volume: f32) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(format!("play {:.2}", volume));
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push("pause".into());
        Ok(())
    }

    async fn set_volume(&mut self, volume: f32) -> Result<(), TransportError> {
        self.calls.lock().unwrap().push(format!("volume {:.2}", volume));
        Ok(())
    }
}

fn nowplaying(title: &str, duration: i64, elapsed: i64) -> serde_json::Value {
    json!({
        "listeners": { "current": 12 },
        "now_playing": {
            "duration": duration,
            "elapsed": elapsed,
            "song": { "text": format!("Artist - {}", title), "artist": "Artist", "title": title, "art": "" }
        },
        "song_history": []
    })
}

async fn engine_for(
    server: &MockServer,
    transport: NullTransport,
) -> (SyncEngine, mpsc::Sender<EngineEvent>, mpsc::Receiver<EngineEvent>) {
    let client = build_client(Duration::from_secs(5)).unwrap();
    let fetcher = HttpSnapshotFetcher::new(
        client.clone(),
        format!("{}/nowplaying.json", server.uri()),
        10,
    );
    let notifier = Arc::new(LogNotifier);
    let artwork = ArtworkDownloader::new(
        client,
        std::env::temp_dir(),
        Arc::new(DiskFileSink),
        notifier.clone(),
    );
    let (tx, rx) = mpsc::channel(64);
    let config = EngineConfig {
        bootstrap_attempts: 1,
        state_file: None,
        tick_period: Duration::from_millis(50),
        ..EngineConfig::default()
    };
    let engine = SyncEngine::new(
        config,
        0.4,
        Collaborators {
            fetcher: Arc::new(fetcher),
            transport: Box::new(transport),
            notifier,
            artwork,
        },
        tx.clone(),
    );
    (engine, tx, rx)
}

#[tokio::test]
async fn test_bootstrap_plays_and_follows_song_change() {
    let mock_server = MockServer::start().await;

    // First song is one tick from its end; the boundary resync picks up the next one
    Mock::given(method("GET"))
        .and(path("/nowplaying.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nowplaying("First", 2, 1)))
        .up_to_n_times(1)
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/nowplaying.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(nowplaying("Second", 240, 0)))
        .mount(&mock_server)
        .await;

    let transport = NullTransport::default();
    let (mut engine, tx, rx) = engine_for(&mock_server, transport.clone()).await;
    let mut state_rx = engine.subscribe();

    assert!(engine.bootstrap().await);
    assert!(engine.state().playing);
    assert_eq!(engine.state().listeners, 12);

    let engine_task = tokio::spawn(engine.run(rx));

    let changed = tokio::time::timeout(
        Duration::from_secs(5),
        state_rx.wait_for(|s| {
            s.current_song.as_ref().map(|song| song.title.as_str()) == Some("Second")
        }),
    )
    .await
    .is_ok();
    assert!(changed, "engine never resynced to the next song");

    tx.send(EngineEvent::Command(Command::TogglePlayback))
        .await
        .unwrap();
    tx.send(EngineEvent::Shutdown).await.unwrap();
    engine_task.await.unwrap().unwrap();

    let calls = transport.calls.lock().unwrap().clone();
    assert_eq!(calls, vec!["play 0.40", "pause"]);
}

#[tokio::test]
async fn test_unreachable_station_stays_loading() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/nowplaying.json"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&mock_server)
        .await;

    let transport = NullTransport::default();
    let (mut engine, _tx, _rx) = engine_for(&mock_server, transport.clone()).await;

    assert!(!engine.bootstrap().await);
    assert!(engine.state().loading);
    assert!(!engine.state().playing);
    assert!(transport.calls.lock().unwrap().is_empty());
}

#[derive(Default)]
struct Recorder {
    seen: Mutex<Vec<(String, String)>>,
}

impl NotificationSink for Recorder {
    fn notify(&self, title: &str, body: &str) {
        self.seen
            .lock()
            .unwrap()
            .push((title.to_string(), body.to_string()));
    }
}

#[tokio::test]
async fn test_history_artwork_is_saved_under_that_song() {
    let mock_server = MockServer::start().await;
    let art = |name: &str| format!("{}/covers/{}", mock_server.uri(), name);

    Mock::given(method("GET"))
        .and(path("/nowplaying.json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "listeners": { "current": 3 },
            "now_playing": {
                "duration": 200,
                "elapsed": 10,
                "song": { "text": "Lofi Fruits - Citrus", "artist": "Lofi Fruits", "title": "Citrus", "art": art("citrus.png") }
            },
            "song_history": [
                { "song": { "text": "Chillhop - Rain", "artist": "Chillhop", "title": "Rain", "art": art("rain.png") } }
            ]
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/covers/rain.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"rain".to_vec()))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let client = build_client(Duration::from_secs(5)).unwrap();
    let recorder = Arc::new(Recorder::default());
    let fetcher = HttpSnapshotFetcher::new(
        client.clone(),
        format!("{}/nowplaying.json", mock_server.uri()),
        10,
    );
    let artwork = ArtworkDownloader::new(
        client,
        dir.path().to_path_buf(),
        Arc::new(DiskFileSink),
        recorder.clone(),
    );
    let (tx, _rx) = mpsc::channel(64);
    let mut engine = SyncEngine::new(
        EngineConfig {
            bootstrap_attempts: 1,
            autoplay: false,
            state_file: None,
            ..EngineConfig::default()
        },
        0.4,
        Collaborators {
            fetcher: Arc::new(fetcher),
            transport: Box::new(NullTransport::default()),
            notifier: recorder.clone(),
            artwork,
        },
        tx,
    );

    assert!(engine.bootstrap().await);
    engine
        .handle_event(EngineEvent::Command(Command::DownloadArtwork {
            history_index: Some(0),
        }))
        .await;

    let saved = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(entry) = std::fs::read_dir(dir.path()).unwrap().next() {
                break entry.unwrap().path();
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("history artwork was never written");

    let name = saved.file_name().unwrap().to_str().unwrap().to_string();
    assert!(name.starts_with("artwork_Chillhop - Rain_"), "{}", name);
    assert!(name.ends_with(".png"), "{}", name);

    let notified = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some((title, _)) = recorder.seen.lock().unwrap().last().cloned() {
                break title;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(notified, "Artwork saved");
}
