//! Integration tests for the HTTP snapshot fetcher

use std::time::Duration;

use coderadio_daemon::error::FetchError;
use coderadio_daemon::fetcher::{build_client, HttpSnapshotFetcher, SnapshotFetcher};
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const NOWPLAYING_PATH: &str = "/api/nowplaying_static/coderadio.json";

/// A now-playing payload shaped like the station's static JSON
fn mock_nowplaying_json() -> serde_json::Value {
    json!({
        "station": { "name": "freeCodeCamp.org Code Radio" },
        "listeners": { "current": 187, "unique": 160, "total": 187 },
        "now_playing": {
            "elapsed": 42,
            "remaining": 138,
            "duration": 180,
            "song": {
                "text": "Lofi Fruits - Citrus",
                "artist": "Lofi Fruits",
                "title": "Citrus",
                "art": "https://cdn.example/covers/citrus.jpg"
            }
        },
        "song_history": [
            { "song": { "text": "Chillhop - Rain", "artist": "Chillhop", "title": "Rain", "art": "" } },
            { "song": { "text": "Chillhop - Rain", "artist": "Chillhop", "title": "Rain", "art": "" } },
            { "song": { "text": "Idealism - Snow", "artist": "Idealism", "title": "Snow", "art": "" } }
        ]
    })
}

fn fetcher_for(server: &MockServer, timeout: Duration) -> HttpSnapshotFetcher {
    let client = build_client(timeout).unwrap();
    HttpSnapshotFetcher::new(client, format!("{}{}", server.uri(), NOWPLAYING_PATH), 10)
}

#[tokio::test]
async fn test_fetch_snapshot() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(NOWPLAYING_PATH))
        .and(header("accept", "application/json"))
        .respond_with(ResponseTemplate::new(200).set_body_json(mock_nowplaying_json()))
        .expect(1)
        .mount(&mock_server)
        .await;

    let snapshot = fetcher_for(&mock_server, Duration::from_secs(5))
        .fetch()
        .await
        .unwrap();

    assert_eq!(snapshot.song.title, "Citrus");
    assert_eq!(snapshot.song.artist, "Lofi Fruits");
    assert_eq!(snapshot.duration_secs, 180);
    assert_eq!(snapshot.elapsed_secs, 42);
    assert_eq!(snapshot.listeners, 187);

    // Duplicate history entries collapse onto the first occurrence
    let titles: Vec<_> = snapshot.history.iter().map(|s| s.title.as_str()).collect();
    assert_eq!(titles, vec!["Rain", "Snow"]);
}

#[tokio::test]
async fn test_missing_listeners_defaults_to_zero() {
    let mock_server = MockServer::start().await;

    let mut body = mock_nowplaying_json();
    body.as_object_mut().unwrap().remove("listeners");
    Mock::given(method("GET"))
        .and(path(NOWPLAYING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&mock_server)
        .await;

    let snapshot = fetcher_for(&mock_server, Duration::from_secs(5))
        .fetch()
        .await
        .unwrap();
    assert_eq!(snapshot.listeners, 0);
}

#[tokio::test]
async fn test_server_error_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(NOWPLAYING_PATH))
        .respond_with(ResponseTemplate::new(503))
        .mount(&mock_server)
        .await;

    let err = fetcher_for(&mock_server, Duration::from_secs(5))
        .fetch()
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Status(503)), "got {:?}", err);
}

#[tokio::test]
async fn test_malformed_body() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(NOWPLAYING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let err = fetcher_for(&mock_server, Duration::from_secs(5))
        .fetch()
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Decode(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_negative_duration_is_invalid() {
    let mock_server = MockServer::start().await;

    let mut body = mock_nowplaying_json();
    body["now_playing"]["duration"] = json!(-5);
    Mock::given(method("GET"))
        .and(path(NOWPLAYING_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(&mock_server)
        .await;

    let err = fetcher_for(&mock_server, Duration::from_secs(5))
        .fetch()
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Invalid(_)), "got {:?}", err);
}

#[tokio::test]
async fn test_slow_server_times_out() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path(NOWPLAYING_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(mock_nowplaying_json())
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&mock_server)
        .await;

    let err = fetcher_for(&mock_server, Duration::from_millis(200))
        .fetch()
        .await
        .unwrap_err();
    assert!(matches!(err, FetchError::Timeout), "got {:?}", err);
}
