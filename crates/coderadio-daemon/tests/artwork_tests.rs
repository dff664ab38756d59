//! Integration tests for artwork downloads

use std::sync::{Arc, Mutex};
use std::time::Duration;

use coderadio_daemon::artwork::ArtworkDownloader;
use coderadio_daemon::error::DownloadError;
use coderadio_daemon::fetcher::build_client;
use coderadio_daemon::sinks::{DiskFileSink, NotificationSink};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

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

fn downloader(dir: &std::path::Path) -> (ArtworkDownloader, Arc<Recorder>) {
    let recorder = Arc::new(Recorder::default());
    let downloader = ArtworkDownloader::new(
        build_client(Duration::from_secs(5)).unwrap(),
        dir.to_path_buf(),
        Arc::new(DiskFileSink),
        recorder.clone(),
    );
    (downloader, recorder)
}

#[tokio::test]
async fn test_download_writes_file_and_notifies() {
    let mock_server = MockServer::start().await;
    let png = vec![0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    Mock::given(method("GET"))
        .and(path("/covers/citrus"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png.clone()),
        )
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (downloader, recorder) = downloader(&dir.path().join("art"));

    let url = format!("{}/covers/citrus", mock_server.uri());
    let saved = downloader
        .download(&url, "Lofi Fruits - Citrus")
        .await
        .unwrap();

    assert_eq!(std::fs::read(&saved).unwrap(), png);
    let name = saved.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("artwork_Lofi Fruits - Citrus_"), "{}", name);
    assert!(name.ends_with(".png"), "{}", name);

    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "Artwork saved");
    assert!(seen[0].1.contains(name));
}

#[tokio::test]
async fn test_not_found_notifies_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/covers/missing.jpg"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let (downloader, recorder) = downloader(dir.path());

    let url = format!("{}/covers/missing.jpg", mock_server.uri());
    let err = downloader.download(&url, "Missing").await.unwrap_err();

    assert!(matches!(err, DownloadError::Status(404)), "got {:?}", err);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen[0].0, "Artwork download failed");
}

#[tokio::test]
async fn test_malformed_url_notifies_failure() {
    let dir = tempfile::tempdir().unwrap();
    let (downloader, recorder) = downloader(dir.path());

    let err = downloader.download("not a url", "x").await.unwrap_err();
    assert!(matches!(err, DownloadError::InvalidUrl(_)), "got {:?}", err);

    let err = downloader
        .download("file:///etc/passwd", "x")
        .await
        .unwrap_err();
    assert!(matches!(err, DownloadError::InvalidUrl(_)), "got {:?}", err);

    let titles: Vec<_> = recorder
        .seen
        .lock()
        .unwrap()
        .iter()
        .map(|(t, _)| t.clone())
        .collect();
    assert_eq!(titles, vec!["Artwork download failed", "Artwork download failed"]);
}

#[tokio::test]
async fn test_unwritable_destination_notifies_failure() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/covers/rain.jpg"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0xff, 0xd8, 0xff]))
        .mount(&mock_server)
        .await;

    // A regular file where the artwork directory's parent should be.
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    std::fs::write(&blocker, b"not a directory").unwrap();
    let (downloader, recorder) = downloader(&blocker.join("art"));

    let url = format!("{}/covers/rain.jpg", mock_server.uri());
    let err = downloader.download(&url, "Chillhop - Rain").await.unwrap_err();

    assert!(matches!(err, DownloadError::Io(_)), "got {:?}", err);
    let seen = recorder.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].0, "Artwork download failed");
}
