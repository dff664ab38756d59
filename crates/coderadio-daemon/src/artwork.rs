//! Saves cover art to disk and tells the user how it went.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use crate::error::DownloadError;
use crate::sinks::{FileSink, NotificationSink};

const SAVED_TITLE: &str = "Artwork saved";
const FAILED_TITLE: &str = "Artwork download failed";

#[derive(Clone)]
pub struct ArtworkDownloader {
    client: reqwest::Client,
    dest_dir: PathBuf,
    files: Arc<dyn FileSink>,
    notifier: Arc<dyn NotificationSink>,
}

impl ArtworkDownloader {
    pub fn new(
        client: reqwest::Client,
        dest_dir: PathBuf,
        files: Arc<dyn FileSink>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            client,
            dest_dir,
            files,
            notifier,
        }
    }

    /// Download `url` and write it under the destination directory.
    /// Every outcome is reported through the notification sink.
    pub async fn download(&self, url: &str, name_hint: &str) -> Result<PathBuf, DownloadError> {
        let result = self.fetch_and_store(url, name_hint).await;
        match &result {
            Ok(path) => {
                info!("artwork: saved {} to {:?}", url, path);
                self.notifier
                    .notify(SAVED_TITLE, &format!("Saved to {}", path.display()));
            }
            Err(e) => {
                warn!("artwork: {} failed: {}", url, e);
                self.notifier.notify(FAILED_TITLE, &e.to_string());
            }
        }
        result
    }

    /// Detach a download; the caller only hears back through notifications.
    pub fn run_download(&self, url: String, name_hint: String) -> tokio::task::JoinHandle<()> {
        let downloader = self.clone();
        tokio::spawn(async move {
            let _ = downloader.download(&url, &name_hint).await;
        })
    }

    async fn fetch_and_store(&self, url: &str, name_hint: &str) -> Result<PathBuf, DownloadError> {
        let parsed =
            reqwest::Url::parse(url).map_err(|e| DownloadError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(DownloadError::InvalidUrl(url.to_string()));
        }

        let response = self.client.get(parsed.clone()).send().await?;
        if !response.status().is_success() {
            return Err(DownloadError::Status(response.status().as_u16()));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = response.bytes().await?;

        let ext = extension_from_url(&parsed)
            .or_else(|| content_type.as_deref().and_then(extension_from_mime))
            .unwrap_or("jpg");
        let file_name = artwork_file_name(name_hint, chrono::Local::now().timestamp_millis(), ext);

        Ok(self.files.write(&self.dest_dir, &file_name, &bytes).await?)
    }
}

/// `artwork_<hint>_<millis>.<ext>`; the timestamp keeps repeat saves apart.
fn artwork_file_name(name_hint: &str, millis: i64, ext: &str) -> String {
    let hint = safe_filename(name_hint);
    if hint.is_empty() {
        format!("artwork_{}.{}", millis, ext)
    } else {
        format!("artwork_{}_{}.{}", hint, millis, ext)
    }
}

fn safe_filename(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            c if c.is_control() => '-',
            c => c,
        })
        .collect();
    cleaned.trim().trim_matches('.').chars().take(80).collect()
}

fn extension_from_url(url: &reqwest::Url) -> Option<&'static str> {
    let last = url.path_segments()?.last()?;
    let (_, ext) = last.rsplit_once('.')?;
    match ext.to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => Some("jpg"),
        "png" => Some("png"),
        "webp" => Some("webp"),
        "gif" => Some("gif"),
        _ => None,
    }
}

fn extension_from_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next()?.trim();
    match essence {
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/png" => Some("png"),
        "image/webp" => Some("webp"),
        "image/gif" => Some("gif"),
        _ => None,
    }
}
