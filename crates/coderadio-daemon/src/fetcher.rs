//! Now-playing snapshot retrieval.

use std::time::Duration;

use async_trait::async_trait;
use coderadio_proto::snapshot::Snapshot;
use tracing::debug;

use crate::error::FetchError;

/// One round trip to the metadata endpoint.  Implementations never retry and
/// never hand back a partially populated snapshot.
#[async_trait]
pub trait SnapshotFetcher: Send + Sync {
    async fn fetch(&self) -> Result<Snapshot, FetchError>;
}

pub const USER_AGENT: &str = concat!("coderadio/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client shared by the fetcher and the artwork downloader.
pub fn build_client(timeout: Duration) -> reqwest::Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(timeout)
        .timeout(timeout)
        .build()
}

/// Fetches the station's static now-playing JSON over HTTP.
#[derive(Debug, Clone)]
pub struct HttpSnapshotFetcher {
    client: reqwest::Client,
    url: String,
    history_limit: usize,
}

impl HttpSnapshotFetcher {
    pub fn new(client: reqwest::Client, url: impl Into<String>, history_limit: usize) -> Self {
        Self {
            client,
            url: url.into(),
            history_limit,
        }
    }
}

#[async_trait]
impl SnapshotFetcher for HttpSnapshotFetcher {
    async fn fetch(&self) -> Result<Snapshot, FetchError> {
        debug!("fetch: GET {}", self.url);
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(FetchError::Status(response.status().as_u16()));
        }

        let body = response.bytes().await?;
        let snapshot = Snapshot::from_json(&body, self.history_limit)?;
        debug!(
            "fetch: '{}' {}/{}s, {} listeners",
            snapshot.song.text, snapshot.elapsed_secs, snapshot.duration_secs, snapshot.listeners
        );
        Ok(snapshot)
    }
}
