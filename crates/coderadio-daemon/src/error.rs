//! Error types for the player's collaborators.
//!
//! None of these are fatal to the process: fetch failures freeze the displayed
//! state, download failures become notifications, permission failures are
//! only logged.

use coderadio_proto::snapshot::SnapshotError;

/// Snapshot retrieval failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// Transport-level failure (DNS, connect, TLS, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[source] reqwest::Error),

    #[error("Request timeout")]
    Timeout,

    #[error("Now-playing endpoint returned status {0}")]
    Status(u16),

    /// Body was not the expected JSON shape.
    #[error("Undecodable now-playing body: {0}")]
    Decode(#[source] serde_json::Error),

    /// Body decoded but violated the schema (e.g. negative duration).
    #[error("Invalid now-playing data: {0}")]
    Invalid(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(e)
        }
    }
}

impl From<SnapshotError> for FetchError {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::Json(e) => Self::Decode(e),
            SnapshotError::Invalid(msg) => Self::Invalid(msg),
        }
    }
}

/// Saving artwork failed.
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    #[error("Invalid artwork URL: {0}")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Artwork server returned status {0}")]
    Status(u16),

    #[error("Could not write artwork: {0}")]
    Io(#[from] std::io::Error),
}

/// The platform refused to show notifications.
#[derive(Debug, thiserror::Error)]
pub enum PermissionError {
    #[error("Notification permission denied: {0}")]
    Denied(String),
}

/// The audio transport could not carry out a command.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Audio backend unavailable: {0}")]
    Unavailable(String),

    #[error("Audio backend IPC failed: {0}")]
    Ipc(String),
}

impl From<anyhow::Error> for TransportError {
    fn from(e: anyhow::Error) -> Self {
        Self::Ipc(e.to_string())
    }
}
