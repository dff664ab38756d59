//! Outbound side effects: user notifications and file writes.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::error::PermissionError;

// ── notifications ─────────────────────────────────────────────────────────────

/// Fire-and-forget user alerts.  Delivery is best effort; nothing waits for
/// an acknowledgement.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, title: &str, body: &str);

    /// Ask the platform for permission to show alerts.  Checked once at
    /// startup; a denial is logged and otherwise ignored.
    fn authorize(&self) -> Result<(), PermissionError> {
        Ok(())
    }
}

/// Writes notifications to the log.  Used by the headless daemon.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl NotificationSink for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!("[notify] {}: {}", title, body);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Forwards notifications into a channel (the TUI turns them into toasts).
/// Drops the notification when the receiver is full or gone.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Notification>,
}

impl ChannelNotifier {
    pub fn new(tx: mpsc::Sender<Notification>) -> Self {
        Self { tx }
    }
}

impl NotificationSink for ChannelNotifier {
    fn notify(&self, title: &str, body: &str) {
        let msg = Notification {
            title: title.to_string(),
            body: body.to_string(),
        };
        if self.tx.try_send(msg).is_err() {
            debug!("notification dropped: {}", title);
        }
    }
}

// ── files ─────────────────────────────────────────────────────────────────────

#[async_trait]
pub trait FileSink: Send + Sync {
    /// Write `bytes` as `file_name` inside `dir`, never replacing an existing
    /// file.  Returns the path actually written.
    async fn write(&self, dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf>;
}

const MAX_NAME_ATTEMPTS: u32 = 100;

#[derive(Debug, Default, Clone)]
pub struct DiskFileSink;

#[async_trait]
impl FileSink for DiskFileSink {
    async fn write(&self, dir: &Path, file_name: &str, bytes: &[u8]) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(dir).await?;

        for attempt in 0..MAX_NAME_ATTEMPTS {
            let path = dir.join(numbered_name(file_name, attempt));
            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            };
            file.write_all(bytes).await?;
            file.flush().await?;
            return Ok(path);
        }

        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free file name for {} in {}", file_name, dir.display()),
        ))
    }
}

/// `cover.jpg` → `cover.jpg`, `cover-1.jpg`, `cover-2.jpg`, ...
fn numbered_name(file_name: &str, n: u32) -> String {
    if n == 0 {
        return file_name.to_string();
    }
    let path = Path::new(file_name);
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file_name);
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) => format!("{}-{}.{}", stem, n, ext),
        None => format!("{}-{}", stem, n),
    }
}
