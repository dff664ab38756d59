/// mpv IPC driver with separated reader/writer tasks.
///
/// Architecture:
///
/// ```text
///   MpvDriver::spawn_and_connect()
///         │
///         ├── writer_task   ← receives MpvRequest via mpsc, serialises → socket
///         └── reader_task   ← reads JSON lines from socket
///                                ├── response (has request_id) → matched oneshot::Sender
///                                └── event                     → logged
/// ```
///
/// `MpvTransport` wraps the driver as the player's `AudioTransport`: the
/// process is spawned lazily on first play, and the handle is replaced
/// whenever its IPC connection drops.
///
/// Platform notes:
/// - Unix:   Unix domain sockets
/// - Windows: Named pipes  \\.\pipe\<name>
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

#[cfg(unix)]
use tokio::net::UnixStream;

#[cfg(windows)]
use tokio::net::windows::named_pipe::ClientOptions;

use crate::error::TransportError;
use crate::transport::AudioTransport;

static NEXT_REQ_ID: AtomicU64 = AtomicU64::new(1);

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<anyhow::Result<Value>>>>>;

struct PendingRequest {
    req_id: u64,
    payload: String, // serialised JSON line (already has '\n')
    reply: oneshot::Sender<anyhow::Result<Value>>,
}

// ── public handle ─────────────────────────────────────────────────────────────

/// Cloneable handle to the mpv writer task.  Use `send()` to fire a command
/// and await the response.
#[derive(Clone)]
pub struct MpvHandle {
    tx: mpsc::Sender<PendingRequest>,
    /// Cleared by the reader task when the IPC connection ends.
    connected: Arc<AtomicBool>,
    reader: Arc<tokio::task::AbortHandle>,
}

impl MpvHandle {
    /// True while the IPC connection is up, whether or not we spawned mpv.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.tx.is_closed()
    }

    /// Stop the reader task.  The writer task exits once every clone of
    /// this handle is dropped, which closes the socket.
    pub fn close(&self) {
        self.connected.store(false, Ordering::Release);
        self.reader.abort();
    }

    pub async fn send(&self, command: Value) -> anyhow::Result<Value> {
        let req_id = NEXT_REQ_ID.fetch_add(1, Ordering::Relaxed);
        let msg = json!({ "command": command, "request_id": req_id });
        let mut raw = serde_json::to_string(&msg)?;
        raw.push('\n');

        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(PendingRequest {
                req_id,
                payload: raw,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow::anyhow!("mpv writer task gone"))?;

        tokio::time::timeout(tokio::time::Duration::from_secs(5), reply_rx)
            .await
            .map_err(|_| anyhow::anyhow!("mpv IPC timeout for req={}", req_id))?
            .map_err(|_| anyhow::anyhow!("mpv reply channel dropped req={}", req_id))?
    }

    pub async fn load_stream(&self, url: &str, volume: f32) -> anyhow::Result<()> {
        debug!("mpv: sending loadfile command for url={}", url);
        self.send(json!(["loadfile", url])).await?;
        self.set_volume(volume).await?;
        self.send(json!(["set_property", "pause", false])).await?;
        Ok(())
    }

    pub async fn stop(&self) -> anyhow::Result<()> {
        self.send(json!(["stop"])).await?;
        Ok(())
    }

    pub async fn set_volume(&self, vol: f32) -> anyhow::Result<()> {
        self.send(json!(["set_property", "volume", volume_percent(vol)]))
            .await?;
        Ok(())
    }
}

fn volume_percent(vol: f32) -> f32 {
    (vol * 100.0).clamp(0.0, 100.0)
}

// ── driver ────────────────────────────────────────────────────────────────────

/// Owns the mpv child process and manages (re)connection.
pub struct MpvDriver {
    socket_name: String,
    process: Option<tokio::process::Child>,
}

impl MpvDriver {
    pub fn new() -> Self {
        Self {
            socket_name: coderadio_proto::platform::mpv_socket_name(),
            process: None,
        }
    }

    /// Kill the process if running.
    pub async fn kill(&mut self) {
        if let Some(mut p) = self.process.take() {
            let _ = p.kill().await;
        }
    }

    async fn spawn_process(&mut self, volume: f32) -> anyhow::Result<()> {
        self.kill().await;

        info!("mpv: spawning new process");
        let mpv_binary = coderadio_proto::platform::find_mpv_binary()
            .ok_or_else(|| anyhow::anyhow!("mpv binary not found"))?;

        let vol_arg = format!("--volume={}", volume_percent(volume).round() as i64);
        let ipc_arg = coderadio_proto::platform::mpv_socket_arg();

        let child = tokio::process::Command::new(mpv_binary)
            .arg("--no-video")
            .arg("--idle=yes")
            .arg(&ipc_arg)
            .arg("--quiet")
            .arg(vol_arg)
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        info!("mpv: spawned process with pid {:?}", child.id());
        self.process = Some(child);
        Ok(())
    }

    // ── Unix ──────────────────────────────────────────────────────────────────

    #[cfg(unix)]
    pub async fn spawn_and_connect(&mut self, volume: f32) -> anyhow::Result<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        let _ = tokio::fs::remove_file(&socket_path).await;

        self.spawn_process(volume).await?;

        // Wait for socket to appear
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if socket_path.exists() {
                break;
            }
        }
        if !socket_path.exists() {
            anyhow::bail!("mpv IPC socket did not appear");
        }
        tokio::time::sleep(tokio::time::Duration::from_millis(200)).await;

        let stream = UnixStream::connect(&socket_path).await?;
        info!("mpv: connected to IPC socket");
        Ok(start_io_tasks(stream))
    }

    /// Try to connect to an already-running mpv socket without spawning.
    #[cfg(unix)]
    pub async fn try_reconnect(&mut self) -> Option<MpvHandle> {
        let socket_path = std::path::PathBuf::from(&self.socket_name);
        if !socket_path.exists() {
            return None;
        }
        match UnixStream::connect(&socket_path).await {
            Ok(stream) => {
                info!("mpv: reconnected to existing IPC socket");
                Some(start_io_tasks(stream))
            }
            Err(e) => {
                warn!("mpv: failed to reconnect: {}", e);
                None
            }
        }
    }

    // ── Windows ───────────────────────────────────────────────────────────────

    #[cfg(windows)]
    pub async fn spawn_and_connect(&mut self, volume: f32) -> anyhow::Result<MpvHandle> {
        self.spawn_process(volume).await?;

        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        for _ in 0..50 {
            tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
            if let Ok(client) = ClientOptions::new().open(&pipe_path) {
                info!("mpv: connected to named pipe");
                return Ok(start_io_tasks(client));
            }
        }
        anyhow::bail!("mpv named pipe did not appear")
    }

    #[cfg(windows)]
    pub async fn try_reconnect(&mut self) -> Option<MpvHandle> {
        let pipe_path = format!(r"\\.\pipe\{}", self.socket_name);
        match ClientOptions::new().open(&pipe_path) {
            Ok(client) => {
                info!("mpv: reconnected to named pipe");
                Some(start_io_tasks(client))
            }
            Err(e) => {
                warn!("mpv: failed to reconnect to named pipe: {}", e);
                None
            }
        }
    }
}

impl Default for MpvDriver {
    fn default() -> Self {
        Self::new()
    }
}

fn start_io_tasks<S>(stream: S) -> MpvHandle
where
    S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    let reader = BufReader::new(read_half);

    // pending map: req_id → reply channel.  Shared between writer (inserts) and reader (resolves).
    let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
    let (cmd_tx, cmd_rx) = mpsc::channel::<PendingRequest>(64);
    let connected = Arc::new(AtomicBool::new(true));

    tokio::spawn(writer_task(write_half, cmd_rx, pending.clone()));
    let reader = tokio::spawn(reader_task(reader, pending, connected.clone()));

    MpvHandle {
        tx: cmd_tx,
        connected,
        reader: Arc::new(reader.abort_handle()),
    }
}

// ── reader task ───────────────────────────────────────────────────────────────

async fn reader_task<R>(
    mut reader: BufReader<R>,
    pending: PendingMap,
    connected: Arc<AtomicBool>,
) where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut line = String::new();
    loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => {
                debug!("mpv reader: connection closed");
                connected.store(false, Ordering::Release);
                fail_pending(&pending, "mpv IPC connection closed").await;
                break;
            }
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let val: Value = match serde_json::from_str(trimmed) {
                    Ok(v) => v,
                    Err(e) => {
                        debug!("mpv reader: invalid json '{}': {}", trimmed, e);
                        continue;
                    }
                };

                if let Some(req_id) = val.get("request_id").and_then(|v| v.as_u64()) {
                    let mut map = pending.lock().await;
                    if let Some(tx) = map.remove(&req_id) {
                        let result = if val["error"].as_str() == Some("success") {
                            Ok(val)
                        } else {
                            let err = val["error"].as_str().unwrap_or("unknown error").to_string();
                            debug!("mpv reader: response req={} err={}", req_id, err);
                            Err(anyhow::anyhow!("mpv error: {}", err))
                        };
                        let _ = tx.send(result);
                    } else {
                        debug!("mpv reader: response for unknown req={}", req_id);
                    }
                } else {
                    log_event(&val);
                }
            }
            Err(e) => {
                warn!("mpv reader: read error: {}", e);
                connected.store(false, Ordering::Release);
                fail_pending(&pending, "mpv IPC read error").await;
                break;
            }
        }
    }
}

fn log_event(val: &Value) {
    match val.get("event").and_then(|v| v.as_str()) {
        Some("end-file") => {
            let reason = val.get("reason").and_then(|v| v.as_str()).unwrap_or("unknown");
            if reason == "error" || reason == "network" {
                warn!("mpv: stream ended, reason={}", reason);
            } else {
                info!("mpv: end-file reason={}", reason);
            }
        }
        Some(name) => debug!("mpv event: {}", name),
        None => debug!("mpv reader: unsolicited line {}", val),
    }
}

async fn fail_pending(pending: &PendingMap, reason: &str) {
    let mut map = pending.lock().await;
    for (_, tx) in map.drain() {
        let _ = tx.send(Err(anyhow::anyhow!("{}", reason)));
    }
}

// ── writer task ───────────────────────────────────────────────────────────────

async fn writer_task<W>(mut writer: W, mut rx: mpsc::Receiver<PendingRequest>, pending: PendingMap)
where
    W: tokio::io::AsyncWrite + Unpin,
{
    while let Some(req) = rx.recv().await {
        // Register reply channel before writing so reader can match it
        {
            let mut map = pending.lock().await;
            map.insert(req.req_id, req.reply);
        }
        debug!(
            "mpv writer: send req={} payload={}",
            req.req_id,
            req.payload.trim()
        );
        if let Err(e) = writer.write_all(req.payload.as_bytes()).await {
            warn!("mpv writer: write error: {}", e);
            let mut map = pending.lock().await;
            if let Some(tx) = map.remove(&req.req_id) {
                let _ = tx.send(Err(anyhow::anyhow!("mpv write error: {}", e)));
            }
            break;
        }
    }
    debug!("mpv writer: task exiting");
}

// ── AudioTransport ────────────────────────────────────────────────────────────

/// Plays one fixed stream URL through mpv.
pub struct MpvTransport {
    stream_url: String,
    driver: MpvDriver,
    handle: Option<MpvHandle>,
}

impl MpvTransport {
    pub fn new(stream_url: impl Into<String>) -> Self {
        Self {
            stream_url: stream_url.into(),
            driver: MpvDriver::new(),
            handle: None,
        }
    }

    fn drop_handle(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
    }

    async fn ensure_handle(&mut self, volume: f32) -> Result<MpvHandle, TransportError> {
        match &self.handle {
            Some(handle) if handle.is_connected() => return Ok(handle.clone()),
            Some(_) => {
                warn!("mpv: IPC connection lost, dropping handle");
                self.drop_handle();
            }
            None => {}
        }

        let handle = match self.driver.try_reconnect().await {
            Some(h) => h,
            None => self
                .driver
                .spawn_and_connect(volume)
                .await
                .map_err(|e| TransportError::Unavailable(e.to_string()))?,
        };
        self.handle = Some(handle.clone());
        Ok(handle)
    }
}

#[async_trait]
impl AudioTransport for MpvTransport {
    async fn play(&mut self, volume: f32) -> Result<(), TransportError> {
        let handle = self.ensure_handle(volume).await?;
        if let Err(e) = handle.load_stream(&self.stream_url, volume).await {
            // The socket may belong to a stale process; drop it so the next
            // play spawns fresh.
            self.drop_handle();
            return Err(e.into());
        }
        info!("mpv: playing {}", self.stream_url);
        Ok(())
    }

    async fn pause(&mut self) -> Result<(), TransportError> {
        match &self.handle {
            Some(handle) => Ok(handle.stop().await?),
            None => Ok(()),
        }
    }

    async fn set_volume(&mut self, volume: f32) -> Result<(), TransportError> {
        match &self.handle {
            Some(handle) => Ok(handle.set_volume(volume).await?),
            None => Ok(()),
        }
    }

    async fn shutdown(&mut self) {
        if let Some(h) = &self.handle {
            let _ = h.send(json!(["quit"])).await;
        }
        self.drop_handle();
        self.driver.kill().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_volume_percent() {
        assert_eq!(volume_percent(0.5), 50.0);
        assert_eq!(volume_percent(2.0), 100.0);
        assert_eq!(volume_percent(-1.0), 0.0);
    }

    #[tokio::test]
    async fn test_handle_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(4096);
        let handle = start_io_tasks(client);

        // Fake mpv: answer every request with success, after pushing an event.
        tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(server);
            let mut lines = BufReader::new(r).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["request_id"].as_u64().unwrap();
                w.write_all(b"{\"event\":\"start-file\"}\n").await.unwrap();
                let resp = json!({ "request_id": id, "error": "success", "data": null });
                w.write_all(format!("{}\n", resp).as_bytes()).await.unwrap();
            }
        });

        handle.set_volume(0.4).await.unwrap();
        handle.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_handle_notices_closed_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let handle = start_io_tasks(client);
        assert!(handle.is_connected());

        drop(server);
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while handle.is_connected() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(handle.send(json!(["stop"])).await.is_err());
    }

    #[tokio::test]
    async fn test_close_releases_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let handle = start_io_tasks(client);

        handle.close();
        assert!(!handle.is_connected());
        drop(handle);

        // Both halves gone: the other end reads EOF.
        let mut lines = BufReader::new(server).lines();
        let next = tokio::time::timeout(std::time::Duration::from_secs(1), lines.next_line())
            .await
            .unwrap()
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_handle_surfaces_mpv_errors() {
        let (client, server) = tokio::io::duplex(4096);
        let handle = start_io_tasks(client);

        tokio::spawn(async move {
            let (r, mut w) = tokio::io::split(server);
            let mut lines = BufReader::new(r).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let req: Value = serde_json::from_str(&line).unwrap();
                let id = req["request_id"].as_u64().unwrap();
                let resp = json!({ "request_id": id, "error": "property not found" });
                w.write_all(format!("{}\n", resp).as_bytes()).await.unwrap();
            }
        });

        let err = handle.send(json!(["get_property", "nope"])).await.unwrap_err();
        assert!(err.to_string().contains("property not found"));
    }
}
