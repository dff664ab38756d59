/// SyncEngine — single-owner event loop for the player state.
///
/// Everything that wants to change playback state sends an `EngineEvent` to
/// this loop: user commands (TUI keys, HTTP API), clock ticks, and the
/// results of snapshot fetches that ran on their own tasks.  The engine owns
/// `PlayerState` and the `AudioTransport` exclusively; observers get clones
/// through a `tokio::sync::watch` channel.
///
/// Between snapshots the engine advances `elapsed` locally, one second per
/// tick.  When the local clock reaches the song's duration it refetches the
/// snapshot instead of guessing what plays next.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use coderadio_proto::config::Config;
use coderadio_proto::protocol::Command;
use coderadio_proto::snapshot::Snapshot;
use coderadio_proto::state::{clamp_volume, PersistentState, PlayerState};
use rand::Rng;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::artwork::ArtworkDownloader;
use crate::clock::{ProgressClock, TICK_PERIOD};
use crate::error::FetchError;
use crate::fetcher::SnapshotFetcher;
use crate::sinks::NotificationSink;
use crate::transport::AudioTransport;

const UNAVAILABLE_TITLE: &str = "Station unavailable";
const PLAYBACK_FAILED_TITLE: &str = "Playback failed";
const RESYNC_FAILED_TITLE: &str = "Resync failed";
const NO_ARTWORK_TITLE: &str = "Artwork download failed";

const MAX_JITTER_MS: u64 = 250;

// ── EngineEvent ───────────────────────────────────────────────────────────────

/// All inputs into the SyncEngine loop.
#[derive(Debug)]
pub enum EngineEvent {
    /// A command from the TUI or HTTP API.
    Command(Command),
    /// Progress clock tick, tagged with the clock epoch that produced it.
    Tick { epoch: u64 },
    /// A spawned snapshot fetch finished.
    SnapshotFetched {
        result: Result<Snapshot, FetchError>,
        reason: ResyncReason,
    },
    Shutdown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncReason {
    /// Local elapsed time reached the known duration.
    Boundary,
    /// Requested by the user.
    Manual,
}

// ── configuration & collaborators ─────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub bootstrap_attempts: u32,
    pub retry_base: Duration,
    pub retry_max: Duration,
    pub autoplay: bool,
    /// Where the volume is persisted.  `None` keeps it in memory only.
    pub state_file: Option<PathBuf>,
    pub tick_period: Duration,
}

impl EngineConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            bootstrap_attempts: config.sync.bootstrap_attempts,
            retry_base: Duration::from_secs(config.sync.retry_base_secs),
            retry_max: Duration::from_secs(config.sync.retry_max_secs),
            autoplay: config.player.autoplay,
            state_file: Some(config.daemon.state_file.clone()),
            tick_period: TICK_PERIOD,
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

pub struct Collaborators {
    pub fetcher: Arc<dyn SnapshotFetcher>,
    pub transport: Box<dyn AudioTransport>,
    pub notifier: Arc<dyn NotificationSink>,
    pub artwork: ArtworkDownloader,
}

/// `base * 2^failures`, capped at `max`.
pub fn backoff_delay(base: Duration, max: Duration, failures: u32) -> Duration {
    let factor = 1u32.checked_shl(failures).unwrap_or(u32::MAX);
    base.saturating_mul(factor).min(max)
}

async fn save_volume(path: &Path, volume: f32) {
    let json = match (PersistentState { volume }).to_json() {
        Ok(json) => json,
        Err(e) => {
            warn!("SyncEngine: cannot serialise state: {}", e);
            return;
        }
    };
    if let Some(parent) = path.parent() {
        if let Err(e) = tokio::fs::create_dir_all(parent).await {
            warn!("SyncEngine: cannot create {:?}: {}", parent, e);
        }
    }
    if let Err(e) = tokio::fs::write(path, json).await {
        warn!("SyncEngine: cannot save state to {:?}: {}", path, e);
    }
}

/// Park every event except `Shutdown` in `held`.  Returns on `Shutdown` or
/// when the channel closes.
async fn hold_until_shutdown(
    event_rx: &mut mpsc::Receiver<EngineEvent>,
    held: &mut Vec<EngineEvent>,
) {
    while let Some(evt) = event_rx.recv().await {
        match evt {
            EngineEvent::Shutdown => return,
            other => held.push(other),
        }
    }
}

fn jitter() -> Duration {
    Duration::from_millis(rand::thread_rng().gen_range(0..=MAX_JITTER_MS))
}

// ── SyncEngine ────────────────────────────────────────────────────────────────

pub struct SyncEngine {
    config: EngineConfig,
    state: PlayerState,
    state_tx: watch::Sender<PlayerState>,
    fetcher: Arc<dyn SnapshotFetcher>,
    transport: Box<dyn AudioTransport>,
    notifier: Arc<dyn NotificationSink>,
    artwork: ArtworkDownloader,
    clock: ProgressClock,
    /// Fetch completions are sent back into our own event loop.
    event_tx: mpsc::Sender<EngineEvent>,
    fetch_in_flight: bool,
    /// Consecutive failed resyncs; reset by any successful fetch.
    resync_failures: u32,
    /// Boundary ticks left to sit out before the next resync attempt.
    resync_cooldown_ticks: u32,
}

impl SyncEngine {
    pub fn new(
        config: EngineConfig,
        initial_volume: f32,
        collaborators: Collaborators,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let state = PlayerState::new(initial_volume);
        let (state_tx, _) = watch::channel(state.clone());
        let clock = ProgressClock::new(event_tx.clone(), config.tick_period);

        Self {
            config,
            state,
            state_tx,
            fetcher: collaborators.fetcher,
            transport: collaborators.transport,
            notifier: collaborators.notifier,
            artwork: collaborators.artwork,
            clock,
            event_tx,
            fetch_in_flight: false,
            resync_failures: 0,
            resync_cooldown_ticks: 0,
        }
    }

    /// Change-notified, read-only view of the state (for the TUI and HTTP API).
    pub fn subscribe(&self) -> watch::Receiver<PlayerState> {
        self.state_tx.subscribe()
    }

    pub fn state(&self) -> &PlayerState {
        &self.state
    }

    pub fn fetch_in_flight(&self) -> bool {
        self.fetch_in_flight
    }

    fn publish(&mut self) {
        self.state.rev += 1;
        self.state_tx.send_replace(self.state.clone());
    }

    // ── startup ───────────────────────────────────────────────────────────────

    /// Initial fetch with bounded retry.  Returns true once a snapshot has
    /// been applied.  On exhaustion the engine stays `loading`, nothing
    /// plays, and the user is told; a manual resync can still recover.
    pub async fn bootstrap(&mut self) -> bool {
        if let Err(e) = self.notifier.authorize() {
            warn!("SyncEngine: notifications unavailable: {}", e);
        }

        let attempts = self.config.bootstrap_attempts.max(1);
        let mut last_error = None;
        for attempt in 0..attempts {
            debug!("SyncEngine: bootstrap fetch {}/{}", attempt + 1, attempts);
            match self.fetcher.fetch().await {
                Ok(snapshot) => {
                    self.apply_snapshot(&snapshot);
                    if self.config.autoplay {
                        self.toggle_playback().await;
                    }
                    return true;
                }
                Err(e) => {
                    warn!(
                        "SyncEngine: bootstrap attempt {}/{} failed: {}",
                        attempt + 1,
                        attempts,
                        e
                    );
                    last_error = Some(e);
                }
            }
            if attempt + 1 < attempts {
                let delay =
                    backoff_delay(self.config.retry_base, self.config.retry_max, attempt) + jitter();
                debug!("SyncEngine: retrying in {:?}", delay);
                tokio::time::sleep(delay).await;
            }
        }

        let reason = last_error
            .map(|e| e.to_string())
            .unwrap_or_else(|| "no response".to_string());
        self.notifier.notify(
            UNAVAILABLE_TITLE,
            &format!("Could not reach the station: {}", reason),
        );
        false
    }

    // ── event loop ────────────────────────────────────────────────────────────

    /// Bootstrap, then run the event loop.  A `Shutdown` (or a closed
    /// channel) while bootstrap is still retrying cancels it; any other
    /// event received meanwhile is handled once bootstrap is done.
    pub async fn start(mut self, mut event_rx: mpsc::Receiver<EngineEvent>) -> anyhow::Result<()> {
        let mut held = Vec::new();
        let interrupted = tokio::select! {
            _ = self.bootstrap() => false,
            _ = hold_until_shutdown(&mut event_rx, &mut held) => true,
        };
        if interrupted {
            info!("SyncEngine: shutdown during bootstrap");
            self.shutdown().await;
            return Ok(());
        }

        for evt in held {
            self.handle_event(evt).await;
        }
        self.run(event_rx).await
    }

    /// Run the event loop.  Returns when a `Shutdown` event is received or
    /// the event channel is closed, after stopping the transport.
    pub async fn run(mut self, mut event_rx: mpsc::Receiver<EngineEvent>) -> anyhow::Result<()> {
        info!("SyncEngine: starting event loop");
        loop {
            match event_rx.recv().await {
                None => {
                    info!("SyncEngine: event channel closed, shutting down");
                    break;
                }
                Some(evt) => {
                    if !self.handle_event(evt).await {
                        info!("SyncEngine: shutdown requested");
                        break;
                    }
                }
            }
        }
        self.shutdown().await;
        Ok(())
    }

    /// Handle one event.  False means the loop should stop.
    pub async fn handle_event(&mut self, evt: EngineEvent) -> bool {
        match evt {
            EngineEvent::Command(cmd) => {
                info!("SyncEngine: command {:?}", cmd);
                self.handle_command(cmd).await;
            }
            EngineEvent::Tick { epoch } => {
                if self.clock.accept(epoch) {
                    self.on_tick();
                } else {
                    debug!("SyncEngine: dropping stale tick epoch={}", epoch);
                }
            }
            EngineEvent::SnapshotFetched { result, reason } => {
                self.on_snapshot_fetched(result, reason);
            }
            EngineEvent::Shutdown => return false,
        }
        true
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::TogglePlayback => self.toggle_playback().await,
            Command::SetVolume { value } => self.set_volume(value).await,
            Command::DownloadArtwork { history_index } => self.download_artwork(history_index),
            Command::Resync => self.request_resync(ResyncReason::Manual),
        }
    }

    // ── state transitions ─────────────────────────────────────────────────────

    /// Replace the displayed position and metadata with `snapshot`.
    /// Applying the same snapshot twice leaves the state (and `rev`) alone.
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) {
        let mut next = self.state.clone();
        next.current_song = Some(snapshot.song.clone());
        next.duration_secs = snapshot.duration_secs;
        next.elapsed_secs = snapshot.elapsed_secs.min(snapshot.duration_secs);
        next.listeners = snapshot.listeners;
        next.history = snapshot.history.clone();
        next.loading = false;

        if next == self.state {
            return;
        }
        if self.state.current_song.as_ref().map(|s| &s.text) != Some(&snapshot.song.text) {
            info!(
                "SyncEngine: now playing {:?} ({}/{}s)",
                snapshot.song.text, next.elapsed_secs, next.duration_secs
            );
        }
        self.state = next;
        self.publish();
    }

    pub async fn toggle_playback(&mut self) {
        if self.state.playing {
            if let Err(e) = self.transport.pause().await {
                warn!("SyncEngine: transport pause failed: {}", e);
            }
            self.clock.disarm();
            self.state.playing = false;
            info!("SyncEngine: Playing → Paused");
            self.publish();
            return;
        }

        match self.transport.play(self.state.volume).await {
            Ok(()) => {
                self.state.playing = true;
                self.clock.arm();
                info!("SyncEngine: Paused → Playing");
                self.publish();
            }
            Err(e) => {
                warn!("SyncEngine: transport play failed: {}", e);
                self.notifier.notify(PLAYBACK_FAILED_TITLE, &e.to_string());
            }
        }
    }

    pub async fn set_volume(&mut self, value: f32) {
        let volume = clamp_volume(value);
        if volume == self.state.volume {
            return;
        }
        self.state.volume = volume;
        self.publish();
        if let Some(path) = self.config.state_file.clone() {
            save_volume(&path, volume).await;
        }

        if self.state.playing {
            if let Err(e) = self.transport.set_volume(volume).await {
                warn!("SyncEngine: transport set_volume failed: {}", e);
            }
        }
    }

    fn on_tick(&mut self) {
        if self.state.elapsed_secs.saturating_add(1) < self.state.duration_secs {
            self.state.elapsed_secs += 1;
            self.publish();
            return;
        }

        if self.resync_cooldown_ticks > 0 {
            self.resync_cooldown_ticks -= 1;
            debug!(
                "SyncEngine: at boundary, next resync in {} ticks",
                self.resync_cooldown_ticks
            );
            return;
        }
        self.request_resync(ResyncReason::Boundary);
    }

    /// Spawn a snapshot fetch unless one is already outstanding.
    fn request_resync(&mut self, reason: ResyncReason) {
        if self.fetch_in_flight {
            debug!("SyncEngine: resync ({:?}) coalesced with in-flight fetch", reason);
            return;
        }
        self.fetch_in_flight = true;
        debug!("SyncEngine: dispatching fetch ({:?})", reason);

        let fetcher = Arc::clone(&self.fetcher);
        let tx = self.event_tx.clone();
        tokio::spawn(async move {
            let result = fetcher.fetch().await;
            let _ = tx.send(EngineEvent::SnapshotFetched { result, reason }).await;
        });
    }

    fn on_snapshot_fetched(&mut self, result: Result<Snapshot, FetchError>, reason: ResyncReason) {
        self.fetch_in_flight = false;
        match result {
            Ok(snapshot) => {
                if self.resync_failures > 0 {
                    info!(
                        "SyncEngine: resync recovered after {} failures",
                        self.resync_failures
                    );
                }
                self.resync_failures = 0;
                self.resync_cooldown_ticks = 0;
                self.apply_snapshot(&snapshot);
            }
            Err(e) if reason == ResyncReason::Manual => {
                // The boundary backoff only counts boundary failures.
                warn!("SyncEngine: manual resync failed: {}", e);
                self.notifier.notify(RESYNC_FAILED_TITLE, &e.to_string());
            }
            Err(e) => {
                self.resync_failures += 1;
                let delay = backoff_delay(
                    self.config.retry_base,
                    self.config.retry_max,
                    self.resync_failures - 1,
                );
                let period_ms = self.config.tick_period.as_millis().max(1);
                self.resync_cooldown_ticks = (delay.as_millis() / period_ms) as u32;
                warn!(
                    "SyncEngine: boundary resync failed ({} in a row), holding state for {} ticks: {}",
                    self.resync_failures, self.resync_cooldown_ticks, e
                );
            }
        }
    }

    /// Save the artwork of the current song, or of `history[index]`,
    /// without blocking the loop.  The file is named after that song.
    pub fn download_artwork(&self, history_index: Option<usize>) {
        let song = match history_index {
            None => self.state.current_song.as_ref(),
            Some(index) => self.state.history.get(index),
        };
        let Some(song) = song else {
            let body = match history_index {
                Some(index) => format!("No history entry {}", index + 1),
                None => "Nothing is playing yet".to_string(),
            };
            self.notifier.notify(NO_ARTWORK_TITLE, &body);
            return;
        };
        if song.art.trim().is_empty() {
            self.notifier
                .notify(NO_ARTWORK_TITLE, &format!("{} has no artwork", song.text));
            return;
        }

        debug!("SyncEngine: downloading artwork {}", song.art);
        self.artwork.run_download(song.art.clone(), song.text.clone());
    }

    async fn shutdown(&mut self) {
        info!("SyncEngine: cleanup — stopping transport");
        self.clock.disarm();
        if self.state.playing {
            if let Err(e) = self.transport.pause().await {
                warn!("SyncEngine: transport pause failed: {}", e);
            }
            self.state.playing = false;
            self.publish();
        }
        self.transport.shutdown().await;
    }
}
