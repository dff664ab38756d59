//! Now-playing snapshots and their wire format.
//!
//! The station publishes a static JSON document that is rewritten on the
//! server side whenever the song changes:
//!
//! ```text
//! {
//!   "now_playing": { "duration": 180, "elapsed": 12, "song": { .. } },
//!   "song_history": [ { "song": { .. } }, .. ],
//!   "listeners": { "current": 42 }
//! }
//! ```
//!
//! Decoding is all-or-nothing: a caller either gets a complete [`Snapshot`]
//! or a [`SnapshotError`].

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// One song as the station describes it.  `text` is the raw "artist - title"
/// string and doubles as the song's identity in history lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Song {
    #[serde(default)]
    pub text: String,
    pub artist: String,
    pub title: String,
    /// Artwork URL.  Some deployments omit it.
    #[serde(default)]
    pub art: String,
}

impl Song {
    fn normalized(mut self) -> Self {
        if self.text.trim().is_empty() {
            self.text = format!("{} - {}", self.artist, self.title);
        }
        self
    }
}

/// A point-in-time read of the station's now-playing state.
///
/// `elapsed_secs <= duration_secs` usually holds but is not guaranteed by the
/// server; consumers clamp.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub song: Song,
    pub duration_secs: u32,
    pub elapsed_secs: u32,
    pub listeners: u32,
    /// Most-recent-first, unique by `Song::text`.
    pub history: Vec<Song>,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("malformed now-playing JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid now-playing data: {0}")]
    Invalid(String),
}

// ── wire types ────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct NowPlayingResponse {
    now_playing: NowPlayingDto,
    #[serde(default)]
    song_history: Vec<HistoryItemDto>,
    /// Shape varies between deployments; anything unusable counts as zero.
    #[serde(default)]
    listeners: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct NowPlayingDto {
    duration: i64,
    elapsed: i64,
    song: Song,
}

#[derive(Debug, Deserialize)]
struct HistoryItemDto {
    song: Song,
}

impl Snapshot {
    /// Decode a response body.  At most `history_limit` history entries are kept.
    pub fn from_json(body: &[u8], history_limit: usize) -> Result<Self, SnapshotError> {
        let resp: NowPlayingResponse = serde_json::from_slice(body)?;

        let duration_secs = non_negative("duration", resp.now_playing.duration)?;
        let elapsed_secs = non_negative("elapsed", resp.now_playing.elapsed)?;

        let mut seen = HashSet::new();
        let history = resp
            .song_history
            .into_iter()
            .map(|item| item.song.normalized())
            .filter(|song| seen.insert(song.text.clone()))
            .take(history_limit)
            .collect();

        Ok(Self {
            song: resp.now_playing.song.normalized(),
            duration_secs,
            elapsed_secs,
            listeners: listener_count(resp.listeners.as_ref()),
            history,
        })
    }
}

fn non_negative(field: &str, value: i64) -> Result<u32, SnapshotError> {
    u32::try_from(value)
        .map_err(|_| SnapshotError::Invalid(format!("{} out of range: {}", field, value)))
}

fn listener_count(listeners: Option<&serde_json::Value>) -> u32 {
    let current = listeners
        .and_then(|l| l.get("current"))
        .and_then(|c| c.as_i64())
        .unwrap_or(0);
    current.clamp(0, u32::MAX as i64) as u32
}
