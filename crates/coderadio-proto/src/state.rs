use crate::snapshot::Song;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Live playback state.  Only the sync engine mutates it; everybody else
/// sees clones through a watch channel.
///
/// `rev` is a monotonically increasing counter incremented every time the
/// state changes, so observers can tell a fresh value from a repeat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerState {
    pub rev: u64,
    pub playing: bool,
    pub volume: f32,
    pub current_song: Option<Song>,
    pub elapsed_secs: u32,
    pub duration_secs: u32,
    pub listeners: u32,
    pub history: Vec<Song>,
    /// True until the first snapshot has been applied.
    pub loading: bool,
}

impl PlayerState {
    pub fn new(volume: f32) -> Self {
        Self {
            rev: 0,
            playing: false,
            volume: clamp_volume(volume),
            current_song: None,
            elapsed_secs: 0,
            duration_secs: 0,
            listeners: 0,
            history: Vec::new(),
            loading: true,
        }
    }

    /// elapsed / duration in `0.0..=1.0`; zero for an unknown duration.
    pub fn progress_ratio(&self) -> f64 {
        if self.duration_secs == 0 {
            return 0.0;
        }
        (self.elapsed_secs as f64 / self.duration_secs as f64).clamp(0.0, 1.0)
    }

    pub fn remaining_secs(&self) -> u32 {
        self.duration_secs.saturating_sub(self.elapsed_secs)
    }
}

impl Default for PlayerState {
    fn default() -> Self {
        Self::new(0.5)
    }
}

/// Clamp a requested volume into `0.0..=1.0`.  NaN is treated as silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// The bits of player state that survive a restart.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistentState {
    pub volume: f32,
}

impl Default for PersistentState {
    fn default() -> Self {
        Self { volume: 0.5 }
    }
}

impl PersistentState {
    /// Missing or unreadable files fall back to `default_volume`.
    pub fn load(state_file: &Path, default_volume: f32) -> Self {
        if let Ok(content) = std::fs::read_to_string(state_file) {
            if let Ok(persistent) = serde_json::from_str::<PersistentState>(&content) {
                return Self {
                    volume: clamp_volume(persistent.volume),
                };
            }
            tracing::warn!("Ignoring unreadable state file {:?}", state_file);
        }
        Self {
            volume: clamp_volume(default_volume),
        }
    }

    pub fn to_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
