use serde::{Deserialize, Serialize};

/// User intents, from the TUI key handler or the HTTP API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "cmd")]
pub enum Command {
    TogglePlayback,
    SetVolume { value: f32 },
    /// Save artwork to disk: the current song's, or the history entry at
    /// `history_index` (0 = most recent).
    DownloadArtwork {
        #[serde(default)]
        history_index: Option<usize>,
    },
    /// Refetch the snapshot now instead of waiting for the song boundary.
    Resync,
}
