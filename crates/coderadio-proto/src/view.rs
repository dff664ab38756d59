//! Display-ready projection of [`PlayerState`].
//!
//! Front ends (the TUI, the HTTP API) render this instead of poking at raw
//! state, so "Loading..." placeholders and time formatting live in one place.

use crate::state::PlayerState;
use serde::Serialize;

pub const LOADING_TITLE: &str = "Loading...";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NowPlayingView {
    pub rev: u64,
    pub title: String,
    pub artist: String,
    pub art: Option<String>,
    pub elapsed: String,
    pub duration: String,
    pub remaining: String,
    pub progress: f64,
    pub listeners: u32,
    pub volume_percent: u8,
    pub playing: bool,
    pub loading: bool,
    pub history: Vec<HistoryRow>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryRow {
    pub title: String,
    pub artist: String,
    pub art: String,
}

impl NowPlayingView {
    pub fn from_state(state: &PlayerState) -> Self {
        let (title, artist, art) = match &state.current_song {
            Some(song) => (
                song.title.clone(),
                song.artist.clone(),
                Some(song.art.clone()).filter(|a| !a.is_empty()),
            ),
            None => (LOADING_TITLE.to_string(), String::new(), None),
        };

        Self {
            rev: state.rev,
            title,
            artist,
            art,
            elapsed: fmt_time(state.elapsed_secs),
            duration: fmt_time(state.duration_secs),
            remaining: format!("-{}", fmt_time(state.remaining_secs())),
            progress: state.progress_ratio(),
            listeners: state.listeners,
            volume_percent: (state.volume * 100.0).round().clamp(0.0, 100.0) as u8,
            playing: state.playing,
            loading: state.loading,
            history: state
                .history
                .iter()
                .map(|s| HistoryRow {
                    title: s.title.clone(),
                    artist: s.artist.clone(),
                    art: s.art.clone(),
                })
                .collect(),
        }
    }
}

/// `m:ss`, or `h:mm:ss` from one hour up.
pub fn fmt_time(secs: u32) -> String {
    let h = secs / 3600;
    let m = (secs % 3600) / 60;
    let s = secs % 60;
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Song;

    #[test]
    fn test_fmt_time() {
        assert_eq!(fmt_time(0), "0:00");
        assert_eq!(fmt_time(59), "0:59");
        assert_eq!(fmt_time(179), "2:59");
        assert_eq!(fmt_time(3725), "1:02:05");
    }

    #[test]
    fn test_loading_view() {
        let view = NowPlayingView::from_state(&PlayerState::new(0.5));
        assert_eq!(view.title, LOADING_TITLE);
        assert!(view.artist.is_empty());
        assert!(view.art.is_none());
        assert!(view.loading);
        assert_eq!(view.volume_percent, 50);
        assert_eq!(view.progress, 0.0);
    }

    #[test]
    fn test_playing_view() {
        let state = PlayerState {
            playing: true,
            loading: false,
            current_song: Some(Song {
                text: "Tomppabeats - Monday Loop".into(),
                artist: "Tomppabeats".into(),
                title: "Monday Loop".into(),
                art: "https://cdn.example/monday.jpg".into(),
            }),
            elapsed_secs: 61,
            duration_secs: 122,
            listeners: 9,
            ..PlayerState::default()
        };
        let view = NowPlayingView::from_state(&state);
        assert_eq!(view.title, "Monday Loop");
        assert_eq!(view.elapsed, "1:01");
        assert_eq!(view.duration, "2:02");
        assert_eq!(view.remaining, "-1:01");
        assert!((view.progress - 0.5).abs() < 1e-9);
        assert_eq!(view.art.as_deref(), Some("https://cdn.example/monday.jpg"));
    }
}
