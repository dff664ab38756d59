//! App — terminal event loop.
//!
//! Architecture:
//! - A blocking task reads crossterm events and forwards them as `AppMessage`s.
//! - Engine state arrives through a `watch` channel, notifications through an
//!   `mpsc` channel (shown as toasts).
//! - Key presses become `Command`s sent to the SyncEngine's event channel.
//!   Up/down pick a history row; `d` then saves that row's artwork.
//! - The loop redraws only when something changed.

use std::io;
use std::time::Duration;

use coderadio_daemon::core::EngineEvent;
use coderadio_daemon::sinks::Notification;
use coderadio_proto::protocol::Command;
use coderadio_proto::state::{clamp_volume, PlayerState};
use coderadio_proto::view::NowPlayingView;
use ratatui::crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{backend::CrosstermBackend, Terminal};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::ui;
use crate::widgets::toast::ToastManager;

const VOLUME_STEP: f32 = 0.1;
const INPUT_POLL: Duration = Duration::from_millis(250);

enum AppMessage {
    Event(Event),
}

#[derive(Debug, Clone, PartialEq)]
enum Intent {
    Engine(Command),
    /// Move the history cursor.  `None` goes back to the current song.
    Select(Option<usize>),
    Quit,
}

pub struct App {
    state_rx: watch::Receiver<PlayerState>,
    notify_rx: mpsc::Receiver<Notification>,
    event_tx: mpsc::Sender<EngineEvent>,
    view: NowPlayingView,
    /// Highlighted history row, if any.
    selected: Option<usize>,
    toast: ToastManager,
    should_quit: bool,
}

impl App {
    pub fn new(
        state_rx: watch::Receiver<PlayerState>,
        notify_rx: mpsc::Receiver<Notification>,
        event_tx: mpsc::Sender<EngineEvent>,
    ) -> Self {
        let view = NowPlayingView::from_state(&state_rx.borrow());
        Self {
            state_rx,
            notify_rx,
            event_tx,
            view,
            selected: None,
            toast: ToastManager::new(),
            should_quit: false,
        }
    }

    // ── Main run loop ─────────────────────────────────────────────────────────

    pub async fn run(mut self) -> anyhow::Result<()> {
        debug!("run(): enabling raw mode");
        enable_raw_mode()?;
        let mut stdout = io::stdout();
        execute!(stdout, EnterAlternateScreen)?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend)?;

        let (tx, mut rx) = mpsc::channel::<AppMessage>(64);

        // ── Background task: keyboard events ──────────────────────────────────
        tokio::task::spawn_blocking(move || loop {
            match event::poll(INPUT_POLL) {
                Ok(true) => match event::read() {
                    Ok(ev) => {
                        if tx.blocking_send(AppMessage::Event(ev)).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                },
                Ok(false) => {
                    if tx.is_closed() {
                        break;
                    }
                }
                Err(_) => break,
            }
        });

        // Toast expiry check
        let mut toast_tick = tokio::time::interval(Duration::from_millis(250));
        toast_tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // ── Main loop ─────────────────────────────────────────────────────────
        let mut needs_redraw = true;
        let result: anyhow::Result<()> = loop {
            if needs_redraw {
                if let Err(e) = terminal.draw(|f| ui::draw(f, &self.view, self.selected, &self.toast)) {
                    break Err(e.into());
                }
            }
            needs_redraw = false;

            if self.should_quit {
                break Ok(());
            }

            tokio::select! {
                Some(AppMessage::Event(ev)) = rx.recv() => {
                    needs_redraw = self.handle_event(ev).await;
                }

                changed = self.state_rx.changed() => {
                    if changed.is_err() {
                        warn!("engine state channel closed, exiting");
                        self.should_quit = true;
                    } else {
                        self.view = NowPlayingView::from_state(&self.state_rx.borrow_and_update());
                        self.selected = clamp_selection(self.selected, self.view.history.len());
                    }
                    needs_redraw = true;
                }

                Some(note) = self.notify_rx.recv() => {
                    self.toast.notify(&note.title, &note.body);
                    needs_redraw = true;
                }

                _ = toast_tick.tick() => {
                    if !self.toast.is_empty() {
                        self.toast.tick();
                        needs_redraw = true;
                    }
                }
            }
        };

        // ── Teardown ──────────────────────────────────────────────────────────
        disable_raw_mode()?;
        execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
        terminal.show_cursor()?;

        result
    }

    /// Returns true when the screen should be redrawn.
    async fn handle_event(&mut self, ev: Event) -> bool {
        match ev {
            Event::Key(key) => {
                let Some(intent) = intent_for_key(
                    key,
                    self.view_volume(),
                    self.selected,
                    self.view.history.len(),
                ) else {
                    return false;
                };
                debug!("key {:?} → {:?}", key.code, intent);
                match intent {
                    Intent::Quit => {
                        info!("quit requested");
                        self.should_quit = true;
                    }
                    Intent::Select(selected) => self.selected = selected,
                    Intent::Engine(cmd) => {
                        if self.event_tx.send(EngineEvent::Command(cmd)).await.is_err() {
                            warn!("engine is gone, exiting");
                            self.should_quit = true;
                        }
                    }
                }
                true
            }
            Event::Resize(_, _) => true,
            _ => false,
        }
    }

    fn view_volume(&self) -> f32 {
        self.state_rx.borrow().volume
    }
}

fn intent_for_key(
    key: KeyEvent,
    volume: f32,
    selected: Option<usize>,
    history_len: usize,
) -> Option<Intent> {
    if key.kind != KeyEventKind::Press {
        return None;
    }
    let intent = match key.code {
        KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => Intent::Quit,
        // Esc first leaves the history cursor, then quits
        KeyCode::Esc if selected.is_some() => Intent::Select(None),
        KeyCode::Char('q') | KeyCode::Esc => Intent::Quit,
        KeyCode::Down | KeyCode::Char('j') => Intent::Select(select_next(selected, history_len)),
        KeyCode::Up | KeyCode::Char('k') => Intent::Select(select_prev(selected)),
        KeyCode::Char(' ') => Intent::Engine(Command::TogglePlayback),
        KeyCode::Char('+') | KeyCode::Char('=') => Intent::Engine(Command::SetVolume {
            value: step_volume(volume, VOLUME_STEP),
        }),
        KeyCode::Char('-') | KeyCode::Char('_') => Intent::Engine(Command::SetVolume {
            value: step_volume(volume, -VOLUME_STEP),
        }),
        KeyCode::Char('d') => Intent::Engine(Command::DownloadArtwork {
            history_index: selected,
        }),
        KeyCode::Char('r') => Intent::Engine(Command::Resync),
        _ => return None,
    };
    Some(intent)
}

fn select_next(selected: Option<usize>, history_len: usize) -> Option<usize> {
    match selected {
        _ if history_len == 0 => None,
        None => Some(0),
        Some(i) => Some((i + 1).min(history_len - 1)),
    }
}

fn select_prev(selected: Option<usize>) -> Option<usize> {
    selected.and_then(|i| i.checked_sub(1))
}

/// Keep the cursor on a row that still exists after the history changed.
fn clamp_selection(selected: Option<usize>, history_len: usize) -> Option<usize> {
    let i = selected?;
    if history_len == 0 {
        None
    } else {
        Some(i.min(history_len - 1))
    }
}

/// Step and snap to the nearest tenth so repeated presses land on round values.
fn step_volume(volume: f32, delta: f32) -> f32 {
    clamp_volume(((volume + delta) * 10.0).round() / 10.0)
}
