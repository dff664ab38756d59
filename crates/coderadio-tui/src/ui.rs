//! Rendering of the now-playing screen.

use coderadio_proto::view::NowPlayingView;
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, Paragraph},
    Frame,
};
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::theme::{
    style_accent, style_border, style_connecting, style_default, style_muted, style_playing,
    style_secondary, style_title,
};
use crate::widgets::progress_bar::draw_progress;
use crate::widgets::toast::ToastManager;

const KEY_HINTS: &str =
    "space play/pause · +/- volume · ↑/↓ pick history · d save art · r resync · q quit";

/// `selected` is the highlighted history row; `d` saves its artwork.
pub fn draw(
    frame: &mut Frame,
    view: &NowPlayingView,
    selected: Option<usize>,
    toasts: &ToastManager,
) {
    let area = frame.area();
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1), // header
            Constraint::Length(4), // now playing
            Constraint::Min(3),    // history
            Constraint::Length(1), // key hints
        ])
        .split(area);

    draw_header(frame, chunks[0], view);
    draw_now_playing(frame, chunks[1], view);
    draw_history(frame, chunks[2], view, selected);
    frame.render_widget(
        Paragraph::new(Span::styled(truncate(KEY_HINTS, chunks[3].width as usize), style_muted())),
        chunks[3],
    );

    toasts.draw(frame, area);
}

fn draw_header(frame: &mut Frame, area: Rect, view: &NowPlayingView) {
    let status = if view.loading {
        Span::styled("… connecting", style_connecting())
    } else if view.playing {
        Span::styled("▶ playing", style_playing())
    } else {
        Span::styled("⏸ paused", style_secondary())
    };
    let line = Line::from(vec![
        Span::styled(" CODE RADIO ", style_accent()),
        status,
        Span::styled(
            format!("  ·  {} listening  ·  vol {}%", view.listeners, view.volume_percent),
            style_secondary(),
        ),
    ]);
    frame.render_widget(Paragraph::new(line), area);
}

fn draw_now_playing(frame: &mut Frame, area: Rect, view: &NowPlayingView) {
    let block = Block::default().borders(Borders::BOTTOM).border_style(style_border());
    let inner = block.inner(area);
    frame.render_widget(block, area);

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(inner);

    let width = inner.width.saturating_sub(1) as usize;
    frame.render_widget(
        Paragraph::new(Span::styled(format!(" {}", truncate(&view.title, width)), style_title())),
        rows[0],
    );
    frame.render_widget(
        Paragraph::new(Span::styled(
            format!(" {}", truncate(&view.artist, width)),
            style_secondary(),
        )),
        rows[1],
    );

    if !view.loading {
        let bar_area = Rect {
            x: rows[2].x + 1,
            width: rows[2].width.saturating_sub(2),
            ..rows[2]
        };
        let right = format!("{} ({})", view.duration, view.remaining);
        draw_progress(frame, bar_area, view.progress, &view.elapsed, &right);
    }
}

fn draw_history(frame: &mut Frame, area: Rect, view: &NowPlayingView, selected: Option<usize>) {
    let block = Block::default()
        .title(Span::styled(" Recently played ", style_secondary()))
        .borders(Borders::NONE);
    let width = area.width.saturating_sub(3) as usize;
    let items: Vec<ListItem> = view
        .history
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let text = if row.artist.is_empty() {
                row.title.clone()
            } else {
                format!("{} — {}", row.title, row.artist)
            };
            let (marker, style) = if selected == Some(i) {
                ("›", style_accent())
            } else {
                ("·", style_default())
            };
            ListItem::new(Span::styled(
                format!(" {} {}", marker, truncate(&text, width)),
                style,
            ))
        })
        .collect();
    frame.render_widget(List::new(items).block(block), area);
}

/// Cut `s` to at most `max` terminal columns, marking the cut with `…`.
fn truncate(s: &str, max: usize) -> String {
    if s.width() <= max {
        return s.to_string();
    }
    if max == 0 {
        return String::new();
    }
    let mut out = String::new();
    let mut used = 0;
    for c in s.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > max - 1 {
            break;
        }
        out.push(c);
        used += w;
    }
    out.push('…');
    out
}
