//! Smooth Unicode progress bar widget.

use ratatui::{
    layout::Rect,
    style::Style,
    text::{Line, Span},
    widgets::Paragraph,
    Frame,
};

use crate::theme::{C_MUTED, C_PLAYING, C_SECONDARY};

const BLOCKS: [char; 9] = [' ', '▏', '▎', '▍', '▌', '▋', '▊', '▉', '█'];

/// Render a smooth progress bar in `area`, flanked by the elapsed and
/// duration labels.  `progress` is 0.0..=1.0.
pub fn draw_progress(frame: &mut Frame, area: Rect, progress: f64, left: &str, right: &str) {
    if area.width < 4 || area.height == 0 {
        return;
    }

    let label_w = (left.len() + right.len() + 2) as u16;
    let bar_w = area.width.saturating_sub(label_w).max(4) as usize;

    let mut spans = Vec::new();
    if !left.is_empty() {
        spans.push(Span::styled(
            format!("{} ", left),
            Style::default().fg(C_SECONDARY),
        ));
    }
    spans.push(Span::styled(
        bar_cells(progress, bar_w),
        Style::default().fg(C_PLAYING),
    ));
    if !right.is_empty() {
        spans.push(Span::styled(
            format!(" {}", right),
            Style::default().fg(C_MUTED),
        ));
    }

    frame.render_widget(Paragraph::new(Line::from(spans)), area);
}

/// Exactly `width` cells; 8 eighths per cell.
fn bar_cells(progress: f64, width: usize) -> String {
    let eighths = (progress.clamp(0.0, 1.0) * width as f64 * 8.0) as usize;
    let full_blocks = eighths / 8;
    let partial = eighths % 8;

    let mut bar = String::with_capacity(width * 3);
    for _ in 0..full_blocks {
        bar.push('█');
    }
    if full_blocks < width {
        bar.push(BLOCKS[partial]);
        for _ in (full_blocks + 1)..width {
            bar.push(' ');
        }
    }
    bar
}
