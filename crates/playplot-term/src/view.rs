//! Rendering of a waveform plot with its playback marker.
//!
//! The screen is a header with the transport state, a chart with the
//! waveform envelope and the marker, and a footer with key hints. The
//! chart has no axis labels so its plot area is exactly the inner area of
//! its block, which keeps pointer columns and data x values in step.

use std::str::FromStr;

use playplot_core::AudioData;
use playplot_worker::MarkerFrame;
use ratatui::{
    buffer::Buffer,
    layout::{Position, Rect},
    style::{Color, Modifier, Style},
    symbols,
    text::{Line, Span},
    widgets::{Axis as ChartAxis, Block, Borders, Chart, Dataset, GraphType, Paragraph},
    Frame,
};

use crate::layout::PlotLayout;

/// Envelope of a clip, ready to chart.
#[derive(Debug, Clone)]
pub struct WaveformView {
    upper: Vec<(f64, f64)>,
    lower: Vec<(f64, f64)>,
    x_range: (f64, f64),
    peak: f64,
}

impl WaveformView {
    /// Builds the view from `buckets` min/max pairs over the whole clip.
    pub fn new(audio: &AudioData, buckets: usize) -> Self {
        let duration = audio.duration();
        let envelope = audio.envelope(buckets);
        let count = envelope.len().max(1) as f64;

        let mut upper = Vec::with_capacity(envelope.len());
        let mut lower = Vec::with_capacity(envelope.len());
        let mut peak = 0.0_f64;
        for (i, (min, max)) in envelope.iter().enumerate() {
            let t = (i as f64 + 0.5) / count * duration;
            upper.push((t, f64::from(*max)));
            lower.push((t, f64::from(*min)));
            peak = peak.max(f64::from(max.abs())).max(f64::from(min.abs()));
        }

        Self {
            upper,
            lower,
            x_range: (0.0, duration),
            // Silence still gets a visible band
            peak: if peak > 1e-3 { peak } else { 1.0 },
        }
    }

    /// Data range of the time axis.
    pub fn x_range(&self) -> (f64, f64) {
        self.x_range
    }
}

/// Draws one plot screen and returns the chart's plot area.
pub fn render(
    frame: &mut Frame,
    view: &WaveformView,
    title: &str,
    marker: Option<&MarkerFrame>,
) -> Rect {
    let layout = PlotLayout::new(frame.area());
    render_header(frame, layout.header, title, marker);
    let plot_area = render_chart(frame, layout.chart, view, marker);
    render_footer(frame, layout.footer);
    plot_area
}

fn render_header(frame: &mut Frame, area: Rect, title: &str, marker: Option<&MarkerFrame>) {
    let title_style = Style::default()
        .fg(Color::Cyan)
        .add_modifier(Modifier::BOLD);
    let dim = Style::default().fg(Color::DarkGray);

    let mut spans = vec![Span::styled(title.to_string(), title_style), Span::raw(" | ")];
    let border_style = match marker {
        Some(m) => {
            let (state, color) = if m.playing {
                ("playing", Color::Green)
            } else {
                ("paused", Color::Yellow)
            };
            spans.push(Span::styled(state, Style::default().fg(color)));
            spans.push(Span::raw(format!(
                " | {:.2} / {:.2} s | vol {}%",
                m.time,
                m.duration,
                (m.volume * 100.0).round() as u32
            )));
            if m.looping {
                spans.push(Span::styled(" | loop", dim));
            }
            Style::default().fg(color)
        }
        None => {
            spans.push(Span::styled("waiting for playback", dim));
            dim
        }
    };

    let header = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(border_style),
    );
    frame.render_widget(header, area);
}

fn render_chart(
    frame: &mut Frame,
    area: Rect,
    view: &WaveformView,
    marker: Option<&MarkerFrame>,
) -> Rect {
    let block = Block::default()
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray))
        .title(" time [s] ");
    let plot_area = block.inner(area);

    let marker_line = marker
        .filter(|m| m.visible)
        .map(|m| [(m.position, -view.peak), (m.position, view.peak)]);

    let envelope_style = Style::default().fg(Color::Cyan);
    let mut datasets = vec![
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(envelope_style)
            .data(&view.upper),
        Dataset::default()
            .marker(symbols::Marker::Braille)
            .graph_type(GraphType::Line)
            .style(envelope_style)
            .data(&view.lower),
    ];
    if let (Some(points), Some(m)) = (marker_line.as_ref(), marker) {
        let color = Color::from_str(&m.style.color).unwrap_or(Color::Red);
        let symbol = if m.style.dashed {
            symbols::Marker::Dot
        } else {
            symbols::Marker::Braille
        };
        datasets.push(
            Dataset::default()
                .marker(symbol)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(color))
                .data(points),
        );
    }

    let (x_min, x_max) = view.x_range;
    let chart = Chart::new(datasets)
        .block(block)
        .x_axis(ChartAxis::default().bounds([x_min, x_max]))
        .y_axis(ChartAxis::default().bounds([-view.peak, view.peak]));
    frame.render_widget(chart, area);
    plot_area
}

fn render_footer(frame: &mut Frame, area: Rect) {
    let key_style = Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD);
    let sep_style = Style::default().fg(Color::DarkGray);

    let hints = vec![
        Span::styled(" space", key_style),
        Span::raw(" play/pause"),
        Span::styled("  ", sep_style),
        Span::styled("click", key_style),
        Span::raw(" seek"),
        Span::styled("  ", sep_style),
        Span::styled("\u{2190}/\u{2192}", key_style),
        Span::raw(" step"),
        Span::styled("  ", sep_style),
        Span::styled("l", key_style),
        Span::raw(" loop"),
        Span::styled("  ", sep_style),
        Span::styled("c", key_style),
        Span::raw(" marker"),
        Span::styled("  ", sep_style),
        Span::styled("q", key_style),
        Span::raw(" close"),
        Span::styled("  ", sep_style),
        Span::styled("Q", key_style),
        Span::raw(" quit"),
    ];

    let footer = Paragraph::new(Line::from(hints)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(sep_style),
    );
    frame.render_widget(footer, area);
}

/// Maps a terminal cell to a data x value on the time axis.
///
/// Returns `None` when the cell lies outside `plot_area`.
pub fn column_to_x(plot_area: Rect, x_range: (f64, f64), column: u16, row: u16) -> Option<f64> {
    if !plot_area.contains(Position::new(column, row)) {
        return None;
    }
    let (x_min, x_max) = x_range;
    if plot_area.width <= 1 {
        return Some(x_min);
    }
    let fraction = f64::from(column - plot_area.x) / f64::from(plot_area.width - 1);
    Some(x_min + fraction * (x_max - x_min))
}

/// Flattens a rendered buffer into lines of text.
pub fn buffer_to_text(buffer: &Buffer) -> String {
    let area = buffer.area;
    let mut text = String::new();
    for y in area.top()..area.bottom() {
        let mut line = String::new();
        for x in area.left()..area.right() {
            if let Some(cell) = buffer.cell((x, y)) {
                line.push_str(cell.symbol());
            }
        }
        text.push_str(line.trim_end());
        text.push('\n');
    }
    text
}

#[cfg(test)]
mod tests {
    //! Tests may use `.unwrap()`.

    use super::*;
    use playplot_worker::MarkerStyle;
    use ratatui::{backend::TestBackend, Terminal};

    // ========================================================================
    // Helpers
    // ========================================================================

    fn sine(seconds: f64) -> AudioData {
        let rate = 8_000;
        let frames = (seconds * f64::from(rate)) as usize;
        let samples = (0..frames)
            .map(|i| (i as f32 * 0.05).sin() * 0.5)
            .collect();
        AudioData::from_mono(samples, rate).unwrap()
    }

    fn marker(position: f64, visible: bool) -> MarkerFrame {
        MarkerFrame {
            time: position,
            position,
            playing: true,
            visible,
            volume: 0.8,
            looping: true,
            duration: 2.0,
            full_redraw: false,
            style: MarkerStyle::default(),
        }
    }

    fn draw(view: &WaveformView, marker: Option<&MarkerFrame>) -> (Rect, Buffer) {
        let mut terminal = Terminal::new(TestBackend::new(80, 24)).unwrap();
        let mut plot_area = Rect::default();
        terminal
            .draw(|f| plot_area = render(f, view, "Wave 0", marker))
            .unwrap();
        (plot_area, terminal.backend().buffer().clone())
    }

    fn has_color_in(buffer: &Buffer, area: Rect, color: Color) -> bool {
        area.positions()
            .filter_map(|p| buffer.cell(p))
            .any(|cell| cell.fg == color && cell.symbol() != " ")
    }

    // ========================================================================
    // Rendering
    // ========================================================================

    #[test]
    fn test_plot_area_is_chart_inner() {
        let view = WaveformView::new(&sine(2.0), 128);
        let (plot_area, _) = draw(&view, None);
        assert_eq!(plot_area, Rect::new(1, 4, 78, 16));
    }

    #[test]
    fn test_header_shows_transport_state() {
        let view = WaveformView::new(&sine(2.0), 128);
        let (_, buffer) = draw(&view, Some(&marker(1.0, true)));
        let text = buffer_to_text(&buffer);
        assert!(text.contains("Wave 0"));
        assert!(text.contains("playing"));
        assert!(text.contains("1.00 / 2.00 s"));
        assert!(text.contains("vol 80%"));
        assert!(text.contains("loop"));
    }

    #[test]
    fn test_header_before_first_frame() {
        let view = WaveformView::new(&sine(2.0), 128);
        let (_, buffer) = draw(&view, None);
        assert!(buffer_to_text(&buffer).contains("waiting for playback"));
    }

    #[test]
    fn test_visible_marker_is_drawn() {
        let view = WaveformView::new(&sine(2.0), 128);
        let (plot_area, buffer) = draw(&view, Some(&marker(1.0, true)));
        assert!(has_color_in(&buffer, plot_area, Color::Red));
        assert!(has_color_in(&buffer, plot_area, Color::Cyan));
    }

    #[test]
    fn test_hidden_marker_is_not_drawn() {
        let view = WaveformView::new(&sine(2.0), 128);
        let (plot_area, buffer) = draw(&view, Some(&marker(1.0, false)));
        assert!(!has_color_in(&buffer, plot_area, Color::Red));
    }

    #[test]
    fn test_footer_lists_keys() {
        let view = WaveformView::new(&sine(0.5), 16);
        let (_, buffer) = draw(&view, None);
        let text = buffer_to_text(&buffer);
        assert!(text.contains("space play/pause"));
        assert!(text.contains("Q quit"));
    }

    #[test]
    fn test_silent_clip_gets_unit_peak() {
        let audio = AudioData::from_mono(vec![0.0; 800], 8_000).unwrap();
        let view = WaveformView::new(&audio, 10);
        assert_eq!(view.peak, 1.0);
        assert_eq!(view.x_range(), (0.0, 0.1));
    }

    // ========================================================================
    // Pointer mapping
    // ========================================================================

    #[test]
    fn test_column_to_x_spans_axis() {
        let area = Rect::new(1, 4, 11, 10);
        assert_eq!(column_to_x(area, (0.0, 2.0), 1, 5), Some(0.0));
        assert_eq!(column_to_x(area, (0.0, 2.0), 6, 5), Some(1.0));
        assert_eq!(column_to_x(area, (0.0, 2.0), 11, 5), Some(2.0));
    }

    #[test]
    fn test_column_to_x_outside_area() {
        let area = Rect::new(1, 4, 11, 10);
        assert_eq!(column_to_x(area, (0.0, 2.0), 0, 5), None);
        assert_eq!(column_to_x(area, (0.0, 2.0), 5, 3), None);
        assert_eq!(column_to_x(area, (0.0, 2.0), 12, 5), None);
    }
}
