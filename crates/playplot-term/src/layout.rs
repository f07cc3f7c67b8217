//! Screen layout of a terminal plot.

use ratatui::layout::{Constraint, Direction, Layout, Rect};

/// Areas of one plot screen.
///
/// - Header (3 lines): title and transport state
/// - Chart (fills remaining): waveform and marker
/// - Footer (3 lines): key hints
#[derive(Debug, Clone, Copy)]
pub struct PlotLayout {
    pub header: Rect,
    pub chart: Rect,
    pub footer: Rect,
}

impl PlotLayout {
    pub fn new(area: Rect) -> Self {
        let [header, chart, footer] = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(3),
            ])
            .areas(area);

        Self {
            header,
            chart,
            footer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_layout_creation() {
        let layout = PlotLayout::new(Rect::new(0, 0, 80, 24));

        assert_eq!(layout.header.y, 0);
        assert_eq!(layout.header.height, 3);

        assert_eq!(layout.footer.height, 3);
        assert_eq!(layout.footer.y + layout.footer.height, 24);

        assert_eq!(layout.chart.y, 3);
        assert_eq!(layout.chart.height, 18);
        assert_eq!(layout.chart.width, 80);
    }

    #[test]
    fn test_small_terminal_keeps_chart() {
        let layout = PlotLayout::new(Rect::new(0, 0, 40, 11));
        assert_eq!(layout.chart.height, 5);
    }
}
