//! The `waveform` plot function.

use playplot_worker::{Axis, Figure, PlotContext, PlotRegistry};
use tracing::debug;

use crate::surface::TerminalSurface;
use crate::view::WaveformView;

/// Registry name of the terminal waveform plot.
pub const WAVEFORM_PLOT: &str = "waveform";

/// Envelope resolution when the caller gives none.
pub const DEFAULT_BUCKETS: usize = 512;

/// Builds a terminal waveform figure for the session's clip.
///
/// Arguments:
/// - `title`: figure title (default `Fig {index}`)
/// - `buckets`: envelope resolution (default [`DEFAULT_BUCKETS`])
///
/// # Errors
///
/// Fails when no terminal is available to draw on.
pub fn waveform_plot(ctx: &PlotContext) -> anyhow::Result<Figure> {
    let buckets = ctx
        .arg_u64("buckets")
        .and_then(|b| usize::try_from(b).ok())
        .filter(|b| *b > 0)
        .unwrap_or(DEFAULT_BUCKETS);
    let title = ctx
        .arg_str("title")
        .map(str::to_string)
        .unwrap_or_else(|| format!("Fig {}", ctx.index));

    debug!(index = ctx.index, buckets, "Building waveform plot");
    let surface = TerminalSurface::open(WaveformView::new(&ctx.audio, buckets))?;
    Ok(Figure::new(Box::new(surface))
        .title(title)
        .axis(Axis::new("time [s]", 0.0, ctx.duration)))
}

/// Adds the terminal plots to `registry`.
pub fn register(registry: &mut PlotRegistry) {
    registry.register(WAVEFORM_PLOT, waveform_plot);
}
