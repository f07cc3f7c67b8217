//! Worker failure types.
//!
//! A [`WorkerFailure`] is what a worker loop returns when it cannot go on.
//! The exception relay turns it (or a panic) into the structured
//! `WorkerError` record that travels upstream.

use playplot_core::InputError;
use playplot_protocol::FrameError;
use thiserror::Error;

use crate::audio::OutputError;

/// Reasons a worker stops with an error.
#[derive(Debug, Error)]
pub enum WorkerFailure {
    /// The audio output rejected an operation.
    #[error("Audio output failed: {0}")]
    Output(#[from] OutputError),

    /// The worker could not load its audio.
    #[error("Audio source could not be loaded: {0}")]
    Source(#[from] InputError),

    /// The user plot function returned an error.
    #[error("Plot function failed: {0:#}")]
    PlotFunction(anyhow::Error),

    /// A per-frame draw hook returned an error.
    #[error("Draw hook failed: {0:#}")]
    DrawHook(anyhow::Error),

    /// The rendering surface failed.
    #[error("Rendering surface failed: {0:#}")]
    Surface(anyhow::Error),

    /// The plot function returned an unusable figure.
    #[error("Invalid figure: {0}")]
    InvalidFigure(String),

    /// No plot function is registered under this name.
    #[error("Unknown plot function: {0}")]
    UnknownPlotFunction(String),

    /// The control channel broke while a message had to be delivered.
    #[error("Control channel closed")]
    ChannelClosed,

    /// A frame could not be exchanged with the controller.
    #[error("Protocol error: {0}")]
    Protocol(#[from] FrameError),

    /// The worker runtime could not be set up.
    #[error("Runtime error: {0}")]
    Runtime(#[from] std::io::Error),
}

impl WorkerFailure {
    /// Failure category recorded in the relayed error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Output(_) => "output",
            Self::Source(_) => "source",
            Self::PlotFunction(_) => "plot_function",
            Self::DrawHook(_) => "draw_hook",
            Self::Surface(_) => "surface",
            Self::InvalidFigure(_) => "invalid_figure",
            Self::UnknownPlotFunction(_) => "unknown_plot_function",
            Self::ChannelClosed => "channel_closed",
            Self::Protocol(_) => "protocol",
            Self::Runtime(_) => "runtime",
        }
    }

    /// Human-readable trace: the full cause chain, one cause per line.
    pub fn trace(&self) -> String {
        match self {
            Self::PlotFunction(e) | Self::DrawHook(e) | Self::Surface(e) => {
                let mut out = self.to_string();
                for cause in e.chain().skip(1) {
                    out.push_str("\ncaused by: ");
                    out.push_str(&cause.to_string());
                }
                out
            }
            other => {
                let mut out = other.to_string();
                let mut source = std::error::Error::source(other);
                while let Some(cause) = source {
                    out.push_str("\ncaused by: ");
                    out.push_str(&cause.to_string());
                    source = cause.source();
                }
                out
            }
        }
    }
}
