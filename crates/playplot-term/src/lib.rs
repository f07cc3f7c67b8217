//! playplot term - waveform plots drawn in the terminal
//!
//! - [`view`]: rendering of the waveform, marker and status bars
//! - [`surface`]: the [`TerminalSurface`] plot surface
//! - [`waveform`]: the `waveform` plot function and its registration
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod layout;
pub mod surface;
pub mod view;
pub mod waveform;

pub use error::{Result, TermError};
pub use layout::PlotLayout;
pub use surface::{snapshot, TerminalSurface};
pub use view::WaveformView;
pub use waveform::{register, waveform_plot, DEFAULT_BUCKETS, WAVEFORM_PLOT};
