//! Figures, rendering surfaces and input events.
//!
//! A plot function returns a [`Figure`]: a [`Surface`] to draw on, the axes
//! it shows and the [`PlotParams`] controlling the marker. The plot worker
//! only talks to the surface through this trait, so the same worker drives
//! a terminal chart, a headless recorder or any other backend.

use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::bail;
use playplot_core::TimeMapping;
use serde::Serialize;

// ============================================================================
// Marker
// ============================================================================

/// Appearance of the playback marker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerStyle {
    pub color: String,
    pub dashed: bool,
    pub width: f32,
}

impl Default for MarkerStyle {
    fn default() -> Self {
        Self {
            color: "red".to_string(),
            dashed: true,
            width: 1.0,
        }
    }
}

/// Everything a surface needs to draw one frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MarkerFrame {
    /// Playback time in seconds
    pub time: f64,
    /// Marker x coordinate on the interactive axis
    pub position: f64,
    pub playing: bool,
    /// False while the user has hidden the marker
    pub visible: bool,
    pub volume: f32,
    pub looping: bool,
    /// Clip duration in seconds
    pub duration: f64,
    /// Set when the whole figure must be redrawn, not only the marker
    pub full_redraw: bool,
    pub style: MarkerStyle,
}

// ============================================================================
// Input
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Char(char),
    Enter,
    Escape,
    Left,
    Right,
}

/// User input reported by a surface.
///
/// Pointer coordinates are data x values on the interactive axis; `None`
/// means the pointer is outside of it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Press { button: MouseButton, x: Option<f64> },
    Drag { x: Option<f64> },
    Release { button: MouseButton, x: Option<f64> },
    Key(Key),
    /// The window or terminal was closed by the user
    CloseRequested,
}

// ============================================================================
// Surface
// ============================================================================

/// A rendering backend for one figure.
pub trait Surface {
    fn set_title(&mut self, title: &str) -> anyhow::Result<()> {
        let _ = title;
        Ok(())
    }

    /// Draws the figure with the marker described by `frame`.
    fn draw(&mut self, frame: &MarkerFrame) -> anyhow::Result<()>;

    /// Returns the input received since the last call, without blocking.
    fn poll_input(&mut self) -> anyhow::Result<Vec<InputEvent>>;

    /// False once the user closed the surface.
    fn is_open(&self) -> bool;

    /// Writes the current figure into `folder`, returning the file written.
    fn save_image(&mut self, folder: &Path, stem: &str) -> anyhow::Result<PathBuf> {
        let _ = (folder, stem);
        bail!("this surface cannot save images")
    }

    fn close(&mut self) -> anyhow::Result<()>;
}

// ============================================================================
// Figure
// ============================================================================

/// Data range of one axis.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    pub label: String,
    pub x_min: f64,
    pub x_max: f64,
}

impl Axis {
    pub fn new(label: impl Into<String>, x_min: f64, x_max: f64) -> Self {
        Self {
            label: label.into(),
            x_min,
            x_max,
        }
    }
}

/// Per-frame hook; returns true when it changed the figure and a full
/// redraw is needed.
pub type DrawHook = Box<dyn FnMut(&MarkerFrame) -> anyhow::Result<bool>>;

/// Replaces the marker update: receives `(time, position, playing)` and
/// returns the value to draw and whether the figure changed.
pub struct UpdateOverride {
    pub hook: Box<dyn FnMut(f64, f64, bool) -> (f64, bool)>,
    /// If true the hook returns a position, otherwise a time to map.
    pub returns_position: bool,
}

/// Marker and interaction settings of a figure.
pub struct PlotParams {
    pub title: String,
    /// Time/position mapping; linear over the interactive axis when unset.
    pub mapping: Option<TimeMapping>,
    pub marker: MarkerStyle,
    /// Index of the axis that receives clicks and shows the marker.
    pub interactive_axis: usize,
    pub draw_hook: Option<DrawHook>,
    pub update_override: Option<UpdateOverride>,
}

impl Default for PlotParams {
    fn default() -> Self {
        Self {
            title: "Fig".to_string(),
            mapping: None,
            marker: MarkerStyle::default(),
            interactive_axis: 0,
            draw_hook: None,
            update_override: None,
        }
    }
}

impl fmt::Debug for PlotParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlotParams")
            .field("title", &self.title)
            .field("mapping", &self.mapping)
            .field("marker", &self.marker)
            .field("interactive_axis", &self.interactive_axis)
            .field("draw_hook", &self.draw_hook.is_some())
            .field("update_override", &self.update_override.is_some())
            .finish()
    }
}

/// What a plot function returns.
pub struct Figure {
    pub surface: Box<dyn Surface>,
    pub axes: Vec<Axis>,
    pub params: PlotParams,
}

impl Figure {
    pub fn new(surface: Box<dyn Surface>) -> Self {
        Self {
            surface,
            axes: Vec::new(),
            params: PlotParams::default(),
        }
    }

    #[must_use]
    pub fn axis(mut self, axis: Axis) -> Self {
        self.axes.push(axis);
        self
    }

    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.params.title = title.into();
        self
    }

    #[must_use]
    pub fn mapping(mut self, mapping: TimeMapping) -> Self {
        self.params.mapping = Some(mapping);
        self
    }

    #[must_use]
    pub fn marker(mut self, style: MarkerStyle) -> Self {
        self.params.marker = style;
        self
    }

    #[must_use]
    pub fn interactive_axis(mut self, index: usize) -> Self {
        self.params.interactive_axis = index;
        self
    }

    #[must_use]
    pub fn draw_hook(
        mut self,
        hook: impl FnMut(&MarkerFrame) -> anyhow::Result<bool> + 'static,
    ) -> Self {
        self.params.draw_hook = Some(Box::new(hook));
        self
    }

    #[must_use]
    pub fn update_override(
        mut self,
        hook: impl FnMut(f64, f64, bool) -> (f64, bool) + 'static,
        returns_position: bool,
    ) -> Self {
        self.params.update_override = Some(UpdateOverride {
            hook: Box::new(hook),
            returns_position,
        });
        self
    }
}

impl fmt::Debug for Figure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Figure")
            .field("axes", &self.axes)
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}
