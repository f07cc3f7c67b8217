//! Plot worker: draws a playback marker on a figure and turns pointer and
//! key gestures into transport commands.

pub mod function;
pub mod gesture;
pub mod headless;
pub mod surface;
pub mod worker;

pub use function::{PlotBinding, PlotContext, PlotFunction, PlotRegistry, HEADLESS_PLOT};
pub use gesture::{GestureAction, GestureState, SEEK_STEP};
pub use headless::{HeadlessProbe, HeadlessSurface};
pub use surface::{
    Axis, DrawHook, Figure, InputEvent, Key, MarkerFrame, MarkerStyle, MouseButton, PlotParams,
    Surface, UpdateOverride,
};
pub use worker::PlotWorker;
