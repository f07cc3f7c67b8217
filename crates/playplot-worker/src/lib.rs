//! playplot worker - audio and plot workers for playplot sessions
//!
//! This crate provides the pieces that run on the worker side of a
//! session:
//!
//! - [`channel`]: bounded bidirectional control channels, and bridging them
//!   over a byte stream
//! - [`relay`]: the exception relay wrapping every worker run
//! - [`audio`]: the audio playback worker and its outputs
//! - [`plot`]: the plot worker, figures, surfaces and gestures
//! - [`process`]: the entry point of a worker running as a child process
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod audio;
pub mod channel;
pub mod error;
pub mod plot;
pub mod process;
pub mod relay;

// Re-exports for convenience
pub use audio::{
    default_output, AudioOutput, AudioWorker, OutputCall, OutputError, OutputFactory, OutputLog,
    RecordingOutput, SilentOutput,
};
pub use channel::{
    channel_pair, Bridge, ChannelEndpoint, ChannelError, ChannelReceiver, ChannelSender, Rejected,
};
pub use error::WorkerFailure;
pub use plot::{
    Axis, Figure, GestureAction, HeadlessProbe, HeadlessSurface, InputEvent, Key, MarkerFrame,
    MarkerStyle, MouseButton, PlotBinding, PlotContext, PlotFunction, PlotParams, PlotRegistry,
    PlotWorker, Surface, HEADLESS_PLOT,
};
pub use process::run_worker_process;
pub use relay::{capture_origin_stack, ExceptionRelay, RelayOutcome};
