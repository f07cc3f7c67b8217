//! Audio playback worker and its output backends.

#[cfg(feature = "playback")]
pub mod device;
pub mod output;
pub mod worker;

#[cfg(feature = "playback")]
pub use device::DeviceOutput;
pub use output::{
    default_output, AudioOutput, OutputCall, OutputError, OutputFactory, OutputLog,
    RecordingOutput, SilentOutput,
};
pub use worker::AudioWorker;
