//! Audio output abstraction.
//!
//! The audio worker owns the transport state and drives an [`AudioOutput`]
//! with it. Outputs are created inside the worker (they are usually not
//! `Send`), through an [`OutputFactory`].

use std::sync::{Arc, Mutex, MutexGuard};

use playplot_core::AudioData;
use thiserror::Error;

/// Errors raised by an audio output.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OutputError {
    /// No usable output device.
    #[error("No audio output device available: {0}")]
    NoDevice(String),

    /// The device rejected an operation.
    #[error("Audio device error: {0}")]
    Device(String),
}

/// Sink driven by the audio worker.
pub trait AudioOutput {
    fn play(&mut self) -> Result<(), OutputError>;

    fn pause(&mut self) -> Result<(), OutputError>;

    /// Moves the output cursor to `frame`.
    fn seek(&mut self, frame: u64) -> Result<(), OutputError>;

    /// Sets the output gain, already clamped to `[0, 1]`.
    fn set_volume(&mut self, volume: f32) -> Result<(), OutputError>;

    fn set_loop(&mut self, looping: bool) -> Result<(), OutputError>;

    /// Frame currently being played, if the output keeps its own clock.
    ///
    /// Outputs without a clock return `None` and the worker advances the
    /// position from wall time.
    fn position(&self) -> Option<u64> {
        None
    }

    /// Releases the device.
    fn close(&mut self) -> Result<(), OutputError>;
}

/// Creates the output for a clip inside the audio worker.
pub type OutputFactory =
    Arc<dyn Fn(&AudioData) -> Result<Box<dyn AudioOutput>, OutputError> + Send + Sync>;

/// Output used when no factory is configured.
///
/// With the `playback` feature this opens the system device; otherwise the
/// clip is "played" silently against the wall clock.
pub fn default_output(audio: &AudioData) -> Result<Box<dyn AudioOutput>, OutputError> {
    #[cfg(feature = "playback")]
    {
        Ok(Box::new(super::device::DeviceOutput::open(audio)?))
    }
    #[cfg(not(feature = "playback"))]
    {
        let _ = audio;
        Ok(Box::new(SilentOutput))
    }
}

// ============================================================================
// Silent Output
// ============================================================================

/// Output that accepts every operation and produces no sound.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentOutput;

impl AudioOutput for SilentOutput {
    fn play(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn pause(&mut self) -> Result<(), OutputError> {
        Ok(())
    }

    fn seek(&mut self, _frame: u64) -> Result<(), OutputError> {
        Ok(())
    }

    fn set_volume(&mut self, _volume: f32) -> Result<(), OutputError> {
        Ok(())
    }

    fn set_loop(&mut self, _looping: bool) -> Result<(), OutputError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), OutputError> {
        Ok(())
    }
}

// ============================================================================
// Recording Output
// ============================================================================

/// One operation observed by a [`RecordingOutput`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OutputCall {
    Play,
    Pause,
    Seek(u64),
    SetVolume(f32),
    SetLoop(bool),
    Close,
}

#[derive(Debug, Default)]
struct Recorded {
    calls: Vec<OutputCall>,
    fail_next: Option<String>,
}

/// Silent output that records every call, for tests and diagnostics.
#[derive(Debug)]
pub struct RecordingOutput {
    log: OutputLog,
}

/// Shared view of what a [`RecordingOutput`] received.
#[derive(Debug, Clone, Default)]
pub struct OutputLog {
    inner: Arc<Mutex<Recorded>>,
}

impl RecordingOutput {
    /// Creates an output together with the log observing it.
    pub fn new() -> (Self, OutputLog) {
        let log = OutputLog::default();
        (Self { log: log.clone() }, log)
    }

    fn record(&mut self, call: OutputCall) -> Result<(), OutputError> {
        let mut recorded = self.log.lock();
        if let Some(reason) = recorded.fail_next.take() {
            return Err(OutputError::Device(reason));
        }
        recorded.calls.push(call);
        Ok(())
    }
}

impl OutputLog {
    fn lock(&self) -> MutexGuard<'_, Recorded> {
        // A panicking test thread must not hide what was recorded.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// All calls so far, in order.
    pub fn calls(&self) -> Vec<OutputCall> {
        self.lock().calls.clone()
    }

    /// Volumes applied so far, in order.
    pub fn volumes(&self) -> Vec<f32> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                OutputCall::SetVolume(v) => Some(*v),
                _ => None,
            })
            .collect()
    }

    /// Frames sought so far, in order.
    pub fn seeks(&self) -> Vec<u64> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                OutputCall::Seek(frame) => Some(*frame),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().calls.contains(&OutputCall::Close)
    }

    /// Makes the next operation fail with `OutputError::Device(reason)`.
    pub fn fail_next(&self, reason: impl Into<String>) {
        self.lock().fail_next = Some(reason.into());
    }
}

impl AudioOutput for RecordingOutput {
    fn play(&mut self) -> Result<(), OutputError> {
        self.record(OutputCall::Play)
    }

    fn pause(&mut self) -> Result<(), OutputError> {
        self.record(OutputCall::Pause)
    }

    fn seek(&mut self, frame: u64) -> Result<(), OutputError> {
        self.record(OutputCall::Seek(frame))
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), OutputError> {
        self.record(OutputCall::SetVolume(volume))
    }

    fn set_loop(&mut self, looping: bool) -> Result<(), OutputError> {
        self.record(OutputCall::SetLoop(looping))
    }

    fn close(&mut self) -> Result<(), OutputError> {
        self.record(OutputCall::Close)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_output_logs_calls() {
        let (mut output, log) = RecordingOutput::new();
        output.set_volume(0.5).unwrap();
        output.seek(48).unwrap();
        output.play().unwrap();
        output.close().unwrap();

        assert_eq!(
            log.calls(),
            vec![
                OutputCall::SetVolume(0.5),
                OutputCall::Seek(48),
                OutputCall::Play,
                OutputCall::Close
            ]
        );
        assert_eq!(log.volumes(), vec![0.5]);
        assert_eq!(log.seeks(), vec![48]);
        assert!(log.is_closed());
    }

    #[test]
    fn test_injected_failure_applies_once() {
        let (mut output, log) = RecordingOutput::new();
        log.fail_next("unplugged");
        assert_eq!(
            output.play(),
            Err(OutputError::Device("unplugged".to_string()))
        );
        assert!(output.play().is_ok());
        assert_eq!(log.calls(), vec![OutputCall::Play]);
    }

    #[test]
    fn test_default_output_accepts_clip() {
        let audio = AudioData::from_mono(vec![0.0; 10], 10).unwrap();
        // Without a device the silent backend is used; with one, opening may
        // legitimately fail on headless machines.
        if let Ok(mut output) = default_output(&audio) {
            assert!(output.set_volume(0.2).is_ok());
            assert!(output.close().is_ok());
        }
    }
}
