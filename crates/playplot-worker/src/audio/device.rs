//! System audio device output using rodio.
//!
//! The clip is fed to a rodio [`Sink`] through [`ClipSource`], which reads
//! its cursor, play state, gain and loop flag from atomics shared with
//! [`DeviceOutput`]. The sink itself never pauses: a paused clip yields
//! silence, which keeps the stream alive and the cursor exact.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use playplot_core::AudioData;
use rodio::{OutputStream, Sink, Source};
use tracing::debug;

use super::output::{AudioOutput, OutputError};

/// Transport flags shared between the worker and the audio callback.
#[derive(Debug)]
struct SharedTransport {
    cursor: AtomicU64,
    playing: AtomicBool,
    looping: AtomicBool,
    closed: AtomicBool,
    volume_bits: AtomicU32,
}

impl SharedTransport {
    fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Relaxed))
    }
}

/// rodio source reading the clip at the shared cursor.
struct ClipSource {
    audio: AudioData,
    shared: Arc<SharedTransport>,
    channel: u16,
}

impl Source for ClipSource {
    fn current_frame_len(&self) -> Option<usize> {
        None
    }

    fn channels(&self) -> u16 {
        self.audio.channels()
    }

    fn sample_rate(&self) -> u32 {
        self.audio.sample_rate()
    }

    fn total_duration(&self) -> Option<Duration> {
        None
    }
}

impl Iterator for ClipSource {
    type Item = f32;

    fn next(&mut self) -> Option<f32> {
        if self.shared.closed.load(Ordering::Relaxed) {
            return None;
        }
        if !self.shared.playing.load(Ordering::Relaxed) {
            return Some(0.0);
        }

        let frame_index = self.shared.cursor.load(Ordering::Relaxed);
        let sample = match self.audio.frame(frame_index) {
            Some(frame) => frame.get(usize::from(self.channel)).copied().unwrap_or(0.0),
            None => {
                // Past the end: wrap or hold silence until the worker reacts.
                if self.shared.looping.load(Ordering::Relaxed) {
                    self.shared.cursor.store(0, Ordering::Relaxed);
                }
                self.channel = 0;
                return Some(0.0);
            }
        };

        self.channel += 1;
        if self.channel >= self.audio.channels() {
            self.channel = 0;
            self.shared.cursor.fetch_add(1, Ordering::Relaxed);
        }
        Some(sample * self.shared.volume())
    }
}

/// Plays a clip on the default system output device.
pub struct DeviceOutput {
    _stream: OutputStream,
    sink: Sink,
    shared: Arc<SharedTransport>,
    frames: u64,
}

impl DeviceOutput {
    /// Opens the default device and queues the clip, paused at frame 0.
    ///
    /// # Errors
    ///
    /// Returns `OutputError::NoDevice` when no stream or sink can be created.
    pub fn open(audio: &AudioData) -> Result<Self, OutputError> {
        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| OutputError::NoDevice(format!("Failed to create audio stream: {e}")))?;
        let sink = Sink::try_new(&handle)
            .map_err(|e| OutputError::NoDevice(format!("Failed to create audio sink: {e}")))?;

        let shared = Arc::new(SharedTransport {
            cursor: AtomicU64::new(0),
            playing: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            volume_bits: AtomicU32::new(1.0_f32.to_bits()),
        });
        sink.append(ClipSource {
            audio: audio.clone(),
            shared: Arc::clone(&shared),
            channel: 0,
        });
        sink.play();
        debug!(
            channels = audio.channels(),
            sample_rate = audio.sample_rate(),
            "Opened audio device"
        );

        Ok(Self {
            _stream: stream,
            sink,
            shared,
            frames: audio.frames(),
        })
    }
}

impl AudioOutput for DeviceOutput {
    fn play(&mut self) -> Result<(), OutputError> {
        self.shared.playing.store(true, Ordering::Relaxed);
        Ok(())
    }

    fn pause(&mut self) -> Result<(), OutputError> {
        self.shared.playing.store(false, Ordering::Relaxed);
        Ok(())
    }

    fn seek(&mut self, frame: u64) -> Result<(), OutputError> {
        self.shared
            .cursor
            .store(frame.min(self.frames), Ordering::Relaxed);
        Ok(())
    }

    fn set_volume(&mut self, volume: f32) -> Result<(), OutputError> {
        self.shared
            .volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
        Ok(())
    }

    fn set_loop(&mut self, looping: bool) -> Result<(), OutputError> {
        self.shared.looping.store(looping, Ordering::Relaxed);
        Ok(())
    }

    fn position(&self) -> Option<u64> {
        Some(self.shared.cursor.load(Ordering::Relaxed))
    }

    fn close(&mut self) -> Result<(), OutputError> {
        self.shared.closed.store(true, Ordering::Relaxed);
        self.sink.stop();
        Ok(())
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(audio: &AudioData) -> (ClipSource, Arc<SharedTransport>) {
        let shared = Arc::new(SharedTransport {
            cursor: AtomicU64::new(0),
            playing: AtomicBool::new(true),
            looping: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            volume_bits: AtomicU32::new(0.5_f32.to_bits()),
        });
        let source = ClipSource {
            audio: audio.clone(),
            shared: Arc::clone(&shared),
            channel: 0,
        };
        (source, shared)
    }

    #[test]
    fn test_source_applies_gain_and_advances_frames() {
        let audio = AudioData::from_channels(vec![vec![1.0, 0.5], vec![-1.0, -0.5]], 10).unwrap();
        let (mut source, shared) = source(&audio);
        assert_eq!(source.next(), Some(0.5));
        assert_eq!(source.next(), Some(-0.5));
        assert_eq!(shared.cursor.load(Ordering::Relaxed), 1);
        assert_eq!(source.next(), Some(0.25));
    }

    #[test]
    fn test_paused_source_is_silent_and_still() {
        let audio = AudioData::from_mono(vec![1.0; 4], 10).unwrap();
        let (mut source, shared) = source(&audio);
        shared.playing.store(false, Ordering::Relaxed);
        assert_eq!(source.next(), Some(0.0));
        assert_eq!(shared.cursor.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_looping_source_wraps_cursor() {
        let audio = AudioData::from_mono(vec![1.0; 2], 10).unwrap();
        let (mut source, shared) = source(&audio);
        shared.looping.store(true, Ordering::Relaxed);
        source.next();
        source.next();
        assert_eq!(source.next(), Some(0.0));
        assert_eq!(shared.cursor.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn test_closed_source_ends() {
        let audio = AudioData::from_mono(vec![1.0; 2], 10).unwrap();
        let (mut source, shared) = source(&audio);
        shared.closed.store(true, Ordering::Relaxed);
        assert_eq!(source.next(), None);
    }
}
