//! In-memory sample buffers.
//!
//! `AudioData` is the immutable, cheaply cloneable buffer handed to the
//! audio worker (and optionally to plot functions). Samples are stored
//! interleaved as `f32` in `[-1, 1]`.

use std::fmt;
use std::io::{self, Read};
use std::path::Path;
use std::sync::Arc;

use crate::error::InputError;

/// Interleaved sample buffer with its sample rate.
#[derive(Clone)]
pub struct AudioData {
    samples: Arc<[f32]>,
    channels: u16,
    sample_rate: u32,
}

impl AudioData {
    /// Builds a mono buffer from one-dimensional sample data.
    ///
    /// # Errors
    ///
    /// Returns `InputError::InvalidShape` for an empty buffer, a zero sample
    /// rate or non-finite samples.
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self, InputError> {
        Self::from_interleaved(samples, 1, sample_rate)
    }

    /// Builds a multichannel buffer from two-dimensional, channel-major data.
    ///
    /// Each inner vector holds one channel; all channels must have the same
    /// length.
    ///
    /// # Errors
    ///
    /// Returns `InputError::InvalidShape` for zero channels, ragged channel
    /// lengths, more than `u16::MAX` channels, or any error of
    /// [`AudioData::from_mono`].
    pub fn from_channels(channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self, InputError> {
        let channel_count = u16::try_from(channels.len())
            .map_err(|_| InputError::InvalidShape(format!("{} channels", channels.len())))?;
        let frames = channels.first().map(Vec::len).unwrap_or(0);
        if channel_count == 0 {
            return Err(InputError::InvalidShape("no channels".to_string()));
        }
        if let Some(index) = channels.iter().position(|c| c.len() != frames) {
            return Err(InputError::InvalidShape(format!(
                "channel {index} has a different length than channel 0"
            )));
        }

        let mut interleaved = Vec::with_capacity(frames * channels.len());
        for frame in 0..frames {
            for channel in &channels {
                interleaved.push(channel.get(frame).copied().unwrap_or(0.0));
            }
        }
        Self::from_interleaved(interleaved, channel_count, sample_rate)
    }

    /// Builds a buffer from already interleaved samples.
    ///
    /// # Errors
    ///
    /// Returns `InputError::InvalidShape` when the sample count is not a
    /// multiple of `channels` or the data is otherwise unusable.
    pub fn from_interleaved(
        samples: Vec<f32>,
        channels: u16,
        sample_rate: u32,
    ) -> Result<Self, InputError> {
        if sample_rate == 0 {
            return Err(InputError::InvalidShape("sample rate must be positive".to_string()));
        }
        if channels == 0 {
            return Err(InputError::InvalidShape("no channels".to_string()));
        }
        if samples.is_empty() {
            return Err(InputError::InvalidShape("no samples".to_string()));
        }
        if samples.len() % usize::from(channels) != 0 {
            return Err(InputError::InvalidShape(format!(
                "{} samples do not divide into {channels} channels",
                samples.len()
            )));
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(InputError::InvalidShape(format!(
                "non-finite sample at index {index}"
            )));
        }

        Ok(Self {
            samples: samples.into(),
            channels,
            sample_rate,
        })
    }

    /// Decodes a WAV stream.
    ///
    /// Integer formats are scaled to `[-1, 1]`.
    ///
    /// # Arguments
    ///
    /// * `reader` - The WAV byte stream
    /// * `location` - Human-readable origin used in error messages
    ///
    /// # Errors
    ///
    /// Returns `InputError::UnreadableFormat` when the stream is not a valid
    /// WAV file.
    pub fn decode_wav<R: Read>(reader: R, location: &str) -> Result<Self, InputError> {
        let reader =
            hound::WavReader::new(reader).map_err(|e| InputError::unreadable(location, e))?;
        let spec = reader.spec();

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| InputError::unreadable(location, e))?,
            hound::SampleFormat::Int => {
                let max_val = (1u64 << spec.bits_per_sample.saturating_sub(1)) as f32;
                reader
                    .into_samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_val))
                    .collect::<Result<Vec<_>, _>>()
                    .map_err(|e| InputError::unreadable(location, e))?
            }
        };

        Self::from_interleaved(samples, spec.channels, spec.sample_rate)
            .map_err(|e| InputError::unreadable(location, e))
    }

    /// Writes the buffer as a 32-bit float WAV file.
    ///
    /// Used to hand in-memory audio to a worker running in another process.
    pub fn write_wav(&self, path: &Path) -> io::Result<()> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec).map_err(hound_to_io)?;
        for sample in self.samples.iter() {
            writer.write_sample(*sample).map_err(hound_to_io)?;
        }
        writer.finalize().map_err(hound_to_io)
    }

    /// Interleaved samples.
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of frames (samples per channel).
    pub fn frames(&self) -> u64 {
        (self.samples.len() / usize::from(self.channels)) as u64
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        frames_to_seconds(self.frames(), self.sample_rate)
    }

    /// Returns the samples of one frame, or `None` past the end.
    pub fn frame(&self, index: u64) -> Option<&[f32]> {
        let channels = usize::from(self.channels);
        let start = usize::try_from(index).ok()?.checked_mul(channels)?;
        self.samples.get(start..start + channels)
    }

    /// Min/max envelope of the mono mix, split into `buckets` equal spans.
    ///
    /// Used to draw a waveform overview at a fixed resolution.
    pub fn envelope(&self, buckets: usize) -> Vec<(f32, f32)> {
        let frames = self.frames() as usize;
        if buckets == 0 || frames == 0 {
            return Vec::new();
        }
        let channels = usize::from(self.channels);

        (0..buckets)
            .map(|bucket| {
                let start = bucket * frames / buckets;
                let end = ((bucket + 1) * frames / buckets).max(start + 1).min(frames);
                let mut min = f32::MAX;
                let mut max = f32::MIN;
                for chunk in self
                    .samples
                    .get(start * channels..end * channels)
                    .unwrap_or_default()
                    .chunks(channels)
                {
                    let mono = chunk.iter().sum::<f32>() / channels as f32;
                    min = min.min(mono);
                    max = max.max(mono);
                }
                if min > max {
                    (0.0, 0.0)
                } else {
                    (min, max)
                }
            })
            .collect()
    }
}

impl fmt::Debug for AudioData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioData")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("frames", &self.frames())
            .finish()
    }
}

fn hound_to_io(error: hound::Error) -> io::Error {
    match error {
        hound::Error::IoError(e) => e,
        other => io::Error::new(io::ErrorKind::Other, other),
    }
}

// ============================================================================
// Time Helpers
// ============================================================================

/// Converts a frame count to seconds.
pub fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    if sample_rate == 0 {
        return 0.0;
    }
    frames as f64 / f64::from(sample_rate)
}

/// Converts seconds to a frame index, rounding to the nearest frame.
///
/// Negative and non-finite inputs map to frame 0.
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> u64 {
    if !seconds.is_finite() || seconds <= 0.0 {
        return 0;
    }
    (seconds * f64::from(sample_rate)).round() as u64
}

/// Clamps a playback time to `[0, duration]`. NaN maps to 0.
pub fn clamp_time(time: f64, duration: f64) -> f64 {
    if time.is_nan() {
        return 0.0;
    }
    time.clamp(0.0, duration.max(0.0))
}
