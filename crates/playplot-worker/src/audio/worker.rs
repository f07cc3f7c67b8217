//! Audio playback worker.
//!
//! The audio worker owns the transport (position, play state, volume, loop
//! flag) and is the single clock of a session. Each cycle it:
//!
//! 1. drains every queued command into one batch (last write wins per field)
//! 2. applies the batch to the transport and the output
//! 3. advances the position and handles the end of the clip
//! 4. publishes a telemetry snapshot when something changed or the
//!    publish interval elapsed
//! 5. sleeps until the next tick or the next incoming message
//!
//! Telemetry is sent without waiting. When the channel is full the snapshot
//! is dropped and a fresh one is published on the next cycle, so a slow
//! consumer only ever sees the latest state.
//!
//! # Panic-Free Guarantees
//!
//! No `.unwrap()`, `.expect()` or indexing; output failures are returned as
//! `WorkerFailure::Output`.

use std::collections::VecDeque;
use std::time::Duration;

use playplot_core::{clamp_time, frames_to_seconds, seconds_to_frames, AudioData, SessionConfig};
use playplot_protocol::{Command, ControlMessage, Directive, InitialTransport, Telemetry};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, trace, warn};

use super::output::AudioOutput;
use crate::channel::{ChannelEndpoint, ChannelError, Rejected};
use crate::error::WorkerFailure;

/// Upper bound on the telemetry rate, whatever the redraw target.
const MAX_TELEMETRY_RATE: f64 = 120.0;

// ============================================================================
// Transport State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
struct Transport {
    position: f64,
    playing: bool,
    volume: f32,
    looping: bool,
    ended: bool,
    ack_seq: u64,
}

/// Commands of one cycle folded into their net effect.
#[derive(Debug, Default)]
struct CommandBatch {
    playing: Option<bool>,
    volume: Option<f32>,
    looping: Option<bool>,
    seek: Option<f64>,
    stop: bool,
    max_seq: Option<u64>,
}

impl CommandBatch {
    fn absorb(&mut self, seq: u64, command: Command, current: &Transport) {
        match command {
            Command::Play => self.playing = Some(true),
            Command::Pause => self.playing = Some(false),
            Command::TogglePlayback => {
                self.playing = Some(!self.playing.unwrap_or(current.playing));
            }
            Command::Seek { time } => self.seek = Some(time),
            Command::SetVolume { volume } => {
                if !volume.is_nan() {
                    self.volume = Some(volume.clamp(0.0, 1.0));
                }
            }
            Command::SetLoop { looping } => self.looping = Some(looping),
            Command::ToggleLoop => {
                self.looping = Some(!self.looping.unwrap_or(current.looping));
            }
            Command::Stop => self.stop = true,
        }
        self.max_seq = Some(self.max_seq.map_or(seq, |max| max.max(seq)));
    }

    fn is_empty(&self) -> bool {
        self.max_seq.is_none()
    }
}

// ============================================================================
// Worker
// ============================================================================

/// Plays one clip and publishes its transport as telemetry.
pub struct AudioWorker {
    channel: ChannelEndpoint,
    output: Box<dyn AudioOutput>,
    duration: f64,
    sample_rate: u32,
    state: Transport,
    tick: Duration,
    held: VecDeque<ControlMessage>,
    upstream_closed: bool,
    sequence: u64,
    backlog: bool,
}

impl AudioWorker {
    /// Creates the worker.
    ///
    /// # Arguments
    ///
    /// * `channel` - Worker end of the control channel
    /// * `audio` - Clip to play
    /// * `output` - Output the transport is applied to
    /// * `initial` - Starting transport state
    /// * `config` - Session settings (publish interval)
    pub fn new(
        channel: ChannelEndpoint,
        audio: &AudioData,
        output: Box<dyn AudioOutput>,
        initial: InitialTransport,
        config: &SessionConfig,
    ) -> Self {
        let duration = audio.duration();
        let rate = config.fps_target.min(MAX_TELEMETRY_RATE);
        let tick = Duration::try_from_secs_f64(1.0 / rate)
            .unwrap_or(config.plot_min_sleep)
            .max(config.plot_min_sleep);

        Self {
            channel,
            output,
            duration,
            sample_rate: audio.sample_rate(),
            state: Transport {
                position: clamp_time(initial.time, duration),
                playing: initial.playing,
                volume: initial.volume.clamp(0.0, 1.0),
                looping: initial.looping,
                ended: false,
                ack_seq: 0,
            },
            tick,
            held: VecDeque::new(),
            upstream_closed: false,
            sequence: 0,
            backlog: false,
        }
    }

    /// Runs until a `Stop` command arrives or the channel closes.
    ///
    /// # Errors
    ///
    /// Returns `WorkerFailure::Output` when the output rejects an operation.
    pub async fn run(mut self) -> Result<(), WorkerFailure> {
        info!(
            duration = self.duration,
            sample_rate = self.sample_rate,
            tick_ms = self.tick.as_millis() as u64,
            "Audio worker running"
        );

        self.output.set_volume(self.state.volume)?;
        self.output.set_loop(self.state.looping)?;
        self.output
            .seek(seconds_to_frames(self.state.position, self.sample_rate))?;
        if self.state.playing {
            self.output.play()?;
        }
        if self.publish().is_err() {
            self.upstream_closed = true;
        }

        let mut last_tick = Instant::now();
        let mut last_publish = Instant::now();

        loop {
            let batch = self.drain();
            let applied = !batch.is_empty();
            let stop = batch.stop;
            if applied {
                let sought = batch.seek.is_some();
                self.apply(batch)?;
                if sought {
                    last_tick = Instant::now();
                }
            }
            if stop {
                debug!("Stop command received");
                let _ = self.publish();
                break;
            }
            if self.upstream_closed {
                debug!("Control channel closed, audio worker exiting");
                break;
            }

            let now = Instant::now();
            let boundary = self.advance(now.saturating_duration_since(last_tick))?;
            last_tick = now;

            let due = applied
                || boundary
                || self.backlog
                || now.saturating_duration_since(last_publish) >= self.tick;
            if due {
                match self.publish() {
                    Ok(()) => last_publish = now,
                    Err(_) => break,
                }
            }

            tokio::select! {
                message = self.channel.recv() => match message {
                    Some(message) => self.held.push_back(message),
                    None => self.upstream_closed = true,
                },
                _ = sleep(self.tick) => {}
            }
        }

        self.output.close()?;
        info!(position = self.state.position, "Audio worker stopped");
        Ok(())
    }

    /// Folds every queued message into one batch.
    fn drain(&mut self) -> CommandBatch {
        let mut batch = CommandBatch::default();
        loop {
            let message = match self.held.pop_front() {
                Some(message) => message,
                None => match self.channel.try_receive() {
                    Ok(Some(message)) => message,
                    Ok(None) => break,
                    Err(_) => {
                        self.upstream_closed = true;
                        break;
                    }
                },
            };
            match message {
                ControlMessage::Command { seq, command } => {
                    trace!(seq, ?command, "Command received");
                    batch.absorb(seq, command, &self.state);
                }
                ControlMessage::Directive {
                    directive: Directive::Shutdown,
                } => batch.stop = true,
                other => {
                    warn!(message = other.name(), "Ignoring message not meant for the audio worker");
                }
            }
        }
        batch
    }

    /// Applies a batch: volume, then loop, then seek, then play state.
    fn apply(&mut self, batch: CommandBatch) -> Result<(), WorkerFailure> {
        if let Some(volume) = batch.volume {
            if volume != self.state.volume {
                self.output.set_volume(volume)?;
                self.state.volume = volume;
            }
        }

        if let Some(looping) = batch.looping {
            if looping != self.state.looping {
                self.output.set_loop(looping)?;
                self.state.looping = looping;
            }
        }

        if let Some(time) = batch.seek {
            let time = clamp_time(time, self.duration);
            self.output.seek(seconds_to_frames(time, self.sample_rate))?;
            self.state.position = time;
            self.state.ended = false;
        }

        if let Some(playing) = batch.playing {
            if playing && self.state.ended {
                // Playing past the end starts the clip over.
                self.output.seek(0)?;
                self.state.position = 0.0;
                self.state.ended = false;
            }
            if playing != self.state.playing {
                if playing {
                    self.output.play()?;
                } else {
                    self.output.pause()?;
                }
                self.state.playing = playing;
            }
        }

        if let Some(seq) = batch.max_seq {
            self.state.ack_seq = self.state.ack_seq.max(seq);
        }
        Ok(())
    }

    /// Moves the playhead; returns true when it crossed the end of the clip.
    fn advance(&mut self, elapsed: Duration) -> Result<bool, WorkerFailure> {
        if !self.state.playing {
            return Ok(false);
        }

        let position = match self.output.position() {
            Some(frame) => frames_to_seconds(frame, self.sample_rate),
            None => self.state.position + elapsed.as_secs_f64(),
        };

        if position < self.duration {
            self.state.position = position;
            return Ok(false);
        }

        if self.state.looping {
            debug!("Clip end reached, looping");
            self.output.seek(0)?;
            self.state.position = 0.0;
        } else {
            debug!("Clip end reached");
            self.output.pause()?;
            self.state.playing = false;
            self.state.ended = true;
            self.state.position = self.duration;
        }
        Ok(true)
    }

    /// Sends the current transport without waiting.
    fn publish(&mut self) -> Result<(), ChannelError> {
        self.sequence += 1;
        let telemetry = Telemetry {
            position: self.state.position,
            position_frames: seconds_to_frames(self.state.position, self.sample_rate),
            playing: self.state.playing,
            volume: self.state.volume,
            looping: self.state.looping,
            ended: self.state.ended,
            ack_seq: self.state.ack_seq,
            sequence: self.sequence,
        };
        match self.channel.try_send(ControlMessage::Telemetry(telemetry)) {
            Ok(()) => {
                self.backlog = false;
                Ok(())
            }
            Err(Rejected {
                error: ChannelError::Full,
                ..
            }) => {
                trace!("Telemetry queue full, coalescing");
                self.backlog = true;
                Ok(())
            }
            Err(rejected) => Err(rejected.error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport() -> Transport {
        Transport {
            position: 0.0,
            playing: false,
            volume: 0.8,
            looping: false,
            ended: false,
            ack_seq: 0,
        }
    }

    #[test]
    fn test_batch_last_write_wins() {
        let state = transport();
        let mut batch = CommandBatch::default();
        batch.absorb(1, Command::SetVolume { volume: 0.3 }, &state);
        batch.absorb(2, Command::Seek { time: 1.0 }, &state);
        batch.absorb(3, Command::SetVolume { volume: 0.9 }, &state);
        batch.absorb(4, Command::Seek { time: 0.5 }, &state);
        assert_eq!(batch.volume, Some(0.9));
        assert_eq!(batch.seek, Some(0.5));
        assert_eq!(batch.max_seq, Some(4));
    }

    #[test]
    fn test_toggles_resolve_against_batch() {
        let state = transport();
        let mut batch = CommandBatch::default();
        batch.absorb(1, Command::TogglePlayback, &state);
        batch.absorb(2, Command::TogglePlayback, &state);
        batch.absorb(3, Command::TogglePlayback, &state);
        assert_eq!(batch.playing, Some(true));

        batch.absorb(4, Command::ToggleLoop, &state);
        batch.absorb(5, Command::ToggleLoop, &state);
        assert_eq!(batch.looping, Some(false));
    }

    #[test]
    fn test_volume_is_clamped_and_nan_ignored() {
        let state = transport();
        let mut batch = CommandBatch::default();
        batch.absorb(1, Command::SetVolume { volume: 1.7 }, &state);
        assert_eq!(batch.volume, Some(1.0));
        batch.absorb(2, Command::SetVolume { volume: f32::NAN }, &state);
        assert_eq!(batch.volume, Some(1.0));
    }
}
