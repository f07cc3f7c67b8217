//! Session-side mirror of the transport state.
//!
//! The audio worker owns the clock. The session keeps a cached copy here so
//! property reads never wait on a worker: writes update the mirror
//! optimistically, telemetry later confirms or corrects them.
//!
//! Every transport command carries a session-wide sequence number. The
//! mirror remembers the highest number it applied optimistically
//! (`pending_seq`) and ignores telemetry that has not acknowledged it yet,
//! so a seek is never visibly undone by a snapshot taken before it.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use playplot_core::clamp_time;
use playplot_protocol::{Command, Telemetry};
use tokio::sync::watch;

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// Constructed, workers not spawned yet
    Created,
    /// Workers running
    Running,
    /// Stop requested, waiting for workers to exit
    Stopping,
    /// All workers gone (terminal)
    Stopped,
}

/// A worker as seen by the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSummary {
    pub label: String,
    /// OS process id, for process isolation
    pub pid: Option<u32>,
}

/// Cached session state.
#[derive(Debug, Clone, PartialEq)]
pub struct MirroredState {
    /// Playhead in seconds, clamped to the clip
    pub time: f64,
    pub volume: f32,
    pub paused: bool,
    pub looping: bool,
    /// The clip played to its end without looping
    pub ended: bool,
    pub status: SessionStatus,
    /// Plots showing their figure right now
    pub open_plots: usize,
    /// Plots bound to this session so far
    pub total_spawned_plots: usize,
    /// Plots spawned but neither opened nor finished yet
    pub pending_plots: usize,
    /// Highest sequence number applied optimistically
    pub pending_seq: u64,
    /// Highest sequence number acknowledged by the audio worker
    pub acked_seq: u64,
    /// Sequence of the last telemetry snapshot received
    pub telemetry_sequence: u64,
    pub workers: Vec<WorkerSummary>,
}

impl MirroredState {
    fn new(time: f64, volume: f32, paused: bool, looping: bool) -> Self {
        Self {
            time,
            volume,
            paused,
            looping,
            ended: false,
            status: SessionStatus::Created,
            open_plots: 0,
            total_spawned_plots: 0,
            pending_plots: 0,
            pending_seq: 0,
            acked_seq: 0,
            telemetry_sequence: 0,
            workers: Vec::new(),
        }
    }
}

/// Shared, observable mirror of one session.
///
/// Cheap to clone; all clones see the same state.
#[derive(Debug, Clone)]
pub struct Mirror {
    state: Arc<watch::Sender<MirroredState>>,
    next_seq: Arc<AtomicU64>,
    duration: f64,
}

impl Mirror {
    /// Creates a mirror for a clip of `duration` seconds.
    pub fn new(duration: f64, time: f64, volume: f32, paused: bool, looping: bool) -> Self {
        let initial = MirroredState::new(
            clamp_time(time, duration),
            volume.clamp(0.0, 1.0),
            paused,
            looping,
        );
        let (state, _) = watch::channel(initial);
        Self {
            state: Arc::new(state),
            next_seq: Arc::new(AtomicU64::new(0)),
            duration,
        }
    }

    /// Current state.
    pub fn snapshot(&self) -> MirroredState {
        self.state.borrow().clone()
    }

    /// Reads one value without cloning the whole state.
    pub fn read<T>(&self, f: impl FnOnce(&MirroredState) -> T) -> T {
        f(&self.state.borrow())
    }

    /// Receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<MirroredState> {
        self.state.subscribe()
    }

    /// Applies an arbitrary update and notifies subscribers.
    pub fn update(&self, f: impl FnOnce(&mut MirroredState)) {
        self.state.send_modify(f);
    }

    /// Allocates the next command sequence number (starting at 1).
    pub fn next_seq(&self) -> u64 {
        self.next_seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Applies a command locally, ahead of the audio worker.
    pub fn apply_optimistic(&self, seq: u64, command: Command) {
        let duration = self.duration;
        self.update(|state| {
            state.pending_seq = state.pending_seq.max(seq);
            apply_command(state, command, duration);
        });
    }

    /// Applies a command while no worker is running (before `start()`).
    pub fn apply_offline(&self, command: Command) {
        let duration = self.duration;
        self.update(|state| apply_command(state, command, duration));
    }

    /// Folds in a telemetry snapshot from the audio worker.
    ///
    /// Snapshots that predate the last optimistic write are ignored.
    pub fn apply_telemetry(&self, telemetry: &Telemetry) {
        self.update(|state| {
            state.acked_seq = state.acked_seq.max(telemetry.ack_seq);
            state.telemetry_sequence = telemetry.sequence;
            if telemetry.ack_seq < state.pending_seq {
                return;
            }
            state.time = telemetry.position;
            state.paused = !telemetry.playing;
            state.volume = telemetry.volume;
            state.looping = telemetry.looping;
            state.ended = telemetry.ended;
        });
    }

    pub fn status(&self) -> SessionStatus {
        self.read(|state| state.status)
    }

    pub fn set_status(&self, status: SessionStatus) {
        self.update(|state| state.status = status);
    }
}

fn apply_command(state: &mut MirroredState, command: Command, duration: f64) {
    match command {
        Command::Play => play(state),
        Command::Pause => state.paused = true,
        Command::TogglePlayback => {
            if state.paused {
                play(state);
            } else {
                state.paused = true;
            }
        }
        Command::Seek { time } => {
            state.time = clamp_time(time, duration);
            state.ended = false;
        }
        Command::SetVolume { volume } => {
            if !volume.is_nan() {
                state.volume = volume.clamp(0.0, 1.0);
            }
        }
        Command::SetLoop { looping } => state.looping = looping,
        Command::ToggleLoop => state.looping = !state.looping,
        Command::Stop => {}
    }
}

fn play(state: &mut MirroredState) {
    if state.ended {
        state.time = 0.0;
        state.ended = false;
    }
    state.paused = false;
}
