//! Control channel message types.
//!
//! Every message on a control channel is a [`ControlMessage`]. Commands and
//! directives flow from the session down to a worker; telemetry, lifecycle
//! notices, gesture commands and errors flow back up. Telemetry is also
//! relayed down from the session to plot workers.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::version::ProtocolVersion;
use crate::worker_error::WorkerError;

// ============================================================================
// Transport Commands
// ============================================================================

/// Transport command applied by the audio worker.
///
/// Commands are FIFO and never dropped. Within one worker cycle the last
/// write to each transport field wins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Command {
    /// Start or resume playback (restarts from 0 after the end of the clip)
    Play,

    /// Pause playback, keeping the position
    Pause,

    /// Toggle between playing and paused
    TogglePlayback,

    /// Move the playhead without changing the play state
    Seek {
        /// Target time in seconds (clamped to the clip)
        time: f64,
    },

    /// Change the output volume
    SetVolume {
        /// Volume in `[0, 1]` (clamped)
        volume: f32,
    },

    /// Enable or disable looping
    SetLoop { looping: bool },

    /// Flip the looping flag
    ToggleLoop,

    /// Stop the worker and release the device
    Stop,
}

// ============================================================================
// Telemetry
// ============================================================================

/// Snapshot of the audio worker's transport, published as the clock.
///
/// Telemetry is a latest-wins stream: a consumer only ever needs the most
/// recent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Telemetry {
    /// Playhead in seconds
    pub position: f64,

    /// Playhead in frames
    pub position_frames: u64,

    /// Whether the transport is advancing
    pub playing: bool,

    /// Volume currently applied to the output
    pub volume: f32,

    /// Whether playback wraps at the end
    pub looping: bool,

    /// Set once playback reached the end without looping
    pub ended: bool,

    /// Highest command sequence number applied so far
    pub ack_seq: u64,

    /// Monotonic snapshot counter
    pub sequence: u64,
}

// ============================================================================
// Lifecycle and Directives
// ============================================================================

/// Lifecycle notice sent upstream by a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Lifecycle {
    /// Handshake accepted, worker is about to run
    Ready,

    /// Plot surface is open and showing the figure
    Opened { title: String },

    /// Plot surface was closed by the user
    Closed,

    /// The user asked to close the whole session
    CloseSession,

    /// Reply to [`Directive::SaveFrame`]
    FrameSaved {
        frame: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        path: Option<PathBuf>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },

    /// Worker finished cleanly
    Exited,
}

/// Instruction from the session to a plot worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "directive", rename_all = "snake_case")]
pub enum Directive {
    /// Close the surface and exit
    Shutdown,

    /// Keep the surface open but stop expecting telemetry
    Detach,

    /// Write the current figure as an image into `folder`
    SaveFrame { frame: u64, folder: PathBuf },
}

// ============================================================================
// Control Message
// ============================================================================

/// A message on a control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Transport command with its session-wide sequence number
    Command { seq: u64, command: Command },

    /// Clock snapshot
    Telemetry(Telemetry),

    /// Session instruction to a plot worker
    Directive { directive: Directive },

    /// Worker lifecycle notice
    Lifecycle { event: Lifecycle },

    /// Relayed worker failure
    Error(Box<WorkerError>),
}

impl ControlMessage {
    pub fn command(seq: u64, command: Command) -> Self {
        Self::Command { seq, command }
    }

    pub fn directive(directive: Directive) -> Self {
        Self::Directive { directive }
    }

    pub fn lifecycle(event: Lifecycle) -> Self {
        Self::Lifecycle { event }
    }

    pub fn error(error: WorkerError) -> Self {
        Self::Error(Box::new(error))
    }

    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Command { .. } => "command",
            Self::Telemetry(_) => "telemetry",
            Self::Directive { .. } => "directive",
            Self::Lifecycle { .. } => "lifecycle",
            Self::Error(_) => "error",
        }
    }
}

/// Versioned wrapper used on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Protocol version
    pub protocol_version: ProtocolVersion,

    /// Message payload
    #[serde(flatten)]
    pub message: ControlMessage,
}

impl Envelope {
    /// Wraps a message with the current protocol version.
    pub fn new(message: ControlMessage) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            message,
        }
    }
}
