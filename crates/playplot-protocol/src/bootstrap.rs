//! Worker bootstrap payload.
//!
//! Everything a worker needs is passed explicitly when it is spawned; a
//! worker never reads controller state through globals. In process
//! isolation the bootstrap is the first line written to the worker's stdin,
//! wrapped in a [`Handshake`].

use playplot_core::{AudioSource, SessionConfig};
use serde::{Deserialize, Serialize};

use crate::version::ProtocolVersion;

/// Transport state the audio worker starts from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InitialTransport {
    pub time: f64,
    pub volume: f32,
    pub playing: bool,
    pub looping: bool,
}

impl InitialTransport {
    /// Initial transport derived from the session configuration.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self {
            time: config.start_time,
            volume: config.volume,
            playing: config.autoplay,
            looping: config.looping,
        }
    }
}

/// What the worker should run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum WorkerRole {
    /// Audio playback worker
    Audio { initial: InitialTransport },

    /// Plot worker running a registered plot function
    Plot {
        /// Index of the plot within the session
        index: usize,
        /// Registry name of the plot function
        function: String,
        /// Caller arguments passed to the plot function
        #[serde(default)]
        args: serde_json::Value,
    },
}

/// Bootstrap payload handed to a worker at spawn time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerBootstrap {
    /// Worker label used in logs and error records
    pub worker_id: String,

    pub role: WorkerRole,

    /// Session configuration
    pub config: SessionConfig,

    /// Where the worker loads its audio from
    pub source: AudioSource,

    /// Controller call stack that spawned the session
    #[serde(default)]
    pub origin_stack: Vec<String>,
}

/// First message on a process worker's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Handshake {
    pub protocol_version: ProtocolVersion,
    pub bootstrap: WorkerBootstrap,
}

impl Handshake {
    pub fn new(bootstrap: WorkerBootstrap) -> Self {
        Self {
            protocol_version: ProtocolVersion::CURRENT,
            bootstrap,
        }
    }
}
