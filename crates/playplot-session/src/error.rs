//! Error types for playplot sessions.
//!
//! **Panic-Free Policy:** This module follows the project's panic-free guidelines.
//! No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, or `todo!()`.

use std::io;
use std::time::Duration;

use playplot_core::{ConfigError, InputError};
use playplot_protocol::WorkerError;
use thiserror::Error;

// ============================================================================
// Session Error Type
// ============================================================================

/// Errors returned by [`Session`](crate::Session) operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The audio could not be loaded or has an unusable shape.
    ///
    /// Use [`InputError::kind`] to tell a bad source, an unreadable format
    /// and a network failure apart.
    #[error(transparent)]
    Input(#[from] InputError),

    /// The session configuration is out of range.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// `start()` was called on a running session.
    #[error("Session is already running")]
    AlreadyRunning,

    /// The session was stopped; it cannot be restarted.
    #[error("Session was stopped and cannot be restarted")]
    AlreadyStopped,

    /// A transport or plot operation needs a running session.
    #[error("Session is not running")]
    NotRunning,

    /// Plots must be bound before `start()`.
    #[error("Plots must be bound before the session starts")]
    PlotAfterStart,

    /// Process isolation can only run plot functions registered by name.
    #[error("Plot {index} uses an inline function, which a worker process cannot run")]
    InlinePlotInProcess {
        /// Index of the offending plot
        index: usize,
    },

    /// A bounded wait ran out.
    #[error("{operation} did not finish within {duration:?}")]
    Timeout {
        /// Operation that timed out
        operation: &'static str,
        /// Bound that was exceeded
        duration: Duration,
    },

    /// A worker failed; see [`WorkerError::report`] for the full trace.
    #[error("{0}")]
    Worker(Box<WorkerError>),

    /// A worker could not be started.
    #[error("Failed to start worker {worker}: {source}")]
    Spawn {
        worker: String,
        #[source]
        source: io::Error,
    },

    /// A plot could not write its image.
    #[error("Failed to save plot image: {0}")]
    ImageSave(String),

    /// The session supervisor has shut down.
    #[error("Session supervisor is gone")]
    ChannelClosed,
}

impl SessionError {
    pub(crate) fn spawn(worker: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            worker: worker.into(),
            source,
        }
    }

    /// The relayed worker failure, if this error carries one.
    pub fn worker_error(&self) -> Option<&WorkerError> {
        match self {
            Self::Worker(error) => Some(error),
            _ => None,
        }
    }
}

impl From<WorkerError> for SessionError {
    fn from(error: WorkerError) -> Self {
        Self::Worker(Box::new(error))
    }
}

/// Result type alias using [`SessionError`].
pub type Result<T> = std::result::Result<T, SessionError>;
