//! Supervisor commands.
//!
//! The session talks to its supervisor task the same way everywhere: a
//! command carrying a oneshot sender for the reply.

use std::path::PathBuf;

use playplot_protocol::Command;
use tokio::sync::oneshot;

use crate::error::Result;

// ============================================================================
// Supervisor Commands
// ============================================================================

/// Commands sent to the supervisor task.
#[derive(Debug)]
pub(crate) enum SupervisorCommand {
    /// Forward a transport command to the audio worker.
    ///
    /// The reply carries the sequence number assigned to the command.
    Transport {
        command: Command,
        respond_to: oneshot::Sender<Result<u64>>,
    },

    /// Stop every worker. Replies once the stop has been initiated.
    Stop {
        /// Close plot surfaces too, even with `close_with_last_plot` unset
        force: bool,
        respond_to: oneshot::Sender<()>,
    },

    /// Ask every open plot to write its current figure.
    SaveFrame {
        frame: u64,
        folder: PathBuf,
        respond_to: oneshot::Sender<Result<Vec<PathBuf>>>,
    },
}
