//! Error types for the terminal surface.
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` in this module.

use thiserror::Error;

/// Terminal surface errors.
#[derive(Error, Debug)]
pub enum TermError {
    /// No terminal is reachable from this process.
    ///
    /// A worker's stdout carries its control channel, so the surface needs
    /// the controlling terminal (`/dev/tty`) or a terminal on stderr.
    #[error("No terminal available: {0}")]
    NoTerminal(String),

    /// Failed to set up raw mode, the alternate screen or mouse capture.
    #[error("Failed to initialize terminal: {0}")]
    TerminalInit(String),

    /// Failed to restore the terminal.
    ///
    /// The terminal may be left in an inconsistent state; running `reset`
    /// can help recover.
    #[error("Failed to restore terminal: {0}")]
    TerminalCleanup(String),
}

/// Result type alias for terminal operations.
pub type Result<T> = std::result::Result<T, TermError>;
