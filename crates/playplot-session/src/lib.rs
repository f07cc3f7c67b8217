//! playplot session - the controller side of a playplot session
//!
//! A [`Session`] spawns an audio worker and one plot worker per bound plot
//! function, then keeps them in step: the audio worker's telemetry moves
//! every plot's marker, and clicks and keys on a plot become transport
//! commands for the audio worker.
//!
//! - [`session`]: the public façade and its state machine
//! - [`mirror`]: the cached transport state property reads come from
//! - [`launcher`]: spawning workers as threads or child processes
//! - [`notify`]: surfacing worker failures to the user
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

mod commands;
pub mod error;
pub mod launcher;
pub mod mirror;
pub mod notify;
pub mod session;
mod supervisor;

// Re-exports for convenience
pub use error::{Result, SessionError};
pub use launcher::{resolve_worker_executable, WorkerProcess, WORKER_EXECUTABLE};
pub use mirror::{MirroredState, SessionStatus, WorkerSummary};
pub use notify::{ErrorNotifier, StderrNotifier};
pub use session::Session;

pub use playplot_core::{AudioData, AudioSource, Isolation, SessionConfig};
pub use playplot_protocol::{WorkerError, WorkerKind};
pub use playplot_worker::{OutputFactory, PlotBinding, PlotRegistry};
