//! playplot protocol - control channel messages
//!
//! This crate defines the closed set of messages exchanged between a
//! session (the controller) and its audio and plot workers, the structured
//! error record workers relay upstream, the bootstrap payload handed to a
//! worker at spawn time, and the newline-delimited JSON framing used when a
//! worker runs in its own process.

pub mod bootstrap;
pub mod frame;
pub mod message;
pub mod version;
pub mod worker_error;

pub use bootstrap::{Handshake, InitialTransport, WorkerBootstrap, WorkerRole};
pub use frame::{decode, decode_handshake, encode, encode_handshake, FrameError, MAX_MESSAGE_SIZE};
pub use message::{Command, ControlMessage, Directive, Envelope, Lifecycle, Telemetry};
pub use version::ProtocolVersion;
pub use worker_error::{WorkerError, WorkerKind};
