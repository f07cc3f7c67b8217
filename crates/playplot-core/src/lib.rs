//! playplot core - shared types for audio-linked plotting
//!
//! This crate provides the domain types shared between the controller
//! session and its audio and plot workers: sample buffers, audio sources,
//! session configuration and time/position mappings.
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod audio;
pub mod config;
pub mod error;
pub mod mapping;
pub mod source;

// Re-exports for convenience
pub use audio::{clamp_time, frames_to_seconds, seconds_to_frames, AudioData};
pub use config::{Isolation, SessionConfig, ISOLATION_ENV, WORKER_ENV};
pub use error::{ConfigError, InputError, InputErrorKind, MappingError};
pub use mapping::TimeMapping;
pub use source::AudioSource;
