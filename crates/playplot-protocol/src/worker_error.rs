//! Structured record of a worker failure.
//!
//! A failure inside a worker cannot be moved across a process boundary as a
//! live error object, so it travels as a `WorkerError`: origin, category,
//! message, formatted trace and the call stack that spawned the worker. The
//! `payload` is a best-effort serialization of the underlying failure and is
//! not guaranteed to carry everything the original error held.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which kind of worker a failure originated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    /// The audio playback worker
    Audio,
    /// A plot worker
    Plot,
    /// A worker that died without reporting (synthesized by the session)
    #[serde(rename = "foreign process")]
    Foreign,
}

impl WorkerKind {
    /// Phrase used in user-facing reports.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::Audio => "the audio playback worker",
            Self::Plot => "a plot worker",
            Self::Foreign => "a foreign process",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Plot => write!(f, "plot"),
            Self::Foreign => write!(f, "foreign process"),
        }
    }
}

/// A failure captured inside a worker and relayed to the session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerError {
    /// Kind of worker the failure came from
    pub origin: WorkerKind,

    /// Label of the failing worker (`audio`, `plot-0`, ...)
    pub worker: String,

    /// Failure category (`panic`, `plot_function`, `output`, ...)
    pub kind: String,

    /// One-line description
    pub message: String,

    /// Human-readable trace (error chain or panic backtrace)
    #[serde(default)]
    pub formatted_trace: String,

    /// Frames of the controller call site that spawned the worker
    #[serde(default)]
    pub origin_stack: Vec<String>,

    /// Best-effort serialization of the underlying failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,

    /// When the failure was captured
    pub occurred_at: DateTime<Utc>,
}

impl WorkerError {
    pub fn new(
        origin: WorkerKind,
        worker: impl Into<String>,
        kind: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            origin,
            worker: worker.into(),
            kind: kind.into(),
            message: message.into(),
            formatted_trace: String::new(),
            origin_stack: Vec::new(),
            payload: None,
            occurred_at: Utc::now(),
        }
    }

    /// Error synthesized when a worker dies without relaying a failure.
    pub fn terminated_unexpectedly(worker: impl Into<String>, detail: Option<String>) -> Self {
        let mut error = Self::new(
            WorkerKind::Foreign,
            worker,
            "terminated",
            "worker terminated unexpectedly",
        );
        if let Some(detail) = detail {
            error.formatted_trace = detail;
        }
        error
    }

    #[must_use]
    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.formatted_trace = trace.into();
        self
    }

    #[must_use]
    pub fn with_origin_stack(mut self, stack: Vec<String>) -> Self {
        self.origin_stack = stack;
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Multi-line report for logs and notifications.
    ///
    /// ```text
    /// An <kind> occurred inside a plot worker (plot-0):
    /// <trace>
    /// This worker was started from:
    /// <stack>
    /// ```
    pub fn report(&self) -> String {
        let mut out = format!(
            "An {} occurred inside {} ({}):\n",
            self.kind,
            self.origin.describe(),
            self.worker
        );
        if self.formatted_trace.is_empty() {
            out.push_str(&self.message);
        } else {
            out.push_str(&self.formatted_trace);
        }
        if !self.origin_stack.is_empty() {
            out.push_str("\nThis worker was started from:\n");
            out.push_str(&self.origin_stack.join("\n"));
        }
        out
    }
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in {} worker {}: {}",
            self.kind, self.origin, self.worker, self.message
        )
    }
}

impl std::error::Error for WorkerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_error_is_foreign() {
        let error = WorkerError::terminated_unexpectedly("plot-1", None);
        assert_eq!(error.origin, WorkerKind::Foreign);
        assert_eq!(error.message, "worker terminated unexpectedly");
        assert_eq!(
            serde_json::to_value(error.origin).unwrap(),
            serde_json::json!("foreign process")
        );
    }

    #[test]
    fn test_report_includes_trace_and_stack() {
        let error = WorkerError::new(WorkerKind::Audio, "audio", "output", "device lost")
            .with_trace("device lost\ncaused by: unplugged")
            .with_origin_stack(vec!["main.rs:10".to_string(), "lib.rs:4".to_string()]);
        let report = error.report();
        assert!(report.starts_with("An output occurred inside the audio playback worker (audio):"));
        assert!(report.contains("caused by: unplugged"));
        assert!(report.contains("This worker was started from:\nmain.rs:10\nlib.rs:4"));
    }

    #[test]
    fn test_display_is_single_line() {
        let error = WorkerError::new(WorkerKind::Plot, "plot-0", "panic", "index out of range");
        assert_eq!(
            error.to_string(),
            "panic in plot worker plot-0: index out of range"
        );
    }
}
