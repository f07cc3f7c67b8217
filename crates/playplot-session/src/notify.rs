//! User-facing notification of worker failures.
//!
//! Errors relayed from another process are easy to miss when that process
//! has no console of its own, so a session can surface each one as it
//! arrives in addition to queueing it for [`Session::check`](crate::Session::check).

use std::io::Write;

use playplot_protocol::WorkerError;

/// Receives every relayed worker error as it arrives.
pub trait ErrorNotifier: Send + Sync {
    fn notify(&self, error: &WorkerError);
}

/// Writes a framed report to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StderrNotifier;

impl ErrorNotifier for StderrNotifier {
    fn notify(&self, error: &WorkerError) {
        let mut stderr = std::io::stderr().lock();
        // Nothing sensible to do if stderr itself is gone
        let _ = writeln!(stderr, "{}", framed(error));
    }
}

/// Frames a report between two rules sized to its widest line.
fn framed(error: &WorkerError) -> String {
    let report = error.report();
    let width = report
        .lines()
        .map(|line| line.chars().count())
        .max()
        .unwrap_or(0)
        .clamp(20, 100);
    let rule = "-".repeat(width);
    format!("{rule}\n{report}\n{rule}")
}
