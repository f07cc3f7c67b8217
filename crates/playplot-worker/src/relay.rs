//! Exception relay around a worker's top-level execution.
//!
//! [`ExceptionRelay::run_on`] drives a worker future to completion on a
//! dedicated single-threaded runtime. Whatever ends the worker, the
//! controller hears about it:
//! - clean return: a `Lifecycle::Exited` notice
//! - returned `WorkerFailure`: a `WorkerError` with the cause chain
//! - panic: a `WorkerError` of kind `panic` with the captured backtrace
//!
//! Delivery is best-effort and bounded in time. If it fails the relay logs
//! the report locally; the session then notices the dead worker through
//! liveness polling.
//!
//! # Panic-Free Guarantees
//!
//! The relay itself never panics: it catches worker panics with
//! `catch_unwind` and only ever logs when delivery fails.

use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::RefCell;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use std::time::Duration;

use playplot_protocol::{ControlMessage, Lifecycle, WorkerError, WorkerKind};
use tokio::runtime::{Builder, Runtime};
use tokio::time::timeout;
use tracing::{debug, error, info};

use crate::channel::ChannelSender;
use crate::error::WorkerFailure;

/// How long the relay waits for room on the channel when reporting.
const RELAY_SEND_TIMEOUT: Duration = Duration::from_secs(2);

thread_local! {
    static LAST_PANIC: RefCell<Option<CapturedPanic>> = const { RefCell::new(None) };
}

static INSTALL_HOOK: Once = Once::new();

/// Location and backtrace recorded by the panic hook on the panicking thread.
#[derive(Debug, Clone)]
struct CapturedPanic {
    location: Option<String>,
    backtrace: String,
}

/// How a relayed worker ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// The worker returned normally.
    Completed,
    /// The worker failed; `delivered` tells whether the report reached the channel.
    Failed { error: WorkerError, delivered: bool },
}

impl RelayOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Wraps a worker run and reports its end upstream.
#[derive(Debug, Clone)]
pub struct ExceptionRelay {
    origin: WorkerKind,
    worker_id: String,
    origin_stack: Vec<String>,
    reporter: ChannelSender,
}

impl ExceptionRelay {
    /// Creates a relay.
    ///
    /// # Arguments
    ///
    /// * `origin` - Kind of worker being wrapped
    /// * `worker_id` - Label used in logs and error records
    /// * `origin_stack` - Controller call stack that spawned the worker
    /// * `reporter` - Upstream half of the worker's control channel
    pub fn new(
        origin: WorkerKind,
        worker_id: impl Into<String>,
        origin_stack: Vec<String>,
        reporter: ChannelSender,
    ) -> Self {
        Self {
            origin,
            worker_id: worker_id.into(),
            origin_stack,
            reporter,
        }
    }

    /// Builds a current-thread runtime and runs the worker on it.
    ///
    /// A runtime that cannot be built is itself reported as a failure.
    pub fn run<F, Fut>(&self, work: F) -> RelayOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), WorkerFailure>>,
    {
        match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => self.run_on(&runtime, work),
            Err(e) => {
                let error = self.failure_record(&WorkerFailure::Runtime(e));
                self.log_failure(&error);
                let delivered = self
                    .reporter
                    .try_send(ControlMessage::error(error.clone()))
                    .is_ok();
                RelayOutcome::Failed { error, delivered }
            }
        }
    }

    /// Runs the worker on an existing runtime.
    ///
    /// Uses `block_on`, so the worker future may hold non-`Send` state such
    /// as an audio stream or a terminal handle.
    pub fn run_on<F, Fut>(&self, runtime: &Runtime, work: F) -> RelayOutcome
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), WorkerFailure>>,
    {
        install_panic_capture();
        info!(worker = %self.worker_id, origin = %self.origin, "Worker starting");

        let result = panic::catch_unwind(AssertUnwindSafe(|| runtime.block_on(work())));

        let error = match result {
            Ok(Ok(())) => {
                info!(worker = %self.worker_id, "Worker finished");
                let notice = ControlMessage::lifecycle(Lifecycle::Exited);
                if !self.deliver(runtime, notice) {
                    debug!(worker = %self.worker_id, "Exit notice not delivered");
                }
                return RelayOutcome::Completed;
            }
            Ok(Err(failure)) => self.failure_record(&failure),
            Err(payload) => self.panic_record(payload.as_ref()),
        };

        self.log_failure(&error);
        let delivered = self.deliver(runtime, ControlMessage::error(error.clone()));
        if !delivered {
            error!(
                worker = %self.worker_id,
                "Failed to relay worker error, controller must detect the exit"
            );
        }
        RelayOutcome::Failed { error, delivered }
    }

    fn deliver(&self, runtime: &Runtime, message: ControlMessage) -> bool {
        let reporter = self.reporter.clone();
        runtime.block_on(async move {
            matches!(
                timeout(RELAY_SEND_TIMEOUT, reporter.send(message)).await,
                Ok(Ok(()))
            )
        })
    }

    fn failure_record(&self, failure: &WorkerFailure) -> WorkerError {
        let chain: Vec<String> = failure.trace().lines().map(str::to_string).collect();
        WorkerError::new(
            self.origin,
            self.worker_id.clone(),
            failure.kind(),
            failure.to_string(),
        )
        .with_trace(failure.trace())
        .with_origin_stack(self.origin_stack.clone())
        .with_payload(serde_json::json!({
            "kind": failure.kind(),
            "message": failure.to_string(),
            "chain": chain,
        }))
    }

    fn panic_record(&self, payload: &(dyn Any + Send)) -> WorkerError {
        let message = panic_message(payload);
        let captured = LAST_PANIC.with(|slot| slot.borrow_mut().take());
        let (location, backtrace) = match captured {
            Some(c) => (c.location, c.backtrace),
            None => (None, String::new()),
        };

        let mut trace = format!("panicked: {message}");
        if let Some(location) = &location {
            trace.push_str(&format!(" at {location}"));
        }
        if !backtrace.is_empty() {
            trace.push('\n');
            trace.push_str(&backtrace);
        }

        WorkerError::new(self.origin, self.worker_id.clone(), "panic", message.clone())
            .with_trace(trace)
            .with_origin_stack(self.origin_stack.clone())
            .with_payload(serde_json::json!({
                "kind": "panic",
                "message": message,
                "location": location,
            }))
    }

    fn log_failure(&self, error: &WorkerError) {
        error!(
            worker = %self.worker_id,
            kind = %error.kind,
            report = %error.report(),
            "Worker failed"
        );
    }
}

/// Extracts the message of a panic payload.
fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Installs (once per process) a panic hook that records the location and a
/// backtrace for the panicking thread, then defers to the previous hook.
fn install_panic_capture() {
    INSTALL_HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let captured = CapturedPanic {
                location: info.location().map(|l| l.to_string()),
                backtrace: Backtrace::force_capture().to_string(),
            };
            LAST_PANIC.with(|slot| *slot.borrow_mut() = Some(captured));
            previous(info);
        }));
    });
}

/// Captures the caller's stack as text lines, for `origin_stack`.
pub fn capture_origin_stack() -> Vec<String> {
    Backtrace::force_capture()
        .to_string()
        .lines()
        .map(|line| line.trim_end().to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::channel_pair;

    fn relay_with_endpoint() -> (ExceptionRelay, crate::channel::ChannelEndpoint) {
        let (worker_end, controller_end) = channel_pair(4);
        let relay = ExceptionRelay::new(
            WorkerKind::Plot,
            "plot-0",
            vec!["spawned here".to_string()],
            worker_end.sender(),
        );
        (relay, controller_end)
    }

    #[test]
    fn test_completion_sends_exit_notice() {
        let (relay, mut controller) = relay_with_endpoint();
        let outcome = relay.run(|| async { Ok(()) });
        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(
            controller.try_receive().unwrap(),
            Some(ControlMessage::lifecycle(Lifecycle::Exited))
        );
    }

    #[test]
    fn test_returned_failure_is_relayed() {
        let (relay, mut controller) = relay_with_endpoint();
        let outcome = relay.run(|| async {
            Err(WorkerFailure::PlotFunction(anyhow::anyhow!("bad axis")))
        });
        assert!(outcome.is_failure());

        match controller.try_receive().unwrap() {
            Some(ControlMessage::Error(error)) => {
                assert_eq!(error.origin, WorkerKind::Plot);
                assert_eq!(error.worker, "plot-0");
                assert_eq!(error.kind, "plot_function");
                assert!(error.message.contains("bad axis"));
                assert_eq!(error.origin_stack, vec!["spawned here".to_string()]);
                assert!(error.payload.is_some());
            }
            other => panic!("expected error message, got {other:?}"),
        }
        assert_eq!(controller.try_receive().unwrap(), None);
    }

    #[test]
    fn test_panic_is_caught_and_relayed() {
        let (relay, mut controller) = relay_with_endpoint();
        let outcome = relay.run(|| async {
            let values: Vec<u32> = Vec::new();
            if values.is_empty() {
                panic!("draw callback exploded");
            }
            Ok(())
        });
        match outcome {
            RelayOutcome::Failed { error, delivered } => {
                assert!(delivered);
                assert_eq!(error.kind, "panic");
                assert_eq!(error.message, "draw callback exploded");
                assert!(error.formatted_trace.contains("draw callback exploded"));
            }
            RelayOutcome::Completed => panic!("panic was not caught"),
        }
        assert!(matches!(
            controller.try_receive().unwrap(),
            Some(ControlMessage::Error(_))
        ));
    }

    #[test]
    fn test_undeliverable_report_is_flagged() {
        let (relay, controller) = relay_with_endpoint();
        drop(controller);
        let outcome = relay.run(|| async { Err(WorkerFailure::ChannelClosed) });
        assert!(matches!(
            outcome,
            RelayOutcome::Failed {
                delivered: false,
                ..
            }
        ));
    }

    #[test]
    fn test_origin_stack_is_captured() {
        assert!(!capture_origin_stack().is_empty());
    }
}
