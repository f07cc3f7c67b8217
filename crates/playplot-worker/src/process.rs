//! Entry point of a worker running in its own process.
//!
//! The controller starts the worker executable with piped stdin and stdout.
//! The first stdin line is a [`Handshake`]; afterwards both streams carry
//! control messages, one JSON envelope per line. Logs must never go to
//! stdout.
//!
//! Exit codes:
//! - `0`: the worker finished cleanly
//! - `1`: the worker failed (the failure was relayed if possible)
//! - `2`: no usable handshake or runtime

use std::process::ExitCode;
use std::time::Duration;

use playplot_protocol::{
    frame, ControlMessage, Handshake, Lifecycle, WorkerBootstrap, WorkerError, WorkerKind,
    WorkerRole,
};
use tokio::io::{self, AsyncWriteExt, BufReader};
use tokio::runtime::Builder;
use tracing::{error, info};

use crate::audio::{default_output, AudioWorker};
use crate::channel::stream::{read_line, write_message, BridgeError};
use crate::channel::{channel_pair, Bridge, ChannelEndpoint};
use crate::error::WorkerFailure;
use crate::plot::{PlotBinding, PlotContext, PlotRegistry, PlotWorker};
use crate::relay::{ExceptionRelay, RelayOutcome};

/// How long queued frames may take to reach the controller at exit.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

const EXIT_FAILED: u8 = 1;
const EXIT_BOOTSTRAP: u8 = 2;

/// Runs the worker described by the handshake on stdin.
///
/// `registry` holds the plot functions this executable can run.
pub fn run_worker_process(registry: PlotRegistry) -> ExitCode {
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to build worker runtime");
            return ExitCode::from(EXIT_BOOTSTRAP);
        }
    };

    let mut stdin = BufReader::new(io::stdin());
    let handshake = match runtime.block_on(read_handshake(&mut stdin)) {
        Ok(handshake) => handshake,
        Err(e) => {
            error!(error = %e, "Invalid worker handshake");
            let report = WorkerError::new(WorkerKind::Foreign, "unknown", "protocol", e.to_string());
            runtime.block_on(async {
                let mut stdout = io::stdout();
                let _ = write_message(&mut stdout, &ControlMessage::error(report)).await;
                let _ = stdout.flush().await;
            });
            runtime.shutdown_timeout(Duration::from_millis(100));
            return ExitCode::from(EXIT_BOOTSTRAP);
        }
    };

    let bootstrap = handshake.bootstrap;
    let origin = match bootstrap.role {
        WorkerRole::Audio { .. } => WorkerKind::Audio,
        WorkerRole::Plot { .. } => WorkerKind::Plot,
    };
    info!(
        worker = %bootstrap.worker_id,
        origin = %origin,
        pid = std::process::id(),
        "Worker process started"
    );

    let (worker_end, bridge_end) = channel_pair(bootstrap.config.channel_capacity);
    let bridge = {
        let _guard = runtime.enter();
        Bridge::spawn(stdin, io::stdout(), bridge_end, &bootstrap.worker_id)
    };

    let relay = ExceptionRelay::new(
        origin,
        bootstrap.worker_id.clone(),
        bootstrap.origin_stack.clone(),
        worker_end.sender(),
    );
    let _ = worker_end.try_send(ControlMessage::lifecycle(Lifecycle::Ready));

    let outcome = relay.run_on(&runtime, || run_role(worker_end, bootstrap, &registry));

    drop(relay);
    runtime.block_on(bridge.finish(DRAIN_TIMEOUT));
    runtime.shutdown_timeout(Duration::from_millis(100));

    match outcome {
        RelayOutcome::Completed => ExitCode::SUCCESS,
        RelayOutcome::Failed { .. } => ExitCode::from(EXIT_FAILED),
    }
}

async fn read_handshake<R>(reader: &mut R) -> Result<Handshake, WorkerFailure>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let line = read_line(reader).await.map_err(|e| match e {
        BridgeError::Frame(frame) => WorkerFailure::Protocol(frame),
        BridgeError::Io(io) => WorkerFailure::Runtime(io),
        other => WorkerFailure::Runtime(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            other.to_string(),
        )),
    })?;
    Ok(frame::decode_handshake(&line)?)
}

/// Loads the clip and runs the role named in the bootstrap.
async fn run_role(
    channel: ChannelEndpoint,
    bootstrap: WorkerBootstrap,
    registry: &PlotRegistry,
) -> Result<(), WorkerFailure> {
    let audio = bootstrap.source.load().await?;
    match bootstrap.role {
        WorkerRole::Audio { initial } => {
            let output = default_output(&audio)?;
            AudioWorker::new(channel, &audio, output, initial, &bootstrap.config)
                .run()
                .await
        }
        WorkerRole::Plot {
            index,
            function,
            args,
        } => {
            let binding = PlotBinding::named(function, args.clone());
            let function = binding.resolve(registry)?;
            let ctx = PlotContext::new(index, bootstrap.worker_id, audio, args);
            PlotWorker::build(channel, function.as_ref(), ctx, &bootstrap.config)?
                .run()
                .await
        }
    }
}
