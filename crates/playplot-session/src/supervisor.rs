//! The session supervisor.
//!
//! One tokio task owns the session end of every worker channel and relays
//! between them:
//!
//! ```text
//!            commands                  telemetry (ack rewritten per plot)
//!  Session ───────────► Supervisor ─────────────────────────────► plot-N
//!     ▲                  │  ▲   ▲                                   │
//!     │ mirror + errors  │  │   └──────── gesture commands ─────────┘
//!     └──────────────────┘  │
//!                 commands ▼│ telemetry
//!                          audio
//! ```
//!
//! The supervisor never blocks on a worker. Downstream messages go through a
//! per-worker [`Outbox`] drained with `try_send`; telemetry in an outbox is
//! latest-wins while commands and directives are never dropped.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A failed reply to the session is ignored (the caller went away)

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use playplot_core::SessionConfig;
use playplot_protocol::{
    Command, ControlMessage, Directive, Lifecycle, Telemetry, WorkerError, WorkerKind,
};
use playplot_worker::{ChannelError, ChannelSender};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::commands::SupervisorCommand;
use crate::error::{Result, SessionError};
use crate::launcher::{LaunchedWorker, Spill, WorkerProcess};
use crate::mirror::{Mirror, SessionStatus, WorkerSummary};
use crate::notify::ErrorNotifier;

/// Housekeeping interval: outbox retries, liveness, shutdown deadline.
const TICK: Duration = Duration::from_millis(20);

/// How long a dead worker's last messages may take to arrive before its
/// death is reported as unexpected.
const DEATH_GRACE: Duration = Duration::from_millis(200);

/// Capacity of the merged inbound queue.
const INBOX_CAPACITY: usize = 256;

// ============================================================================
// Error Queue
// ============================================================================

/// Worker errors waiting to be picked up by the session.
#[derive(Debug, Clone, Default)]
pub(crate) struct ErrorQueue {
    inner: Arc<Mutex<VecDeque<WorkerError>>>,
}

impl ErrorQueue {
    fn lock(&self) -> MutexGuard<'_, VecDeque<WorkerError>> {
        // A poisoned queue still holds valid errors
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn push(&self, error: WorkerError) {
        self.lock().push_back(error);
    }

    pub fn drain(&self) -> Vec<WorkerError> {
        self.lock().drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }
}

// ============================================================================
// Outbox
// ============================================================================

/// Non-blocking downstream queue for one worker.
#[derive(Debug, Default)]
struct Outbox {
    queue: VecDeque<ControlMessage>,
    telemetry: Option<Telemetry>,
    closed: bool,
}

impl Outbox {
    fn push(&mut self, message: ControlMessage) {
        if !self.closed {
            self.queue.push_back(message);
        }
    }

    fn set_telemetry(&mut self, telemetry: Telemetry) {
        if !self.closed {
            self.telemetry = Some(telemetry);
        }
    }

    fn is_empty(&self) -> bool {
        self.closed || (self.queue.is_empty() && self.telemetry.is_none())
    }

    /// Sends as much as the channel takes right now.
    fn flush(&mut self, sender: &ChannelSender) {
        while let Some(message) = self.queue.pop_front() {
            match sender.try_send(message) {
                Ok(()) => {}
                Err(rejected) if rejected.error == ChannelError::Full => {
                    self.queue.push_front(rejected.message);
                    return;
                }
                Err(_) => {
                    self.close();
                    return;
                }
            }
        }
        if let Some(telemetry) = self.telemetry.take() {
            match sender.try_send(ControlMessage::Telemetry(telemetry)) {
                Ok(()) => {}
                Err(rejected) if rejected.error == ChannelError::Full => {
                    self.telemetry = Some(telemetry);
                }
                Err(_) => self.close(),
            }
        }
    }

    fn close(&mut self) {
        self.closed = true;
        self.queue.clear();
        self.telemetry = None;
    }
}

// ============================================================================
// Worker Slots
// ============================================================================

/// Where a plot is in its life, for the open/pending counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PlotPhase {
    Pending,
    Open,
    Gone,
}

/// Supervisor-side bookkeeping for one worker.
struct Slot {
    kind: WorkerKind,
    label: String,
    sender: ChannelSender,
    process: Box<dyn WorkerProcess>,
    forwarder: JoinHandle<()>,
    outbox: Outbox,
    phase: PlotPhase,
    /// Exit notice or error received
    reported: bool,
    /// Session end of the channel saw the worker's side close
    disconnected: bool,
    /// First moment the worker was seen dead or disconnected
    dead_since: Option<Instant>,
    /// Left running past the end of the session
    detaching: bool,
    finished: bool,
    /// `(plot-local seq, session seq)` of gesture commands not yet acknowledged
    acks: VecDeque<(u64, u64)>,
    /// Highest plot-local seq acknowledged by the audio worker
    local_ack: u64,
}

impl Slot {
    fn is_plot(&self) -> bool {
        self.kind == WorkerKind::Plot
    }
}

/// Message from a worker, tagged by the forwarder.
enum Inbound {
    Message(ControlMessage),
    Disconnected,
}

/// A `SaveFrame` request waiting for plot replies.
struct PendingSave {
    frame: u64,
    waiting: Vec<usize>,
    paths: Vec<PathBuf>,
    failures: Vec<String>,
    respond_to: oneshot::Sender<Result<Vec<PathBuf>>>,
}

/// State of an ongoing stop.
struct Stopping {
    deadline: Instant,
}

// ============================================================================
// Supervisor
// ============================================================================

/// Shared state the supervisor reports into.
pub(crate) struct SupervisorParts {
    pub config: SessionConfig,
    pub mirror: Mirror,
    pub errors: ErrorQueue,
    pub notifier: Option<Arc<dyn ErrorNotifier>>,
    pub cancel: CancellationToken,
    pub spill: Option<Spill>,
}

/// Actor relaying between the session and its workers.
pub(crate) struct Supervisor {
    config: SessionConfig,
    mirror: Mirror,
    errors: ErrorQueue,
    notifier: Option<Arc<dyn ErrorNotifier>>,
    cancel: CancellationToken,
    _spill: Option<Spill>,
    commands: mpsc::Receiver<SupervisorCommand>,
    inbox: mpsc::Receiver<(usize, Inbound)>,
    slots: Vec<Slot>,
    saves: Vec<PendingSave>,
    stopping: Option<Stopping>,
}

impl Supervisor {
    /// Takes ownership of the launched workers.
    ///
    /// `workers[0]` must be the audio worker. Must be called from within a
    /// tokio runtime.
    pub fn new(
        parts: SupervisorParts,
        workers: Vec<LaunchedWorker>,
        commands: mpsc::Receiver<SupervisorCommand>,
    ) -> Self {
        let (inbox_tx, inbox) = mpsc::channel(INBOX_CAPACITY);
        let mut slots = Vec::with_capacity(workers.len());

        for (id, worker) in workers.into_iter().enumerate() {
            let (sender, mut receiver) = worker.endpoint.split();
            let tx = inbox_tx.clone();
            let forwarder = tokio::spawn(async move {
                while let Some(message) = receiver.recv().await {
                    if tx.send((id, Inbound::Message(message))).await.is_err() {
                        return;
                    }
                }
                let _ = tx.send((id, Inbound::Disconnected)).await;
            });
            let phase = if worker.kind == WorkerKind::Plot {
                PlotPhase::Pending
            } else {
                PlotPhase::Gone
            };
            slots.push(Slot {
                kind: worker.kind,
                label: worker.label,
                sender,
                process: worker.process,
                forwarder,
                outbox: Outbox::default(),
                phase,
                reported: false,
                disconnected: false,
                dead_since: None,
                detaching: false,
                finished: false,
                acks: VecDeque::new(),
                local_ack: 0,
            });
        }

        let plots = slots.iter().filter(|slot| slot.is_plot()).count();
        let summaries: Vec<WorkerSummary> = slots
            .iter()
            .map(|slot| WorkerSummary {
                label: slot.label.clone(),
                pid: slot.process.pid(),
            })
            .collect();
        parts.mirror.update(|state| {
            state.status = SessionStatus::Running;
            state.pending_plots = plots;
            state.total_spawned_plots = plots;
            state.workers = summaries;
        });

        Self {
            config: parts.config,
            mirror: parts.mirror,
            errors: parts.errors,
            notifier: parts.notifier,
            cancel: parts.cancel,
            _spill: parts.spill,
            commands,
            inbox,
            slots,
            saves: Vec::new(),
            stopping: None,
        }
    }

    /// Runs until every worker has exited or been given up on.
    pub async fn run(mut self) {
        info!(workers = self.slots.len(), "Supervisor running");
        let mut tick = interval(TICK);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled(), if self.stopping.is_none() => {
                    debug!("Session dropped, stopping workers");
                    self.begin_stop(true, "session dropped");
                }
                Some(command) = self.commands.recv() => {
                    self.handle_command(command);
                }
                Some((id, inbound)) = self.inbox.recv() => {
                    self.handle_inbound(id, inbound);
                }
                _ = tick.tick() => {
                    self.check_liveness();
                    self.check_deadline();
                }
            }

            self.flush();
            if self.is_done() {
                break;
            }
        }

        self.finish();
    }

    // ------------------------------------------------------------------------
    // Session Commands
    // ------------------------------------------------------------------------

    fn handle_command(&mut self, command: SupervisorCommand) {
        match command {
            SupervisorCommand::Transport {
                command,
                respond_to,
            } => {
                let result = if self.stopping.is_some() {
                    Err(SessionError::NotRunning)
                } else {
                    Ok(self.forward_transport(command))
                };
                let _ = respond_to.send(result);
            }
            SupervisorCommand::Stop { force, respond_to } => {
                self.begin_stop(force, "stop requested");
                let _ = respond_to.send(());
            }
            SupervisorCommand::SaveFrame {
                frame,
                folder,
                respond_to,
            } => self.request_save(frame, folder, respond_to),
        }
    }

    /// Assigns a session seq, updates the mirror and queues the command.
    fn forward_transport(&mut self, command: Command) -> u64 {
        let seq = self.mirror.next_seq();
        self.mirror.apply_optimistic(seq, command);
        if let Some(audio) = self.audio_mut() {
            audio.outbox.push(ControlMessage::command(seq, command));
        }
        trace!(seq, ?command, "Transport command forwarded");
        seq
    }

    fn request_save(
        &mut self,
        frame: u64,
        folder: PathBuf,
        respond_to: oneshot::Sender<Result<Vec<PathBuf>>>,
    ) {
        if self.stopping.is_some() {
            let _ = respond_to.send(Err(SessionError::NotRunning));
            return;
        }
        let mut waiting = Vec::new();
        for (id, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_plot() && slot.phase == PlotPhase::Open && !slot.finished {
                slot.outbox.push(ControlMessage::directive(Directive::SaveFrame {
                    frame,
                    folder: folder.clone(),
                }));
                waiting.push(id);
            }
        }
        if waiting.is_empty() {
            let _ = respond_to.send(Ok(Vec::new()));
            return;
        }
        self.saves.push(PendingSave {
            frame,
            waiting,
            paths: Vec::new(),
            failures: Vec::new(),
            respond_to,
        });
    }

    // ------------------------------------------------------------------------
    // Worker Messages
    // ------------------------------------------------------------------------

    fn handle_inbound(&mut self, id: usize, inbound: Inbound) {
        match inbound {
            Inbound::Message(message) => self.handle_message(id, message),
            Inbound::Disconnected => {
                if let Some(slot) = self.slots.get_mut(id) {
                    debug!(worker = %slot.label, "Worker channel closed");
                    slot.disconnected = true;
                    slot.outbox.close();
                    if slot.reported {
                        slot.finished = true;
                    } else if slot.dead_since.is_none() {
                        slot.dead_since = Some(Instant::now());
                    }
                }
                self.retire_plot(id);
            }
        }
    }

    fn handle_message(&mut self, id: usize, message: ControlMessage) {
        let Some(kind) = self.slots.get(id).map(|slot| slot.kind) else {
            return;
        };
        match (kind, message) {
            (WorkerKind::Audio, ControlMessage::Telemetry(telemetry)) => {
                self.on_telemetry(telemetry);
            }
            (WorkerKind::Plot, ControlMessage::Command { seq, command }) => {
                if self.stopping.is_some() {
                    return;
                }
                let global = self.forward_transport(command);
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.acks.push_back((seq, global));
                }
            }
            (_, ControlMessage::Lifecycle { event }) => self.on_lifecycle(id, event),
            (_, ControlMessage::Error(error)) => self.on_error(id, *error),
            (_, other) => {
                warn!(worker = id, message = other.name(), "Unexpected message from worker");
            }
        }
    }

    fn on_telemetry(&mut self, telemetry: Telemetry) {
        self.mirror.apply_telemetry(&telemetry);

        for slot in self.slots.iter_mut().filter(|slot| slot.is_plot()) {
            if slot.finished || slot.detaching {
                continue;
            }
            // Rewrite the ack into the plot's own numbering
            while let Some(&(local, global)) = slot.acks.front() {
                if global > telemetry.ack_seq {
                    break;
                }
                slot.local_ack = local;
                slot.acks.pop_front();
            }
            slot.outbox.set_telemetry(Telemetry {
                ack_seq: slot.local_ack,
                ..telemetry
            });
        }

        if telemetry.ended && !telemetry.looping && self.config.close_with_last_plot {
            self.begin_stop(false, "end of clip");
        }
    }

    fn on_lifecycle(&mut self, id: usize, event: Lifecycle) {
        let label = self.label(id);
        match event {
            Lifecycle::Ready => debug!(worker = %label, "Worker ready"),
            Lifecycle::Opened { title } => {
                info!(worker = %label, %title, "Plot opened");
                if let Some(slot) = self.slots.get_mut(id) {
                    if slot.phase == PlotPhase::Pending {
                        slot.phase = PlotPhase::Open;
                        self.mirror.update(|state| {
                            state.pending_plots = state.pending_plots.saturating_sub(1);
                            state.open_plots += 1;
                        });
                    }
                }
            }
            Lifecycle::Closed => {
                info!(worker = %label, "Plot closed");
                self.retire_plot(id);
            }
            Lifecycle::CloseSession => {
                info!(worker = %label, "Close-session requested from plot");
                self.begin_stop(true, "close-session gesture");
            }
            Lifecycle::FrameSaved { frame, path, error } => {
                self.on_frame_saved(id, frame, path, error);
            }
            Lifecycle::Exited => {
                debug!(worker = %label, "Worker exited");
                if let Some(slot) = self.slots.get_mut(id) {
                    slot.reported = true;
                    if slot.disconnected {
                        slot.finished = true;
                    }
                }
                self.retire_plot(id);
            }
        }
    }

    fn on_error(&mut self, id: usize, error: WorkerError) {
        let origin = error.origin;
        if let Some(slot) = self.slots.get_mut(id) {
            slot.reported = true;
        }
        self.record_error(error);
        self.retire_plot(id);
        if origin == WorkerKind::Audio || self.is_audio(id) {
            self.begin_stop(true, "audio worker failed");
        }
    }

    fn on_frame_saved(
        &mut self,
        id: usize,
        frame: u64,
        path: Option<PathBuf>,
        error: Option<String>,
    ) {
        let Some(index) = self
            .saves
            .iter()
            .position(|save| save.frame == frame && save.waiting.contains(&id))
        else {
            debug!(worker = id, frame, "Unsolicited frame-saved notice");
            return;
        };
        if let Some(save) = self.saves.get_mut(index) {
            save.waiting.retain(|waiting| *waiting != id);
            if let Some(path) = path {
                save.paths.push(path);
            }
            if let Some(error) = error {
                save.failures.push(error);
            }
        }
        self.complete_saves();
    }

    /// Answers every save request no longer waiting on a plot.
    fn complete_saves(&mut self) {
        let (done, waiting): (Vec<_>, Vec<_>) = std::mem::take(&mut self.saves)
            .into_iter()
            .partition(|save| save.waiting.is_empty());
        self.saves = waiting;
        for save in done {
            let result = if save.failures.is_empty() {
                Ok(save.paths)
            } else {
                Err(SessionError::ImageSave(save.failures.join("; ")))
            };
            let _ = save.respond_to.send(result);
        }
    }

    fn record_error(&self, error: WorkerError) {
        error!(
            worker = %error.worker,
            origin = %error.origin,
            kind = %error.kind,
            message = %error.message,
            "Worker failed"
        );
        if self.config.show_msg_box_on_error_in_other_process {
            if let Some(notifier) = &self.notifier {
                notifier.notify(&error);
            }
        }
        self.errors.push(error);
    }

    /// Marks a plot as no longer showing, and applies the last-plot rule.
    fn retire_plot(&mut self, id: usize) {
        let Some(slot) = self.slots.get_mut(id) else {
            return;
        };
        if !slot.is_plot() || slot.phase == PlotPhase::Gone {
            return;
        }
        let was = slot.phase;
        slot.phase = PlotPhase::Gone;
        self.mirror.update(|state| match was {
            PlotPhase::Pending => state.pending_plots = state.pending_plots.saturating_sub(1),
            PlotPhase::Open => state.open_plots = state.open_plots.saturating_sub(1),
            PlotPhase::Gone => {}
        });

        for save in &mut self.saves {
            if save.waiting.contains(&id) {
                save.waiting.retain(|waiting| *waiting != id);
                save.failures.push(format!("plot {id} closed before saving"));
            }
        }
        self.complete_saves();

        let remaining = self
            .slots
            .iter()
            .any(|slot| slot.is_plot() && slot.phase != PlotPhase::Gone);
        if !remaining && self.config.close_with_last_plot {
            self.begin_stop(false, "last plot closed");
        }
    }

    // ------------------------------------------------------------------------
    // Liveness and Shutdown
    // ------------------------------------------------------------------------

    /// Reports workers that died without an exit notice or error.
    fn check_liveness(&mut self) {
        let now = Instant::now();
        let mut died = Vec::new();

        for (id, slot) in self.slots.iter_mut().enumerate() {
            if slot.finished || slot.detaching {
                continue;
            }
            if slot.dead_since.is_none() && !slot.process.is_alive() {
                slot.dead_since = Some(now);
            }
            let Some(since) = slot.dead_since else {
                continue;
            };
            if slot.reported {
                if slot.disconnected {
                    slot.finished = true;
                }
                continue;
            }
            if now.saturating_duration_since(since) >= DEATH_GRACE {
                let detail = slot.process.exit_detail();
                warn!(worker = %slot.label, detail = ?detail, "Worker died without reporting");
                slot.reported = true;
                slot.finished = true;
                slot.outbox.close();
                died.push((id, WorkerError::terminated_unexpectedly(&slot.label, detail)));
            }
        }

        for (id, error) in died {
            self.record_error(error);
            self.retire_plot(id);
            if self.is_audio(id) {
                self.begin_stop(true, "audio worker died");
            }
        }
    }

    /// Terminates workers still running past the shutdown deadline.
    fn check_deadline(&mut self) {
        let Some(stopping) = &self.stopping else {
            return;
        };
        if Instant::now() < stopping.deadline {
            return;
        }
        let timeout = self.config.shutdown_timeout;
        let mut overdue = Vec::new();
        for slot in self.slots.iter_mut() {
            if slot.finished || slot.detaching {
                continue;
            }
            warn!(worker = %slot.label, ?timeout, "Worker did not stop in time, terminating");
            slot.process.terminate();
            slot.finished = true;
            overdue.push(WorkerError::new(
                slot.kind,
                &slot.label,
                "shutdown_timeout",
                format!("worker did not stop within {timeout:?} and was terminated"),
            ));
        }
        for error in overdue {
            self.record_error(error);
        }
    }

    /// Starts stopping every worker; later calls are ignored.
    fn begin_stop(&mut self, force: bool, reason: &str) {
        if self.stopping.is_some() {
            return;
        }
        let close_plots = force || self.config.close_with_last_plot;
        info!(reason, force, close_plots, "Stopping session");

        self.mirror.set_status(SessionStatus::Stopping);
        let seq = self.mirror.next_seq();
        for slot in self.slots.iter_mut() {
            if slot.finished {
                continue;
            }
            if !slot.is_plot() {
                slot.outbox.push(ControlMessage::command(seq, Command::Stop));
            } else if close_plots {
                slot.outbox.push(ControlMessage::directive(Directive::Shutdown));
            } else {
                slot.outbox.push(ControlMessage::directive(Directive::Detach));
                slot.detaching = true;
            }
        }
        self.stopping = Some(Stopping {
            deadline: Instant::now() + self.config.shutdown_timeout,
        });
    }

    fn flush(&mut self) {
        for slot in self.slots.iter_mut() {
            slot.outbox.flush(&slot.sender);
        }
    }

    fn is_done(&self) -> bool {
        self.stopping.is_some()
            && self
                .slots
                .iter()
                .all(|slot| slot.finished || (slot.detaching && slot.outbox.is_empty()))
    }

    fn finish(mut self) {
        for slot in self.slots.iter_mut() {
            slot.forwarder.abort();
            if slot.detaching && !slot.finished {
                info!(worker = %slot.label, "Plot left open past the end of the session");
                slot.process.detach();
            }
        }
        for save in self.saves.drain(..) {
            let _ = save.respond_to.send(Err(SessionError::NotRunning));
        }
        self.mirror.update(|state| {
            state.status = SessionStatus::Stopped;
            state.open_plots = 0;
            state.pending_plots = 0;
        });
        info!(errors = self.errors.len(), "Session stopped");
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn audio_mut(&mut self) -> Option<&mut Slot> {
        self.slots
            .iter_mut()
            .find(|slot| slot.kind == WorkerKind::Audio)
    }

    fn is_audio(&self, id: usize) -> bool {
        self.slots
            .get(id)
            .is_some_and(|slot| slot.kind == WorkerKind::Audio)
    }

    fn label(&self, id: usize) -> String {
        self.slots
            .get(id)
            .map(|slot| slot.label.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use playplot_worker::{channel_pair, ChannelEndpoint};
    use std::sync::atomic::{AtomicBool, Ordering};

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Worker process stand-in whose liveness the test controls.
    struct FakeProcess {
        label: String,
        alive: Arc<AtomicBool>,
        terminated: Arc<AtomicBool>,
    }

    impl WorkerProcess for FakeProcess {
        fn label(&self) -> &str {
            &self.label
        }
        fn pid(&self) -> Option<u32> {
            None
        }
        fn is_alive(&mut self) -> bool {
            self.alive.load(Ordering::SeqCst)
        }
        fn exit_detail(&mut self) -> Option<String> {
            Some("killed by signal 9".to_string())
        }
        fn terminate(&mut self) {
            self.terminated.store(true, Ordering::SeqCst);
        }
        fn detach(&mut self) {}
    }

    struct Harness {
        commands: mpsc::Sender<SupervisorCommand>,
        mirror: Mirror,
        errors: ErrorQueue,
        task: JoinHandle<()>,
        audio: ChannelEndpoint,
        audio_alive: Arc<AtomicBool>,
        audio_terminated: Arc<AtomicBool>,
        plots: Vec<ChannelEndpoint>,
    }

    type Launched = (LaunchedWorker, ChannelEndpoint, Arc<AtomicBool>, Arc<AtomicBool>);

    fn launched(kind: WorkerKind, label: &str) -> Launched {
        let (session_end, worker_end) = channel_pair(16);
        let alive = Arc::new(AtomicBool::new(true));
        let terminated = Arc::new(AtomicBool::new(false));
        let worker = LaunchedWorker {
            kind,
            label: label.to_string(),
            endpoint: session_end,
            process: Box::new(FakeProcess {
                label: label.to_string(),
                alive: Arc::clone(&alive),
                terminated: Arc::clone(&terminated),
            }),
        };
        (worker, worker_end, alive, terminated)
    }

    fn start(config: SessionConfig, plots: usize) -> Harness {
        let mirror = Mirror::new(2.0, 0.0, 0.8, true, false);
        let errors = ErrorQueue::default();
        let (audio_worker, audio, audio_alive, audio_terminated) =
            launched(WorkerKind::Audio, "audio");
        let mut workers = vec![audio_worker];
        let mut plot_ends = Vec::new();
        for index in 0..plots {
            let (worker, end, _, _) = launched(WorkerKind::Plot, &format!("plot-{index}"));
            workers.push(worker);
            plot_ends.push(end);
        }
        let (commands, rx) = mpsc::channel(8);
        let parts = SupervisorParts {
            config,
            mirror: mirror.clone(),
            errors: errors.clone(),
            notifier: None,
            cancel: CancellationToken::new(),
            spill: None,
        };
        let task = tokio::spawn(Supervisor::new(parts, workers, rx).run());
        Harness {
            commands,
            mirror,
            errors,
            task,
            audio,
            audio_alive,
            audio_terminated,
            plots: plot_ends,
        }
    }

    async fn transport(harness: &Harness, command: Command) -> u64 {
        let (tx, rx) = oneshot::channel();
        harness
            .commands
            .send(SupervisorCommand::Transport {
                command,
                respond_to: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap()
    }

    async fn next(endpoint: &mut ChannelEndpoint) -> ControlMessage {
        endpoint.receive(Some(Duration::from_secs(5))).await.unwrap()
    }

    // ========================================================================
    // Tests
    // ========================================================================

    #[tokio::test]
    async fn test_transport_reaches_audio_with_session_seq() {
        let mut h = start(SessionConfig::default(), 0);
        let seq = transport(&h, Command::Seek { time: 1.5 }).await;
        assert_eq!(seq, 1);
        assert_eq!(h.mirror.snapshot().time, 1.5);
        assert_eq!(
            next(&mut h.audio).await,
            ControlMessage::command(1, Command::Seek { time: 1.5 })
        );
    }

    #[tokio::test]
    async fn test_plot_commands_are_renumbered_and_acks_translated() {
        let mut h = start(SessionConfig::default(), 1);
        let mut plot = h.plots.remove(0);

        // Session command takes seq 1, the plot's local seq 1 becomes 2
        transport(&h, Command::Pause).await;
        plot.send(ControlMessage::command(1, Command::Seek { time: 0.5 }))
            .await
            .unwrap();
        assert_eq!(next(&mut h.audio).await, ControlMessage::command(1, Command::Pause));
        assert_eq!(
            next(&mut h.audio).await,
            ControlMessage::command(2, Command::Seek { time: 0.5 })
        );

        // Telemetry acknowledging only the session command
        h.audio
            .send(ControlMessage::Telemetry(Telemetry {
                ack_seq: 1,
                ..Telemetry::default()
            }))
            .await
            .unwrap();
        match next(&mut plot).await {
            ControlMessage::Telemetry(t) => assert_eq!(t.ack_seq, 0),
            other => panic!("expected telemetry, got {other:?}"),
        }

        h.audio
            .send(ControlMessage::Telemetry(Telemetry {
                position: 0.5,
                ack_seq: 2,
                ..Telemetry::default()
            }))
            .await
            .unwrap();
        match next(&mut plot).await {
            ControlMessage::Telemetry(t) => {
                assert_eq!(t.ack_seq, 1);
                assert_eq!(t.position, 0.5);
            }
            other => panic!("expected telemetry, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_silent_death_is_reported_as_foreign() {
        let h = start(SessionConfig::default(), 0);
        h.audio_alive.store(false, Ordering::SeqCst);
        drop(h.audio);

        h.task.await.unwrap();
        let errors = h.errors.drain();
        assert_eq!(errors.len(), 1);
        let error = errors.first().unwrap();
        assert_eq!(error.origin, WorkerKind::Foreign);
        assert_eq!(error.message, "worker terminated unexpectedly");
        assert_eq!(error.formatted_trace, "killed by signal 9");
        assert_eq!(h.mirror.status(), SessionStatus::Stopped);
    }

    #[tokio::test]
    async fn test_unresponsive_worker_is_terminated_after_timeout() {
        let config = SessionConfig::default().shutdown_timeout(Duration::from_millis(100));
        let mut h = start(config, 0);

        let (tx, rx) = oneshot::channel();
        h.commands
            .send(SupervisorCommand::Stop {
                force: true,
                respond_to: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap();
        assert_eq!(next(&mut h.audio).await, ControlMessage::command(1, Command::Stop));

        // The worker never exits
        h.task.await.unwrap();
        assert!(h.audio_terminated.load(Ordering::SeqCst));
        let errors = h.errors.drain();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors.first().unwrap().kind, "shutdown_timeout");
    }

    #[tokio::test]
    async fn test_last_plot_closing_stops_session() {
        let mut h = start(SessionConfig::default(), 1);
        let plot = h.plots.remove(0);
        plot.send(ControlMessage::lifecycle(Lifecycle::Opened {
            title: "Fig".to_string(),
        }))
        .await
        .unwrap();
        plot.send(ControlMessage::lifecycle(Lifecycle::Closed))
            .await
            .unwrap();

        assert_eq!(next(&mut h.audio).await, ControlMessage::command(1, Command::Stop));
        plot.send(ControlMessage::lifecycle(Lifecycle::Exited))
            .await
            .unwrap();
        drop(plot);
        h.audio
            .send(ControlMessage::lifecycle(Lifecycle::Exited))
            .await
            .unwrap();
        drop(h.audio);

        h.task.await.unwrap();
        assert!(h.errors.drain().is_empty());
        let state = h.mirror.snapshot();
        assert_eq!(state.status, SessionStatus::Stopped);
        assert_eq!(state.open_plots, 0);
        assert_eq!(state.total_spawned_plots, 1);
    }

    #[test]
    fn test_outbox_keeps_latest_telemetry_only() {
        let (session_end, _worker_end) = channel_pair(1);
        let sender = session_end.sender();
        let mut outbox = Outbox::default();

        outbox.push(ControlMessage::directive(Directive::Detach));
        outbox.set_telemetry(Telemetry {
            sequence: 1,
            ..Telemetry::default()
        });
        outbox.set_telemetry(Telemetry {
            sequence: 2,
            ..Telemetry::default()
        });
        outbox.flush(&sender);

        // Directive went out, telemetry waits for room
        assert!(!outbox.is_empty());
        assert_eq!(outbox.telemetry.map(|t| t.sequence), Some(2));
    }
}
