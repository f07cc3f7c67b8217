//! Spawning workers in threads or child processes.
//!
//! Both isolation modes produce a [`LaunchedWorker`]: the session end of the
//! worker's control channel plus a [`WorkerProcess`] used for liveness
//! checks and forced termination. The supervisor never needs to know which
//! mode a worker runs in.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Spawn failures are returned as `SessionError::Spawn`

use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::thread::JoinHandle;

use playplot_core::{AudioData, AudioSource, Isolation, SessionConfig};
use playplot_protocol::{
    frame, ControlMessage, Handshake, InitialTransport, Lifecycle, WorkerBootstrap, WorkerKind,
    WorkerRole,
};
use playplot_worker::channel::stream::write_line;
use playplot_worker::{
    channel_pair, default_output, AudioWorker, Bridge, ChannelEndpoint, ExceptionRelay,
    OutputFactory, PlotBinding, PlotContext, PlotRegistry, PlotWorker,
};
use tempfile::TempDir;
use tokio::io::BufReader;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::error::{Result, SessionError};

/// File name of the worker executable.
pub const WORKER_EXECUTABLE: &str = "playplot-worker";

// ============================================================================
// Worker Process Abstraction
// ============================================================================

/// Liveness and termination control over one running worker.
pub trait WorkerProcess: Send {
    /// Worker label (`audio`, `plot-0`, ...)
    fn label(&self) -> &str;

    /// OS process id, when the worker runs in its own process.
    fn pid(&self) -> Option<u32>;

    /// Returns false once the worker has gone away.
    fn is_alive(&mut self) -> bool;

    /// How the worker ended, if known.
    fn exit_detail(&mut self) -> Option<String>;

    /// Forcibly ends the worker, where the isolation mode allows it.
    fn terminate(&mut self);

    /// Lets the worker outlive the session.
    fn detach(&mut self);
}

/// A spawned worker as seen by the supervisor.
pub(crate) struct LaunchedWorker {
    pub kind: WorkerKind,
    pub label: String,
    pub endpoint: ChannelEndpoint,
    pub process: Box<dyn WorkerProcess>,
}

// ============================================================================
// Launch Plan
// ============================================================================

/// Everything needed to spawn the workers of one session.
pub(crate) struct LaunchPlan {
    pub audio: AudioData,
    /// Where the audio came from, if it was loaded from a file or URL
    pub source: Option<AudioSource>,
    pub config: SessionConfig,
    pub registry: Arc<PlotRegistry>,
    pub output_factory: Option<OutputFactory>,
    pub origin_stack: Vec<String>,
}

impl LaunchPlan {
    /// Spawns the audio worker.
    pub async fn spawn_audio(
        &self,
        initial: InitialTransport,
        spill: &mut Option<Spill>,
    ) -> Result<LaunchedWorker> {
        let label = "audio".to_string();
        match self.config.isolation {
            Isolation::Thread => self.spawn_audio_thread(label, initial),
            Isolation::Process => {
                let role = WorkerRole::Audio { initial };
                self.spawn_child(label, WorkerKind::Audio, role, spill).await
            }
        }
    }

    /// Spawns the plot worker at `index`.
    pub async fn spawn_plot(
        &self,
        index: usize,
        binding: &PlotBinding,
        spill: &mut Option<Spill>,
    ) -> Result<LaunchedWorker> {
        let label = format!("plot-{index}");
        match self.config.isolation {
            Isolation::Thread => self.spawn_plot_thread(label, index, binding.clone()),
            Isolation::Process => {
                let PlotBinding::Named { name, args } = binding else {
                    return Err(SessionError::InlinePlotInProcess { index });
                };
                let role = WorkerRole::Plot {
                    index,
                    function: name.clone(),
                    args: args.clone(),
                };
                self.spawn_child(label, WorkerKind::Plot, role, spill).await
            }
        }
    }

    fn spawn_audio_thread(
        &self,
        label: String,
        initial: InitialTransport,
    ) -> Result<LaunchedWorker> {
        let (endpoint, worker_end) = channel_pair(self.config.channel_capacity);
        let relay = self.relay(WorkerKind::Audio, &label, &worker_end);
        let audio = self.audio.clone();
        let factory = self.output_factory.clone();
        let config = self.config.clone();

        let handle = spawn_thread(&label, move || {
            relay.run(|| async move {
                let output = match factory {
                    Some(factory) => factory(&audio)?,
                    None => default_output(&audio)?,
                };
                AudioWorker::new(worker_end, &audio, output, initial, &config)
                    .run()
                    .await
            });
        })?;

        Ok(LaunchedWorker {
            kind: WorkerKind::Audio,
            process: Box::new(ThreadWorker::new(label.clone(), handle)),
            label,
            endpoint,
        })
    }

    fn spawn_plot_thread(
        &self,
        label: String,
        index: usize,
        binding: PlotBinding,
    ) -> Result<LaunchedWorker> {
        let (endpoint, worker_end) = channel_pair(self.config.channel_capacity);
        let relay = self.relay(WorkerKind::Plot, &label, &worker_end);
        let audio = self.audio.clone();
        let registry = Arc::clone(&self.registry);
        let config = self.config.clone();
        let worker_id = label.clone();

        let handle = spawn_thread(&label, move || {
            relay.run(|| async move {
                // Resolved in the worker so an unknown name is relayed like any
                // other plot failure
                let function = binding.resolve(&registry)?;
                let ctx = PlotContext::new(index, worker_id, audio, binding.args());
                PlotWorker::build(worker_end, function.as_ref(), ctx, &config)?
                    .run()
                    .await
            });
        })?;

        Ok(LaunchedWorker {
            kind: WorkerKind::Plot,
            process: Box::new(ThreadWorker::new(label.clone(), handle)),
            label,
            endpoint,
        })
    }

    fn relay(&self, kind: WorkerKind, label: &str, worker_end: &ChannelEndpoint) -> ExceptionRelay {
        // Same handshake notice a worker process sends
        let _ = worker_end.try_send(ControlMessage::lifecycle(Lifecycle::Ready));
        ExceptionRelay::new(kind, label, self.origin_stack.clone(), worker_end.sender())
    }

    async fn spawn_child(
        &self,
        label: String,
        kind: WorkerKind,
        role: WorkerRole,
        spill: &mut Option<Spill>,
    ) -> Result<LaunchedWorker> {
        let source = self.worker_source(spill)?;
        let bootstrap = WorkerBootstrap {
            worker_id: label.clone(),
            role,
            config: self.config.clone(),
            source,
            origin_stack: self.origin_stack.clone(),
        };
        let line = frame::encode_handshake(&Handshake::new(bootstrap))
            .map_err(|e| SessionError::spawn(&label, io::Error::new(io::ErrorKind::InvalidData, e)))?;

        let executable = resolve_worker_executable(&self.config);
        debug!(worker = %label, executable = %executable.display(), "Spawning worker process");

        let mut child = Command::new(&executable)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| SessionError::spawn(&label, e))?;

        let (Some(mut stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            let _ = child.start_kill();
            return Err(SessionError::spawn(
                &label,
                io::Error::new(io::ErrorKind::BrokenPipe, "worker stdio not captured"),
            ));
        };

        if let Err(e) = write_line(&mut stdin, &line).await {
            let _ = child.start_kill();
            return Err(SessionError::spawn(&label, io::Error::other(e.to_string())));
        }

        let (endpoint, bridge_end) = channel_pair(self.config.channel_capacity);
        let bridge = Bridge::spawn(BufReader::new(stdout), stdin, bridge_end, &label);
        info!(worker = %label, pid = ?child.id(), "Worker process started");

        Ok(LaunchedWorker {
            kind,
            process: Box::new(ChildWorker {
                label: label.clone(),
                child,
                bridge: Some(bridge),
                detached: false,
            }),
            label,
            endpoint,
        })
    }

    /// Source a worker process loads the clip from.
    ///
    /// Local files are passed through. Anything else is written once to a
    /// temporary WAV file shared by all workers of the session.
    fn worker_source(&self, spill: &mut Option<Spill>) -> Result<AudioSource> {
        if let Some(source @ AudioSource::Path { .. }) = &self.source {
            return Ok(source.clone());
        }
        if let Some(existing) = spill {
            return Ok(existing.source());
        }
        let created = Spill::write(&self.audio).map_err(|e| SessionError::spawn("audio", e))?;
        let source = created.source();
        *spill = Some(created);
        Ok(source)
    }
}

fn spawn_thread(label: &str, body: impl FnOnce() + Send + 'static) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name(format!("playplot-{label}"))
        .spawn(body)
        .map_err(|e| SessionError::spawn(label, e))
}

// ============================================================================
// Spilled Audio
// ============================================================================

/// In-memory audio written to disk for worker processes.
///
/// The directory is removed when the session is dropped.
#[derive(Debug)]
pub(crate) struct Spill {
    _dir: TempDir,
    path: PathBuf,
}

impl Spill {
    fn write(audio: &AudioData) -> io::Result<Self> {
        let dir = tempfile::Builder::new().prefix("playplot-").tempdir()?;
        let path = dir.path().join("clip.wav");
        audio.write_wav(&path)?;
        Ok(Self { _dir: dir, path })
    }

    fn source(&self) -> AudioSource {
        AudioSource::Path {
            path: self.path.clone(),
        }
    }
}

// ============================================================================
// Executable Resolution
// ============================================================================

/// Finds the worker executable.
///
/// Order: the configured path, a `playplot-worker` next to the current
/// executable (or one directory up, for test binaries under `deps/`), then
/// the bare name looked up on `PATH`.
pub fn resolve_worker_executable(config: &SessionConfig) -> PathBuf {
    if let Some(path) = &config.worker_executable {
        return path.clone();
    }
    let name = format!("{WORKER_EXECUTABLE}{}", std::env::consts::EXE_SUFFIX);
    if let Ok(current) = std::env::current_exe() {
        let candidates = current
            .parent()
            .into_iter()
            .flat_map(|dir| [Some(dir), dir.parent()])
            .flatten()
            .map(|dir| dir.join(&name));
        for candidate in candidates {
            if is_file(&candidate) {
                return candidate;
            }
        }
    }
    PathBuf::from(name)
}

fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}

// ============================================================================
// Thread Workers
// ============================================================================

/// A worker running on a dedicated thread.
///
/// Threads cannot be killed: `terminate` only gives up on the thread, which
/// exits on its own once its control channel closes.
struct ThreadWorker {
    label: String,
    handle: Option<JoinHandle<()>>,
}

impl ThreadWorker {
    fn new(label: String, handle: JoinHandle<()>) -> Self {
        Self {
            label,
            handle: Some(handle),
        }
    }
}

impl WorkerProcess for ThreadWorker {
    fn label(&self) -> &str {
        &self.label
    }

    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_alive(&mut self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    fn exit_detail(&mut self) -> Option<String> {
        if !self.handle.as_ref().is_some_and(|h| h.is_finished()) {
            return None;
        }
        match self.handle.take()?.join() {
            Ok(()) => Some("thread exited".to_string()),
            Err(_) => Some("thread panicked outside the relay".to_string()),
        }
    }

    fn terminate(&mut self) {
        if self.handle.take().is_some() {
            warn!(worker = %self.label, "Abandoning worker thread that did not stop in time");
        }
    }

    fn detach(&mut self) {
        self.handle = None;
    }
}

// ============================================================================
// Process Workers
// ============================================================================

/// A worker running as a child process.
///
/// The child is killed on drop unless it was detached.
struct ChildWorker {
    label: String,
    child: Child,
    bridge: Option<Bridge>,
    detached: bool,
}

impl WorkerProcess for ChildWorker {
    fn label(&self) -> &str {
        &self.label
    }

    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    fn exit_detail(&mut self) -> Option<String> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(format!("process exited with {status}")),
            Ok(None) => None,
            Err(e) => Some(format!("process status unavailable: {e}")),
        }
    }

    fn terminate(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(worker = %self.label, error = %e, "Kill failed (already exited?)");
        }
    }

    fn detach(&mut self) {
        self.detached = true;
        // The pumps wind down on their own once the session drops its channel end
        self.bridge = None;
    }
}

impl Drop for ChildWorker {
    fn drop(&mut self) {
        if !self.detached && self.is_alive() {
            self.terminate();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_executable_wins() {
        let config = SessionConfig::default().worker_executable("/opt/bin/custom-worker");
        assert_eq!(
            resolve_worker_executable(&config),
            PathBuf::from("/opt/bin/custom-worker")
        );
    }

    #[test]
    fn test_fallback_is_bare_name() {
        let config = SessionConfig::default();
        let resolved = resolve_worker_executable(&config);
        let name = resolved.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with(WORKER_EXECUTABLE));
    }

    #[test]
    fn test_spill_writes_readable_wav() {
        let audio = AudioData::from_mono(vec![0.0, 0.5, -0.5, 0.25], 8000).unwrap();
        let spill = Spill::write(&audio).unwrap();
        let AudioSource::Path { path } = spill.source() else {
            panic!("spill must produce a path source");
        };
        let reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 8000);
    }

    #[test]
    fn test_thread_worker_reports_exit() {
        let handle = std::thread::spawn(|| {});
        let mut worker = ThreadWorker::new("plot-0".to_string(), handle);
        while worker.is_alive() {
            std::thread::yield_now();
        }
        assert_eq!(worker.exit_detail().as_deref(), Some("thread exited"));
        assert!(!worker.is_alive());
    }
}
