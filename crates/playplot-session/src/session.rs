//! The session façade.
//!
//! A [`Session`] owns one clip, the plots bound to it and, once started, a
//! supervisor task relaying between the audio worker and the plot workers.
//! Property reads come from the mirrored state and never wait on a worker.
//! Property writes are forwarded as transport commands and applied to the
//! mirror optimistically.
//!
//! ```ignore
//! let mut session = Session::from_mono(samples, 44_100, SessionConfig::default())?;
//! session.plot(PlotBinding::named("waveform", json!({})))?;
//! session.start().await?;
//! session.seek(1.5).await?;
//! session.join(None).await?;
//! session.check()?;
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - A supervisor that has gone away is reported as `SessionError::NotRunning`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use playplot_core::{AudioData, AudioSource, SessionConfig};
use playplot_protocol::{Command, InitialTransport, WorkerError};
use playplot_worker::{capture_origin_stack, OutputFactory, PlotBinding, PlotRegistry};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::commands::SupervisorCommand;
use crate::error::{Result, SessionError};
use crate::launcher::{LaunchPlan, Spill};
use crate::mirror::{Mirror, MirroredState, SessionStatus};
use crate::notify::{ErrorNotifier, StderrNotifier};
use crate::supervisor::{ErrorQueue, Supervisor, SupervisorParts};

/// Capacity of the session-to-supervisor command queue.
const COMMAND_CAPACITY: usize = 64;

/// Upper bound on waiting for plots to write their images.
const SAVE_TIMEOUT: Duration = Duration::from_secs(10);

/// Connection to a running supervisor.
struct SupervisorHandle {
    sender: mpsc::Sender<SupervisorCommand>,
    _task: JoinHandle<()>,
}

/// Audio playback linked to interactive plot markers.
pub struct Session {
    audio: AudioData,
    source: Option<AudioSource>,
    config: SessionConfig,
    plots: Vec<PlotBinding>,
    registry: Arc<PlotRegistry>,
    output_factory: Option<OutputFactory>,
    notifier: Option<Arc<dyn ErrorNotifier>>,
    mirror: Mirror,
    errors: ErrorQueue,
    supervisor: Option<SupervisorHandle>,
    cancel: CancellationToken,
}

impl Session {
    // ========================================================================
    // Construction
    // ========================================================================

    /// Creates a session over decoded audio.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Config` if the configuration is out of range.
    pub fn new(audio: AudioData, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let mirror = Mirror::new(
            audio.duration(),
            config.start_time,
            config.volume,
            !config.autoplay,
            config.looping,
        );
        Ok(Self {
            audio,
            source: None,
            config,
            plots: Vec::new(),
            registry: Arc::new(PlotRegistry::with_builtins()),
            output_factory: None,
            notifier: Some(Arc::new(StderrNotifier)),
            mirror,
            errors: ErrorQueue::default(),
            supervisor: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Creates a session over a single channel of samples.
    ///
    /// # Errors
    ///
    /// `SessionError::Input` for an empty buffer or a zero sample rate,
    /// `SessionError::Config` for an invalid configuration.
    pub fn from_mono(samples: Vec<f32>, sample_rate: u32, config: SessionConfig) -> Result<Self> {
        Self::new(AudioData::from_mono(samples, sample_rate)?, config)
    }

    /// Creates a session over one sample vector per channel.
    ///
    /// # Errors
    ///
    /// `SessionError::Input` for ragged or empty channels or a zero sample
    /// rate, `SessionError::Config` for an invalid configuration.
    pub fn from_channels(
        channels: Vec<Vec<f32>>,
        sample_rate: u32,
        config: SessionConfig,
    ) -> Result<Self> {
        Self::new(AudioData::from_channels(channels, sample_rate)?, config)
    }

    /// Loads a file or URL and creates a session over it.
    ///
    /// Nothing is spawned until [`Session::start`], so every load failure is
    /// reported here.
    ///
    /// # Errors
    ///
    /// `SessionError::Input` with kind `InvalidSource`, `UnreadableFormat` or
    /// `Network`; `SessionError::Config` for an invalid configuration.
    pub async fn open(source: AudioSource, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let audio = source.load().await?;
        info!(source = %source, duration = audio.duration(), "Audio loaded");
        let mut session = Self::new(audio, config)?;
        session.source = Some(source);
        Ok(session)
    }

    /// Replaces the registry used to look up named plot functions.
    ///
    /// Only affects thread isolation; a worker process uses the functions
    /// compiled into the worker executable.
    #[must_use]
    pub fn with_registry(mut self, registry: PlotRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    /// Replaces the audio output (thread isolation only).
    #[must_use]
    pub fn with_output_factory(mut self, factory: OutputFactory) -> Self {
        self.output_factory = Some(factory);
        self
    }

    /// Replaces the notifier shown relayed errors, or disables it.
    #[must_use]
    pub fn with_notifier(mut self, notifier: Option<Arc<dyn ErrorNotifier>>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Binds a plot function; returns the plot's index.
    ///
    /// # Errors
    ///
    /// - `SessionError::PlotAfterStart` once the session has started
    /// - `SessionError::AlreadyStopped` once it has stopped
    pub fn plot(&mut self, binding: PlotBinding) -> Result<usize> {
        match self.mirror.status() {
            SessionStatus::Created => {
                self.plots.push(binding);
                Ok(self.plots.len() - 1)
            }
            SessionStatus::Running => Err(SessionError::PlotAfterStart),
            SessionStatus::Stopping | SessionStatus::Stopped => Err(SessionError::AlreadyStopped),
        }
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Spawns the audio worker and one worker per bound plot.
    ///
    /// # Errors
    ///
    /// - `SessionError::AlreadyRunning` if the session is running
    /// - `SessionError::AlreadyStopped` if it has stopped
    /// - `SessionError::Spawn` or `SessionError::InlinePlotInProcess` if a
    ///   worker cannot be started (nothing is left running)
    pub async fn start(&mut self) -> Result<()> {
        match self.mirror.status() {
            SessionStatus::Created => {}
            SessionStatus::Running => return Err(SessionError::AlreadyRunning),
            SessionStatus::Stopping | SessionStatus::Stopped => {
                return Err(SessionError::AlreadyStopped)
            }
        }

        let plan = LaunchPlan {
            audio: self.audio.clone(),
            source: self.source.clone(),
            config: self.config.clone(),
            registry: Arc::clone(&self.registry),
            output_factory: self.output_factory.clone(),
            origin_stack: capture_origin_stack(),
        };
        let state = self.mirror.snapshot();
        let initial = InitialTransport {
            time: state.time,
            volume: state.volume,
            playing: !state.paused,
            looping: state.looping,
        };

        let mut spill: Option<Spill> = None;
        let mut workers = Vec::with_capacity(self.plots.len() + 1);
        workers.push(plan.spawn_audio(initial, &mut spill).await?);
        for (index, binding) in self.plots.iter().enumerate() {
            workers.push(plan.spawn_plot(index, binding, &mut spill).await?);
        }

        let (sender, commands) = mpsc::channel(COMMAND_CAPACITY);
        let parts = SupervisorParts {
            config: self.config.clone(),
            mirror: self.mirror.clone(),
            errors: self.errors.clone(),
            notifier: self.notifier.clone(),
            cancel: self.cancel.clone(),
            spill,
        };
        let supervisor = Supervisor::new(parts, workers, commands);
        let task = tokio::spawn(supervisor.run());
        self.supervisor = Some(SupervisorHandle {
            sender,
            _task: task,
        });

        info!(
            plots = self.plots.len(),
            isolation = ?self.config.isolation,
            "Session started"
        );
        Ok(())
    }

    /// Stops every worker. Calling it again is a no-op.
    ///
    /// With `force_close_plots = false` and `close_with_last_plot = false`
    /// plot surfaces stay open until the user closes them.
    pub async fn stop(&self, force_close_plots: bool) -> Result<()> {
        match self.mirror.status() {
            SessionStatus::Created => {
                debug!("Stop before start");
                self.mirror.set_status(SessionStatus::Stopped);
                return Ok(());
            }
            SessionStatus::Stopping | SessionStatus::Stopped => return Ok(()),
            SessionStatus::Running => {}
        }
        let Some(handle) = &self.supervisor else {
            return Ok(());
        };
        let (tx, rx) = oneshot::channel();
        let command = SupervisorCommand::Stop {
            force: force_close_plots,
            respond_to: tx,
        };
        if handle.sender.send(command).await.is_ok() {
            // The supervisor is gone if the reply never comes, which means stopped
            let _ = rx.await;
        }
        Ok(())
    }

    /// Waits until every worker has exited.
    ///
    /// Returns at once for a session that was never started. With
    /// `close_with_last_plot = false` the session is stopped once no plot is
    /// open any more.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Timeout` if `timeout` elapses first. The session
    /// keeps running in that case.
    pub async fn join(&self, timeout: Option<Duration>) -> Result<()> {
        if self.mirror.status() == SessionStatus::Created {
            return Ok(());
        }
        let wait = self.wait_stopped();
        match timeout {
            Some(limit) => tokio::time::timeout(limit, wait)
                .await
                .map_err(|_| SessionError::Timeout {
                    operation: "join",
                    duration: limit,
                })?,
            None => wait.await,
        }
    }

    async fn wait_stopped(&self) -> Result<()> {
        let mut rx = self.mirror.subscribe();
        loop {
            let (status, open, pending) = {
                let state = rx.borrow_and_update();
                (state.status, state.open_plots, state.pending_plots)
            };
            match status {
                SessionStatus::Stopped => return Ok(()),
                SessionStatus::Running
                    if !self.config.close_with_last_plot && open == 0 && pending == 0 =>
                {
                    self.stop(false).await?;
                }
                _ => {}
            }
            if rx.changed().await.is_err() {
                return Ok(());
            }
        }
    }

    // ========================================================================
    // Errors
    // ========================================================================

    /// Drains pending worker errors and returns the first one.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::Worker` if any worker failed since the last
    /// call.
    pub fn check(&self) -> Result<()> {
        let mut errors = self.errors.drain().into_iter();
        match errors.next() {
            Some(first) => {
                for later in errors {
                    warn!(error = %later, "Dropping additional worker error");
                }
                Err(SessionError::Worker(Box::new(first)))
            }
            None => Ok(()),
        }
    }

    /// Drains and returns every pending worker error.
    pub fn retrieve_errors(&self) -> Vec<WorkerError> {
        self.errors.drain()
    }

    // ========================================================================
    // Plots
    // ========================================================================

    /// Waits until `count` plots are open (all bound plots by default).
    ///
    /// Also returns once no plot is still opening, so a plot that failed
    /// instead of opening does not block the wait.
    ///
    /// # Errors
    ///
    /// `SessionError::Timeout` if `timeout` elapses first.
    pub async fn wait_for_plots_opening(
        &self,
        count: Option<usize>,
        timeout: Option<Duration>,
    ) -> Result<()> {
        let wanted = count.unwrap_or(self.plots.len());
        let mut rx = self.mirror.subscribe();
        let wait = async move {
            loop {
                let done = {
                    let state = rx.borrow_and_update();
                    state.open_plots >= wanted
                        || (state.status != SessionStatus::Created && state.pending_plots == 0)
                };
                if done || rx.changed().await.is_err() {
                    return;
                }
            }
        };
        match timeout {
            Some(limit) => {
                tokio::time::timeout(limit, wait)
                    .await
                    .map_err(|_| SessionError::Timeout {
                        operation: "wait_for_plots_opening",
                        duration: limit,
                    })
            }
            None => {
                wait.await;
                Ok(())
            }
        }
    }

    /// Writes an image of every open plot into the configured save folder.
    ///
    /// Playback is paused while the plots write and resumed afterwards.
    /// Images are named `<title>_<frame>`.
    ///
    /// # Errors
    ///
    /// - `SessionError::NotRunning` unless the session is running
    /// - `SessionError::ImageSave` if the folder cannot be created or a plot
    ///   failed to write its image
    /// - `SessionError::Timeout` if the plots do not answer in time
    pub async fn save_plot_images(&self, frame: u64) -> Result<Vec<PathBuf>> {
        let handle = self.running_handle()?;
        let folder = self.config.save_folder.clone();
        tokio::fs::create_dir_all(&folder)
            .await
            .map_err(|e| SessionError::ImageSave(format!("{}: {e}", folder.display())))?;

        let was_playing = !self.paused();
        if was_playing {
            self.pause().await?;
        }

        let (tx, rx) = oneshot::channel();
        let command = SupervisorCommand::SaveFrame {
            frame,
            folder,
            respond_to: tx,
        };
        handle
            .sender
            .send(command)
            .await
            .map_err(|_| SessionError::NotRunning)?;
        let result = match tokio::time::timeout(SAVE_TIMEOUT, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SessionError::NotRunning),
            Err(_) => Err(SessionError::Timeout {
                operation: "save_plot_images",
                duration: SAVE_TIMEOUT,
            }),
        };

        if was_playing && self.is_running() {
            self.play().await?;
        }
        result
    }

    /// Number of plots currently showing.
    pub fn open_plots(&self) -> usize {
        self.mirror.read(|state| state.open_plots)
    }

    /// Number of plots spawned by this session.
    pub fn total_spawned_plots(&self) -> usize {
        self.mirror.read(|state| state.total_spawned_plots)
    }

    /// Process ids of workers running in their own process.
    pub fn worker_pids(&self) -> Vec<u32> {
        self.mirror
            .read(|state| state.workers.iter().filter_map(|w| w.pid).collect())
    }

    // ========================================================================
    // Properties
    // ========================================================================

    /// Playhead in seconds.
    pub fn time(&self) -> f64 {
        self.mirror.read(|state| state.time)
    }

    pub fn volume(&self) -> f32 {
        self.mirror.read(|state| state.volume)
    }

    pub fn paused(&self) -> bool {
        self.mirror.read(|state| state.paused)
    }

    pub fn looping(&self) -> bool {
        self.mirror.read(|state| state.looping)
    }

    pub fn is_running(&self) -> bool {
        self.mirror.status() == SessionStatus::Running
    }

    /// Clip length in seconds.
    pub fn duration(&self) -> f64 {
        self.audio.duration()
    }

    pub fn sample_rate(&self) -> u32 {
        self.audio.sample_rate()
    }

    pub fn audio(&self) -> &AudioData {
        &self.audio
    }

    /// Snapshot of the mirrored state.
    pub fn state(&self) -> MirroredState {
        self.mirror.snapshot()
    }

    /// Receiver notified whenever the mirrored state changes.
    pub fn subscribe(&self) -> watch::Receiver<MirroredState> {
        self.mirror.subscribe()
    }

    /// Moves the playhead (clamped to the clip) without changing play state.
    ///
    /// # Errors
    ///
    /// `SessionError::NotRunning` once the session has stopped.
    pub async fn seek(&self, time: f64) -> Result<()> {
        self.transport(Command::Seek { time }).await
    }

    /// Alias of [`Session::seek`].
    pub async fn set_time(&self, time: f64) -> Result<()> {
        self.seek(time).await
    }

    /// Sets the volume, clamped to `[0, 1]`. NaN is ignored.
    pub async fn set_volume(&self, volume: f32) -> Result<()> {
        self.transport(Command::SetVolume { volume }).await
    }

    pub async fn set_paused(&self, paused: bool) -> Result<()> {
        if paused {
            self.pause().await
        } else {
            self.play().await
        }
    }

    /// Starts or resumes playback; restarts from 0 after the end of the clip.
    pub async fn play(&self) -> Result<()> {
        self.transport(Command::Play).await
    }

    pub async fn pause(&self) -> Result<()> {
        self.transport(Command::Pause).await
    }

    pub async fn set_looping(&self, looping: bool) -> Result<()> {
        self.transport(Command::SetLoop { looping }).await
    }

    /// Applies a transport command.
    ///
    /// Before `start()` only the initial state is changed.
    async fn transport(&self, command: Command) -> Result<()> {
        if self.mirror.status() == SessionStatus::Created {
            self.mirror.apply_offline(command);
            return Ok(());
        }
        let handle = self.running_handle()?;
        let (tx, rx) = oneshot::channel();
        handle
            .sender
            .send(SupervisorCommand::Transport {
                command,
                respond_to: tx,
            })
            .await
            .map_err(|_| SessionError::NotRunning)?;
        let seq = rx.await.map_err(|_| SessionError::NotRunning)??;
        debug!(seq, ?command, "Transport command sent");
        Ok(())
    }

    fn running_handle(&self) -> Result<&SupervisorHandle> {
        match (&self.supervisor, self.mirror.status()) {
            (Some(handle), SessionStatus::Running) => Ok(handle),
            _ => Err(SessionError::NotRunning),
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("duration", &self.duration())
            .field("plots", &self.plots)
            .field("state", &self.mirror.snapshot())
            .finish_non_exhaustive()
    }
}
